//! Per-field code generation: the dispatch table that maps a descriptor
//! field kind onto default factories, wire conversions, and reflection
//! metadata.
//!
//! The wire-facing integer kinds collapse into four families here; the
//! fixed/zigzag encodings only differ on the wire, which the scratch proto
//! object handles itself.

use prost_types::field_descriptor_proto::Type;

use fastproto_schema::{EnumEntry, FieldView, MessageEntry, TypeIndex};

use crate::model::Node;
use crate::GenerateError;

/// Value family a field belongs to. Every conversion and default decision
/// keys off this, never off the raw descriptor kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float,
    Double,
    Bool,
    Bytes,
    Str,
    Enum,
    Message,
    Group,
}

impl Family {
    pub fn of(kind: Type) -> Family {
        match kind {
            Type::Int32 | Type::Sfixed32 | Type::Sint32 => Family::Int32,
            Type::Uint32 | Type::Fixed32 => Family::Uint32,
            Type::Int64 | Type::Sfixed64 | Type::Sint64 => Family::Int64,
            Type::Uint64 | Type::Fixed64 => Family::Uint64,
            Type::Float => Family::Float,
            Type::Double => Family::Double,
            Type::Bool => Family::Bool,
            Type::Bytes => Family::Bytes,
            Type::String => Family::Str,
            Type::Enum => Family::Enum,
            Type::Message => Family::Message,
            Type::Group => Family::Group,
        }
    }
}

/// One field with its type references resolved against the index. The
/// struct emitter builds one of these per field and asks it for the pieces
/// that vary by family.
pub struct FieldGen<'a> {
    field: FieldView<'a>,
    family: Family,
    message: Option<&'a MessageEntry>,
    enumeration: Option<&'a EnumEntry>,
}

impl<'a> FieldGen<'a> {
    /// Resolve message/enum type references eagerly so a dangling reference
    /// fails the whole run before any output is produced.
    pub fn resolve(
        field: FieldView<'a>,
        index: &'a TypeIndex,
        context: &str,
    ) -> Result<FieldGen<'a>, GenerateError> {
        let family = Family::of(field.kind());
        let context = format!("{}.{}", context, field.name());
        let message = match family {
            Family::Message | Family::Group => Some(index.message(field.type_ref(), &context)?),
            _ => None,
        };
        let enumeration = match family {
            Family::Enum => Some(index.enumeration(field.type_ref(), &context)?),
            _ => None,
        };
        Ok(FieldGen {
            field,
            family,
            message,
            enumeration,
        })
    }

    pub fn field(&self) -> &FieldView<'a> {
        &self.field
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn is_message(&self) -> bool {
        self.message.is_some()
    }

    /// Storage member name, `field_<name>`.
    pub fn member(&self) -> String {
        format!("field_{}", self.field.storage_name())
    }

    /// Presence member name for optional fields.
    pub fn has_member(&self) -> String {
        format!("has_field_{}", self.field.storage_name())
    }

    /// Accessor name on the scratch C++ proto object. protoc's C++ output
    /// lowercases field names and escapes keyword collisions the same way
    /// our storage members do.
    pub fn cpp_accessor(&self) -> String {
        fastproto_schema::names::storage_field_name(&self.field.name().to_ascii_lowercase())
    }

    fn wrapper_path(&self) -> &str {
        self.message.map(|m| m.wrapper_path.as_str()).unwrap_or("")
    }

    fn ruby_message_path(&self) -> &str {
        self.message
            .map(|m| m.ruby_class_path.as_str())
            .unwrap_or("")
    }

    /// Body of the `default_factory_<name>(VALUE self, bool constructor)`
    /// method. Message fields are the interesting case: optional
    /// submessages stay nil while constructing so that recursive message
    /// types cannot overflow the stack, and get faulted in by the getter.
    pub fn default_factory_body(&self) -> Vec<Node> {
        if self.field.is_repeated() {
            return vec![Node::line("return rb_ary_new();")];
        }
        match self.family {
            Family::Int32 | Family::Uint32 | Family::Int64 | Family::Uint64 => {
                vec![Node::line("return LONG2NUM(0);")]
            }
            Family::Float | Family::Double => vec![Node::line("return DBL2NUM(0.0);")],
            Family::Bool => vec![Node::line("return Qfalse;")],
            Family::Bytes => vec![Node::line("return rb_str_new2(\"\");")],
            Family::Str => vec![Node::line("return RSTR_AS_UTF8(rb_str_new2(\"\"));")],
            Family::Enum => {
                let number = self
                    .enumeration
                    .and_then(|e| e.values.first())
                    .map(|(_, n)| *n)
                    .unwrap_or(0);
                vec![Node::line(format!("return INT2NUM({});", number))]
            }
            Family::Message | Family::Group => vec![Node::if_else(
                format!(
                    "{} || !constructor",
                    if self.field.is_required() { "true" } else { "false" }
                ),
                vec![
                    Node::line(format!(
                        "auto obj = rb_funcall(rb_path2class(\"{}\"), rb_intern(\"new\"), 0);",
                        self.ruby_message_path()
                    )),
                    Node::line(
                        "// The parent back-reference lets a subfield write flip our presence bit.",
                    ),
                    Node::line("rb_ivar_set(obj, rb_intern(\"@parent_for_notify\"), self);"),
                    Node::line(format!(
                        "rb_ivar_set(obj, rb_intern(\"@tag_for_notify\"), INT2NUM({}));",
                        self.field.tag()
                    )),
                    Node::line("return obj;"),
                ],
                vec![Node::line("return Qnil;")],
            )],
        }
    }

    /// The guarded block in `to_proto_obj` that writes this field onto the
    /// scratch proto. Runs under `rb_protect`; a conversion failure jumps
    /// straight out to the protect handler.
    pub fn to_proto_node(&self) -> Node {
        let member = self.member();

        if self.field.is_repeated() {
            let mut loop_body = vec![Node::line(format!(
                "VALUE array_el = rb_ary_entry(_self->{}, i);",
                member
            ))];
            loop_body.extend(self.to_proto_op("array_el", "add"));
            return Node::braced(
                format!("for (long i = 0; i < rb_array_len(_self->{}); i++)", member),
                loop_body,
            );
        }

        let op = self.to_proto_op(&format!("_self->{}", member), "set");
        if self.field.is_optional() {
            Node::if_else(
                format!("_self->{}", self.has_member()),
                op,
                vec![Node::line(format!(
                    "_cpp_proto->clear_{}();",
                    self.cpp_accessor()
                ))],
            )
        } else {
            Node::braced("if (true)", op)
        }
    }

    fn to_proto_op(&self, value: &str, verb: &str) -> Vec<Node> {
        let accessor = self.cpp_accessor();
        let plain = |conv: String| -> Vec<Node> {
            vec![Node::line(format!(
                "_cpp_proto->{}_{}({});",
                verb, accessor, conv
            ))]
        };
        match self.family {
            Family::Int32 => plain(format!("NUM2INT_S({})", value)),
            Family::Uint32 => plain(format!("NUM2UINT_S({})", value)),
            Family::Int64 => plain(format!("NUM2LONG_S({})", value)),
            Family::Uint64 => plain(format!("NUM2ULONG_S({})", value)),
            Family::Float => plain(format!("static_cast<float>(NUM2DBL({}))", value)),
            Family::Double => plain(format!("NUM2DBL({})", value)),
            Family::Bool => plain(format!("VAL2BOOL_S({})", value)),
            Family::Bytes | Family::Str => plain(format!(
                "RSTRING_PTR({value}), RSTRING_LEN({value})",
                value = value
            )),
            Family::Enum => {
                let cpp_enum = self
                    .enumeration
                    .map(|e| e.cpp_proto_path.as_str())
                    .unwrap_or("int");
                plain(format!("static_cast<{}>(NUM2INT_S({}))", cpp_enum, value))
            }
            Family::Message | Family::Group => {
                let wrapper = self.wrapper_path();
                let ruby_path = self.ruby_message_path();
                let target = if verb == "add" {
                    format!("_cpp_proto->add_{}()", accessor)
                } else {
                    format!("_cpp_proto->mutable_{}()", accessor)
                };
                vec![
                    Node::line(format!("Check_Type({}, T_DATA);", value)),
                    Node::if_else(
                        format!("CLASS_OF({}) != rb_path2class(\"{}\")", value, ruby_path),
                        vec![Node::line(format!(
                            "rb_raise(rb_eTypeError, \"{} not a {}\");",
                            self.field.name(),
                            ruby_path
                        ))],
                        vec![
                            Node::line(format!("{}* cpp_nested;", wrapper)),
                            Node::line(format!(
                                "Data_Get_Struct({}, {}, cpp_nested);",
                                value, wrapper
                            )),
                            Node::line(format!("cpp_nested->to_proto_obj({});", target)),
                        ],
                    ),
                ]
            }
        }
    }

    /// The guarded block in `from_proto_obj` that reads this field back
    /// off a parsed proto.
    pub fn from_proto_node(&self) -> Node {
        let member = self.member();
        let accessor = self.cpp_accessor();

        if self.field.is_repeated() {
            return Node::braced(
                "if (true)",
                vec![
                    Node::line(format!(
                        "{} = rb_ary_new_capa(cpp_proto.{}_size());",
                        member, accessor
                    )),
                    Node::braced(
                        format!("for (auto&& array_el : cpp_proto.{}())", accessor),
                        self.from_proto_repeated_op(),
                    ),
                ],
            );
        }

        let mut op = self.from_proto_single_op();
        if self.field.is_optional() {
            op.push(Node::line(format!("{} = true;", self.has_member())));
            Node::if_else(
                format!("cpp_proto.has_{}()", accessor),
                op,
                vec![Node::line(format!("{} = false;", self.has_member()))],
            )
        } else {
            Node::braced("if (true)", op)
        }
    }

    fn from_proto_single_op(&self) -> Vec<Node> {
        let member = self.member();
        let getter = format!("cpp_proto.{}()", self.cpp_accessor());
        let assign = |conv: String| -> Vec<Node> {
            vec![Node::line(format!("{} = {};", member, conv))]
        };
        match self.family {
            Family::Int32 => assign(format!("INT2NUM({})", getter)),
            Family::Uint32 => assign(format!("UINT2NUM({})", getter)),
            Family::Int64 => assign(format!("LONG2NUM({})", getter)),
            Family::Uint64 => assign(format!("ULONG2NUM({})", getter)),
            Family::Float | Family::Double => assign(format!("DBL2NUM({})", getter)),
            Family::Bool => assign(format!("BOOL2VAL_S({})", getter)),
            Family::Bytes => assign(format!(
                "rb_str_new({getter}.data(), {getter}.length())",
                getter = getter
            )),
            Family::Str => assign(format!(
                "RSTR_AS_UTF8(rb_str_new({getter}.data(), {getter}.length()))",
                getter = getter
            )),
            Family::Enum => assign(format!("INT2NUM(static_cast<int>({}))", getter)),
            Family::Message | Family::Group => {
                let wrapper = self.wrapper_path();
                vec![Node::scope(vec![
                    Node::line(format!("this->{} = {}::alloc();", member, wrapper)),
                    Node::line(format!("rb_obj_call_init(this->{}, 0, nullptr);", member)),
                    Node::line(format!("{}* cpp_nested;", wrapper)),
                    Node::line(format!(
                        "Data_Get_Struct(this->{}, {}, cpp_nested);",
                        member, wrapper
                    )),
                    Node::line(format!("cpp_nested->from_proto_obj({});", getter)),
                ])]
            }
        }
    }

    fn from_proto_repeated_op(&self) -> Vec<Node> {
        let member = self.member();
        let push = |conv: &str| -> Vec<Node> {
            vec![Node::line(format!("rb_ary_push({}, {});", member, conv))]
        };
        match self.family {
            Family::Int32 => push("INT2NUM(array_el)"),
            Family::Uint32 => push("UINT2NUM(array_el)"),
            Family::Int64 => push("LONG2NUM(array_el)"),
            Family::Uint64 => push("ULONG2NUM(array_el)"),
            Family::Float | Family::Double => push("DBL2NUM(array_el)"),
            Family::Bool => push("BOOL2VAL_S(array_el)"),
            Family::Bytes => push("rb_str_new(array_el.data(), array_el.length())"),
            Family::Str => push("RSTR_AS_UTF8(rb_str_new(array_el.data(), array_el.length()))"),
            Family::Enum => push("INT2NUM(static_cast<int>(array_el))"),
            Family::Message | Family::Group => {
                let wrapper = self.wrapper_path();
                vec![Node::scope(vec![
                    Node::line(format!("VALUE new_obj = {}::alloc();", wrapper)),
                    Node::line("rb_obj_call_init(new_obj, 0, nullptr);"),
                    Node::line(format!("rb_ary_push({}, new_obj);", member)),
                    Node::line(format!("{}* cpp_nested;", wrapper)),
                    Node::line(format!("Data_Get_Struct(new_obj, {}, cpp_nested);", wrapper)),
                    Node::line("cpp_nested->from_proto_obj(array_el);"),
                ])]
            }
        }
    }

    /// Statements registering this field into the memoized `@@fields` hash,
    /// keyed by tag. Each family maps to one of the bootstrap Field
    /// classes; enums additionally carry both value<->name maps.
    pub fn reflection_nodes(&self) -> Vec<Node> {
        let tag = self.field.tag();
        let name = self.field.name();
        let repeated = if self.field.is_repeated() {
            "Qtrue"
        } else {
            "Qfalse"
        };

        let simple = |cls: &str| -> Vec<Node> {
            vec![Node::line(format!(
                "rb_hash_aset(fields, LONG2FIX({tag}), rb_funcall({cls}, rb_intern(\"new\"), 3, LONG2FIX({tag}), rb_str_new2(\"{name}\"), {repeated}));",
            ))]
        };

        match self.family {
            Family::Int32 | Family::Uint32 | Family::Int64 | Family::Uint64 => {
                simple("cls_fastproto_field_integer")
            }
            Family::Float | Family::Double => simple("cls_fastproto_field_float"),
            Family::Bool => simple("cls_fastproto_field_bool"),
            Family::Bytes => simple("cls_fastproto_field_bytes"),
            Family::Str => simple("cls_fastproto_field_string"),
            Family::Enum => {
                let mut body = vec![
                    Node::line("auto enum_value_to_name = rb_hash_new();"),
                    Node::line("auto enum_name_to_value = rb_hash_new();"),
                ];
                if let Some(entry) = self.enumeration {
                    for (value_name, number) in &entry.values {
                        body.push(Node::line(format!(
                            "rb_hash_aset(enum_value_to_name, LONG2FIX({number}), rb_str_new2(\"{value_name}\"));",
                        )));
                        body.push(Node::line(format!(
                            "rb_hash_aset(enum_name_to_value, rb_str_new2(\"{value_name}\"), LONG2FIX({number}));",
                        )));
                    }
                }
                body.push(Node::line(format!(
                    "rb_hash_aset(fields, LONG2FIX({tag}), rb_funcall(cls_fastproto_field_enum, rb_intern(\"new\"), 5, LONG2FIX({tag}), rb_str_new2(\"{name}\"), {repeated}, enum_value_to_name, enum_name_to_value));",
                )));
                vec![Node::scope(body)]
            }
            Family::Message | Family::Group => {
                let cls = if self.family == Family::Group {
                    "cls_fastproto_field_group"
                } else {
                    "cls_fastproto_field_message"
                };
                let wrapper = self.wrapper_path();
                vec![Node::line(format!(
                    "rb_hash_aset(fields, LONG2FIX({tag}), rb_funcall({cls}, rb_intern(\"new\"), 4, LONG2FIX({tag}), rb_str_new2(\"{name}\"), {repeated}, {wrapper}::rb_cls));",
                ))]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::render_nodes;
    use prost_types::field_descriptor_proto::Label;
    use prost_types::{
        EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    };

    fn field(name: &str, number: i32, kind: Type, label: Label) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            r#type: Some(kind as i32),
            label: Some(label as i32),
            ..Default::default()
        }
    }

    fn enum_file() -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some("test/kinds.proto".to_string()),
            package: Some("test".to_string()),
            enum_type: vec![EnumDescriptorProto {
                name: Some("Kind".to_string()),
                value: vec![
                    EnumValueDescriptorProto {
                        name: Some("FIRST".to_string()),
                        number: Some(7),
                        ..Default::default()
                    },
                    EnumValueDescriptorProto {
                        name: Some("SECOND".to_string()),
                        number: Some(9),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn empty_index() -> TypeIndex {
        TypeIndex::build(&[])
    }

    #[test]
    fn test_integer_kinds_collapse_into_families() {
        assert_eq!(Family::of(Type::Sfixed32), Family::Int32);
        assert_eq!(Family::of(Type::Sint32), Family::Int32);
        assert_eq!(Family::of(Type::Fixed32), Family::Uint32);
        assert_eq!(Family::of(Type::Sint64), Family::Int64);
        assert_eq!(Family::of(Type::Fixed64), Family::Uint64);
    }

    #[test]
    fn test_required_int32_uses_strict_conversion() {
        let proto = field("shard", 1, Type::Int32, Label::Required);
        let index = empty_index();
        let gen =
            FieldGen::resolve(FieldView::new(&proto), &index, "test.Msg").expect("scalar resolves");

        let text = render_nodes(&[gen.to_proto_node()]);
        assert!(text.contains("_cpp_proto->set_shard(NUM2INT_S(_self->field_shard));"));
        assert!(!text.contains("clear_shard"));
    }

    #[test]
    fn test_optional_field_clears_when_unset() {
        let proto = field("label", 2, Type::String, Label::Optional);
        let index = empty_index();
        let gen =
            FieldGen::resolve(FieldView::new(&proto), &index, "test.Msg").expect("scalar resolves");

        let text = render_nodes(&[gen.to_proto_node()]);
        assert!(text.contains("if (_self->has_field_label) {"));
        assert!(text.contains("_cpp_proto->clear_label();"));

        let back = render_nodes(&[gen.from_proto_node()]);
        assert!(back.contains("if (cpp_proto.has_label()) {"));
        assert!(back.contains("has_field_label = true;"));
        assert!(back.contains("has_field_label = false;"));
    }

    #[test]
    fn test_repeated_field_loops_array() {
        let proto = field("ids", 3, Type::Uint64, Label::Repeated);
        let index = empty_index();
        let gen =
            FieldGen::resolve(FieldView::new(&proto), &index, "test.Msg").expect("scalar resolves");

        let text = render_nodes(&[gen.to_proto_node()]);
        assert!(text.contains("rb_array_len(_self->field_ids)"));
        assert!(text.contains("_cpp_proto->add_ids(NUM2ULONG_S(array_el));"));

        let back = render_nodes(&[gen.from_proto_node()]);
        assert!(back.contains("rb_ary_new_capa(cpp_proto.ids_size())"));
        assert!(back.contains("rb_ary_push(field_ids, ULONG2NUM(array_el));"));
    }

    #[test]
    fn test_enum_field_defaults_to_first_declared_value() {
        let file = enum_file();
        let index = TypeIndex::build(std::slice::from_ref(&file));

        let mut proto = field("kind", 4, Type::Enum, Label::Required);
        proto.type_name = Some(".test.Kind".to_string());
        let gen =
            FieldGen::resolve(FieldView::new(&proto), &index, "test.Msg").expect("enum resolves");

        let text = render_nodes(&gen.default_factory_body());
        assert!(text.contains("return INT2NUM(7);"));

        let to = render_nodes(&[gen.to_proto_node()]);
        assert!(to.contains("static_cast<::test::Kind>(NUM2INT_S(_self->field_kind))"));
    }

    #[test]
    fn test_unknown_type_reference_is_an_error() {
        let mut proto = field("thing", 5, Type::Message, Label::Optional);
        proto.type_name = Some(".missing.Thing".to_string());
        let index = empty_index();

        assert!(FieldGen::resolve(FieldView::new(&proto), &index, "test.Msg").is_err());
    }

    #[test]
    fn test_keyword_field_name_is_escaped_in_storage_only() {
        let proto = field("class", 6, Type::Int32, Label::Required);
        let index = empty_index();
        let gen =
            FieldGen::resolve(FieldView::new(&proto), &index, "test.Msg").expect("scalar resolves");

        assert_eq!(gen.member(), "field_class_");
        // The wire accessor matches the scratch proto's own keyword
        // mangling, so set_class_() lines up with the .pb.h API.
        assert_eq!(gen.cpp_accessor(), "class_");
    }

    #[test]
    fn test_reflection_enum_carries_value_maps() {
        let file = enum_file();
        let index = TypeIndex::build(std::slice::from_ref(&file));

        let mut proto = field("kind", 4, Type::Enum, Label::Optional);
        proto.type_name = Some(".test.Kind".to_string());
        let gen =
            FieldGen::resolve(FieldView::new(&proto), &index, "test.Msg").expect("enum resolves");

        let text = render_nodes(&gen.reflection_nodes());
        assert!(text.contains("cls_fastproto_field_enum"));
        assert!(
            text.contains("rb_hash_aset(enum_value_to_name, LONG2FIX(7), rb_str_new2(\"FIRST\"));")
        );
        assert!(
            text.contains("rb_hash_aset(enum_name_to_value, rb_str_new2(\"FIRST\"), LONG2FIX(7));")
        );
    }
}
