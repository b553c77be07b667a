//! End-to-end generation over an in-memory `CodeGeneratorRequest`.

use prost_types::compiler::CodeGeneratorRequest;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, MethodDescriptorProto, ServiceDescriptorProto,
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

fn message_field(name: &str, number: i32, label: Label, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        r#type: Some(Type::Message as i32),
        label: Some(label as i32),
        type_name: Some(type_name.to_string()),
        ..Default::default()
    }
}

fn sample_request() -> CodeGeneratorRequest {
    let file = FileDescriptorProto {
        name: Some("acme/geometry.proto".to_string()),
        package: Some("acme.geo".to_string()),
        message_type: vec![
            DescriptorProto {
                name: Some("Point".to_string()),
                field: vec![
                    field("x", 1, Type::Int32, Label::Required),
                    field("y", 2, Type::Int32, Label::Required),
                    field("label", 3, Type::String, Label::Optional),
                    field("class", 4, Type::Uint64, Label::Optional),
                    field("color", 5, Type::Enum, Label::Optional).with_type_name(".acme.geo.Color"),
                ],
                ..Default::default()
            },
            DescriptorProto {
                name: Some("Path".to_string()),
                field: vec![
                    message_field("points", 1, Label::Repeated, ".acme.geo.Point"),
                    message_field("origin", 2, Label::Optional, ".acme.geo.Point"),
                    field("closed", 3, Type::Bool, Label::Optional),
                ],
                nested_type: vec![DescriptorProto {
                    name: Some("Style".to_string()),
                    field: vec![field("width", 1, Type::Double, Label::Optional)],
                    ..Default::default()
                }],
                ..Default::default()
            },
        ],
        enum_type: vec![EnumDescriptorProto {
            name: Some("Color".to_string()),
            value: vec![
                EnumValueDescriptorProto {
                    name: Some("RED".to_string()),
                    number: Some(3),
                    ..Default::default()
                },
                EnumValueDescriptorProto {
                    name: Some("GREEN".to_string()),
                    number: Some(7),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }],
        service: vec![ServiceDescriptorProto {
            name: Some("Plotter".to_string()),
            method: vec![MethodDescriptorProto {
                name: Some("DrawPath".to_string()),
                input_type: Some(".acme.geo.Path".to_string()),
                output_type: Some(".acme.geo.Point".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    };

    CodeGeneratorRequest {
        file_to_generate: vec!["acme/geometry.proto".to_string()],
        proto_file: vec![file],
        ..Default::default()
    }
}

trait WithTypeName {
    fn with_type_name(self, type_name: &str) -> Self;
}

impl WithTypeName for FieldDescriptorProto {
    fn with_type_name(mut self, type_name: &str) -> Self {
        self.type_name = Some(type_name.to_string());
        self
    }
}

fn content_of<'a>(
    response: &'a prost_types::compiler::CodeGeneratorResponse,
    name: &str,
) -> &'a str {
    response
        .file
        .iter()
        .find(|f| f.name() == name && f.insertion_point.is_none())
        .unwrap_or_else(|| panic!("no generated file named {}", name))
        .content()
}

#[test]
fn test_response_layout() {
    let response = fastproto_codegen::generate(&sample_request()).expect("generates");

    // Three bootstrap files, then header + cpp + two insertion edits.
    let names: Vec<&str> = response.file.iter().map(|f| f.name()).collect();
    assert_eq!(
        names,
        vec![
            "rb_fastproto_init.h",
            "rb_fastproto_init.cpp",
            "extconf.rb",
            "acme/geometry.h",
            "acme/geometry.cpp",
            "rb_fastproto_init.cpp",
            "rb_fastproto_init.cpp",
        ]
    );
    let insertions: Vec<&str> = response
        .file
        .iter()
        .filter_map(|f| f.insertion_point.as_deref())
        .collect();
    assert_eq!(insertions, vec!["init_file_header", "init_entrypoints"]);
}

#[test]
fn test_missing_file_to_generate_is_an_error() {
    let mut request = sample_request();
    request.file_to_generate = vec!["acme/absent.proto".to_string()];
    assert!(fastproto_codegen::generate(&request).is_err());
}

#[test]
fn test_two_int32_conversions_are_strict_and_ordered() {
    let response = fastproto_codegen::generate(&sample_request()).expect("generates");
    let cpp = content_of(&response, "acme/geometry.cpp");

    let x = cpp
        .find("_cpp_proto->set_x(NUM2INT_S(_self->field_x));")
        .expect("tag 1 conversion");
    let y = cpp
        .find("_cpp_proto->set_y(NUM2INT_S(_self->field_y));")
        .expect("tag 2 conversion");
    assert!(x < y);

    assert!(cpp.contains("field_x = INT2NUM(cpp_proto.x());"));
}

#[test]
fn test_keyword_field_storage_is_escaped_but_accessor_is_not() {
    let response = fastproto_codegen::generate(&sample_request()).expect("generates");
    let header = content_of(&response, "acme/geometry.h");
    let cpp = content_of(&response, "acme/geometry.cpp");

    assert!(header.contains("VALUE field_class_;"));
    assert!(cpp.contains("rb_define_method(rb_cls, \"class=\", RUBY_METHOD_FUNC(&set_class_), 1);"));
    // The C++ proto accessor keeps protoc's own keyword escaping.
    assert!(cpp.contains("_cpp_proto->set_class_(NUM2ULONG_S(_self->field_class_));"));
}

#[test]
fn test_enum_field_defaults_to_first_declared_value() {
    let response = fastproto_codegen::generate(&sample_request()).expect("generates");
    let cpp = content_of(&response, "acme/geometry.cpp");

    // RED = 3 is declared first; the default is its number, not zero or nil.
    let factory = cpp
        .find("VALUE rb_fastproto_gen::Acme::Geo::RBPoint::default_factory_color")
        .or_else(|| cpp.find("VALUE RBPoint::default_factory_color"))
        .expect("color default factory");
    let window = &cpp[factory..factory + 200];
    assert!(window.contains("return INT2NUM(3);"));
}

#[test]
fn test_optional_submessage_is_lazy_in_constructor() {
    let response = fastproto_codegen::generate(&sample_request()).expect("generates");
    let cpp = content_of(&response, "acme/geometry.cpp");

    let factory = cpp
        .find("VALUE RBPath::default_factory_origin(VALUE self, bool constructor)")
        .expect("origin default factory");
    let window = &cpp[factory..factory + 600];
    assert!(window.contains("if (false || !constructor) {"));
    assert!(window.contains("rb_ivar_set(obj, rb_intern(\"@parent_for_notify\"), self);"));
    assert!(window.contains("return Qnil;"));
}

#[test]
fn test_unknown_fields_survive_both_directions() {
    let response = fastproto_codegen::generate(&sample_request()).expect("generates");
    let cpp = content_of(&response, "acme/geometry.cpp");

    assert!(cpp.contains(
        "_cpp_proto->GetReflection()->MutableUnknownFields(_cpp_proto)->MergeFrom(_self->unknown_fields);"
    ));
    assert!(cpp.contains(
        "this->unknown_fields.MergeFrom(cpp_proto.GetReflection()->GetUnknownFields(cpp_proto));"
    ));
}

#[test]
fn test_each_class_registered_exactly_once() {
    let response = fastproto_codegen::generate(&sample_request()).expect("generates");
    let cpp = content_of(&response, "acme/geometry.cpp");

    for needle in [
        "rb_define_class_under(package_rb_module, \"Point\", cls_fastproto_message)",
        "rb_define_class_under(package_rb_module, \"Path\", cls_fastproto_message)",
        "rb_define_class_under(RBPath::rb_cls, \"Style\", cls_fastproto_message)",
        "rb_define_class_under(package_rb_module, \"Color\", cls_fastproto_enum)",
        "rb_define_class_under(package_rb_module, \"Plotter\", cls_fastproto_service)",
        "rb_define_class_under(RBPlotter::rb_cls, \"DrawPath\", cls_fastproto_method)",
    ] {
        assert_eq!(cpp.matches(needle).count(), 1, "needle: {}", needle);
    }
}

#[test]
fn test_dynamic_tag_accessors_resolve_descriptor_and_raise_key_error() {
    let response = fastproto_codegen::generate(&sample_request()).expect("generates");
    let cpp = content_of(&response, "acme/geometry.cpp");

    // All three tag-based accessors resolve against the static descriptor
    // and raise KeyError on a miss.
    for signature in [
        "VALUE RBPoint::value_for_tag(VALUE self, VALUE tag)",
        "VALUE RBPoint::set_value_for_tag(VALUE self, VALUE tag, VALUE val)",
        "VALUE RBPoint::has_value_for_tag(VALUE self, VALUE tag)",
    ] {
        let start = cpp.find(signature).unwrap_or_else(|| panic!("missing {}", signature));
        let window = &cpp[start..start + 700];
        assert!(
            window.contains("::acme::geo::Point::descriptor()->FindFieldByNumber(NUM2INT(tag))"),
            "{} does not resolve the tag against the descriptor",
            signature
        );
        assert!(
            window.contains("rb_raise(rb_eKeyError, \"Tag not found\");"),
            "{} does not raise KeyError on a miss",
            signature
        );
    }

    // The hit path forwards to the named accessor.
    assert!(cpp.contains("auto method = rb_intern(field_descriptor->name().c_str());"));
    assert!(cpp.contains(
        "auto method = rb_intern(std::string(field_descriptor->name() + \"=\").c_str());"
    ));
    assert!(cpp.contains(
        "auto method = rb_intern((std::string(\"has_\") + field_descriptor->name() + \"?\").c_str());"
    ));
}

#[test]
fn test_repeated_message_field_loops_and_recurses() {
    let response = fastproto_codegen::generate(&sample_request()).expect("generates");
    let cpp = content_of(&response, "acme/geometry.cpp");

    assert!(cpp.contains("cpp_nested->to_proto_obj(_cpp_proto->add_points());"));
    assert!(cpp.contains("field_points = rb_ary_new_capa(cpp_proto.points_size());"));
    assert!(cpp.contains("rb_gc_mark(cpp_this->field_points);"));
}

#[test]
fn test_service_metadata_points_at_wrapper_classes() {
    let response = fastproto_codegen::generate(&sample_request()).expect("generates");
    let cpp = content_of(&response, "acme/geometry.cpp");

    assert!(cpp.contains("return RBPath::rb_cls;"));
    assert!(cpp.contains("return RBPoint::rb_cls;"));
    assert!(cpp.contains("return ID2SYM(rb_intern(\"draw_path\"));"));
}

#[test]
fn test_fields_reflection_is_memoized_per_class() {
    let response = fastproto_codegen::generate(&sample_request()).expect("generates");
    let cpp = content_of(&response, "acme/geometry.cpp");

    assert!(cpp.contains("rb_cv_set(rb_cls, \"@@fields\", Qnil);"));
    assert!(cpp.contains("auto fields = rb_cv_get(rb_cls, \"@@fields\");"));
    assert!(cpp.contains(
        "rb_funcall(cls_fastproto_field_message, rb_intern(\"new\"), 4, LONG2FIX(2), rb_str_new2(\"origin\"), Qfalse, RBPoint::rb_cls)"
    ));
}
