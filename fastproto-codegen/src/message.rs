//! The message struct emitter.
//!
//! For every message descriptor this produces one C++ wrapper struct: a
//! header declaration plus the implementation pieces the class needs to
//! live as a Ruby object. Ruby values are the only storage; a scratch C++
//! proto object exists just for the duration of one serialize/parse call.

use fastproto_schema::{MessageView, TypeIndex};

use crate::enums::EnumGen;
use crate::fields::FieldGen;
use crate::model::{ClassDecl, Method, Node};
use crate::GenerateError;

pub struct MessageGen<'a> {
    view: MessageView<'a>,
    index: &'a TypeIndex,
    fields: Vec<FieldGen<'a>>,
}

impl<'a> MessageGen<'a> {
    pub fn new(view: MessageView<'a>, index: &'a TypeIndex) -> Result<Self, GenerateError> {
        let full_name = view.full_name();
        let fields = view
            .fields()
            .into_iter()
            .map(|f| FieldGen::resolve(f, index, &full_name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MessageGen {
            view,
            index,
            fields,
        })
    }

    pub fn wrapper_path(&self) -> String {
        self.view.wrapper_path()
    }

    fn nested(&self) -> Result<Vec<MessageGen<'a>>, GenerateError> {
        self.view
            .nested_messages()
            .into_iter()
            .map(|m| MessageGen::new(m, self.index))
            .collect()
    }

    fn nested_enums(&self) -> Vec<EnumGen<'a>> {
        self.view
            .nested_enums()
            .into_iter()
            .map(EnumGen::new)
            .collect()
    }

    /// The struct declaration for the header, nested types included.
    pub fn header_decl(&self) -> Result<ClassDecl, GenerateError> {
        let mut decl = ClassDecl::new(self.view.wrapper_name());

        decl.members.push(
            "// Distinguishes a constructed object from a zeroed allocation, so ::free()"
                .to_string(),
        );
        decl.members
            .push("// knows whether the destructor must run.".to_string());
        decl.members.push("bool have_initialized;".to_string());
        decl.members.push("static VALUE rb_cls;".to_string());
        decl.members.push("bool is_default_value;".to_string());
        for field in &self.fields {
            decl.members.push(format!("VALUE {};", field.member()));
            if field.field().is_optional() {
                decl.members.push(format!("bool {};", field.has_member()));
            }
        }
        // Unknown fields survive a parse/serialize round trip but are
        // never surfaced to Ruby.
        decl.members
            .push("google::protobuf::UnknownFieldSet unknown_fields;".to_string());

        let name = self.view.wrapper_name();
        decl.declarations.push(format!("{}(VALUE rb_self);", name));
        decl.declarations.push(format!("~{}() = default;", name));
        decl.declarations
            .push("static void initialize_class();".to_string());
        decl.declarations
            .push("static VALUE alloc(VALUE self);".to_string());
        decl.declarations.push("static VALUE alloc();".to_string());
        decl.declarations
            .push("static VALUE initialize(int argc, VALUE* argv, VALUE self);".to_string());
        decl.declarations
            .push("static void free(char* memory);".to_string());
        decl.declarations
            .push("static void mark(char* memory);".to_string());
        decl.declarations
            .push("static VALUE validate(VALUE self);".to_string());
        decl.declarations
            .push("static VALUE serialize_to_string(VALUE self);".to_string());
        decl.declarations
            .push("static VALUE serialize_to_string_with_gvl(VALUE self);".to_string());
        decl.declarations
            .push("static VALUE parse(VALUE self, VALUE buffer);".to_string());
        decl.declarations
            .push("static VALUE value_for_tag(VALUE self, VALUE tag);".to_string());
        decl.declarations
            .push("static VALUE set_value_for_tag(VALUE self, VALUE tag, VALUE val);".to_string());
        decl.declarations
            .push("static VALUE has_value_for_tag(VALUE self, VALUE tag);".to_string());
        decl.declarations
            .push("static VALUE get_nested(int argc, VALUE* argv, VALUE self);".to_string());
        decl.declarations
            .push("static VALUE get_nested_bang(int argc, VALUE* argv, VALUE self);".to_string());
        decl.declarations.push(
            "static VALUE notify_default_changed(VALUE self, VALUE sender, VALUE notify_tag);"
                .to_string(),
        );
        decl.declarations
            .push("static VALUE equal_to(VALUE self, VALUE other);".to_string());
        decl.declarations
            .push("static VALUE inspect(VALUE self);".to_string());
        decl.declarations
            .push("static VALUE singleton_parse(VALUE self, VALUE buffer);".to_string());
        decl.declarations
            .push("static VALUE singleton_field_for_name(VALUE self, VALUE name);".to_string());
        decl.declarations
            .push("static VALUE singleton_fields(VALUE self);".to_string());
        decl.declarations
            .push("static VALUE singleton_fully_qualified_name(VALUE self);".to_string());
        for field in &self.fields {
            let storage = field.field().storage_name();
            decl.declarations
                .push(format!("static VALUE get_{}(VALUE self);", storage));
            decl.declarations
                .push(format!("static VALUE set_{}(VALUE self, VALUE val);", storage));
            decl.declarations
                .push(format!("static VALUE has_{}(VALUE self);", storage));
            decl.declarations.push(format!(
                "static VALUE default_factory_{}(VALUE self, bool constructor);",
                storage
            ));
        }
        let cpp_proto = self.view.cpp_proto_path();
        decl.declarations
            .push(format!("VALUE to_proto_obj({}* cpp_proto);", cpp_proto));
        decl.declarations
            .push(format!("VALUE from_proto_obj(const {}& cpp_proto);", cpp_proto));

        for nested_enum in self.nested_enums() {
            decl.nested.push(nested_enum.header_decl());
        }
        for nested in self.nested()? {
            decl.nested.push(nested.header_decl()?);
        }
        Ok(decl)
    }

    /// All implementation pieces for this message, nested types included.
    pub fn impl_nodes(&self) -> Result<Vec<Node>, GenerateError> {
        let full_name = self.view.full_name();
        let mut nodes = vec![
            Node::Blank,
            Node::line("// ----"),
            Node::line(format!("// begin message: {}", full_name)),
            Node::line("// ----"),
            Node::Blank,
        ];

        nodes.push(self.constructor());
        nodes.push(self.static_initializer());
        nodes.extend(self.default_factories());
        nodes.extend(self.accessors());
        nodes.extend(self.dynamic_accessors());
        nodes.push(self.to_proto_obj());
        nodes.push(self.from_proto_obj());
        nodes.extend(self.allocators());
        nodes.push(self.validator());
        nodes.extend(self.serializer());
        nodes.push(self.parser());
        nodes.push(self.equality());
        nodes.push(self.inspect());
        nodes.extend(self.singletons());

        nodes.push(Node::line(format!(
            "VALUE {}::rb_cls = Qnil;",
            self.wrapper_path()
        )));

        for nested_enum in self.nested_enums() {
            nodes.extend(nested_enum.impl_nodes());
        }
        for nested in self.nested()? {
            nodes.extend(nested.impl_nodes()?);
        }

        nodes.push(Node::Blank);
        nodes.push(Node::line("// ----"));
        nodes.push(Node::line(format!("// end message: {}", full_name)));
        nodes.push(Node::line("// ----"));
        nodes.push(Node::Blank);
        Ok(nodes)
    }

    fn constructor(&self) -> Node {
        let mut body = Vec::new();
        for field in &self.fields {
            body.push(Node::line(format!(
                "{} = default_factory_{}(rb_self, true);",
                field.member(),
                field.field().storage_name()
            )));
            if field.field().is_optional() {
                body.push(Node::line(format!("{} = false;", field.has_member())));
            }
        }
        Method::new(
            format!(
                "{}::{}(VALUE rb_self) : have_initialized(true), is_default_value(true)",
                self.wrapper_path(),
                self.view.wrapper_name()
            ),
            body,
        )
        .into_node()
    }

    fn static_initializer(&self) -> Node {
        let parent = match self.view.parent_wrapper_path() {
            Some(parent) => format!("{}::rb_cls", parent),
            None => "package_rb_module".to_string(),
        };

        let mut body = vec![
            Node::line(format!(
                "rb_cls = rb_define_class_under({}, \"{}\", cls_fastproto_message);",
                parent,
                self.view.name()
            )),
            Node::line("rb_define_alloc_func(rb_cls, &alloc);"),
            Node::line("rb_define_method(rb_cls, \"initialize\", RUBY_METHOD_FUNC(&initialize), -1);"),
            Node::line("rb_define_method(rb_cls, \"validate!\", RUBY_METHOD_FUNC(&validate), 0);"),
            Node::line(
                "rb_define_method(rb_cls, \"serialize_to_string\", RUBY_METHOD_FUNC(&serialize_to_string), 0);",
            ),
            Node::line("rb_define_alias(rb_cls, \"to_s\", \"serialize_to_string\");"),
            Node::line(
                "rb_define_method(rb_cls, \"serialize_to_string_with_gvl\", RUBY_METHOD_FUNC(&serialize_to_string_with_gvl), 0);",
            ),
            Node::line("rb_define_method(rb_cls, \"parse\", RUBY_METHOD_FUNC(&parse), 1);"),
            Node::line("rb_define_method(rb_cls, \"value_for_tag\", RUBY_METHOD_FUNC(&value_for_tag), 1);"),
            Node::line(
                "rb_define_method(rb_cls, \"set_value_for_tag\", RUBY_METHOD_FUNC(&set_value_for_tag), 2);",
            ),
            Node::line(
                "rb_define_method(rb_cls, \"value_for_tag?\", RUBY_METHOD_FUNC(&has_value_for_tag), 1);",
            ),
            Node::line("rb_define_method(rb_cls, \"get\", RUBY_METHOD_FUNC(&get_nested), -1);"),
            Node::line("rb_define_method(rb_cls, \"get!\", RUBY_METHOD_FUNC(&get_nested_bang), -1);"),
            Node::line(
                "rb_define_method(rb_cls, \"notify_default_changed\", RUBY_METHOD_FUNC(&notify_default_changed), 2);",
            ),
            Node::line("rb_define_method(rb_cls, \"equal_to\", RUBY_METHOD_FUNC(&equal_to), 1);"),
            Node::line("rb_define_alias(rb_cls, \"eql?\", \"equal_to\");"),
            Node::line("rb_define_alias(rb_cls, \"==\", \"equal_to\");"),
            Node::line("rb_define_method(rb_cls, \"inspect\", RUBY_METHOD_FUNC(&inspect), 0);"),
            Node::line("rb_define_method(rb_cls, \"fields\", RUBY_METHOD_FUNC(&singleton_fields), 0);"),
            Node::line(
                "rb_define_method(rb_cls, \"fully_qualified_name\", RUBY_METHOD_FUNC(&singleton_fully_qualified_name), 0);",
            ),
            Node::line(
                "rb_define_method(rb_cls, \"field_for_name\", RUBY_METHOD_FUNC(&singleton_field_for_name), 1);",
            ),
            Node::line(
                "rb_define_singleton_method(rb_cls, \"parse\", RUBY_METHOD_FUNC(&singleton_parse), 1);",
            ),
            Node::line(
                "rb_define_singleton_method(rb_cls, \"fields\", RUBY_METHOD_FUNC(&singleton_fields), 0);",
            ),
            Node::line(
                "rb_define_singleton_method(rb_cls, \"field_for_name\", RUBY_METHOD_FUNC(&singleton_field_for_name), 1);",
            ),
            Node::line(
                "rb_define_singleton_method(rb_cls, \"fully_qualified_name\", RUBY_METHOD_FUNC(&singleton_fully_qualified_name), 0);",
            ),
            Node::line("rb_cv_set(rb_cls, \"@@fields\", Qnil);"),
            Node::Blank,
        ];

        for field in &self.fields {
            let ruby_name = field.field().name();
            let storage = field.field().storage_name();
            body.push(Node::line(format!(
                "rb_define_method(rb_cls, \"{}\", RUBY_METHOD_FUNC(&get_{}), 0);",
                ruby_name, storage
            )));
            body.push(Node::line(format!(
                "rb_define_method(rb_cls, \"{}=\", RUBY_METHOD_FUNC(&set_{}), 1);",
                ruby_name, storage
            )));
            body.push(Node::line(format!(
                "rb_define_method(rb_cls, \"has_{}?\", RUBY_METHOD_FUNC(&has_{}), 0);",
                ruby_name, storage
            )));
        }

        body.push(Node::line(format!(
            "rb_funcall(rb_cv_get(cls_fastproto_message, \"@@message_classes\"), rb_intern(\"[]=\"), 2, rb_str_new2(\"{}\"), rb_cls);",
            self.view.full_name()
        )));

        for nested_enum in self.nested_enums() {
            body.push(Node::line(format!(
                "{}::initialize_class();",
                nested_enum.wrapper_path()
            )));
        }
        for nested in self.view.nested_messages() {
            body.push(Node::line(format!(
                "{}::initialize_class();",
                nested.wrapper_path()
            )));
        }

        Method::new(
            format!("void {}::initialize_class()", self.wrapper_path()),
            body,
        )
        .into_node()
    }

    fn default_factories(&self) -> Vec<Node> {
        self.fields
            .iter()
            .map(|field| {
                Method::new(
                    format!(
                        "VALUE {}::default_factory_{}(VALUE self, bool constructor)",
                        self.wrapper_path(),
                        field.field().storage_name()
                    ),
                    field.default_factory_body(),
                )
                .into_node()
            })
            .collect()
    }

    fn accessors(&self) -> Vec<Node> {
        let class = self.wrapper_path();
        let mut nodes = Vec::new();
        for field in &self.fields {
            let storage = field.field().storage_name();
            let member = field.member();

            // Setter: nil means unset, anything else is stored raw. Type
            // errors surface later, when the value meets the wire.
            let mut set_body = vec![
                Node::line(format!("{}* cpp_self;", class)),
                Node::line(format!("Data_Get_Struct(self, {}, cpp_self);", class)),
                Node::braced(
                    "if (RB_OBJ_FROZEN(self))",
                    vec![
                        Node::line("rb_raise(rb_eRuntimeError, \"Message is frozen\");"),
                        Node::line("return Qnil;"),
                    ],
                ),
            ];
            let mut unset_arm = vec![Node::line(format!(
                "cpp_self->{} = default_factory_{}(self, false);",
                member, storage
            ))];
            if field.field().is_optional() {
                unset_arm.push(Node::line(format!(
                    "cpp_self->{} = false;",
                    field.has_member()
                )));
            }
            let mut set_arm = vec![Node::line(format!("cpp_self->{} = val;", member))];
            if field.field().is_optional() {
                set_arm.push(Node::line(format!(
                    "cpp_self->{} = true;",
                    field.has_member()
                )));
            }
            // First real write flips is_default_value and fires the
            // one-shot parent notification, then severs the link.
            set_arm.push(Node::braced(
                "if (cpp_self->is_default_value)",
                vec![
                    Node::line("cpp_self->is_default_value = false;"),
                    Node::braced(
                        "if (rb_ivar_get(self, rb_intern(\"@parent_for_notify\")) != Qnil)",
                        vec![
                            Node::line(
                                "VALUE parent_for_notify = rb_ivar_get(self, rb_intern(\"@parent_for_notify\"));",
                            ),
                            Node::line(
                                "VALUE notify_tag = rb_ivar_get(self, rb_intern(\"@tag_for_notify\"));",
                            ),
                            Node::line(
                                "rb_funcall(parent_for_notify, rb_intern(\"notify_default_changed\"), 2, self, notify_tag);",
                            ),
                            Node::line(
                                "rb_ivar_set(self, rb_intern(\"@parent_for_notify\"), Qnil);",
                            ),
                        ],
                    ),
                ],
            ));
            set_body.push(Node::if_else("val == Qnil", unset_arm, set_arm));
            set_body.push(Node::line("return Qnil;"));
            nodes.push(
                Method::new(
                    format!("VALUE {}::set_{}(VALUE self, VALUE val)", class, storage),
                    set_body,
                )
                .into_node(),
            );

            // Getter: message fields left nil by the constructor fault in
            // here, on first read.
            let mut get_body = vec![
                Node::line(format!("{}* cpp_self;", class)),
                Node::line(format!("Data_Get_Struct(self, {}, cpp_self);", class)),
            ];
            if field.is_message() {
                get_body.push(Node::braced(
                    format!("if (cpp_self->{} == Qnil)", member),
                    vec![Node::line(format!(
                        "cpp_self->{} = default_factory_{}(self, false);",
                        member, storage
                    ))],
                ));
            }
            get_body.push(Node::line(format!("return cpp_self->{};", member)));
            nodes.push(
                Method::new(
                    format!("VALUE {}::get_{}(VALUE self)", class, storage),
                    get_body,
                )
                .into_node(),
            );

            let has_body = if field.field().is_optional() {
                vec![
                    Node::line(format!("{}* cpp_self;", class)),
                    Node::line(format!("Data_Get_Struct(self, {}, cpp_self);", class)),
                    Node::line(format!(
                        "return cpp_self->{} ? Qtrue : Qfalse;",
                        field.has_member()
                    )),
                ]
            } else {
                vec![Node::line("return Qtrue;")]
            };
            nodes.push(
                Method::new(
                    format!("VALUE {}::has_{}(VALUE self)", class, storage),
                    has_body,
                )
                .into_node(),
            );
        }
        nodes
    }

    fn dynamic_accessors(&self) -> Vec<Node> {
        let class = self.wrapper_path();
        let cpp_proto = self.view.cpp_proto_path();

        let lookup = |raise_miss: &str| -> Vec<Node> {
            vec![
                Node::line("Check_Type(tag, T_FIXNUM);"),
                Node::line(format!(
                    "auto field_descriptor = {}::descriptor()->FindFieldByNumber(NUM2INT(tag));",
                    cpp_proto
                )),
                Node::braced(
                    "if (field_descriptor == nullptr)",
                    vec![
                        Node::line(format!("rb_raise(rb_eKeyError, \"{}\");", raise_miss)),
                        Node::line("return Qnil;"),
                    ],
                ),
            ]
        };

        let mut value_for_tag = lookup("Tag not found");
        value_for_tag.push(Node::line(
            "auto method = rb_intern(field_descriptor->name().c_str());",
        ));
        value_for_tag.push(Node::line("return rb_funcall(self, method, 0);"));

        let mut set_value_for_tag = lookup("Tag not found");
        set_value_for_tag.push(Node::line(
            "auto method = rb_intern(std::string(field_descriptor->name() + \"=\").c_str());",
        ));
        set_value_for_tag.push(Node::line("return rb_funcall(self, method, 1, val);"));

        let mut has_value_for_tag = lookup("Tag not found");
        has_value_for_tag.push(Node::line(
            "auto method = rb_intern((std::string(\"has_\") + field_descriptor->name() + \"?\").c_str());",
        ));
        has_value_for_tag.push(Node::line("return rb_funcall(self, method, 0);"));

        let get_nested = Node::lines(
            "VALUE field_sym = Qnil;\n\
             VALUE rest = Qnil;\n\
             rb_scan_args(argc, argv, \"1*\", &field_sym, &rest);\n\
             ID field_sym_id;\n\
             ID has_field_sym_id;\n\
             if (TYPE(field_sym) == T_STRING) {\n\
                 field_sym_id = rb_intern_str(field_sym);\n\
                 std::string has_f(\"has_\");\n\
                 has_f += std::string(RSTRING_PTR(field_sym), RSTRING_LEN(field_sym));\n\
                 has_f += \"?\";\n\
                 has_field_sym_id = rb_intern(has_f.c_str());\n\
             } else if (TYPE(field_sym) == T_SYMBOL) {\n\
                 field_sym_id = SYM2ID(field_sym);\n\
                 VALUE field_sym_str = rb_funcall(field_sym, rb_intern(\"to_s\"), 0);\n\
                 std::string has_f(\"has_\");\n\
                 has_f += std::string(RSTRING_PTR(field_sym_str), RSTRING_LEN(field_sym_str));\n\
                 has_f += \"?\";\n\
                 has_field_sym_id = rb_intern(has_f.c_str());\n\
             } else {\n\
                 rb_raise(rb_eTypeError, \"Not a symbol or string\");\n\
                 return Qnil;\n\
             }\n\
             VALUE first_obj = Qnil;\n\
             if (rb_funcall(self, has_field_sym_id, 0) == Qtrue) {\n\
                 first_obj = rb_funcall(self, field_sym_id, 0);\n\
             }\n\
             if (first_obj == Qnil) {\n\
                 return Qnil;\n\
             } else if (argc >= 2) {\n\
                 return rb_funcall2(first_obj, rb_intern(\"get\"), argc - 1, argv + 1);\n\
             } else {\n\
                 return first_obj;\n\
             }",
        );

        let get_nested_bang = vec![
            Node::line("VALUE obj = get_nested(argc, argv, self);"),
            Node::if_else(
                "obj == Qnil",
                vec![
                    Node::line("rb_raise(rb_eArgError, \"Field is not set\");"),
                    Node::line("return Qnil;"),
                ],
                vec![Node::line("return obj;")],
            ),
        ];

        let notify = vec![
            Node::line("int field_num = NUM2INT(notify_tag);"),
            Node::line("// Presence only means anything for optional fields."),
            Node::braced(
                format!(
                    "if (!{}::descriptor()->FindFieldByNumber(field_num)->is_optional())",
                    cpp_proto
                ),
                vec![Node::line("return Qnil;")],
            ),
            Node::line("VALUE current_field_value = value_for_tag(self, notify_tag);"),
            Node::braced(
                "if (current_field_value != sender)",
                vec![Node::line("return Qnil;")],
            ),
            Node::line("set_value_for_tag(self, notify_tag, current_field_value);"),
            Node::line("return Qnil;"),
        ];

        vec![
            Method::new(
                format!("VALUE {}::value_for_tag(VALUE self, VALUE tag)", class),
                value_for_tag,
            )
            .into_node(),
            Method::new(
                format!(
                    "VALUE {}::set_value_for_tag(VALUE self, VALUE tag, VALUE val)",
                    class
                ),
                set_value_for_tag,
            )
            .into_node(),
            Method::new(
                format!("VALUE {}::has_value_for_tag(VALUE self, VALUE tag)", class),
                has_value_for_tag,
            )
            .into_node(),
            Method::new(
                format!("VALUE {}::get_nested(int argc, VALUE* argv, VALUE self)", class),
                get_nested,
            )
            .into_node(),
            Method::new(
                format!(
                    "VALUE {}::get_nested_bang(int argc, VALUE* argv, VALUE self)",
                    class
                ),
                get_nested_bang,
            )
            .into_node(),
            Method::new(
                format!(
                    "VALUE {}::notify_default_changed(VALUE self, VALUE sender, VALUE notify_tag)",
                    class
                ),
                notify,
            )
            .into_node(),
        ]
    }

    fn to_proto_obj(&self) -> Node {
        let class = self.wrapper_path();
        let cpp_proto = self.view.cpp_proto_path();

        // The conversion body runs inside rb_protect so a longjmp from a
        // conversion macro cannot skip our C++ destructors; the exception
        // is carried back to the caller as a VALUE instead.
        let mut dangerous_body = vec![
            Node::line("auto data = reinterpret_cast<dangerous_func_data*>(rb_data_object_get(data_as_value));"),
            Node::line("auto _cpp_proto = data->cpp_proto;"),
            Node::line("auto _self = data->self;"),
        ];
        for field in &self.fields {
            dangerous_body.push(field.to_proto_node());
        }
        dangerous_body.push(Node::line(
            "_cpp_proto->GetReflection()->MutableUnknownFields(_cpp_proto)->MergeFrom(_self->unknown_fields);",
        ));
        dangerous_body.push(Node::line("return Qnil;"));

        let mut body = vec![
            Node::braced_with(
                "struct dangerous_func_data",
                vec![
                    Node::line("decltype(cpp_proto) cpp_proto;"),
                    Node::line(format!("{}* self;", class)),
                ],
                "};",
            ),
            Node::braced_with(
                "auto dangerous_func = [](VALUE data_as_value) -> VALUE",
                dangerous_body,
                "};",
            ),
        ];
        body.extend(Node::lines(
            "int exc_status;\n\
             dangerous_func_data data_struct;\n\
             data_struct.cpp_proto = cpp_proto;\n\
             data_struct.self = this;\n\
             VALUE data_struct_as_value = rb_data_object_wrap(rb_cObject, &data_struct, nullptr, [](void*) {});\n\
             rb_protect(dangerous_func, data_struct_as_value, &exc_status);",
        ));
        body.push(Node::if_else(
            "exc_status",
            vec![
                Node::line("auto err = rb_errinfo();"),
                Node::line("rb_set_errinfo(Qnil);"),
                Node::line("return err;"),
            ],
            vec![Node::line("return Qnil;")],
        ));

        Method::new(
            format!("VALUE {}::to_proto_obj({}* cpp_proto)", class, cpp_proto),
            body,
        )
        .into_node()
    }

    fn from_proto_obj(&self) -> Node {
        let class = self.wrapper_path();
        let cpp_proto = self.view.cpp_proto_path();

        let mut body = Vec::new();
        for field in &self.fields {
            body.push(field.from_proto_node());
        }
        body.push(Node::line(
            "this->unknown_fields.MergeFrom(cpp_proto.GetReflection()->GetUnknownFields(cpp_proto));",
        ));
        body.push(Node::line("return Qnil;"));

        Method::new(
            format!(
                "VALUE {}::from_proto_obj(const {}& cpp_proto)",
                class, cpp_proto
            ),
            body,
        )
        .into_node()
    }

    fn allocators(&self) -> Vec<Node> {
        let class = self.wrapper_path();

        let alloc = Method::new(
            format!("VALUE {}::alloc(VALUE self)", class),
            vec![
                Node::line(format!("auto memory = ruby_xmalloc(sizeof({}));", class)),
                Node::line("// A zeroed have_initialized tells ::free() to skip the destructor."),
                Node::line(format!("std::memset(memory, 0, sizeof({}));", class)),
                Node::line("return Data_Wrap_Struct(self, &mark, &free, memory);"),
            ],
        );

        let alloc_default = Method::new(
            format!("VALUE {}::alloc()", class),
            vec![Node::line(format!(
                "return alloc(rb_path2class(\"{}\"));",
                self.view.ruby_class_path()
            ))],
        );

        let initialize = Method::new(
            format!("VALUE {}::initialize(int argc, VALUE* argv, VALUE self)", class),
            {
                let mut body = vec![
                    Node::line("void* memory;"),
                    Node::line("Data_Get_Struct(self, void*, memory);"),
                    Node::line(format!("new (memory) {}(self);", class)),
                    Node::line("VALUE attrs = Qnil;"),
                    Node::line("rb_scan_args(argc, argv, \"01\", &attrs);"),
                ];
                body.push(Node::braced(
                    "if (attrs != Qnil)",
                    Node::lines(
                        "Check_Type(attrs, T_HASH);\n\
                         // The lambda must decay to a plain function pointer for rb_block_call.\n\
                         auto key_iterator = static_cast<VALUE (*)(VALUE, VALUE, int, VALUE*)>(\n\
                         \u{20}   [](VALUE block_arg, VALUE _self, int argc, VALUE* argv) -> VALUE {\n\
                         \u{20}   if (argc != 1) rb_raise(rb_eRuntimeError, \"unexpected arity from Hash#each\");\n\
                         \u{20}   Check_Type(argv[0], T_ARRAY);\n\
                         \u{20}   VALUE key = rb_ary_entry(argv[0], 0);\n\
                         \u{20}   VALUE value = rb_ary_entry(argv[0], 1);\n\
                         \u{20}   if (TYPE(key) == T_SYMBOL) {\n\
                         \u{20}       key = rb_funcall(key, rb_intern(\"to_s\"), 0);\n\
                         \u{20}   }\n\
                         \u{20}   Check_Type(key, T_STRING);\n\
                         \u{20}   ID assign_key = rb_intern((std::string(RSTRING_PTR(key), RSTRING_LEN(key)) + \"=\").c_str());\n\
                         \u{20}   return rb_funcall(_self, assign_key, 1, value);\n\
                         });\n\
                         rb_block_call(attrs, rb_intern(\"each\"), 0, nullptr, RUBY_METHOD_FUNC(key_iterator), self);",
                    ),
                ));
                body.push(Node::line("return self;"));
                body
            },
        );

        let free = Method::new(
            format!("void {}::free(char* memory)", class),
            vec![
                Node::line(format!("auto obj = reinterpret_cast<{}*>(memory);", class)),
                Node::braced(
                    "if (obj->have_initialized)",
                    vec![Node::line(format!("obj->~{}();", self.view.wrapper_name()))],
                ),
                Node::line("ruby_xfree(memory);"),
            ],
        );

        let mut mark_body = vec![Node::line(format!(
            "auto cpp_this = reinterpret_cast<{}*>(memory);",
            class
        ))];
        for field in &self.fields {
            mark_body.push(Node::line(format!(
                "rb_gc_mark(cpp_this->{});",
                field.member()
            )));
        }
        let mark = Method::new(format!("void {}::mark(char* memory)", class), mark_body);

        vec![
            alloc.into_node(),
            alloc_default.into_node(),
            initialize.into_node(),
            free.into_node(),
            mark.into_node(),
        ]
    }

    fn validator(&self) -> Node {
        let class = self.wrapper_path();
        let cpp_proto = self.view.cpp_proto_path();
        Method::new(
            format!("VALUE {}::validate(VALUE self)", class),
            vec![
                Node::line(format!("{}* cpp_self;", class)),
                Node::line(format!("Data_Get_Struct(self, {}, cpp_self);", class)),
                Node::line(format!("{} cpp_proto;", cpp_proto)),
                Node::line("VALUE ex = cpp_self->to_proto_obj(&cpp_proto);"),
                Node::braced("if (ex != Qnil)", vec![Node::line("rb_exc_raise(ex);")]),
                Node::line("return Qnil;"),
            ],
        )
        .into_node()
    }

    fn serializer(&self) -> Vec<Node> {
        let class = self.wrapper_path();
        let cpp_proto = self.view.cpp_proto_path();

        let serialize = Method::new(
            format!("VALUE {}::serialize_to_string(VALUE self)", class),
            {
                let mut body = vec![Node::braced_with(
                    "struct serialize_args",
                    vec![
                        Node::line(format!("{}* cpp_proto;", cpp_proto)),
                        Node::line("size_t pb_size;"),
                        Node::line("char* rb_buffer_ptr;"),
                    ],
                    "};",
                )];
                body.extend(Node::lines(&format!(
                    "{class}* cpp_self;\n\
                     Data_Get_Struct(self, {class}, cpp_self);\n\
                     serialize_args args;\n\
                     {cpp_proto} cpp_proto;\n\
                     VALUE ex = cpp_self->to_proto_obj(&cpp_proto);\n\
                     if (ex != Qnil) {{\n\
                     \u{20}   rb_exc_raise(ex);\n\
                     }}\n\
                     args.cpp_proto = &cpp_proto;\n\
                     args.pb_size = cpp_proto.ByteSizeLong();\n\
                     VALUE rb_str = rb_str_new(\"\", 0);\n\
                     rb_str_resize(rb_str, args.pb_size);\n\
                     args.rb_buffer_ptr = RSTRING_PTR(rb_str);",
                    class = class,
                    cpp_proto = cpp_proto
                )));
                body.push(Node::line(
                    "// The byte-buffer walk holds no Ruby state, so drop the GVL for it.",
                ));
                body.extend(Node::lines(
                    "rb_thread_call_without_gvl(\n\
                     \u{20}   [](void* _args_void) -> void* {\n\
                     \u{20}       auto _args = reinterpret_cast<serialize_args*>(_args_void);\n\
                     \u{20}       _args->cpp_proto->SerializeToArray(_args->rb_buffer_ptr, static_cast<int>(_args->pb_size));\n\
                     \u{20}       return nullptr;\n\
                     \u{20}   },\n\
                     \u{20}   &args, RUBY_UBF_IO, nullptr\n\
                     );\n\
                     return rb_str;",
                ));
                body
            },
        );

        let serialize_with_gvl = Method::new(
            format!("VALUE {}::serialize_to_string_with_gvl(VALUE self)", class),
            Node::lines(&format!(
                "{class}* cpp_self;\n\
                 Data_Get_Struct(self, {class}, cpp_self);\n\
                 {cpp_proto} cpp_proto;\n\
                 VALUE ex = cpp_self->to_proto_obj(&cpp_proto);\n\
                 if (ex != Qnil) {{\n\
                 \u{20}   rb_exc_raise(ex);\n\
                 }}\n\
                 VALUE rb_str = rb_str_new(\"\", 0);\n\
                 auto pb_size = cpp_proto.ByteSizeLong();\n\
                 rb_str_resize(rb_str, pb_size);\n\
                 cpp_proto.SerializeToArray(RSTRING_PTR(rb_str), static_cast<int>(pb_size));\n\
                 return rb_str;",
                class = class,
                cpp_proto = cpp_proto
            )),
        );

        vec![serialize.into_node(), serialize_with_gvl.into_node()]
    }

    fn parser(&self) -> Node {
        let class = self.wrapper_path();
        let cpp_proto = self.view.cpp_proto_path();
        Method::new(
            format!("VALUE {}::parse(VALUE self, VALUE buffer)", class),
            {
                let mut body = vec![Node::braced_with(
                    "struct parse_args",
                    vec![
                        Node::line(format!("{}* cpp_proto;", cpp_proto)),
                        Node::line("size_t pb_size;"),
                        Node::line("char* rb_buffer_ptr;"),
                    ],
                    "};",
                )];
                body.extend(Node::lines(&format!(
                    "{class}* cpp_self;\n\
                     Data_Get_Struct(self, {class}, cpp_self);\n\
                     Check_Type(buffer, T_STRING);\n\
                     parse_args args;\n\
                     args.pb_size = RSTRING_LEN(buffer);\n\
                     args.rb_buffer_ptr = RSTRING_PTR(buffer);\n\
                     {cpp_proto} cpp_proto;\n\
                     args.cpp_proto = &cpp_proto;",
                    class = class,
                    cpp_proto = cpp_proto
                )));
                body.extend(Node::lines(
                    "rb_thread_call_without_gvl(\n\
                     \u{20}   [](void* _args_void) -> void* {\n\
                     \u{20}       auto _args = reinterpret_cast<parse_args*>(_args_void);\n\
                     \u{20}       _args->cpp_proto->ParseFromArray(_args->rb_buffer_ptr, static_cast<int>(_args->pb_size));\n\
                     \u{20}       return nullptr;\n\
                     \u{20}   },\n\
                     \u{20}   &args, RUBY_UBF_IO, nullptr\n\
                     );\n\
                     cpp_self->from_proto_obj(cpp_proto);\n\
                     return Qnil;",
                ));
                body
            },
        )
        .into_node()
    }

    fn equality(&self) -> Node {
        let class = self.wrapper_path();
        let mut body = vec![
            Node::braced(
                "if (rb_funcall(other, rb_intern(\"is_a?\"), 1, rb_cls) != Qtrue)",
                vec![Node::line("return Qfalse;")],
            ),
            Node::line(format!("{} *cpp_self, *cpp_other;", class)),
            Node::line(format!("Data_Get_Struct(self, {}, cpp_self);", class)),
            Node::line(format!("Data_Get_Struct(other, {}, cpp_other);", class)),
            Node::line("// Two untouched messages are equal without looking at fields."),
            Node::braced(
                "if (cpp_self->is_default_value && cpp_other->is_default_value)",
                vec![Node::line("return Qtrue;")],
            ),
        ];
        for field in &self.fields {
            if field.field().is_optional() {
                body.push(Node::braced(
                    format!(
                        "if (cpp_self->{has} != cpp_other->{has})",
                        has = field.has_member()
                    ),
                    vec![Node::line("return Qfalse;")],
                ));
            }
            body.push(Node::braced(
                format!(
                    "if (rb_funcall(cpp_self->{member}, rb_intern(\"==\"), 1, cpp_other->{member}) == Qfalse)",
                    member = field.member()
                ),
                vec![Node::line("return Qfalse;")],
            ));
        }
        body.push(Node::line("return Qtrue;"));
        Method::new(
            format!("VALUE {}::equal_to(VALUE self, VALUE other)", class),
            body,
        )
        .into_node()
    }

    fn inspect(&self) -> Node {
        let class = self.wrapper_path();
        let mut body = vec![
            Node::line(format!("{}* cpp_self;", class)),
            Node::line(format!("Data_Get_Struct(self, {}, cpp_self);", class)),
            Node::line(format!(
                "std::string str(\"#<{}\");",
                self.view.ruby_class_path()
            )),
        ];
        for field in &self.fields {
            body.push(Node::line(format!(
                "str += \" {}=\";",
                field.field().name()
            )));
            let set_check = if field.field().is_optional() {
                format!(
                    "cpp_self->{} && cpp_self->{} != Qnil",
                    field.has_member(),
                    field.member()
                )
            } else {
                format!("cpp_self->{} != Qnil", field.member())
            };
            body.push(Node::if_else(
                set_check,
                vec![
                    Node::line(format!(
                        "VALUE d = rb_funcall(cpp_self->{}, rb_intern(\"inspect\"), 0);",
                        field.member()
                    )),
                    Node::line("str += StringValueCStr(d);"),
                ],
                vec![Node::line("str += \"<unset>\";")],
            ));
        }
        body.push(Node::line("str += \">\";"));
        body.push(Node::line("return rb_str_new2(str.c_str());"));
        Method::new(format!("VALUE {}::inspect(VALUE self)", class), body).into_node()
    }

    fn singletons(&self) -> Vec<Node> {
        let class = self.wrapper_path();

        let parse = Method::new(
            format!("VALUE {}::singleton_parse(VALUE self, VALUE buffer)", class),
            vec![
                Node::line("VALUE msg = rb_funcall(rb_cls, rb_intern(\"new\"), 0);"),
                Node::line("rb_funcall(msg, rb_intern(\"parse\"), 1, buffer);"),
                Node::line("return msg;"),
            ],
        );

        let mut for_name_body = Node::lines(
            "std::string str;\n\
             switch (TYPE(name)) {\n\
             \u{20}   case T_STRING: str = StringValueCStr(name); break;\n\
             \u{20}   case T_SYMBOL: str = rb_id2name(SYM2ID(name)); break;\n\
             \u{20}   default: rb_raise(rb_eTypeError, \"invalid type for name parameter\"); return Qnil;\n\
             }\n\
             auto fields = rb_funcall(rb_cls, rb_intern(\"fields\"), 0);",
        );
        for field in &self.fields {
            let name = field.field().name();
            let lower = name.to_ascii_lowercase();
            let cond = if lower == name {
                format!("str == \"{}\"", name)
            } else {
                format!("str == \"{}\" || str == \"{}\"", name, lower)
            };
            for_name_body.push(Node::braced(
                format!("if ({})", cond),
                vec![Node::line(format!(
                    "return rb_hash_aref(fields, LONG2FIX({}));",
                    field.field().tag()
                ))],
            ));
        }
        for_name_body.push(Node::line("return Qnil;"));
        let for_name = Method::new(
            format!(
                "VALUE {}::singleton_field_for_name(VALUE self, VALUE name)",
                class
            ),
            for_name_body,
        );

        let mut fields_body = vec![
            Node::line("auto fields = rb_cv_get(rb_cls, \"@@fields\");"),
            Node::braced("if (fields != Qnil)", vec![Node::line("return fields;")]),
            Node::line("fields = rb_hash_new();"),
        ];
        for field in &self.fields {
            fields_body.extend(field.reflection_nodes());
        }
        fields_body.push(Node::line("rb_cv_set(rb_cls, \"@@fields\", fields);"));
        fields_body.push(Node::line("return fields;"));
        let fields = Method::new(
            format!("VALUE {}::singleton_fields(VALUE self)", class),
            fields_body,
        );

        let fqn = Method::new(
            format!("VALUE {}::singleton_fully_qualified_name(VALUE self)", class),
            vec![Node::line(format!(
                "return rb_str_new2(\"{}\");",
                self.view.full_name()
            ))],
        );

        vec![
            parse.into_node(),
            for_name.into_node(),
            fields.into_node(),
            fqn.into_node(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::render_nodes;
    use fastproto_schema::FileView;
    use prost_types::field_descriptor_proto::{Label, Type};
    use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto};

    fn field(name: &str, number: i32, kind: Type, label: Label) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            r#type: Some(kind as i32),
            label: Some(label as i32),
            ..Default::default()
        }
    }

    fn sample_file() -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some("test/point.proto".to_string()),
            package: Some("test".to_string()),
            message_type: vec![DescriptorProto {
                name: Some("Point".to_string()),
                field: vec![
                    field("x", 1, Type::Int32, Label::Required),
                    field("y", 2, Type::Int32, Label::Required),
                    field("label", 3, Type::String, Label::Optional),
                ],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_header_decl_has_storage_and_presence_members() {
        let file = sample_file();
        let index = TypeIndex::build(std::slice::from_ref(&file));
        let view = FileView::new(&file);
        let gen = MessageGen::new(view.messages().remove(0), &index).expect("resolves");

        let decl = gen.header_decl().expect("header");
        assert_eq!(decl.name, "RBPoint");
        assert!(decl.members.contains(&"VALUE field_x;".to_string()));
        assert!(decl.members.contains(&"VALUE field_label;".to_string()));
        assert!(decl.members.contains(&"bool has_field_label;".to_string()));
        // Required fields carry no presence flag.
        assert!(!decl.members.contains(&"bool has_field_x;".to_string()));
        assert!(decl
            .members
            .contains(&"google::protobuf::UnknownFieldSet unknown_fields;".to_string()));
    }

    #[test]
    fn test_initializer_registers_class_exactly_once() {
        let file = sample_file();
        let index = TypeIndex::build(std::slice::from_ref(&file));
        let view = FileView::new(&file);
        let gen = MessageGen::new(view.messages().remove(0), &index).expect("resolves");

        let text = render_nodes(&gen.impl_nodes().expect("impl"));
        let registrations = text
            .matches("rb_define_class_under(package_rb_module, \"Point\", cls_fastproto_message)")
            .count();
        assert_eq!(registrations, 1);
        assert!(text.contains("rb_str_new2(\"test.Point\"), rb_cls"));
    }

    #[test]
    fn test_required_fields_convert_strictly_in_declared_order() {
        let file = sample_file();
        let index = TypeIndex::build(std::slice::from_ref(&file));
        let view = FileView::new(&file);
        let gen = MessageGen::new(view.messages().remove(0), &index).expect("resolves");

        let text = render_nodes(&gen.impl_nodes().expect("impl"));
        let x = text
            .find("_cpp_proto->set_x(NUM2INT_S(_self->field_x));")
            .expect("x conversion present");
        let y = text
            .find("_cpp_proto->set_y(NUM2INT_S(_self->field_y));")
            .expect("y conversion present");
        assert!(x < y);
    }

    #[test]
    fn test_serializer_releases_and_keeps_gvl_variants() {
        let file = sample_file();
        let index = TypeIndex::build(std::slice::from_ref(&file));
        let view = FileView::new(&file);
        let gen = MessageGen::new(view.messages().remove(0), &index).expect("resolves");

        let text = render_nodes(&gen.impl_nodes().expect("impl"));
        assert!(text.contains("rb_thread_call_without_gvl"));
        assert!(text.contains("serialize_to_string_with_gvl"));
        assert!(text.contains("args.pb_size = cpp_proto.ByteSizeLong();"));
    }

    #[test]
    fn test_unknown_fields_merge_both_directions() {
        let file = sample_file();
        let index = TypeIndex::build(std::slice::from_ref(&file));
        let view = FileView::new(&file);
        let gen = MessageGen::new(view.messages().remove(0), &index).expect("resolves");

        let text = render_nodes(&gen.impl_nodes().expect("impl"));
        assert!(text.contains(
            "_cpp_proto->GetReflection()->MutableUnknownFields(_cpp_proto)->MergeFrom(_self->unknown_fields);"
        ));
        assert!(text.contains(
            "this->unknown_fields.MergeFrom(cpp_proto.GetReflection()->GetUnknownFields(cpp_proto));"
        ));
    }

    #[test]
    fn test_nested_message_initialized_after_parent() {
        let file = FileDescriptorProto {
            name: Some("test/outer.proto".to_string()),
            package: Some("test".to_string()),
            message_type: vec![DescriptorProto {
                name: Some("Outer".to_string()),
                nested_type: vec![DescriptorProto {
                    name: Some("Inner".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        let index = TypeIndex::build(std::slice::from_ref(&file));
        let view = FileView::new(&file);
        let gen = MessageGen::new(view.messages().remove(0), &index).expect("resolves");

        let text = render_nodes(&gen.impl_nodes().expect("impl"));
        assert!(text.contains("RBOuter::RBInner::initialize_class();"));
        assert!(text.contains("rb_define_class_under(RBOuter::rb_cls, \"Inner\", cls_fastproto_message)"));
    }

    #[test]
    fn test_equality_checks_presence_before_values() {
        let file = sample_file();
        let index = TypeIndex::build(std::slice::from_ref(&file));
        let view = FileView::new(&file);
        let gen = MessageGen::new(view.messages().remove(0), &index).expect("resolves");

        let text = render_nodes(&gen.impl_nodes().expect("impl"));
        assert!(text.contains("if (cpp_self->is_default_value && cpp_other->is_default_value)"));
        assert!(text.contains("if (cpp_self->has_field_label != cpp_other->has_field_label)"));
    }

    #[test]
    fn test_inspect_shows_unset_marker() {
        let file = sample_file();
        let index = TypeIndex::build(std::slice::from_ref(&file));
        let view = FileView::new(&file);
        let gen = MessageGen::new(view.messages().remove(0), &index).expect("resolves");

        let text = render_nodes(&gen.impl_nodes().expect("impl"));
        assert!(text.contains("std::string str(\"#<::Test::Point\");"));
        assert!(text.contains("str += \"<unset>\";"));
    }
}
