//! The service and method struct emitters.
//!
//! Services carry no RPC machinery; they exist so a transport gem can
//! enumerate methods and look up request/response wrapper classes at
//! runtime. Each method becomes a class nested under its service class.

use fastproto_schema::{MethodView, ServiceView, TypeIndex};

use crate::model::{ClassDecl, Method, Node};
use crate::GenerateError;

pub struct ServiceGen<'a> {
    view: ServiceView<'a>,
    index: &'a TypeIndex,
}

impl<'a> ServiceGen<'a> {
    pub fn new(view: ServiceView<'a>, index: &'a TypeIndex) -> Self {
        ServiceGen { view, index }
    }

    pub fn wrapper_name(&self) -> String {
        self.view.wrapper_name()
    }

    pub fn header_decl(&self) -> ClassDecl {
        let name = self.view.wrapper_name();
        let mut decl = ClassDecl::new(&name);
        decl.comment = Some(format!("service {}", self.view.full_name()));
        decl.members.push("static VALUE rb_cls;".to_string());
        decl.members.push("bool have_initialized;".to_string());
        decl.declarations.push(format!("{}(VALUE rb_self);", name));
        decl.declarations.push(format!("~{}() = default;", name));
        decl.declarations
            .push("static void initialize_class();".to_string());
        decl.declarations
            .push("static VALUE alloc(VALUE self);".to_string());
        decl.declarations.push("static VALUE alloc();".to_string());
        decl.declarations
            .push("static VALUE initialize(VALUE self);".to_string());
        decl.declarations
            .push("static void free(char* memory);".to_string());
        decl.declarations
            .push("static void mark(char* memory);".to_string());
        decl.declarations
            .push("static VALUE proto_name(VALUE self);".to_string());
        decl.declarations
            .push("static VALUE fully_qualified_name(VALUE self);".to_string());
        decl.declarations
            .push("static VALUE methods(VALUE self);".to_string());
        for method in self.view.methods() {
            decl.nested.push(method_header_decl(&method));
        }
        decl
    }

    pub fn impl_nodes(&self) -> Result<Vec<Node>, GenerateError> {
        let class = self.view.wrapper_name();
        let full_name = self.view.full_name();

        let mut nodes = vec![
            Node::Blank,
            Node::line("// ----"),
            Node::line(format!("// begin service: {}", full_name)),
            Node::line("// ----"),
            Node::Blank,
            Node::line(format!(
                "{}::{}(VALUE rb_self) : have_initialized(true) {{}}",
                class, class
            )),
        ];

        let mut init_body = vec![
            Node::line(format!(
                "rb_cls = rb_define_class_under(package_rb_module, \"{}\", cls_fastproto_service);",
                self.view.name()
            )),
            Node::line("rb_define_alloc_func(rb_cls, &alloc);"),
            Node::line("rb_define_method(rb_cls, \"initialize\", RUBY_METHOD_FUNC(&initialize), 0);"),
            Node::line(
                "rb_define_singleton_method(rb_cls, \"proto_name\", RUBY_METHOD_FUNC(&proto_name), 0);",
            ),
            Node::line(
                "rb_define_singleton_method(rb_cls, \"fully_qualified_name\", RUBY_METHOD_FUNC(&fully_qualified_name), 0);",
            ),
            Node::line(
                "rb_define_singleton_method(rb_cls, \"methods\", RUBY_METHOD_FUNC(&methods), 0);",
            ),
        ];
        for method in self.view.methods() {
            init_body.push(Node::line(format!(
                "{}::initialize_class();",
                method.wrapper_path()
            )));
        }
        nodes.push(Method::new(format!("void {}::initialize_class()", class), init_body).into_node());

        nodes.extend(allocator_nodes(&class, &class, &self.view.ruby_class_path()));

        nodes.push(
            Method::new(
                format!("VALUE {}::proto_name(VALUE self)", class),
                vec![Node::line(format!(
                    "return rb_obj_freeze(rb_str_new2(\"{}\"));",
                    self.view.name()
                ))],
            )
            .into_node(),
        );
        nodes.push(
            Method::new(
                format!("VALUE {}::fully_qualified_name(VALUE self)", class),
                vec![Node::line(format!("return rb_str_new2(\"{}\");", full_name))],
            )
            .into_node(),
        );

        let mut methods_body = vec![Node::line("VALUE method_classes = rb_ary_new();")];
        for method in self.view.methods() {
            methods_body.push(Node::line(format!(
                "rb_ary_push(method_classes, {}::rb_cls);",
                method.wrapper_path()
            )));
        }
        methods_body.push(Node::line("return method_classes;"));
        nodes.push(
            Method::new(format!("VALUE {}::methods(VALUE self)", class), methods_body).into_node(),
        );

        nodes.push(Node::line(format!("VALUE {}::rb_cls = Qnil;", class)));

        for method in self.view.methods() {
            nodes.extend(self.method_impl_nodes(&method)?);
        }

        nodes.push(Node::Blank);
        nodes.push(Node::line("// ----"));
        nodes.push(Node::line(format!("// end service: {}", full_name)));
        nodes.push(Node::line("// ----"));
        nodes.push(Node::Blank);
        Ok(nodes)
    }

    fn method_impl_nodes(&self, method: &MethodView<'a>) -> Result<Vec<Node>, GenerateError> {
        let class = method.wrapper_path();
        let full_name = method.full_name();
        let context = full_name.clone();
        let request = self.index.message(method.input_type_ref(), &context)?;
        let response = self.index.message(method.output_type_ref(), &context)?;

        let mut nodes = vec![
            Node::Blank,
            Node::line("// ----"),
            Node::line(format!("// begin method: {}", full_name)),
            Node::line("// ----"),
            Node::Blank,
            Node::line(format!(
                "{}::{}(VALUE rb_self) : have_initialized(true) {{}}",
                class,
                method.wrapper_name()
            )),
        ];

        nodes.push(
            Method::new(
                format!("void {}::initialize_class()", class),
                vec![
                    Node::line(format!(
                        "rb_cls = rb_define_class_under({}::rb_cls, \"{}\", cls_fastproto_method);",
                        method.service_wrapper_name(),
                        method.name()
                    )),
                    Node::line("rb_define_alloc_func(rb_cls, &alloc);"),
                    Node::line(
                        "rb_define_method(rb_cls, \"initialize\", RUBY_METHOD_FUNC(&initialize), 0);",
                    ),
                    Node::line("rb_define_singleton_method(rb_cls, \"name\", RUBY_METHOD_FUNC(&name), 0);"),
                    Node::line(
                        "rb_define_singleton_method(rb_cls, \"proto_name\", RUBY_METHOD_FUNC(&proto_name), 0);",
                    ),
                    Node::line(
                        "rb_define_singleton_method(rb_cls, \"request_class\", RUBY_METHOD_FUNC(&request_class), 0);",
                    ),
                    Node::line(
                        "rb_define_singleton_method(rb_cls, \"response_class\", RUBY_METHOD_FUNC(&response_class), 0);",
                    ),
                    Node::line(
                        "rb_define_singleton_method(rb_cls, \"service_class\", RUBY_METHOD_FUNC(&service_class), 0);",
                    ),
                ],
            )
            .into_node(),
        );

        nodes.extend(allocator_nodes(
            &class,
            &method.wrapper_name(),
            &method.ruby_class_path(),
        ));

        nodes.push(
            Method::new(
                format!("VALUE {}::name(VALUE self)", class),
                vec![Node::line(format!(
                    "return ID2SYM(rb_intern(\"{}\"));",
                    method.symbol_name()
                ))],
            )
            .into_node(),
        );
        nodes.push(
            Method::new(
                format!("VALUE {}::proto_name(VALUE self)", class),
                vec![Node::line(format!(
                    "return rb_obj_freeze(rb_str_new2(\"{}\"));",
                    method.name()
                ))],
            )
            .into_node(),
        );
        nodes.push(
            Method::new(
                format!("VALUE {}::request_class(VALUE self)", class),
                vec![Node::line(format!("return {}::rb_cls;", request.wrapper_path))],
            )
            .into_node(),
        );
        nodes.push(
            Method::new(
                format!("VALUE {}::response_class(VALUE self)", class),
                vec![Node::line(format!("return {}::rb_cls;", response.wrapper_path))],
            )
            .into_node(),
        );
        nodes.push(
            Method::new(
                format!("VALUE {}::service_class(VALUE self)", class),
                vec![Node::line(format!(
                    "return {}::rb_cls;",
                    method.service_wrapper_name()
                ))],
            )
            .into_node(),
        );

        nodes.push(Node::line(format!("VALUE {}::rb_cls = Qnil;", class)));
        nodes.push(Node::Blank);
        nodes.push(Node::line("// ----"));
        nodes.push(Node::line(format!("// end method: {}", full_name)));
        nodes.push(Node::line("// ----"));
        nodes.push(Node::Blank);
        Ok(nodes)
    }
}

fn method_header_decl(method: &MethodView<'_>) -> ClassDecl {
    let name = method.wrapper_name();
    let mut decl = ClassDecl::new(&name);
    decl.comment = Some(format!("method {}", method.full_name()));
    decl.members.push("static VALUE rb_cls;".to_string());
    decl.members.push("bool have_initialized;".to_string());
    decl.declarations.push(format!("{}(VALUE rb_self);", name));
    decl.declarations.push(format!("~{}() = default;", name));
    decl.declarations
        .push("static void initialize_class();".to_string());
    decl.declarations
        .push("static VALUE alloc(VALUE self);".to_string());
    decl.declarations.push("static VALUE alloc();".to_string());
    decl.declarations
        .push("static VALUE initialize(VALUE self);".to_string());
    decl.declarations
        .push("static void free(char* memory);".to_string());
    decl.declarations
        .push("static void mark(char* memory);".to_string());
    decl.declarations
        .push("static VALUE name(VALUE self);".to_string());
    decl.declarations
        .push("static VALUE proto_name(VALUE self);".to_string());
    decl.declarations
        .push("static VALUE request_class(VALUE self);".to_string());
    decl.declarations
        .push("static VALUE response_class(VALUE self);".to_string());
    decl.declarations
        .push("static VALUE service_class(VALUE self);".to_string());
    decl
}

// Service and method wrappers hold no Ruby references, so mark is empty.
fn allocator_nodes(class: &str, ctor_name: &str, ruby_class_path: &str) -> Vec<Node> {
    vec![
        Method::new(
            format!("VALUE {}::alloc(VALUE self)", class),
            vec![
                Node::line(format!("auto memory = ruby_xmalloc(sizeof({}));", class)),
                Node::line(format!("std::memset(memory, 0, sizeof({}));", class)),
                Node::line("return Data_Wrap_Struct(self, &mark, &free, memory);"),
            ],
        )
        .into_node(),
        Method::new(
            format!("VALUE {}::alloc()", class),
            vec![Node::line(format!(
                "return alloc(rb_path2class(\"{}\"));",
                ruby_class_path
            ))],
        )
        .into_node(),
        Method::new(
            format!("VALUE {}::initialize(VALUE self)", class),
            vec![
                Node::line("void* memory;"),
                Node::line("Data_Get_Struct(self, void*, memory);"),
                Node::line(format!("new (memory) {}(self);", class)),
                Node::line("return self;"),
            ],
        )
        .into_node(),
        Method::new(
            format!("void {}::free(char* memory)", class),
            vec![
                Node::line(format!("auto obj = reinterpret_cast<{}*>(memory);", class)),
                Node::braced(
                    "if (obj->have_initialized)",
                    vec![Node::line(format!("obj->~{}();", ctor_name))],
                ),
                Node::line("ruby_xfree(memory);"),
            ],
        )
        .into_node(),
        Node::line(format!("void {}::mark(char* memory) {{}}", class)),
    ]
}
