//! The enum struct emitter.
//!
//! Enum wrappers are thin: Ruby sees the values as integer constants on a
//! class, plus a `fully_qualified_name` singleton. Enum-typed fields store
//! plain integers, so the wrapper carries no per-instance state beyond the
//! placement-new flag.

use fastproto_schema::EnumView;

use crate::model::{ClassDecl, Method, Node};

pub struct EnumGen<'a> {
    view: EnumView<'a>,
}

impl<'a> EnumGen<'a> {
    pub fn new(view: EnumView<'a>) -> Self {
        EnumGen { view }
    }

    pub fn wrapper_path(&self) -> String {
        self.view.wrapper_path()
    }

    pub fn header_decl(&self) -> ClassDecl {
        let name = self.view.wrapper_name();
        let mut decl = ClassDecl::new(&name);
        decl.comment = Some(format!("enum {}", self.view.full_name()));
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
            .push("static VALUE fully_qualified_name(VALUE self);".to_string());
        decl
    }

    pub fn impl_nodes(&self) -> Vec<Node> {
        let class = self.wrapper_path();
        let name = self.view.wrapper_name();
        let full_name = self.view.full_name();

        let mut nodes = vec![
            Node::Blank,
            Node::line("// ----"),
            Node::line(format!("// begin enum: {}", full_name)),
            Node::line("// ----"),
            Node::Blank,
            Node::line(format!(
                "{}::{}(VALUE rb_self) : have_initialized(true) {{}}",
                class, name
            )),
        ];

        let parent = match self.view.parent_wrapper_path() {
            Some(parent) => format!("{}::rb_cls", parent),
            None => "package_rb_module".to_string(),
        };
        let mut init_body = vec![
            Node::line(format!(
                "rb_cls = rb_define_class_under({}, \"{}\", cls_fastproto_enum);",
                parent,
                self.view.name()
            )),
            Node::line("rb_define_alloc_func(rb_cls, &alloc);"),
            Node::line("rb_define_method(rb_cls, \"initialize\", RUBY_METHOD_FUNC(&initialize), 0);"),
            Node::line(
                "rb_define_singleton_method(rb_cls, \"fully_qualified_name\", RUBY_METHOD_FUNC(&fully_qualified_name), 0);",
            ),
            Node::Blank,
        ];
        for (value_name, number) in self.view.values() {
            init_body.push(Node::line(format!(
                "rb_define_const(rb_cls, \"{}\", LONG2FIX({}));",
                value_name, number
            )));
        }
        nodes.push(Method::new(format!("void {}::initialize_class()", class), init_body).into_node());

        nodes.push(
            Method::new(
                format!("VALUE {}::alloc(VALUE self)", class),
                vec![
                    Node::line(format!("auto memory = ruby_xmalloc(sizeof({}));", class)),
                    Node::line(format!("std::memset(memory, 0, sizeof({}));", class)),
                    Node::line("return Data_Wrap_Struct(self, &mark, &free, memory);"),
                ],
            )
            .into_node(),
        );
        nodes.push(
            Method::new(
                format!("VALUE {}::alloc()", class),
                vec![Node::line(format!(
                    "return alloc(rb_path2class(\"{}\"));",
                    self.view.ruby_class_path()
                ))],
            )
            .into_node(),
        );
        nodes.push(
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
        );
        nodes.push(
            Method::new(
                format!("void {}::free(char* memory)", class),
                vec![
                    Node::line(format!("auto obj = reinterpret_cast<{}*>(memory);", class)),
                    Node::braced(
                        "if (obj->have_initialized)",
                        vec![Node::line(format!("obj->~{}();", name))],
                    ),
                    Node::line("ruby_xfree(memory);"),
                ],
            )
            .into_node(),
        );
        nodes.push(Node::line(format!("void {}::mark(char* memory) {{}}", class)));

        nodes.push(
            Method::new(
                format!("VALUE {}::fully_qualified_name(VALUE self)", class),
                vec![Node::line(format!("return rb_str_new2(\"{}\");", full_name))],
            )
            .into_node(),
        );

        nodes.push(Node::line(format!("VALUE {}::rb_cls = Qnil;", class)));
        nodes.push(Node::Blank);
        nodes.push(Node::line("// ----"));
        nodes.push(Node::line(format!("// end enum: {}", full_name)));
        nodes.push(Node::line("// ----"));
        nodes.push(Node::Blank);
        nodes
    }
}
