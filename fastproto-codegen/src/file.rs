//! Per-file orchestration: one header/implementation pair per schema file,
//! plus the two insertion-point edits that splice the file into the shared
//! bootstrap translation unit.

use fastproto_schema::{FileView, TypeIndex};

use crate::enums::EnumGen;
use crate::message::MessageGen;
use crate::model::{CppUnit, Method, Node};
use crate::render::render_unit;
use crate::service::ServiceGen;
use crate::{GeneratedFile, GenerateError};

/// The fixed bootstrap translation unit every generated file hooks into.
pub const BOOTSTRAP_IMPL: &str = "rb_fastproto_init.cpp";
pub const HEADER_INSERTION_POINT: &str = "init_file_header";
pub const ENTRYPOINT_INSERTION_POINT: &str = "init_entrypoints";

pub struct FileGenerator<'a> {
    view: FileView<'a>,
    index: &'a TypeIndex,
}

impl<'a> FileGenerator<'a> {
    pub fn new(view: FileView<'a>, index: &'a TypeIndex) -> Self {
        FileGenerator { view, index }
    }

    pub fn generate(&self) -> Result<Vec<GeneratedFile>, GenerateError> {
        let ident = self.view.header_ident();
        Ok(vec![
            GeneratedFile::new(self.view.header_path(), render_unit(&self.header_unit()?)),
            GeneratedFile::new(self.view.impl_path(), render_unit(&self.impl_unit()?)),
            GeneratedFile::insertion(
                BOOTSTRAP_IMPL,
                HEADER_INSERTION_POINT,
                format!("#include \"{}\"\n", self.view.header_path()),
            ),
            GeneratedFile::insertion(
                BOOTSTRAP_IMPL,
                ENTRYPOINT_INSERTION_POINT,
                format!("_Init_{}();\n", ident),
            ),
        ])
    }

    fn namespaces(&self) -> Vec<String> {
        let mut namespaces = vec!["rb_fastproto_gen".to_string()];
        namespaces.extend(self.view.ruby_module_els());
        namespaces
    }

    // Wrapper structs are declared in the header so messages in other
    // generated files can serialize this file's messages as subobjects.
    fn header_unit(&self) -> Result<CppUnit, GenerateError> {
        let mut unit = CppUnit::default();
        unit.include_system("ruby/ruby.h");
        unit.include_system("vector");
        unit.include_system("utility");
        unit.include_local(&self.view.pb_header_path());
        unit.guard = Some(self.view.header_ident());
        unit.namespaces = self.namespaces();

        let mut body = Vec::new();
        for enum_view in self.view.enums() {
            body.extend(EnumGen::new(enum_view).header_decl().into_commented_node());
            body.push(Node::Blank);
        }
        for message in self.view.messages() {
            body.push(MessageGen::new(message, self.index)?.header_decl()?.into_node());
            body.push(Node::Blank);
        }
        for service in self.view.services() {
            body.extend(
                ServiceGen::new(service, self.index)
                    .header_decl()
                    .into_commented_node(),
            );
            body.push(Node::Blank);
        }
        body.push(Node::line(format!("void _Init_{}();", self.view.header_ident())));
        unit.body = body;
        Ok(unit)
    }

    fn impl_unit(&self) -> Result<CppUnit, GenerateError> {
        let mut unit = CppUnit::default();
        unit.include_system("ruby/ruby.h");
        unit.include_system("ruby/encoding.h");
        unit.include_system("ruby/thread.h");
        unit.include_system("limits");
        unit.include_system("type_traits");
        unit.include_system("new");
        unit.include_system("cstring");
        unit.include_system("string");
        unit.include_local("rb_fastproto_init.h");
        unit.include_local(&self.view.header_path());
        unit.include_local(&self.view.pb_header_path());
        unit.namespaces = self.namespaces();

        let mut body = vec![Node::line("static VALUE package_rb_module = Qnil;")];

        let mut top_level_classes = Vec::new();
        for enum_view in self.view.enums() {
            let gen = EnumGen::new(enum_view);
            top_level_classes.push(gen.wrapper_path());
            body.extend(gen.impl_nodes());
        }
        for message in self.view.messages() {
            let gen = MessageGen::new(message, self.index)?;
            tracing::debug!(wrapper = %gen.wrapper_path(), "emitting message struct");
            top_level_classes.push(gen.wrapper_path());
            body.extend(gen.impl_nodes()?);
        }
        for service in self.view.services() {
            let gen = ServiceGen::new(service, self.index);
            top_level_classes.push(gen.wrapper_name());
            body.extend(gen.impl_nodes()?);
        }

        body.push(self.init_function(&top_level_classes));
        unit.body = body;
        Ok(unit)
    }

    // Called by Init_fastproto_gen via the entrypoint insertion. Builds the
    // package module chain, then registers every top-level class in
    // declaration order.
    fn init_function(&self, top_level_classes: &[String]) -> Node {
        let mut body = Vec::new();
        let package_elements = self.view.ruby_module_els();
        if package_elements.is_empty() {
            body.push(Node::line("package_rb_module = rb_cObject;"));
        } else {
            body.push(Node::line(format!(
                "package_rb_module = rb_define_module(\"{}\");",
                package_elements[0]
            )));
            for element in &package_elements[1..] {
                body.push(Node::line(format!(
                    "package_rb_module = rb_define_module_under(package_rb_module, \"{}\");",
                    element
                )));
            }
        }
        for class_name in top_level_classes {
            body.push(Node::line(format!("{}::initialize_class();", class_name)));
        }
        Method::new(format!("void _Init_{}()", self.view.header_ident()), body).into_node()
    }
}
