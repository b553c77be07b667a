//! Read-only views over the descriptor set.
//!
//! The descriptor tree arrives fully parsed inside the
//! `CodeGeneratorRequest`; these types wrap it with the ancestor chain each
//! emitter needs (fully-qualified names, nesting, resolved identifiers)
//! without copying the underlying protos. The tree is built once per
//! invocation and consumed read-only.

use std::collections::HashMap;

use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    MethodDescriptorProto, ServiceDescriptorProto,
};

use crate::error::SchemaError;
use crate::names;

/// Index of every message and enum in the request, keyed by fully-qualified
/// proto name (no leading dot). Field type references resolve against this.
#[derive(Debug, Default)]
pub struct TypeIndex {
    messages: HashMap<String, MessageEntry>,
    enums: HashMap<String, EnumEntry>,
}

#[derive(Debug, Clone)]
pub struct MessageEntry {
    pub full_name: String,
    pub ruby_class_path: String,
    pub wrapper_path: String,
    pub cpp_proto_path: String,
    pub file: String,
}

#[derive(Debug, Clone)]
pub struct EnumEntry {
    pub full_name: String,
    pub ruby_class_path: String,
    pub cpp_proto_path: String,
    pub values: Vec<(String, i32)>,
    pub file: String,
}

impl TypeIndex {
    /// Walk every file in the descriptor set, registering all messages and
    /// enums, nested ones included.
    pub fn build(files: &[FileDescriptorProto]) -> TypeIndex {
        let mut index = TypeIndex::default();
        for file in files {
            let view = FileView::new(file);
            for message in view.messages() {
                index.add_message(&view, &message);
            }
            for enum_type in view.enums() {
                index.add_enum(&view, &enum_type);
            }
        }
        tracing::debug!(
            messages = index.messages.len(),
            enums = index.enums.len(),
            "built type index"
        );
        index
    }

    fn add_message(&mut self, file: &FileView<'_>, message: &MessageView<'_>) {
        self.messages.insert(
            message.full_name(),
            MessageEntry {
                full_name: message.full_name(),
                ruby_class_path: message.ruby_class_path(),
                wrapper_path: message.wrapper_path(),
                cpp_proto_path: message.cpp_proto_path(),
                file: file.name().to_string(),
            },
        );
        for nested in message.nested_messages() {
            self.add_message(file, &nested);
        }
        for nested in message.nested_enums() {
            self.add_enum(file, &nested);
        }
    }

    fn add_enum(&mut self, file: &FileView<'_>, enum_type: &EnumView<'_>) {
        self.enums.insert(
            enum_type.full_name(),
            EnumEntry {
                full_name: enum_type.full_name(),
                ruby_class_path: enum_type.ruby_class_path(),
                cpp_proto_path: enum_type.cpp_proto_path(),
                values: enum_type
                    .values()
                    .map(|(name, number)| (name.to_string(), number))
                    .collect(),
                file: file.name().to_string(),
            },
        );
    }

    pub fn message(&self, type_ref: &str, context: &str) -> Result<&MessageEntry, SchemaError> {
        self.messages
            .get(type_ref.trim_start_matches('.'))
            .ok_or_else(|| SchemaError::UnknownType {
                type_name: type_ref.to_string(),
                context: context.to_string(),
            })
    }

    pub fn enumeration(&self, type_ref: &str, context: &str) -> Result<&EnumEntry, SchemaError> {
        self.enums
            .get(type_ref.trim_start_matches('.'))
            .ok_or_else(|| SchemaError::UnknownType {
                type_name: type_ref.to_string(),
                context: context.to_string(),
            })
    }
}

/// One schema file from the request.
#[derive(Debug, Clone, Copy)]
pub struct FileView<'a> {
    proto: &'a FileDescriptorProto,
}

impl<'a> FileView<'a> {
    pub fn new(proto: &'a FileDescriptorProto) -> Self {
        FileView { proto }
    }

    pub fn name(&self) -> &'a str {
        self.proto.name()
    }

    pub fn package(&self) -> &'a str {
        self.proto.package()
    }

    pub fn ruby_module_els(&self) -> Vec<String> {
        names::ruby_module_els(self.package())
    }

    pub fn header_path(&self) -> String {
        names::header_path(self.name())
    }

    pub fn impl_path(&self) -> String {
        names::impl_path(self.name())
    }

    pub fn pb_header_path(&self) -> String {
        names::pb_header_path(self.name())
    }

    pub fn header_ident(&self) -> String {
        names::header_ident(self.name())
    }

    pub fn messages(&self) -> Vec<MessageView<'a>> {
        self.proto
            .message_type
            .iter()
            .map(|m| MessageView {
                proto: m,
                package: self.package(),
                ancestors: Vec::new(),
            })
            .collect()
    }

    pub fn enums(&self) -> Vec<EnumView<'a>> {
        self.proto
            .enum_type
            .iter()
            .map(|e| EnumView {
                proto: e,
                package: self.package(),
                ancestors: Vec::new(),
            })
            .collect()
    }

    pub fn services(&self) -> Vec<ServiceView<'a>> {
        self.proto
            .service
            .iter()
            .map(|s| ServiceView {
                proto: s,
                package: self.package(),
            })
            .collect()
    }
}

/// A message descriptor together with its ancestor chain (containing type
/// names, outermost first; empty for top-level messages).
#[derive(Debug, Clone)]
pub struct MessageView<'a> {
    proto: &'a DescriptorProto,
    package: &'a str,
    ancestors: Vec<String>,
}

impl<'a> MessageView<'a> {
    pub fn name(&self) -> &'a str {
        self.proto.name()
    }

    pub fn package(&self) -> &'a str {
        self.package
    }

    pub fn has_parent(&self) -> bool {
        !self.ancestors.is_empty()
    }

    /// Fully-qualified proto name, no leading dot: `pkg.Outer.Inner`.
    pub fn full_name(&self) -> String {
        let mut parts = Vec::new();
        if !self.package.is_empty() {
            parts.push(self.package.to_string());
        }
        parts.extend(self.ancestors.iter().cloned());
        parts.push(self.name().to_string());
        parts.join(".")
    }

    pub fn ruby_class_path(&self) -> String {
        names::ruby_class_path(self.package, &self.ancestors, self.name())
    }

    /// Wrapper struct name without nesting: `RBInner`.
    pub fn wrapper_name(&self) -> String {
        names::wrapper_struct_name(self.name())
    }

    /// Wrapper struct path relative to the file namespace:
    /// `RBOuter::RBInner`.
    pub fn wrapper_path(&self) -> String {
        names::wrapper_struct_path(&self.ancestors, self.name())
    }

    /// Wrapper struct path of the containing message, when nested.
    pub fn parent_wrapper_path(&self) -> Option<String> {
        let (last, init) = self.ancestors.split_last()?;
        Some(names::wrapper_struct_path(init, last))
    }

    pub fn cpp_proto_path(&self) -> String {
        names::cpp_proto_class_name(self.package, &self.ancestors, self.name())
    }

    pub fn fields(&self) -> Vec<FieldView<'a>> {
        self.proto.field.iter().map(|f| FieldView { proto: f }).collect()
    }

    pub fn nested_messages(&self) -> Vec<MessageView<'a>> {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.name().to_string());
        self.proto
            .nested_type
            .iter()
            .map(|m| MessageView {
                proto: m,
                package: self.package,
                ancestors: ancestors.clone(),
            })
            .collect()
    }

    pub fn nested_enums(&self) -> Vec<EnumView<'a>> {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.name().to_string());
        self.proto
            .enum_type
            .iter()
            .map(|e| EnumView {
                proto: e,
                package: self.package,
                ancestors: ancestors.clone(),
            })
            .collect()
    }
}

/// One field of a message.
#[derive(Debug, Clone, Copy)]
pub struct FieldView<'a> {
    proto: &'a FieldDescriptorProto,
}

impl<'a> FieldView<'a> {
    pub fn new(proto: &'a FieldDescriptorProto) -> Self {
        FieldView { proto }
    }

    /// The wire tag. Unique and stable within the message.
    pub fn tag(&self) -> i32 {
        self.proto.number()
    }

    /// The declared field name, used for the public Ruby accessors.
    pub fn name(&self) -> &'a str {
        self.proto.name()
    }

    /// The (possibly keyword-escaped) identifier used in generated C++.
    pub fn storage_name(&self) -> String {
        names::storage_field_name(self.name())
    }

    pub fn kind(&self) -> Type {
        self.proto.r#type()
    }

    pub fn is_optional(&self) -> bool {
        self.proto.label() == Label::Optional
    }

    pub fn is_required(&self) -> bool {
        self.proto.label() == Label::Required
    }

    pub fn is_repeated(&self) -> bool {
        self.proto.label() == Label::Repeated
    }

    pub fn is_message(&self) -> bool {
        matches!(self.kind(), Type::Message | Type::Group)
    }

    pub fn is_enum(&self) -> bool {
        self.kind() == Type::Enum
    }

    /// The fully-qualified reference for message/group/enum fields,
    /// as written in the descriptor (leading dot preserved).
    pub fn type_ref(&self) -> &'a str {
        self.proto.type_name()
    }
}

/// An enum descriptor with its ancestor chain.
#[derive(Debug, Clone)]
pub struct EnumView<'a> {
    proto: &'a EnumDescriptorProto,
    package: &'a str,
    ancestors: Vec<String>,
}

impl<'a> EnumView<'a> {
    pub fn name(&self) -> &'a str {
        self.proto.name()
    }

    pub fn full_name(&self) -> String {
        let mut parts = Vec::new();
        if !self.package.is_empty() {
            parts.push(self.package.to_string());
        }
        parts.extend(self.ancestors.iter().cloned());
        parts.push(self.name().to_string());
        parts.join(".")
    }

    pub fn has_parent(&self) -> bool {
        !self.ancestors.is_empty()
    }

    pub fn ruby_class_path(&self) -> String {
        names::ruby_class_path(self.package, &self.ancestors, self.name())
    }

    pub fn wrapper_name(&self) -> String {
        names::wrapper_struct_name(self.name())
    }

    pub fn wrapper_path(&self) -> String {
        names::wrapper_struct_path(&self.ancestors, self.name())
    }

    pub fn parent_wrapper_path(&self) -> Option<String> {
        let (last, init) = self.ancestors.split_last()?;
        Some(names::wrapper_struct_path(init, last))
    }

    pub fn cpp_proto_path(&self) -> String {
        names::cpp_proto_class_name(self.package, &self.ancestors, self.name())
    }

    /// Declared (name, number) pairs in declaration order.
    pub fn values(&self) -> impl Iterator<Item = (&'a str, i32)> + '_ {
        self.proto.value.iter().map(|v| (v.name(), v.number()))
    }
}

/// A service descriptor. Services are always top-level.
#[derive(Debug, Clone, Copy)]
pub struct ServiceView<'a> {
    proto: &'a ServiceDescriptorProto,
    package: &'a str,
}

impl<'a> ServiceView<'a> {
    pub fn name(&self) -> &'a str {
        self.proto.name()
    }

    pub fn full_name(&self) -> String {
        if self.package.is_empty() {
            self.name().to_string()
        } else {
            format!("{}.{}", self.package, self.name())
        }
    }

    pub fn ruby_class_path(&self) -> String {
        names::ruby_class_path(self.package, &[], self.name())
    }

    pub fn wrapper_name(&self) -> String {
        names::wrapper_struct_name(self.name())
    }

    pub fn methods(&self) -> Vec<MethodView<'a>> {
        self.proto
            .method
            .iter()
            .map(|m| MethodView {
                proto: m,
                package: self.package,
                service: self.proto.name(),
            })
            .collect()
    }
}

/// A method descriptor, carrying its owning service.
#[derive(Debug, Clone, Copy)]
pub struct MethodView<'a> {
    proto: &'a MethodDescriptorProto,
    package: &'a str,
    service: &'a str,
}

impl<'a> MethodView<'a> {
    pub fn name(&self) -> &'a str {
        self.proto.name()
    }

    pub fn full_name(&self) -> String {
        if self.package.is_empty() {
            format!("{}.{}", self.service, self.name())
        } else {
            format!("{}.{}.{}", self.package, self.service, self.name())
        }
    }

    /// snake_case symbol name exposed to Ruby.
    pub fn symbol_name(&self) -> String {
        names::snakeize(self.name())
    }

    pub fn service_name(&self) -> &'a str {
        self.service
    }

    pub fn service_wrapper_name(&self) -> String {
        names::wrapper_struct_name(self.service)
    }

    pub fn ruby_class_path(&self) -> String {
        names::ruby_class_path(self.package, &[self.service.to_string()], self.name())
    }

    pub fn wrapper_name(&self) -> String {
        names::wrapper_struct_name(self.name())
    }

    pub fn wrapper_path(&self) -> String {
        format!("{}::{}", self.service_wrapper_name(), self.wrapper_name())
    }

    pub fn input_type_ref(&self) -> &'a str {
        self.proto.input_type()
    }

    pub fn output_type_ref(&self) -> &'a str {
        self.proto.output_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::EnumValueDescriptorProto;

    fn sample_file() -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some("test/sample.proto".to_string()),
            package: Some("test_pkg.sub".to_string()),
            message_type: vec![DescriptorProto {
                name: Some("Outer".to_string()),
                nested_type: vec![DescriptorProto {
                    name: Some("Inner".to_string()),
                    ..Default::default()
                }],
                enum_type: vec![EnumDescriptorProto {
                    name: Some("Kind".to_string()),
                    value: vec![
                        EnumValueDescriptorProto {
                            name: Some("FIRST".to_string()),
                            number: Some(3),
                            ..Default::default()
                        },
                        EnumValueDescriptorProto {
                            name: Some("SECOND".to_string()),
                            number: Some(4),
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_nested_names() {
        let file = sample_file();
        let view = FileView::new(&file);
        let outer = &view.messages()[0];
        let inner = &outer.nested_messages()[0];

        assert_eq!(outer.full_name(), "test_pkg.sub.Outer");
        assert_eq!(inner.full_name(), "test_pkg.sub.Outer.Inner");
        assert_eq!(inner.ruby_class_path(), "::TestPkg::Sub::Outer::Inner");
        assert_eq!(inner.wrapper_path(), "RBOuter::RBInner");
        assert_eq!(inner.parent_wrapper_path().as_deref(), Some("RBOuter"));
        assert_eq!(inner.cpp_proto_path(), "::test_pkg::sub::Outer_Inner");
    }

    #[test]
    fn test_type_index_resolution() {
        let file = sample_file();
        let index = TypeIndex::build(std::slice::from_ref(&file));

        let inner = index
            .message(".test_pkg.sub.Outer.Inner", "test")
            .expect("inner should resolve");
        assert_eq!(inner.wrapper_path, "RBOuter::RBInner");

        let kind = index
            .enumeration(".test_pkg.sub.Outer.Kind", "test")
            .expect("kind should resolve");
        assert_eq!(kind.values[0], ("FIRST".to_string(), 3));

        assert!(index.message(".missing.Type", "test").is_err());
    }
}
