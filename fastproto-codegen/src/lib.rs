//! # fastproto-codegen
//!
//! The code-generation engine behind `protoc-gen-fastproto`: walks the
//! descriptor set from a `CodeGeneratorRequest` and emits, per schema file,
//! C++ source for a Ruby native-extension wrapper with accessors, lazy
//! defaults, GVL-released (de)serialization, equality, inspection, and
//! reflective field metadata.
//!
//! Output is produced through an intermediate code model ([`model`]) and a
//! rendering pass ([`render`]), so type-mapping logic stays testable apart
//! from text formatting.

pub mod enums;
pub mod fields;
pub mod file;
pub mod message;
pub mod model;
pub mod render;
pub mod runtime;
pub mod service;

use prost_types::compiler::code_generator_response::File as ResponseFile;
use prost_types::compiler::{CodeGeneratorRequest, CodeGeneratorResponse};

use fastproto_schema::{FileView, SchemaError, TypeIndex};

/// One (path, content) pair in the response. Insertion-point files carry the
/// name of the point they extend inside the shared bootstrap.
#[derive(Debug, Clone)]
pub struct GeneratedFile {
    pub name: String,
    pub content: String,
    pub insertion_point: Option<String>,
}

impl GeneratedFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        GeneratedFile {
            name: name.into(),
            content: content.into(),
            insertion_point: None,
        }
    }

    pub fn insertion(
        name: impl Into<String>,
        point: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        GeneratedFile {
            name: name.into(),
            content: content.into(),
            insertion_point: Some(point.into()),
        }
    }

    fn into_response_file(self) -> ResponseFile {
        ResponseFile {
            name: Some(self.name),
            insertion_point: self.insertion_point,
            content: Some(self.content),
            ..Default::default()
        }
    }
}

/// Errors surfaced by generation. A file's generation is all-or-nothing:
/// the first error aborts the whole run.
#[derive(Debug)]
pub enum GenerateError {
    Schema(SchemaError),
    UnsupportedFeature { feature: String, context: String },
}

impl std::fmt::Display for GenerateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerateError::Schema(err) => write!(f, "{}", err),
            GenerateError::UnsupportedFeature { feature, context } => {
                write!(f, "unsupported feature '{}' in {}", feature, context)
            }
        }
    }
}

impl std::error::Error for GenerateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GenerateError::Schema(err) => Some(err),
            GenerateError::UnsupportedFeature { .. } => None,
        }
    }
}

impl From<SchemaError> for GenerateError {
    fn from(err: SchemaError) -> Self {
        GenerateError::Schema(err)
    }
}

/// Generate the full response for one request: the fixed runtime bootstrap
/// files, then a header/implementation pair plus two bootstrap insertion
/// edits for every file named in `file_to_generate`.
pub fn generate(request: &CodeGeneratorRequest) -> Result<CodeGeneratorResponse, GenerateError> {
    let index = TypeIndex::build(&request.proto_file);

    let mut files = runtime::bootstrap_files();
    for target in &request.file_to_generate {
        let proto = request
            .proto_file
            .iter()
            .find(|f| f.name() == target)
            .ok_or_else(|| SchemaError::MissingFile {
                file: target.clone(),
            })?;
        let view = FileView::new(proto);
        tracing::info!(file = view.name(), "generating");
        files.extend(file::FileGenerator::new(view, &index).generate()?);
    }

    Ok(CodeGeneratorResponse {
        file: files.into_iter().map(GeneratedFile::into_response_file).collect(),
        ..Default::default()
    })
}
