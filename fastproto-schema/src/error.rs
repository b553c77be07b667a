//! Error types for descriptor indexing and lookup

/// Structured error type for schema lookups.
///
/// Input descriptors are assumed structurally valid (they come from the
/// upstream compiler), so these only surface for genuinely broken requests:
/// a file named in `file_to_generate` that is missing from the descriptor
/// set, or a field whose type reference resolves to nothing.
#[derive(Debug, Clone)]
pub enum SchemaError {
    UnknownType {
        type_name: String,
        context: String,
    },
    MissingFile {
        file: String,
    },
    DuplicateIdentifier {
        identifier: String,
        file: String,
    },
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaError::UnknownType { type_name, context } => {
                write!(f, "unknown type '{}' referenced by {}", type_name, context)
            }
            SchemaError::MissingFile { file } => {
                write!(f, "file '{}' requested but not in descriptor set", file)
            }
            SchemaError::DuplicateIdentifier { identifier, file } => {
                write!(f, "duplicate identifier '{}' in {}", identifier, file)
            }
        }
    }
}

impl std::error::Error for SchemaError {}
