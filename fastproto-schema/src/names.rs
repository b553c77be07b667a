//! Deterministic descriptor-to-identifier mapping.
//!
//! Everything here is a pure function of descriptor names. No two distinct
//! descriptors in one file may map to the same generated identifier; nested
//! types are namespaced under their generated parent.

/// C++ keywords that would collide with a field's storage identifier.
///
/// The escaped name is only used inside the generated C++; the public Ruby
/// accessor keeps the declared field name.
const CPP_KEYWORDS: &[&str] = &[
    "alignas", "alignof", "and", "asm", "auto", "bool", "break", "case",
    "catch", "char", "class", "const", "constexpr", "continue", "decltype",
    "default", "delete", "do", "double", "else", "enum", "explicit",
    "export", "extern", "false", "float", "for", "friend", "goto", "if",
    "inline", "int", "long", "mutable", "namespace", "new", "noexcept",
    "not", "nullptr", "operator", "or", "private", "protected", "public",
    "register", "return", "short", "signed", "sizeof", "static", "struct",
    "switch", "template", "this", "throw", "true", "try", "typedef",
    "typeid", "typename", "union", "unsigned", "using", "virtual", "void",
    "volatile", "while",
];

/// Storage identifier for a field inside the generated C++ wrapper.
///
/// Keyword collisions get a trailing underscore; the Ruby-visible accessor
/// name is never altered.
pub fn storage_field_name(name: &str) -> String {
    if CPP_KEYWORDS.contains(&name) {
        format!("{}_", name)
    } else {
        name.to_string()
    }
}

/// Convert a package segment like `foo_bar` to a Ruby module name `FooBar`.
pub fn camelize(segment: &str) -> String {
    segment
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(f) => f.to_uppercase().collect::<String>() + chars.as_str(),
            }
        })
        .collect()
}

/// Convert CamelCase to snake_case, for method name symbols.
pub fn snakeize(name: &str) -> String {
    let mut result = String::new();
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_uppercase() {
            if prev_lower {
                result.push('_');
            }
            result.push(c.to_lowercase().next().unwrap_or(c));
            prev_lower = false;
        } else {
            result.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    result
}

/// Ruby module names for a proto package, one per dot-separated segment.
pub fn ruby_module_els(package: &str) -> Vec<String> {
    if package.is_empty() {
        return Vec::new();
    }
    package.split('.').map(camelize).collect()
}

/// Absolute Ruby constant path for a type: `::Pkg::Outer::Inner`.
///
/// `ancestors` is the chain of containing type names, outermost first.
pub fn ruby_class_path(package: &str, ancestors: &[String], name: &str) -> String {
    let mut path = String::from("::");
    for el in ruby_module_els(package) {
        path.push_str(&el);
        path.push_str("::");
    }
    for parent in ancestors {
        path.push_str(parent);
        path.push_str("::");
    }
    path.push_str(name);
    path
}

/// Name of the C++ wrapper struct for one type, without nesting: `RBFoo`.
pub fn wrapper_struct_name(name: &str) -> String {
    format!("RB{}", name)
}

/// Nested C++ wrapper struct path relative to the file's generated
/// namespace: `RBOuter::RBInner`.
pub fn wrapper_struct_path(ancestors: &[String], name: &str) -> String {
    let mut path = String::new();
    for parent in ancestors {
        path.push_str(&wrapper_struct_name(parent));
        path.push_str("::");
    }
    path.push_str(&wrapper_struct_name(name));
    path
}

/// The C++ class generated by protoc for this type: `pkg::Outer_Inner`.
pub fn cpp_proto_class_name(package: &str, ancestors: &[String], name: &str) -> String {
    let ns = package.replace('.', "::");
    let mut cls = String::new();
    for parent in ancestors {
        cls.push_str(parent);
        cls.push('_');
    }
    cls.push_str(name);
    if ns.is_empty() {
        format!("::{}", cls)
    } else {
        format!("::{}::{}", ns, cls)
    }
}

fn stem(proto_path: &str) -> &str {
    proto_path.strip_suffix(".proto").unwrap_or(proto_path)
}

/// `dir/foo.proto` -> `dir/foo.h`
pub fn header_path(proto_path: &str) -> String {
    format!("{}.h", stem(proto_path))
}

/// `dir/foo.proto` -> `dir/foo.cpp`
pub fn impl_path(proto_path: &str) -> String {
    format!("{}.cpp", stem(proto_path))
}

/// `dir/foo.proto` -> `dir/foo.pb.h` (the protoc C++ output we link against)
pub fn pb_header_path(proto_path: &str) -> String {
    format!("{}.pb.h", stem(proto_path))
}

/// Identifier used for the include guard and per-file init routine:
/// `dir/foo.proto` -> `DIR_FOO`.
pub fn header_ident(proto_path: &str) -> String {
    stem(proto_path)
        .chars()
        .map(|c| match c {
            '/' | '.' | '-' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}
