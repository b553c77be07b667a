//! Rendering pass: serialize a [`CppUnit`] to source text.

use crate::model::{CppUnit, Node};

const INDENT: &str = "    ";

/// Render a full translation unit.
pub fn render_unit(unit: &CppUnit) -> String {
    let mut out = String::new();

    for include in &unit.includes {
        out.push_str(include);
        out.push('\n');
    }
    if !unit.includes.is_empty() {
        out.push('\n');
    }

    if let Some(guard) = &unit.guard {
        out.push_str(&format!("#ifndef __{}_H\n", guard));
        out.push_str(&format!("#define __{}_H\n\n", guard));
    }

    for ns in &unit.namespaces {
        out.push_str(&format!("namespace {} {{\n", ns));
    }
    if !unit.namespaces.is_empty() {
        out.push('\n');
    }

    for node in &unit.body {
        render_node(node, unit.namespaces.len(), &mut out);
    }

    if !unit.namespaces.is_empty() {
        out.push('\n');
    }
    for ns in unit.namespaces.iter().rev() {
        out.push_str(&format!("}} // namespace {}\n", ns));
    }

    if unit.guard.is_some() {
        out.push_str("\n#endif\n");
    }

    out
}

/// Render a bare node list at a given depth, for tests and insertions.
pub fn render_nodes(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        render_node(node, 0, &mut out);
    }
    out
}

fn render_node(node: &Node, depth: usize, out: &mut String) {
    match node {
        Node::Blank => out.push('\n'),
        Node::Line(text) => {
            push_indent(depth, out);
            out.push_str(text);
            out.push('\n');
        }
        Node::Braced { head, body, tail } => {
            push_indent(depth, out);
            if head.is_empty() {
                out.push_str("{\n");
            } else {
                out.push_str(head);
                out.push_str(" {\n");
            }
            for inner in body {
                render_node(inner, depth + 1, out);
            }
            push_indent(depth, out);
            out.push_str(tail);
            out.push('\n');
        }
        Node::IfElse {
            cond,
            then_body,
            else_body,
        } => {
            push_indent(depth, out);
            out.push_str(&format!("if ({}) {{\n", cond));
            for inner in then_body {
                render_node(inner, depth + 1, out);
            }
            push_indent(depth, out);
            out.push_str("} else {\n");
            for inner in else_body {
                render_node(inner, depth + 1, out);
            }
            push_indent(depth, out);
            out.push_str("}\n");
        }
    }
}

fn push_indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassDecl, Method};

    #[test]
    fn test_render_nested_blocks() {
        let method = Method::new(
            "VALUE RBPoint::get_x(VALUE self)",
            vec![
                Node::line("RBPoint* cpp_self;"),
                Node::braced(
                    "if (cpp_self == nullptr)",
                    vec![Node::line("return Qnil;")],
                ),
                Node::line("return cpp_self->field_x;"),
            ],
        );
        let text = render_nodes(&[method.into_node()]);
        assert_eq!(
            text,
            "VALUE RBPoint::get_x(VALUE self) {\n    RBPoint* cpp_self;\n    if (cpp_self == nullptr) {\n        return Qnil;\n    }\n    return cpp_self->field_x;\n}\n"
        );
    }

    #[test]
    fn test_render_unit_guard_and_namespaces() {
        let mut unit = CppUnit::default();
        unit.include_system("ruby/ruby.h");
        unit.guard = Some("TEST_SAMPLE".to_string());
        unit.namespaces = vec!["rb_fastproto_gen".to_string(), "Pkg".to_string()];
        unit.body = vec![Node::line("void _Init_TEST_SAMPLE();")];

        let text = render_unit(&unit);
        assert!(text.starts_with("#include <ruby/ruby.h>\n"));
        assert!(text.contains("#ifndef __TEST_SAMPLE_H"));
        assert!(text.contains("namespace rb_fastproto_gen {\nnamespace Pkg {"));
        assert!(text.ends_with("#endif\n"));
    }

    #[test]
    fn test_class_decl_renders_members_then_declarations() {
        let mut class = ClassDecl::new("RBPoint");
        class.members = vec!["VALUE field_x;".to_string()];
        class.declarations = vec!["static void initialize_class();".to_string()];
        let text = render_nodes(&[class.into_node()]);
        assert_eq!(
            text,
            "struct RBPoint {\n    VALUE field_x;\n\n    static void initialize_class();\n};\n"
        );
    }
}
