//! Intermediate code model.
//!
//! Emitters build trees of [`Node`]s instead of concatenating strings, and
//! the renderer turns a finished [`CppUnit`] into source text. Keeping the
//! two apart means the dispatch-table and emitter logic can be asserted on
//! structurally, without caring about indentation.

/// One element of a C++ body: a line, a blank separator, a braced block,
/// or a two-armed conditional.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Line(String),
    Blank,
    Braced {
        head: String,
        body: Vec<Node>,
        tail: String,
    },
    IfElse {
        cond: String,
        then_body: Vec<Node>,
        else_body: Vec<Node>,
    },
}

impl Node {
    pub fn line(text: impl Into<String>) -> Node {
        Node::Line(text.into())
    }

    /// `head {` ... `}`
    pub fn braced(head: impl Into<String>, body: Vec<Node>) -> Node {
        Node::Braced {
            head: head.into(),
            body,
            tail: "}".to_string(),
        }
    }

    /// A braced block with a custom closer, e.g. `};` or `});`.
    pub fn braced_with(head: impl Into<String>, body: Vec<Node>, tail: impl Into<String>) -> Node {
        Node::Braced {
            head: head.into(),
            body,
            tail: tail.into(),
        }
    }

    pub fn if_else(cond: impl Into<String>, then_body: Vec<Node>, else_body: Vec<Node>) -> Node {
        Node::IfElse {
            cond: cond.into(),
            then_body,
            else_body,
        }
    }

    /// A bare `{ ... }` scope, for stack locals inside a loop body.
    pub fn scope(body: Vec<Node>) -> Node {
        Node::Braced {
            head: String::new(),
            body,
            tail: "}".to_string(),
        }
    }

    /// Split a preformatted chunk into one `Line` per input line. Used for
    /// fixed statement sequences where structure adds nothing.
    pub fn lines(text: &str) -> Vec<Node> {
        text.lines()
            .map(|l| {
                if l.trim().is_empty() {
                    Node::Blank
                } else {
                    Node::Line(l.to_string())
                }
            })
            .collect()
    }
}

/// A free function or static method definition.
#[derive(Debug, Clone)]
pub struct Method {
    pub signature: String,
    pub body: Vec<Node>,
}

impl Method {
    pub fn new(signature: impl Into<String>, body: Vec<Node>) -> Self {
        Method {
            signature: signature.into(),
            body,
        }
    }

    pub fn into_node(self) -> Node {
        Node::braced(self.signature, self.body)
    }
}

/// A struct declaration for the header: member lines, method declaration
/// lines, and nested struct declarations, rendered in that order.
#[derive(Debug, Clone, Default)]
pub struct ClassDecl {
    pub comment: Option<String>,
    pub name: String,
    pub members: Vec<String>,
    pub declarations: Vec<String>,
    pub nested: Vec<ClassDecl>,
}

impl ClassDecl {
    pub fn new(name: impl Into<String>) -> Self {
        ClassDecl {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn into_node(self) -> Node {
        let mut body: Vec<Node> = Vec::new();
        for member in self.members {
            body.push(Node::Line(member));
        }
        if !body.is_empty() {
            body.push(Node::Blank);
        }
        for decl in self.declarations {
            body.push(Node::Line(decl));
        }
        for nested in self.nested {
            body.push(Node::Blank);
            body.push(nested.into_node());
        }
        Node::braced_with(format!("struct {}", self.name), body, "};")
    }

    pub fn into_commented_node(self) -> Vec<Node> {
        let mut nodes = Vec::new();
        if let Some(comment) = &self.comment {
            nodes.push(Node::Line(format!("// {}", comment)));
        }
        nodes.push(self.into_node());
        nodes
    }
}

/// One generated translation unit: includes, an optional include guard,
/// a namespace chain, and the body.
#[derive(Debug, Clone, Default)]
pub struct CppUnit {
    pub includes: Vec<String>,
    pub guard: Option<String>,
    pub namespaces: Vec<String>,
    pub body: Vec<Node>,
}

impl CppUnit {
    pub fn include_system(&mut self, path: &str) {
        self.includes.push(format!("#include <{}>", path));
    }

    pub fn include_local(&mut self, path: &str) {
        self.includes.push(format!("#include \"{}\"", path));
    }
}
