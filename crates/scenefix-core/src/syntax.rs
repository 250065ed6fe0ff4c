//! Static syntax gate for scene source, backed by tree-sitter's Python grammar.
//!
//! The grammar is more permissive than the Python compiler: it keeps Python 2
//! `print`/`exec` statements and does not check indentation levels, argument
//! order, `return` placement, or parameter names. Those rules are checked on
//! the parsed tree after the grammar accepts the source.

use std::cell::RefCell;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser};

thread_local! {
    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // A failed language load surfaces as a parse failure below.
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });
}

/// Outcome of the syntax gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxCheck {
    pub valid: bool,
    pub message: String,
}

impl SyntaxCheck {
    fn ok() -> Self {
        Self {
            valid: true,
            message: "syntax OK".to_string(),
        }
    }

    fn failed(message: String) -> Self {
        Self {
            valid: false,
            message,
        }
    }

    fn failed_at(class: &str, what: &str, node: Node<'_>) -> Self {
        let pos = node.start_position();
        Self::failed(format!(
            "{}: {} (line {}, column {})",
            class,
            what,
            pos.row + 1,
            pos.column + 1
        ))
    }
}

/// A rule the grammar accepts but the compiler rejects.
struct Violation<'t> {
    node: Node<'t>,
    class: &'static str,
    what: String,
}

impl<'t> Violation<'t> {
    fn syntax(node: Node<'t>, what: impl Into<String>) -> Self {
        Self {
            node,
            class: "SyntaxError",
            what: what.into(),
        }
    }

    fn indentation(node: Node<'t>, what: impl Into<String>) -> Self {
        Self {
            node,
            class: "IndentationError",
            what: what.into(),
        }
    }
}

/// Parse `source` and report the first syntax error, if any.
pub fn check_syntax(source: &str) -> SyntaxCheck {
    let Some(tree) = PYTHON_PARSER.with(|p| p.borrow_mut().parse(source, None)) else {
        return SyntaxCheck::failed("SyntaxError: parser unavailable".to_string());
    };
    let root = tree.root_node();
    if !root.has_error() {
        return match first_violation(root, source) {
            Some(v) => SyntaxCheck::failed_at(v.class, &v.what, v.node),
            None => SyntaxCheck::ok(),
        };
    }

    match first_error(root) {
        Some(node) => {
            let pos = node.start_position();
            let what = if node.is_missing() {
                format!("missing '{}'", node.kind())
            } else {
                let text = source
                    .get(node.start_byte()..node.end_byte())
                    .unwrap_or_default()
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .trim();
                if text.is_empty() {
                    "invalid syntax".to_string()
                } else {
                    format!("invalid syntax near '{}'", text)
                }
            };
            SyntaxCheck::failed(format!(
                "SyntaxError: {} (line {}, column {})",
                what,
                pos.row + 1,
                pos.column + 1
            ))
        }
        None => SyntaxCheck::failed("SyntaxError: invalid syntax".to_string()),
    }
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_error)
}

fn first_violation<'t>(node: Node<'t>, source: &str) -> Option<Violation<'t>> {
    let found = match node.kind() {
        "print_statement" => Some(Violation::syntax(node, "Missing parentheses in call to 'print'")),
        "exec_statement" => Some(Violation::syntax(node, "Missing parentheses in call to 'exec'")),
        "return_statement" if !inside_function(node) => {
            Some(Violation::syntax(node, "'return' outside function"))
        }
        "argument_list" => misordered_argument(node),
        "parameters" | "lambda_parameters" => duplicate_parameter(node, source),
        "module" | "block" => misaligned_statement(node),
        _ => None,
    };
    if found.is_some() {
        return found;
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.children(&mut cursor).collect();
    children.into_iter().find_map(|c| first_violation(c, source))
}

fn inside_function(node: Node<'_>) -> bool {
    let mut current = node.parent();
    while let Some(n) = current {
        match n.kind() {
            "function_definition" => return true,
            "class_definition" | "module" => return false,
            _ => current = n.parent(),
        }
    }
    false
}

fn misordered_argument(list: Node<'_>) -> Option<Violation<'_>> {
    let mut seen_keyword = false;
    let mut seen_keyword_unpack = false;
    let mut cursor = list.walk();
    for arg in list.named_children(&mut cursor) {
        match arg.kind() {
            "comment" => {}
            "keyword_argument" => seen_keyword = true,
            "dictionary_splat" => seen_keyword_unpack = true,
            "list_splat" if seen_keyword_unpack => {
                return Some(Violation::syntax(
                    arg,
                    "iterable argument unpacking follows keyword argument unpacking",
                ))
            }
            "list_splat" => {}
            _ if seen_keyword_unpack => {
                return Some(Violation::syntax(
                    arg,
                    "positional argument follows keyword argument unpacking",
                ))
            }
            _ if seen_keyword => {
                return Some(Violation::syntax(arg, "positional argument follows keyword argument"))
            }
            _ => {}
        }
    }
    None
}

fn parameter_name(node: Node<'_>) -> Option<Node<'_>> {
    if node.kind() == "identifier" {
        return Some(node);
    }
    if let Some(name) = node.child_by_field_name("name") {
        return parameter_name(name);
    }
    let mut cursor = node.walk();
    let first = node.named_children(&mut cursor).next();
    first.and_then(parameter_name)
}

fn duplicate_parameter<'t>(params: Node<'t>, source: &str) -> Option<Violation<'t>> {
    let mut seen = HashSet::new();
    let mut cursor = params.walk();
    for param in params.named_children(&mut cursor) {
        let Some(name) = parameter_name(param) else {
            continue;
        };
        let text = source.get(name.start_byte()..name.end_byte()).unwrap_or_default();
        if !seen.insert(text) {
            return Some(Violation::syntax(
                name,
                format!("duplicate argument '{}' in function definition", text),
            ));
        }
    }
    None
}

/// Statements of one suite must start in the same column; module statements
/// start in column 0. Only the first statement of each line is checked.
fn misaligned_statement(suite: Node<'_>) -> Option<Violation<'_>> {
    let mut expected = (suite.kind() == "module").then_some(0);
    let mut prev: Option<Node<'_>> = None;
    let mut cursor = suite.walk();
    for stmt in suite.named_children(&mut cursor) {
        if matches!(stmt.kind(), "comment" | "line_continuation") {
            continue;
        }
        let start = stmt.start_position();
        let same_line = prev.is_some_and(|p| p.end_position().row == start.row);
        if !same_line {
            match expected {
                None => expected = Some(start.column),
                Some(col) if col == start.column => {}
                Some(col) => {
                    let after_suite = prev.is_some_and(|p| p.end_position().row > p.start_position().row);
                    let what = if start.column > col && !after_suite {
                        "unexpected indent"
                    } else {
                        "unindent does not match any outer indentation level"
                    };
                    return Some(Violation::indentation(stmt, what));
                }
            }
        }
        prev = Some(stmt);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify_error, ErrorKind};

    #[test]
    fn test_valid_scene_passes() {
        let src = "from manim import *\n\nclass S(Scene):\n    def construct(self):\n        self.play(Write(Text('hi')))\n";
        let check = check_syntax(src);
        assert!(check.valid, "{}", check.message);
    }

    #[test]
    fn test_unbalanced_paren_fails_with_position() {
        let src = "class S(Scene):\n    def construct(self):\n        self.play(Write(Text('hi'))\n";
        let check = check_syntax(src);
        assert!(!check.valid);
        assert!(check.message.starts_with("SyntaxError"));
        assert!(check.message.contains("line "));
    }

    #[test]
    fn test_bad_def_fails() {
        let check = check_syntax("def f(:\n    pass\n");
        assert!(!check.valid);
    }

    #[test]
    fn test_message_classifies_as_syntax() {
        let check = check_syntax("x = = 1\n");
        assert!(!check.valid);
        let d = classify_error(&check.message);
        assert_eq!(d.kind, ErrorKind::Syntax);
        assert!(d.line.is_some());
    }

    #[test]
    fn test_dedent_mismatch_is_indentation_error() {
        let check = check_syntax("def f():\n        x = 1\n    y = 2\n");
        assert!(!check.valid);
        assert!(check.message.starts_with("IndentationError"), "{}", check.message);
        let d = classify_error(&check.message);
        assert_eq!(d.kind, ErrorKind::Indentation);
        assert_eq!(d.line, Some(3));
    }

    #[test]
    fn test_misaligned_method_body_fails() {
        let src = "class S(Scene):\n    def construct(self):\n        a = 1\n          b = 2\n";
        assert!(!check_syntax(src).valid);
        let src = "class S(Scene):\n    def construct(self):\n        a = 1\n      b = 2\n";
        assert!(!check_syntax(src).valid);
    }

    #[test]
    fn test_python2_statements_fail() {
        let check = check_syntax("print \"hi\"\n");
        assert!(!check.valid);
        assert!(check.message.contains("Missing parentheses in call to 'print'"), "{}", check.message);

        let check = check_syntax("exec \"x = 1\"\n");
        assert!(!check.valid);
        assert!(check.message.contains("'exec'"), "{}", check.message);

        assert!(check_syntax("print(\"hi\")\n").valid);
    }

    #[test]
    fn test_positional_after_keyword_fails() {
        let check = check_syntax("f(a=1, 2)\n");
        assert!(!check.valid);
        assert!(check.message.contains("positional argument follows keyword argument"));
        assert!(check_syntax("f(1, *rest, a=1, **kw)\n").valid);
    }

    #[test]
    fn test_module_level_return_fails() {
        let check = check_syntax("return 5\n");
        assert!(!check.valid);
        assert!(check.message.contains("'return' outside function"));
        assert!(check_syntax("class A:\n    def f(self):\n        return 5\n").valid);
    }

    #[test]
    fn test_duplicate_parameter_fails() {
        let check = check_syntax("def f(x, x):\n    pass\n");
        assert!(!check.valid);
        assert!(check.message.contains("duplicate argument 'x'"));
        assert!(check_syntax("def f(x, y=1, *args, z: int = 2, **kw):\n    pass\n").valid);
    }

    #[test]
    fn test_comments_and_semicolons_do_not_trip_alignment() {
        let src = "class S(Scene):\n    def construct(self):\n        a = 1; b = 2\n        # note\n        if a:\n            pass\n        self.wait(1)\n";
        let check = check_syntax(src);
        assert!(check.valid, "{}", check.message);
    }
}
