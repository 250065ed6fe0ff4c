//! Error classification for scene render and validation failures.
//!
//! Turns raw traceback / compiler text into an [`ErrorDescriptor`]: the error
//! kind, the reported position, the offending source line, and the repair scope
//! (how much code a repair is allowed to touch).
//!
//! Kinds are resolved through an ordered, declarative rule table
//! ([`KIND_RULES`]); each rule carries its own analyzer that may narrow the
//! scope and attach a suggestion. Classification is pure and never fails:
//! unrecognized input degrades to [`ErrorKind::Unclassified`] with the most
//! conservative scope.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Error kind taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Name,
    Attribute,
    Type,
    Value,
    Import,
    Syntax,
    Indentation,
    Unclassified,
}

/// Blast radius a repair may rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairScope {
    /// A window of lines around the error line.
    Line,
    /// The enclosing function definition.
    Function,
    /// The enclosing marked animation segment.
    Segment,
    /// The whole file; local repair is skipped.
    File,
}

/// Kind-specific token pulled out of the error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorSubject {
    UndefinedName { name: String },
    MissingAttribute { type_name: String, attribute: String },
}

/// Structured view of one raw error string. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    /// The exception tag as it appeared (`KeyError`, `ModuleNotFoundError`, ...).
    pub tag: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub offending_snippet: Option<String>,
    pub scope: RepairScope,
    pub hint: Option<String>,
    pub subject: Option<ErrorSubject>,
}

/// What a kind analyzer contributes on top of the parsed position.
struct Analysis {
    scope: RepairScope,
    hint: Option<String>,
    subject: Option<ErrorSubject>,
}

impl Analysis {
    fn scope(scope: RepairScope) -> Self {
        Self {
            scope,
            hint: None,
            subject: None,
        }
    }

    fn hinted(scope: RepairScope, hint: impl Into<String>) -> Self {
        Self {
            scope,
            hint: Some(hint.into()),
            subject: None,
        }
    }
}

/// One row of the classification table.
struct KindRule {
    tags: &'static [&'static str],
    kind: ErrorKind,
    analyze: fn(&str) -> Analysis,
}

/// Ordered kind table; the first rule listing the extracted tag wins.
const KIND_RULES: &[KindRule] = &[
    KindRule {
        tags: &["NameError", "UnboundLocalError"],
        kind: ErrorKind::Name,
        analyze: analyze_name_error,
    },
    KindRule {
        tags: &["AttributeError"],
        kind: ErrorKind::Attribute,
        analyze: analyze_attribute_error,
    },
    KindRule {
        tags: &["TypeError"],
        kind: ErrorKind::Type,
        analyze: analyze_type_error,
    },
    KindRule {
        tags: &["ValueError"],
        kind: ErrorKind::Value,
        analyze: analyze_value_error,
    },
    KindRule {
        tags: &["ImportError", "ModuleNotFoundError"],
        kind: ErrorKind::Import,
        analyze: |_| {
            Analysis::hinted(
                RepairScope::Line,
                "Check whether the import statement is correct",
            )
        },
    },
    KindRule {
        tags: &["IndentationError", "TabError"],
        kind: ErrorKind::Indentation,
        analyze: |_| Analysis::hinted(RepairScope::Line, "Check if the indentation is correct"),
    },
    KindRule {
        tags: &["SyntaxError"],
        kind: ErrorKind::Syntax,
        analyze: |_| {
            Analysis::hinted(
                RepairScope::Line,
                "Check for syntax errors: parenthesis matching, indentation, etc",
            )
        },
    },
];

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

fn final_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?m)^\s*(?:[\w.]+\.)?(\w+(?:Error|Exception))\s*:")
}

fn any_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\b(\w+(?:Error|Exception))\b")
}

fn frame_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r#"File "([^"]+)", line (\d+)"#)
}

fn line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\bline (\d+)")
}

fn column_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\bcolumn (\d+)")
}

/// Classify a raw error string. Pure and total.
pub fn classify_error(raw: &str) -> ErrorDescriptor {
    let tag = extract_tag(raw);
    let (line, snippet) = extract_position(raw);
    let column = column_re()
        .captures(raw)
        .and_then(|c| c[1].parse::<u32>().ok())
        .filter(|c| *c > 0);

    let rule = tag
        .as_deref()
        .and_then(|t| KIND_RULES.iter().find(|r| r.tags.contains(&t)));

    let (kind, analysis) = match rule {
        Some(rule) => (rule.kind, (rule.analyze)(raw)),
        None => {
            let scope = if line.is_some() {
                RepairScope::Function
            } else {
                RepairScope::File
            };
            (ErrorKind::Unclassified, Analysis::scope(scope))
        }
    };

    ErrorDescriptor {
        kind,
        tag,
        line,
        column,
        offending_snippet: snippet,
        scope: analysis.scope,
        hint: analysis.hint,
        subject: analysis.subject,
    }
}

/// The exception tag: the last `Tag: message` line, else the first tag-like word.
fn extract_tag(raw: &str) -> Option<String> {
    if let Some(caps) = final_tag_re().captures_iter(raw).last() {
        return Some(caps[1].to_string());
    }
    any_tag_re().captures(raw).map(|c| c[1].to_string())
}

fn is_library_frame(path: &str) -> bool {
    path.contains("site-packages")
        || path.contains("dist-packages")
        || path.contains("/lib/python")
        || path.starts_with("<frozen")
}

/// Error line plus the source text Python echoes under the chosen frame.
fn extract_position(raw: &str) -> (Option<u32>, Option<String>) {
    let frame = frame_re()
        .captures_iter(raw)
        .filter(|c| !is_library_frame(&c[1]))
        .last();

    if let Some(caps) = frame {
        let line = caps[2].parse::<u32>().ok().filter(|l| *l > 0);
        let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
        let snippet = raw[end..]
            .lines()
            .nth(1)
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.starts_with("File ") && !s.starts_with('^'))
            .map(str::to_string);
        return (line, snippet);
    }

    let line = line_re()
        .captures(raw)
        .and_then(|c| c[1].parse::<u32>().ok())
        .filter(|l| *l > 0);
    (line, None)
}

// ---------------------------------------------------------------------------
// Kind analyzers
// ---------------------------------------------------------------------------

/// Engine names commonly used without being imported or created.
const KNOWN_ENGINE_NAMES: &[&str] = &[
    "Text",
    "Circle",
    "Square",
    "VGroup",
    "Create",
    "Write",
    "FadeIn",
    "FadeOut",
    "Transform",
];

fn analyze_name_error(raw: &str) -> Analysis {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = regex(&RE, r"name '(\w+)' is not defined");
    let Some(caps) = re.captures(raw) else {
        return Analysis::scope(RepairScope::Line);
    };
    let name = caps[1].to_string();
    let lower = name.to_lowercase();
    let candidates: Vec<String> = KNOWN_ENGINE_NAMES
        .iter()
        .filter(|known| {
            let known_lower = known.to_lowercase();
            known_lower.contains(&lower) || lower.contains(&known_lower)
        })
        .map(|known| format!("from manim import {}", known))
        .collect();

    Analysis {
        scope: RepairScope::Line,
        hint: (!candidates.is_empty())
            .then(|| format!("May need to import or create: {}", candidates.join(", "))),
        subject: Some(ErrorSubject::UndefinedName { name }),
    }
}

fn analyze_attribute_error(raw: &str) -> Analysis {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = regex(&RE, r"'(\w+)' object has no attribute '(\w+)'");
    let Some(caps) = re.captures(raw) else {
        return Analysis::scope(RepairScope::Line);
    };
    let type_name = caps[1].to_string();
    let attribute = caps[2].to_string();
    let hint = match (type_name.as_str(), attribute.as_str()) {
        ("Text", "color") => "Try to use set_color()".to_string(),
        ("Text", "font") => "Try to use font_size parameter in constructor".to_string(),
        ("Mobject", "move_to") => "Try to use move_to() method exists".to_string(),
        ("Mobject", "shift") => "Try to use shift() method exists".to_string(),
        _ => format!(
            "Check whether the {} object has the {} attribute",
            type_name, attribute
        ),
    };
    Analysis {
        scope: RepairScope::Line,
        hint: Some(hint),
        subject: Some(ErrorSubject::MissingAttribute {
            type_name,
            attribute,
        }),
    }
}

fn analyze_type_error(raw: &str) -> Analysis {
    if raw.contains("takes") && raw.contains("positional argument") {
        return Analysis::hinted(
            RepairScope::Function,
            "Check the number of parameters in the function call",
        );
    }
    if raw.contains("unsupported operand type") {
        return Analysis::hinted(
            RepairScope::Function,
            "Check whether the operand types match",
        );
    }
    Analysis::scope(RepairScope::Function)
}

fn analyze_value_error(raw: &str) -> Analysis {
    if raw.contains("Animation") || raw.contains("self.play(") {
        return Analysis::hinted(
            RepairScope::Segment,
            "Check the parameters and usage of the animation class",
        );
    }
    Analysis::scope(RepairScope::Line)
}

// ---------------------------------------------------------------------------
// Category table and prompt context
// ---------------------------------------------------------------------------

/// Coarse problem area, used to steer repair prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    EngineImport,
    SceneMethod,
    Mobject,
    Animation,
    Syntax,
    General,
}

struct CategoryRule {
    pattern: &'static str,
    category: ErrorCategory,
    suggestion: &'static str,
}

const CATEGORY_RULES: &[CategoryRule] = &[
    CategoryRule {
        pattern: r"(?i)No module named.*manim",
        category: ErrorCategory::EngineImport,
        suggestion: "Make sure to import correctly: from manim import *",
    },
    CategoryRule {
        pattern: r"(?i)'.*Scene'.*has no attribute",
        category: ErrorCategory::SceneMethod,
        suggestion: "Check the method names of the Scene class to ensure that the correct API is used",
    },
    CategoryRule {
        pattern: r"(?i).*Mobject.*has no attribute",
        category: ErrorCategory::Mobject,
        suggestion: "Check the methods and properties of Mobject to ensure version compatibility",
    },
    CategoryRule {
        pattern: r"(?i).*Animation.*",
        category: ErrorCategory::Animation,
        suggestion: "Check the parameters and usage of the animation class",
    },
    CategoryRule {
        pattern: r"(?i)SyntaxError|IndentationError",
        category: ErrorCategory::Syntax,
        suggestion: "Fix grammar errors and indentation issues",
    },
];

fn category_regexes() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        CATEGORY_RULES
            .iter()
            .map(|r| Regex::new(r.pattern).expect("static regex"))
            .collect()
    })
}

/// General advice keyed by exception tag; first tag found in the text wins.
const TAG_SUGGESTIONS: &[(&str, &str)] = &[
    ("AttributeError", "Object property error. Check the method name and property name"),
    ("NameError", "The variable is undefined. Check the variable declaration and scope"),
    ("TypeError", "Type error. Check the parameter type and quantity"),
    ("ImportError", "Import error. Check the module name and version compatibility"),
    ("ValueError", "The value is incorrect. Check the validity of the parameter value"),
    ("IndexError", "Index error. Check the list/array boundary"),
    ("KeyError", "Key error. Check the existence of the dictionary key"),
];

/// Category plus accumulated suggestions for prompt construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBrief {
    pub tag: String,
    pub category: ErrorCategory,
    pub suggestions: Vec<String>,
    pub line_number: Option<u32>,
    /// Last non-indented, non-empty line of the traceback.
    pub specific_error: Option<String>,
}

/// Summarize an error for a repair prompt.
pub fn brief_error(raw: &str) -> ErrorBrief {
    let mut suggestions = Vec::new();
    let mut tag = "Unknown".to_string();
    if let Some((t, s)) = TAG_SUGGESTIONS.iter().find(|(t, _)| raw.contains(t)) {
        tag = t.to_string();
        suggestions.push(s.to_string());
    }

    let mut category = ErrorCategory::General;
    if let Some((rule, _)) = CATEGORY_RULES
        .iter()
        .zip(category_regexes())
        .find(|(_, re)| re.is_match(raw))
    {
        category = rule.category;
        suggestions.push(rule.suggestion.to_string());
    }

    let line_number = line_re()
        .captures(raw)
        .and_then(|c| c[1].parse::<u32>().ok());
    let specific_error = raw
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty() && !l.starts_with("  "))
        .map(|l| l.trim().to_string());

    ErrorBrief {
        tag,
        category,
        suggestions,
        line_number,
        specific_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME_TRACE: &str = r#"Traceback (most recent call last):
  File "/usr/lib/python3.11/site-packages/manim/cli/render/commands.py", line 120, in render
    scene.render()
  File "/work/section_1.py", line 14, in construct
    title = Tex("Hello")
NameError: name 'Tex' is not defined"#;

    #[test]
    fn name_error_is_line_scoped_with_subject() {
        let d = classify_error(NAME_TRACE);
        assert_eq!(d.kind, ErrorKind::Name);
        assert_eq!(d.tag.as_deref(), Some("NameError"));
        assert_eq!(d.line, Some(14));
        assert_eq!(d.scope, RepairScope::Line);
        assert_eq!(d.offending_snippet.as_deref(), Some(r#"title = Tex("Hello")"#));
        assert_eq!(
            d.subject,
            Some(ErrorSubject::UndefinedName {
                name: "Tex".to_string()
            })
        );
        assert!(d.hint.unwrap().contains("from manim import Text"));
    }

    #[test]
    fn library_frames_are_skipped_for_line_number() {
        let raw = "File \"/work/s.py\", line 3, in construct\n    foo()\n\
                   File \"/x/site-packages/manim/a.py\", line 99, in foo\n    bar\n\
                   ValueError: bad";
        assert_eq!(classify_error(raw).line, Some(3));
    }

    #[test]
    fn attribute_error_extracts_type_and_attribute() {
        let d = classify_error("AttributeError: 'Text' object has no attribute 'color'");
        assert_eq!(d.kind, ErrorKind::Attribute);
        assert_eq!(d.hint.as_deref(), Some("Try to use set_color()"));
        assert_eq!(
            d.subject,
            Some(ErrorSubject::MissingAttribute {
                type_name: "Text".to_string(),
                attribute: "color".to_string(),
            })
        );
    }

    #[test]
    fn type_error_widens_to_function() {
        let d = classify_error(
            "File \"s.py\", line 8\nTypeError: f() takes 2 positional arguments but 3 were given",
        );
        assert_eq!(d.kind, ErrorKind::Type);
        assert_eq!(d.scope, RepairScope::Function);
        assert!(d.hint.unwrap().contains("number of parameters"));
    }

    #[test]
    fn animation_value_error_is_segment_scoped() {
        let d = classify_error("line 40\nValueError: Animation run_time must be positive");
        assert_eq!(d.kind, ErrorKind::Value);
        assert_eq!(d.scope, RepairScope::Segment);
    }

    #[test]
    fn syntax_error_with_column() {
        let d = classify_error("SyntaxError: invalid syntax at line 5, column 12");
        assert_eq!(d.kind, ErrorKind::Syntax);
        assert_eq!(d.line, Some(5));
        assert_eq!(d.column, Some(12));
        assert_eq!(d.scope, RepairScope::Line);
    }

    #[test]
    fn module_not_found_maps_to_import() {
        let d = classify_error("ModuleNotFoundError: No module named 'manim_extras'");
        assert_eq!(d.kind, ErrorKind::Import);
        assert_eq!(d.tag.as_deref(), Some("ModuleNotFoundError"));
    }

    #[test]
    fn unknown_error_defaults_by_line_presence() {
        let with_line = classify_error("File \"s.py\", line 7\nKeyError: 'x'");
        assert_eq!(with_line.kind, ErrorKind::Unclassified);
        assert_eq!(with_line.tag.as_deref(), Some("KeyError"));
        assert_eq!(with_line.scope, RepairScope::Function);

        let without_line = classify_error("something exploded");
        assert_eq!(without_line.kind, ErrorKind::Unclassified);
        assert_eq!(without_line.scope, RepairScope::File);
        assert_eq!(without_line.line, None);
    }

    #[test]
    fn empty_input_is_unclassified() {
        let d = classify_error("");
        assert_eq!(d.kind, ErrorKind::Unclassified);
        assert_eq!(d.scope, RepairScope::File);
    }

    #[test]
    fn classification_is_deterministic() {
        let a = classify_error(NAME_TRACE);
        let b = classify_error(NAME_TRACE);
        assert_eq!(a, b);
    }

    #[test]
    fn brief_collects_tag_and_category_suggestions() {
        let brief = brief_error("AttributeError: 'Circle' Mobject has no attribute 'glow'");
        assert_eq!(brief.tag, "AttributeError");
        assert_eq!(brief.category, ErrorCategory::Mobject);
        assert_eq!(brief.suggestions.len(), 2);
        assert_eq!(
            brief.specific_error.as_deref(),
            Some("AttributeError: 'Circle' Mobject has no attribute 'glow'")
        );
    }

    #[test]
    fn brief_defaults_to_general() {
        let brief = brief_error("it broke");
        assert_eq!(brief.tag, "Unknown");
        assert_eq!(brief.category, ErrorCategory::General);
        assert!(brief.suggestions.is_empty());
    }
}
