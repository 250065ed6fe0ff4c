//! Grid position directives.
//!
//! Scene code places objects on a 6x6 layout grid (columns `A`-`F`, rows
//! `1`-`6`) through two helper calls:
//!
//! - `place_at_grid(obj, 'B2', scale_factor=0.8)`: point placement
//! - `place_in_area(obj, 'A1', 'C3', scale_factor=0.8)`: area placement
//!
//! [`extract_positions`] projects those calls into a [`PositionDirective`]
//! table for the layout critic. [`apply_feedback`] runs the other way: it
//! takes critic suggestions of the form `Line 42: place_at_grid(...)` and
//! rewrites the named source lines in place.

use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Placement primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Placement {
    /// `place_at_grid`: a single cell.
    Point { cell: String },
    /// `place_in_area`: a rectangle spanning two cells.
    Area { start: String, end: String },
}

impl Placement {
    pub fn method_name(&self) -> &'static str {
        match self {
            Placement::Point { .. } => "place_at_grid",
            Placement::Area { .. } => "place_in_area",
        }
    }

    /// `B2` or `A1-C3`.
    pub fn position(&self) -> String {
        match self {
            Placement::Point { cell } => cell.clone(),
            Placement::Area { start, end } => format!("{}-{}", start, end),
        }
    }
}

/// One placement call found in scene source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionDirective {
    pub target: String,
    pub placement: Placement,
    pub scale: Option<f64>,
    /// 1-based.
    pub line: usize,
    /// The source line, trimmed.
    pub raw_line: String,
}

fn point_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"\bplace_at_grid\(\s*([^,]+?)\s*,\s*['"]([A-F][1-6])['"](?:\s*,\s*scale_factor\s*=\s*([0-9.]+))?\s*\)"#,
        )
        .expect("static regex")
    })
}

fn area_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"\bplace_in_area\(\s*([^,]+?)\s*,\s*['"]([A-F][1-6])['"]\s*,\s*['"]([A-F][1-6])['"](?:\s*,\s*scale_factor\s*=\s*([0-9.]+))?\s*\)"#,
        )
        .expect("static regex")
    })
}

fn parse_scale(m: Option<regex::Match<'_>>) -> Option<f64> {
    m.and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|s| *s > 0.0)
}

/// Scan `source` for placement calls, in line order.
pub fn extract_positions(source: &str) -> Vec<PositionDirective> {
    let mut out = Vec::new();
    for (idx, line) in source.split('\n').enumerate() {
        if let Some(caps) = point_re().captures(line) {
            out.push(PositionDirective {
                target: caps[1].trim().to_string(),
                placement: Placement::Point {
                    cell: caps[2].to_string(),
                },
                scale: parse_scale(caps.get(3)),
                line: idx + 1,
                raw_line: line.trim().to_string(),
            });
        }
        if let Some(caps) = area_re().captures(line) {
            out.push(PositionDirective {
                target: caps[1].trim().to_string(),
                placement: Placement::Area {
                    start: caps[2].to_string(),
                    end: caps[3].to_string(),
                },
                scale: parse_scale(caps.get(4)),
                line: idx + 1,
                raw_line: line.trim().to_string(),
            });
        }
    }
    out
}

/// Markdown table of directives, one row each.
pub fn render_position_table(directives: &[PositionDirective]) -> String {
    if directives.is_empty() {
        return "No grid positions found in the code.".to_string();
    }
    let mut table = String::from("Current Grid Layout Positions:\n|Object|Method|Position|Scale|Line|\n");
    for d in directives {
        let scale = d
            .scale
            .map(|s| s.to_string())
            .unwrap_or_else(|| "default".to_string());
        let _ = writeln!(
            table,
            "|{}|{}|{}|{}|{}|",
            d.target,
            d.placement.method_name(),
            d.placement.position(),
            scale,
            d.line
        );
    }
    table
}

// ---------------------------------------------------------------------------
// Feedback application
// ---------------------------------------------------------------------------

/// A single line rewrite requested by feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEdit {
    /// 1-based.
    pub line: usize,
    pub call: String,
}

/// Why a feedback item produced no edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoLineNumber,
    NoPlacementCall,
    LineOutOfRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFeedback {
    pub item: String,
    pub reason: SkipReason,
}

/// Result of applying feedback to a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEdits {
    pub source: String,
    pub applied: Vec<LineEdit>,
    pub skipped: Vec<SkippedFeedback>,
}

impl FeedbackEdits {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

fn solution_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)solution\s*:\s*(.*)$").expect("static regex"))
}

fn feedback_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bline\s+(\d+)\b").expect("static regex"))
}

fn feedback_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:self\.)?\bplace_(?:at_grid|in_area)\(").expect("static regex"))
}

/// First placement call in `text`, through its matching close paren.
/// Parens inside string literals do not count.
fn find_placement_call(text: &str) -> Option<&str> {
    let head = feedback_call_re().find(text)?;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in text[head.end() - 1..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[head.start()..head.end() + i]);
                }
            }
            '\n' | '\r' => return None,
            _ => {}
        }
    }
    None
}

/// Pull `(line, call)` pairs out of free-text feedback.
///
/// Items without a line reference or placement call are returned as skipped.
pub fn parse_feedback_edits(items: &[String]) -> (Vec<LineEdit>, Vec<SkippedFeedback>) {
    let mut edits = Vec::new();
    let mut skipped = Vec::new();
    for item in items {
        let solution = solution_re()
            .captures(item)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_else(|| item.trim().to_string());

        let Some(line) = feedback_line_re()
            .captures(&solution)
            .and_then(|c| c[1].parse::<usize>().ok())
        else {
            skipped.push(SkippedFeedback {
                item: item.clone(),
                reason: SkipReason::NoLineNumber,
            });
            continue;
        };
        let Some(call) = find_placement_call(&solution) else {
            skipped.push(SkippedFeedback {
                item: item.clone(),
                reason: SkipReason::NoPlacementCall,
            });
            continue;
        };
        edits.push(LineEdit {
            line,
            call: call.trim().to_string(),
        });
    }
    (edits, skipped)
}

/// Apply critic feedback items to `source` as line rewrites.
///
/// Each edited line keeps its original leading whitespace. Malformed items
/// are skipped and reported, never fatal.
pub fn apply_feedback(source: &str, items: &[String]) -> FeedbackEdits {
    let (edits, mut skipped) = parse_feedback_edits(items);
    let mut lines: Vec<String> = source.split('\n').map(str::to_string).collect();
    let mut applied = Vec::new();

    for edit in edits {
        let Some(slot) = edit.line.checked_sub(1).and_then(|i| lines.get_mut(i)) else {
            skipped.push(SkippedFeedback {
                item: format!("line {}: {}", edit.line, edit.call),
                reason: SkipReason::LineOutOfRange,
            });
            continue;
        };
        let indent_len = slot.len() - slot.trim_start().len();
        let indent = slot[..indent_len].to_string();
        *slot = format!("{}{}", indent, edit.call);
        applied.push(edit);
    }

    FeedbackEdits {
        source: lines.join("\n"),
        applied,
        skipped,
    }
}
