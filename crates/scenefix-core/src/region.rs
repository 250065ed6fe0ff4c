//! Code region extraction.
//!
//! Picks the smallest span of a scene file a local repair should see, based on
//! the error's [`RepairScope`] and line. Regions are always whole, contiguous
//! lines of the source; when the scope or line cannot be resolved the whole
//! file is returned.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::classify::{ErrorDescriptor, RepairScope};

/// Lines kept on each side of the error line for [`RepairScope::Line`].
pub const LINE_WINDOW: usize = 5;

/// A contiguous line span of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRegion {
    /// First line, 0-based.
    pub start: usize,
    /// One past the last line, 0-based.
    pub end: usize,
    /// Scope that actually produced the span, after any fallbacks.
    pub scope: RepairScope,
    pub text: String,
}

impl CodeRegion {
    fn from_lines(lines: &[&str], start: usize, end: usize, scope: RepairScope) -> Self {
        Self {
            start,
            end,
            scope,
            text: lines[start..end].join("\n"),
        }
    }

    /// True if the region spans the entire source.
    pub fn is_whole_file(&self, source: &str) -> bool {
        self.start == 0 && self.end == source.split('\n').count()
    }

    /// 1-based inclusive line range, for logs and prompts.
    pub fn display_range(&self) -> (usize, usize) {
        (self.start + 1, self.end.max(self.start + 1))
    }
}

fn def_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:async\s+)?def\s+\w+").expect("static regex"))
}

fn segment_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*# === Animation for Lecture Line \d+(?: \([^)]*\))? ===")
            .expect("static regex")
    })
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Extract the repair region for `error` from `source`.
pub fn extract_region(source: &str, error: &ErrorDescriptor) -> CodeRegion {
    let lines: Vec<&str> = source.split('\n').collect();
    let whole = || CodeRegion::from_lines(&lines, 0, lines.len(), RepairScope::File);

    let Some(idx) = error
        .line
        .map(|l| l as usize)
        .filter(|l| *l >= 1 && *l <= lines.len())
        .map(|l| l - 1)
    else {
        return whole();
    };

    let span = match error.scope {
        RepairScope::Line => Some(line_span(&lines, idx)),
        RepairScope::Function => function_span(&lines, idx).or_else(|| Some(line_span(&lines, idx))),
        RepairScope::Segment => segment_span(&lines, idx)
            .or_else(|| function_span(&lines, idx))
            .or_else(|| Some(line_span(&lines, idx))),
        RepairScope::File => None,
    };

    match span {
        Some((start, end, scope)) => CodeRegion::from_lines(&lines, start, end, scope),
        None => whole(),
    }
}

fn line_span(lines: &[&str], idx: usize) -> (usize, usize, RepairScope) {
    let start = idx.saturating_sub(LINE_WINDOW);
    let end = (idx + LINE_WINDOW + 1).min(lines.len());
    (start, end, RepairScope::Line)
}

/// Nearest enclosing `def` at or above `idx`, through to the first non-blank
/// line indented no deeper than the header.
fn function_span(lines: &[&str], idx: usize) -> Option<(usize, usize, RepairScope)> {
    let error_indent = indent_of(lines[idx]);
    let header = (0..=idx).rev().find(|&i| {
        def_header_re().is_match(lines[i]) && indent_of(lines[i]) <= error_indent
    })?;
    let header_indent = indent_of(lines[header]);
    let end = lines
        .iter()
        .enumerate()
        .skip(header + 1)
        .find(|(_, l)| !l.trim().is_empty() && indent_of(l) <= header_indent)
        .map(|(i, _)| i)
        .unwrap_or(lines.len());
    Some((header, end, RepairScope::Function))
}

/// From the last segment marker at or before `idx` up to the next marker or EOF.
fn segment_span(lines: &[&str], idx: usize) -> Option<(usize, usize, RepairScope)> {
    let start = (0..=idx)
        .rev()
        .find(|&i| segment_marker_re().is_match(lines[i]))?;
    let end = (idx + 1..lines.len())
        .find(|&i| segment_marker_re().is_match(lines[i]))
        .unwrap_or(lines.len());
    Some((start, end, RepairScope::Segment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorKind;

    fn descriptor(line: Option<u32>, scope: RepairScope) -> ErrorDescriptor {
        ErrorDescriptor {
            kind: ErrorKind::Unclassified,
            tag: None,
            line,
            column: None,
            offending_snippet: None,
            scope,
            hint: None,
            subject: None,
        }
    }

    fn numbered(n: usize) -> String {
        (1..=n).map(|i| format!("x{}", i)).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn line_scope_is_clamped_window() {
        let src = numbered(20);
        let r = extract_region(&src, &descriptor(Some(10), RepairScope::Line));
        assert_eq!((r.start, r.end), (4, 15));
        assert!(r.text.starts_with("x5\n"));
        assert!(r.text.ends_with("x15"));

        let r = extract_region(&src, &descriptor(Some(2), RepairScope::Line));
        assert_eq!((r.start, r.end), (0, 7));
    }

    #[test]
    fn function_scope_finds_enclosing_def() {
        let src = "\
from manim import *

class S(Scene):
    def construct(self):
        a = 1
        b = undefined

        c = 3
    def helper(self):
        pass";
        let r = extract_region(src, &descriptor(Some(6), RepairScope::Function));
        assert_eq!(r.scope, RepairScope::Function);
        assert_eq!((r.start, r.end), (3, 8));
        assert!(r.text.starts_with("    def construct(self):"));
        assert!(!r.text.contains("helper"));
    }

    #[test]
    fn function_scope_falls_back_to_line() {
        let src = numbered(30);
        let r = extract_region(&src, &descriptor(Some(15), RepairScope::Function));
        assert_eq!(r.scope, RepairScope::Line);
        assert_eq!((r.start, r.end), (9, 20));
    }

    #[test]
    fn segment_scope_brackets_markers() {
        let mut lines: Vec<String> = (1..=40).map(|i| format!("        step_{}()", i)).collect();
        lines[9] = "        # === Animation for Lecture Line 1 ===".to_string();
        lines[29] = "        # === Animation for Lecture Line 2 (Duration: 12s) ===".to_string();
        let src = lines.join("\n");

        let r = extract_region(&src, &descriptor(Some(20), RepairScope::Segment));
        assert_eq!(r.scope, RepairScope::Segment);
        assert_eq!(r.display_range(), (10, 29));
        assert!(r.text.starts_with("        # === Animation for Lecture Line 1 ==="));
        assert!(r.text.ends_with("step_29()"));

        let r = extract_region(&src, &descriptor(Some(35), RepairScope::Segment));
        assert_eq!((r.start, r.end), (29, 40));
    }

    #[test]
    fn segment_scope_without_markers_falls_back_to_function() {
        let src = "class S(Scene):\n    def construct(self):\n        x()\n        y()";
        let r = extract_region(src, &descriptor(Some(3), RepairScope::Segment));
        assert_eq!(r.scope, RepairScope::Function);
        assert_eq!((r.start, r.end), (1, 4));
    }

    #[test]
    fn indeterminate_returns_whole_file() {
        let src = numbered(8);
        for d in [
            descriptor(None, RepairScope::Line),
            descriptor(Some(99), RepairScope::Line),
            descriptor(Some(3), RepairScope::File),
        ] {
            let r = extract_region(&src, &d);
            assert_eq!(r.text, src);
            assert!(r.is_whole_file(&src));
        }
    }

    #[test]
    fn region_is_contiguous_substring() {
        let src = "def f():\n    a\n\n    b\nc\n";
        for line in 1..=6 {
            for scope in [RepairScope::Line, RepairScope::Function, RepairScope::Segment] {
                let r = extract_region(src, &descriptor(Some(line), scope));
                assert!(src.contains(&r.text));
                let lines: Vec<&str> = src.split('\n').collect();
                assert_eq!(r.text, lines[r.start..r.end].join("\n"));
            }
        }
    }
}
