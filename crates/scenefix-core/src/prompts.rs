//! Prompt builders for code generation, repair and layout critique.

use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;

use crate::classify::{brief_error, ErrorDescriptor};
use crate::domain::Section;
use crate::region::CodeRegion;

/// Engine version the prompts target.
pub const ENGINE_VERSION: &str = "Manim Community Edition v0.19.0";

/// Base scene class every generated section inherits from. Provides the
/// layout grid (`A1`-`F6`) and the two placement helpers.
pub const TEACHING_SCENE_BASE: &str = r##"class TeachingScene(Scene):
    def setup_layout(self, title_text, lecture_lines):
        self.camera.background_color = "#000000"
        self.title = Text(title_text, font_size=28, color=WHITE).to_edge(UP)
        self.add(self.title)
        lecture_texts = [Text(line, font_size=22, color=WHITE) for line in lecture_lines]
        self.lecture = VGroup(*lecture_texts).arrange(DOWN, aligned_edge=LEFT).scale(0.8)
        self.lecture.to_edge(LEFT, buff=0.2)
        self.add(self.lecture)
        self.grid = {}
        for i, row in enumerate("ABCDEF"):
            for j, col in enumerate("123456"):
                self.grid[f"{row}{col}"] = np.array([0.5 + j, 2.2 - i, 0])

    def place_at_grid(self, mobject, grid_pos, scale_factor=1.0):
        mobject.scale(scale_factor)
        mobject.move_to(self.grid[grid_pos])
        return mobject

    def place_in_area(self, mobject, top_left, bottom_right, scale_factor=1.0):
        tl, br = self.grid[top_left], self.grid[bottom_right]
        mobject.scale(scale_factor)
        mobject.move_to(np.array([(tl[0] + br[0]) / 2, (tl[1] + br[1]) / 2, 0]))
        return mobject
"##;

fn base_class_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*class\s+TeachingScene\s*\(Scene\)\s*:").expect("static regex"))
}

fn class_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*class\s+\w+").expect("static regex"))
}

/// Replace any model-written `TeachingScene` with [`TEACHING_SCENE_BASE`], or
/// insert it before the first class when the model left it out.
pub fn install_base_class(code: &str) -> String {
    let lines: Vec<&str> = code.split('\n').collect();
    let block = format!("{}\n", TEACHING_SCENE_BASE.trim_end());

    let (head, tail) = match lines.iter().position(|l| base_class_header_re().is_match(l)) {
        Some(start) => {
            let indent = lines[start].len() - lines[start].trim_start().len();
            let end = lines[start + 1..]
                .iter()
                .position(|l| !l.trim().is_empty() && l.len() - l.trim_start().len() <= indent)
                .map_or(lines.len(), |offset| start + 1 + offset);
            (&lines[..start], &lines[end..])
        }
        None => {
            let at = lines
                .iter()
                .position(|l| class_header_re().is_match(l))
                .unwrap_or(0);
            (&lines[..at], &lines[at..])
        }
    };

    let mut out: Vec<String> = head.iter().map(|l| l.to_string()).collect();
    out.push(block);
    out.extend(tail.iter().map(|l| l.to_string()));
    out.join("\n")
}

/// Whole-file regeneration strategy, escalating with each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyTier {
    FocusedFix,
    ComprehensiveReview,
    CompleteRewrite,
}

impl StrategyTier {
    /// Tier for a 1-based attempt number; attempts past 3 repeat the rewrite.
    pub fn for_attempt(attempt: u32) -> Self {
        match attempt {
            0 | 1 => StrategyTier::FocusedFix,
            2 => StrategyTier::ComprehensiveReview,
            _ => StrategyTier::CompleteRewrite,
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            StrategyTier::FocusedFix => 1,
            StrategyTier::ComprehensiveReview => 2,
            StrategyTier::CompleteRewrite => 3,
        }
    }

    fn instructions(&self) -> &'static str {
        match self {
            StrategyTier::FocusedFix => {
                "FOCUSED FIX:\n\
                 - Fix only the reported error\n\
                 - Keep the existing structure and make the smallest change that works\n\
                 - Make sure imports, method names and parameters match the engine API"
            }
            StrategyTier::ComprehensiveReview => {
                "COMPREHENSIVE REVIEW:\n\
                 - Review the whole file, not just the reported line\n\
                 - Check every engine API call for version compatibility\n\
                 - Check variable declarations and scope\n\
                 - Keep Scene inheritance and the construct method intact"
            }
            StrategyTier::CompleteRewrite => {
                "COMPLETE REWRITE:\n\
                 - Rewrite the scene with a simpler, more robust approach\n\
                 - Use only long-established engine features\n\
                 - Prefer basic animations that are known to work over visual complexity"
            }
        }
    }
}

fn push_error_analysis(out: &mut String, raw_error: &str, error: &ErrorDescriptor) {
    let brief = brief_error(raw_error);
    let _ = writeln!(out, "Error analysis:");
    let _ = writeln!(out, "- Error type: {}", brief.tag);
    let _ = writeln!(out, "- Category: {:?}", brief.category);
    let _ = writeln!(out, "- Repair scope: {:?}", error.scope);
    if let Some(line) = error.line {
        let _ = writeln!(out, "- Line: {}", line);
    }
    if let Some(specific) = &brief.specific_error {
        let _ = writeln!(out, "- Message: {}", specific);
    }
    if let Some(hint) = &error.hint {
        let _ = writeln!(out, "- Suggested fix: {}", hint);
    }
    for s in &brief.suggestions {
        let _ = writeln!(out, "- {}", s);
    }
    let _ = writeln!(out, "\nFull error:\n```\n{}\n```", raw_error.trim());
}

/// Ask for a fix of one extracted region only.
pub fn local_fix_prompt(region: &CodeRegion, raw_error: &str, error: &ErrorDescriptor) -> String {
    let mut out = format!(
        "You are an expert {} developer. Fix the error in the following code block.\n\n",
        ENGINE_VERSION
    );
    push_error_analysis(&mut out, raw_error, error);
    let (first, last) = region.display_range();
    let _ = write!(
        out,
        "\nCode block (lines {}-{}):\n```python\n{}\n```\n\n\
         Requirements:\n\
         1. Fix only the reported error\n\
         2. Keep the block's structure, logic and indentation\n\
         3. Output ONLY the fixed code block, nothing else\n",
        first, last, region.text
    );
    out
}

/// Ask for a whole-file fix using the given strategy tier.
pub fn regenerate_prompt(
    tier: StrategyTier,
    attempt: u32,
    max_attempts: u32,
    source: &str,
    raw_error: &str,
    error: &ErrorDescriptor,
) -> String {
    let mut out = format!(
        "You are an expert {} developer. Fix the following scene code.\n\
         Attempt {}/{} (strategy {}).\n\n",
        ENGINE_VERSION,
        attempt,
        max_attempts,
        tier.number()
    );
    push_error_analysis(&mut out, raw_error, error);
    let _ = write!(
        out,
        "\nCurrent code:\n```python\n{}\n```\n\n{}\n\n\
         Requirements:\n\
         1. Output ONLY the complete fixed Python file\n\
         2. No explanations outside the code\n\
         3. The file must parse and import cleanly\n",
        source,
        tier.instructions()
    );
    out
}

/// Note appended to code generation prompts after a failed attempt.
pub fn regenerate_note(attempt: u32, max_attempts: u32) -> String {
    format!(
        "IMPORTANT: this is attempt {}/{} to generate working code. Earlier attempts \
         failed to run. Use only basic, well-tested engine functions and simple patterns.",
        attempt, max_attempts
    )
}

/// Initial code generation prompt for a section.
pub fn section_code_prompt(section: &Section, regenerate_note: Option<&str>) -> String {
    let mut out = format!(
        "You are an expert animator using {}. Generate one scene class for the \
         teaching section below.\n",
        ENGINE_VERSION
    );
    if let Some(note) = regenerate_note {
        let _ = writeln!(out, "{}", note);
    }

    let _ = writeln!(out, "\nSection:");
    let _ = writeln!(out, "- Title: {}", section.title);
    if let Some(total) = section.assigned_duration_secs {
        let _ = writeln!(out, "- Duration: {} seconds", total);
    }
    let _ = writeln!(out, "- Lecture lines: {:?}", section.lecture_lines);
    for (i, step) in section.animation_steps.iter().enumerate() {
        match step.allocated_duration_secs {
            Some(d) => {
                let _ = writeln!(out, "- Animation {} [{}s]: {}", i + 1, d, step.description);
            }
            None => {
                let _ = writeln!(out, "- Animation {}: {}", i + 1, step.description);
            }
        }
    }

    let _ = write!(
        out,
        "\nLayout:\n\
         - Position objects only with the 6x6 grid (rows A-F, columns 1-6)\n\
         - Point: self.place_at_grid(obj, 'B2', scale_factor=0.8)\n\
         - Area: self.place_in_area(obj, 'A1', 'C3', scale_factor=0.7)\n\
         - Only change the color of lecture lines, never their size or position\n\n\
         Structure:\n\
         - Start each block with `# === Animation for Lecture Line <N> ===`\n\
         - When a step has a duration, its run_time and wait calls must add up to it\n\n\
         ```python\nfrom manim import *\n\n{base}\nclass {class}(TeachingScene):\n    def construct(self):\n        \
         self.setup_layout({title:?}, {lines:?})\n\n        # === Animation for Lecture Line 1 ===\n        ...\n```\n",
        base = TEACHING_SCENE_BASE,
        class = section.scene_class_name(),
        title = section.title,
        lines = section.lecture_lines,
    );
    out
}

/// Layout critique request, seeded with the current position table.
pub fn layout_critique_prompt(section: &Section, position_table: &str) -> String {
    format!(
        "Analyze this educational animation ONLY for layout and spatial issues, using the \
         reference grid image for positions.\n\n\
         Title: {title}\n\
         Lecture lines: {lines}\n\
         Current grid occupancy:\n{table}\n\n\
         Grid: rows A-F top to bottom, columns 1-6 left to right, right of the lecture text.\n\
         - Point: self.place_at_grid(obj, 'B2', scale_factor=0.8)\n\
         - Area: self.place_in_area(obj, 'A1', 'C3', scale_factor=0.7)\n\n\
         Check for: animations covering the lecture text, overlapping elements, elements off \
         screen, poor grid use, and elements that should fade out but do not.\n\n\
         Reply with JSON only:\n\
         {{\"layout\": {{\"has_issues\": true, \"improvements\": [\
         {{\"problem\": \"...\", \"solution\": \"Line X: self.place_at_grid(...)\"}}]}}}}\n\
         List at most 3 problems. Each solution must name a source line and a grid position.\n",
        title = section.title,
        lines = section.lecture_lines.join("; "),
        table = position_table,
    )
}

/// Whole-file improvement request driven by critique feedback.
pub fn feedback_improve_prompt(feedback: &[String], source: &str) -> String {
    let items: Vec<String> = feedback.iter().map(|f| format!("- {}", f)).collect();
    format!(
        "You are a {} educational animation expert. Improve the code below based on the \
         feedback.\n\
         - Do not animate lecture lines except for color changes\n\
         - Output only the full updated Python file, no explanation\n\n\
         Feedback:\n{}\n\nCurrent code:\n```python\n{}\n```\n",
        ENGINE_VERSION,
        items.join("\n"),
        source
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify_error;
    use crate::region::extract_region;

    #[test]
    fn test_tier_escalation_caps_at_rewrite() {
        assert_eq!(StrategyTier::for_attempt(1), StrategyTier::FocusedFix);
        assert_eq!(StrategyTier::for_attempt(2), StrategyTier::ComprehensiveReview);
        assert_eq!(StrategyTier::for_attempt(3), StrategyTier::CompleteRewrite);
        assert_eq!(StrategyTier::for_attempt(7), StrategyTier::CompleteRewrite);
    }

    #[test]
    fn test_regenerate_prompt_carries_error_and_source() {
        let raw = "File \"s.py\", line 2\nNameError: name 'Txt' is not defined";
        let err = classify_error(raw);
        let prompt = regenerate_prompt(StrategyTier::ComprehensiveReview, 2, 3, "x = Txt()", raw, &err);
        assert!(prompt.contains("Attempt 2/3"));
        assert!(prompt.contains("COMPREHENSIVE REVIEW"));
        assert!(prompt.contains("x = Txt()"));
        assert!(prompt.contains("NameError"));
    }

    #[test]
    fn test_local_prompt_includes_region() {
        let src = "a\nb = Txt()\nc";
        let raw = "line 2\nNameError: name 'Txt' is not defined";
        let err = classify_error(raw);
        let region = extract_region(src, &err);
        let prompt = local_fix_prompt(&region, raw, &err);
        assert!(prompt.contains("lines 1-3"));
        assert!(prompt.contains("b = Txt()"));
    }

    #[test]
    fn test_install_base_class_replaces_model_copy() {
        let code = "from manim import *\n\nclass TeachingScene(Scene):\n    def broken(self):\n        pass\n\nclass Section1Scene(TeachingScene):\n    def construct(self):\n        pass";
        let out = install_base_class(code);
        assert!(!out.contains("def broken"));
        assert!(out.contains("def place_in_area"));
        assert_eq!(out.matches("class TeachingScene(Scene):").count(), 1);
        assert!(out.starts_with("from manim import *"));
        assert!(out.ends_with("class Section1Scene(TeachingScene):\n    def construct(self):\n        pass"));
    }

    #[test]
    fn test_install_base_class_inserts_before_first_class() {
        let code = "from manim import *\nclass Section1Scene(TeachingScene):\n    pass";
        let out = install_base_class(code);
        let base_at = out.find("class TeachingScene(Scene):").unwrap();
        let scene_at = out.find("class Section1Scene").unwrap();
        assert!(base_at < scene_at);
        assert!(out.starts_with("from manim import *\nclass TeachingScene"));
    }

    #[test]
    fn test_section_prompt_names_scene_class() {
        let mut section = Section::new("section_2", "Sorting");
        section.lecture_lines = vec!["Bubble sort swaps neighbours".to_string()];
        let prompt = section_code_prompt(&section, None);
        assert!(prompt.contains("class Section2Scene(TeachingScene)"));
        assert!(prompt.contains("# === Animation for Lecture Line 1 ==="));
    }
}
