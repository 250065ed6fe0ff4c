//! Section and storyboard model.
//!
//! A [`Section`] is one independently rendered segment of the final video. It is
//! immutable once the storyboard is loaded; per-section progress (generated
//! source, rendered video) is tracked by the render loop, not on the section.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{Result, ScenefixError, StoryboardError};

/// One animation step of a section, with the time budget allocated to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationStep {
    pub description: String,
    #[serde(default, alias = "duration")]
    pub allocated_duration_secs: Option<f64>,
}

/// Storyboards may list steps as bare strings or as objects with durations.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawStep {
    Text(String),
    Timed(AnimationStep),
}

impl From<RawStep> for AnimationStep {
    fn from(raw: RawStep) -> Self {
        match raw {
            RawStep::Text(description) => AnimationStep {
                description,
                allocated_duration_secs: None,
            },
            RawStep::Timed(step) => step,
        }
    }
}

fn deserialize_steps<'de, D>(deserializer: D) -> std::result::Result<Vec<AnimationStep>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Vec<RawStep> = Vec::deserialize(deserializer)?;
    Ok(raw.into_iter().map(AnimationStep::from).collect())
}

/// A storyboard section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub lecture_lines: Vec<String>,
    #[serde(
        default,
        alias = "animations",
        deserialize_with = "deserialize_steps"
    )]
    pub animation_steps: Vec<AnimationStep>,
    #[serde(default, alias = "duration")]
    pub assigned_duration_secs: Option<f64>,
}

impl Section {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            lecture_lines: Vec::new(),
            animation_steps: Vec::new(),
            assigned_duration_secs: None,
        }
    }

    /// Source file name for this section (`<id>.py`).
    pub fn source_file_name(&self) -> String {
        format!("{}.py", self.id)
    }

    /// Scene class the generated source is expected to define.
    pub fn scene_class_name(&self) -> String {
        scene_class_name(&self.id)
    }

    /// Sum of per-step allocations, when every step carries one.
    pub fn allocated_duration_secs(&self) -> Option<f64> {
        self.animation_steps
            .iter()
            .map(|s| s.allocated_duration_secs)
            .sum::<Option<f64>>()
    }
}

/// Scene class name for a section id: title-case each word, drop underscores,
/// append `Scene` (`section_1` -> `Section1Scene`).
pub fn scene_class_name(section_id: &str) -> String {
    let mut out = String::with_capacity(section_id.len() + 5);
    let mut at_word_start = true;
    for ch in section_id.chars() {
        if ch.is_alphabetic() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            at_word_start = true;
            if ch != '_' {
                out.push(ch);
            }
        }
    }
    out.push_str("Scene");
    out
}

/// A storyboard: the ordered sections of one knowledge point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Storyboard {
    #[serde(default)]
    pub topic: Option<String>,
    pub sections: Vec<Section>,
}

impl Storyboard {
    /// Parse and validate a storyboard JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let storyboard: Storyboard = serde_json::from_str(json)?;
        storyboard.validate()?;
        Ok(storyboard)
    }

    /// Load a storyboard from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn section(&self, id: &str) -> Result<&Section> {
        self.sections
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| ScenefixError::SectionNotFound(id.to_string()))
    }

    fn validate(&self) -> std::result::Result<(), StoryboardError> {
        if self.sections.is_empty() {
            return Err(StoryboardError::Empty);
        }
        let mut seen = HashSet::new();
        for (index, section) in self.sections.iter().enumerate() {
            if section.id.trim().is_empty() {
                return Err(StoryboardError::MissingField {
                    index,
                    field: "id".to_string(),
                });
            }
            if !seen.insert(section.id.as_str()) {
                return Err(StoryboardError::DuplicateId(section.id.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_class_name() {
        assert_eq!(scene_class_name("section_1"), "Section1Scene");
        assert_eq!(scene_class_name("intro"), "IntroScene");
        assert_eq!(scene_class_name("deep_DIVE_2b"), "DeepDive2BScene");
    }

    #[test]
    fn test_storyboard_accepts_string_and_timed_steps() {
        let json = r#"{
            "sections": [{
                "id": "section_1",
                "title": "Intro",
                "lecture_lines": ["Hello"],
                "animations": [
                    "Fade in the title",
                    {"description": "Draw the axes", "duration": 2.5}
                ]
            }]
        }"#;
        let sb = Storyboard::from_json(json).unwrap();
        let section = &sb.sections[0];
        assert_eq!(section.animation_steps.len(), 2);
        assert_eq!(section.animation_steps[0].allocated_duration_secs, None);
        assert_eq!(section.animation_steps[1].allocated_duration_secs, Some(2.5));
        assert_eq!(section.allocated_duration_secs(), None);
        assert_eq!(section.source_file_name(), "section_1.py");
    }

    #[test]
    fn test_storyboard_rejects_duplicates() {
        let json = r#"{"sections": [
            {"id": "a", "title": "A"},
            {"id": "a", "title": "B"}
        ]}"#;
        match Storyboard::from_json(json) {
            Err(ScenefixError::Storyboard(StoryboardError::DuplicateId(id))) => assert_eq!(id, "a"),
            other => panic!("expected DuplicateId, got {:?}", other),
        }
    }

    #[test]
    fn test_section_lookup() {
        let sb = Storyboard::from_json(r#"{"sections": [{"id": "s1", "title": "One"}]}"#).unwrap();
        assert_eq!(sb.section("s1").unwrap().title, "One");
        assert!(matches!(sb.section("s9"), Err(ScenefixError::SectionNotFound(id)) if id == "s9"));
    }

    #[test]
    fn test_storyboard_rejects_empty() {
        assert!(Storyboard::from_json(r#"{"sections": []}"#).is_err());
    }
}
