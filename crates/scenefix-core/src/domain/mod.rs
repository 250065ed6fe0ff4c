//! Domain models for scenefix.
//!
//! Canonical definitions for the core entities:
//! - `Section`: one independently rendered segment of a video
//! - `Storyboard`: the ordered sections of one knowledge point
//! - output layout helpers shared by the loop and the CLI

pub mod error;
pub mod layout;
pub mod section;

// Re-export main types and errors
pub use error::{Result, ScenefixError, StoryboardError};
pub use layout::{output_dir_for, safe_topic_name};
pub use section::{scene_class_name, AnimationStep, Section, Storyboard};
