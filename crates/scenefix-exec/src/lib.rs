//! scenefix exec - process-backed collaborators
//!
//! Implements the core's external contracts with real subprocesses:
//! - `ManimRenderer`: the render command
//! - `PythonDryRunner`: the dry-run validation gate
//! - `FfmpegConcatenator`: final video concatenation

pub mod command;
pub mod concat;
pub mod dry_run;
pub mod manim;
pub mod runner;

// Re-export key types
pub use command::CommandSpec;
pub use concat::{concat_list, FfmpegConcatenator};
pub use dry_run::{python_validator, PythonDryRunner};
pub use manim::ManimRenderer;
pub use runner::{ProcessOutput, ProcessRunner};
