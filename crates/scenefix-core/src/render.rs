//! Scene rendering contract.
//!
//! Rendering runs the animation engine CLI in the section's output directory.
//! Exit code 0 plus a video at the conventional quality-dependent path means
//! success; anything else hands stderr to the repair loop.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Render quality preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    #[default]
    Low,
    Medium,
    High,
    Production,
}

impl Quality {
    /// CLI flag (`-ql`, `-qm`, ...).
    pub fn flag(&self) -> &'static str {
        match self {
            Quality::Low => "-ql",
            Quality::Medium => "-qm",
            Quality::High => "-qh",
            Quality::Production => "-qp",
        }
    }

    /// Media subdirectory the engine writes to for this preset.
    pub fn media_dir(&self) -> &'static str {
        match self {
            Quality::Low => "480p15",
            Quality::Medium => "720p30",
            Quality::High => "1080p60",
            Quality::Production => "2160p60",
        }
    }
}

impl std::str::FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" | "l" => Ok(Quality::Low),
            "medium" | "m" => Ok(Quality::Medium),
            "high" | "h" => Ok(Quality::High),
            "production" | "p" => Ok(Quality::Production),
            other => Err(format!("unknown quality preset: {}", other)),
        }
    }
}

/// `WIDTHxHEIGHT` override passed to the engine (`-r W,H`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Media subdirectory name the engine uses when a resolution override is set.
    pub fn media_dir(&self, quality: Quality) -> String {
        let fps = quality.media_dir().split('p').nth(1).unwrap_or("15");
        format!("{}p{}", self.height, fps)
    }
}

/// One render invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub work_dir: PathBuf,
    /// File name relative to `work_dir`, e.g. `section_1.py`.
    pub script: String,
    pub scene_class: String,
    pub quality: Quality,
    pub resolution: Option<Resolution>,
}

impl RenderRequest {
    fn media_dir(&self) -> String {
        match self.resolution {
            Some(r) => r.media_dir(self.quality),
            None => self.quality.media_dir().to_string(),
        }
    }

    /// Conventional output locations, most specific first.
    pub fn expected_video_paths(&self) -> Vec<PathBuf> {
        let stem = Path::new(&self.script)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file = format!("{}.mp4", self.scene_class);
        let media = self.work_dir.join("media").join("videos");
        vec![
            media.join(&stem).join(self.media_dir()).join(&file),
            media.join(self.media_dir()).join(&file),
        ]
    }

    /// First expected output that exists on disk.
    pub fn find_video(&self) -> Option<PathBuf> {
        self.expected_video_paths().into_iter().find(|p| p.is_file())
    }
}

/// What a render produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOutcome {
    pub exit_code: i32,
    pub stderr: String,
    pub timed_out: bool,
    pub video_path: Option<PathBuf>,
}

impl RenderOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && self.video_path.is_some()
    }

    /// Error text to hand to the repair loop.
    pub fn failure_message(&self) -> String {
        if self.timed_out {
            return "render timed out".to_string();
        }
        if self.exit_code == 0 && self.video_path.is_none() {
            return "render exited 0 but produced no video file".to_string();
        }
        if self.stderr.trim().is_empty() {
            format!("render failed with exit code {}", self.exit_code)
        } else {
            self.stderr.clone()
        }
    }
}

/// Renders a scene file.
#[async_trait]
pub trait SceneRenderer: Send + Sync {
    /// Never fails: spawn errors and timeouts are reported in the outcome.
    async fn render(&self, request: &RenderRequest) -> RenderOutcome;
}
