//! Final video concatenation with ffmpeg's concat demuxer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use scenefix_core::{Result, ScenefixError, VideoConcatenator};
use tracing::info;

use crate::command::CommandSpec;
use crate::runner::ProcessRunner;

#[derive(Debug, Clone)]
pub struct FfmpegConcatenator {
    program: String,
    timeout: Duration,
}

impl FfmpegConcatenator {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Path of the list file written next to `output`.
    pub fn list_path(output: &Path) -> PathBuf {
        let mut name = output
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".concat.txt");
        output.with_file_name(name)
    }

    pub fn command(&self, list: &Path, output: &Path) -> CommandSpec {
        CommandSpec::new("concat", &self.program)
            .args(["-y", "-f", "concat", "-safe", "0", "-i"])
            .arg(list.to_string_lossy())
            .args(["-c", "copy"])
            .arg(output.to_string_lossy())
            .timeout_secs(self.timeout.as_secs())
    }
}

/// Concat demuxer list: one `file '<path>'` line per video.
pub fn concat_list(videos: &[PathBuf]) -> String {
    videos
        .iter()
        .map(|v| format!("file '{}'\n", v.to_string_lossy().replace('\'', "'\\''")))
        .collect()
}

#[async_trait]
impl VideoConcatenator for FfmpegConcatenator {
    async fn concat(&self, videos: &[PathBuf], output: &Path) -> Result<()> {
        if videos.is_empty() {
            return Err(ScenefixError::Concat("no videos to concatenate".to_string()));
        }
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let list = Self::list_path(output);
        std::fs::write(&list, concat_list(videos))?;

        let result = ProcessRunner::run(&self.command(&list, output)).await;
        let _ = std::fs::remove_file(&list);

        let run = result.map_err(|e| ScenefixError::Concat(e.to_string()))?;
        if !run.passed() {
            return Err(ScenefixError::Concat(run.stderr));
        }
        info!(videos = videos.len(), output = %output.display(), "final video written");
        Ok(())
    }
}
