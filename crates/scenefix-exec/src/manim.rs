//! Render command backed by the `manim` CLI.

use std::time::Duration;

use async_trait::async_trait;
use scenefix_core::{RenderOutcome, RenderRequest, SceneRenderer};
use tracing::{debug, warn};

use crate::command::CommandSpec;
use crate::runner::ProcessRunner;

/// Renders sections with `manim <quality> [-r W,H] <script> <Scene>` in the
/// section's output directory.
#[derive(Debug, Clone)]
pub struct ManimRenderer {
    program: String,
    timeout: Duration,
}

impl ManimRenderer {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn command(&self, request: &RenderRequest) -> CommandSpec {
        let mut spec = CommandSpec::new(format!("render {}", request.scene_class), &self.program)
            .arg(request.quality.flag())
            .current_dir(&request.work_dir)
            .timeout_secs(self.timeout.as_secs());
        if let Some(res) = request.resolution {
            spec = spec.arg("-r").arg(format!("{},{}", res.width, res.height));
        }
        spec.arg(&request.script).arg(&request.scene_class)
    }
}

#[async_trait]
impl SceneRenderer for ManimRenderer {
    async fn render(&self, request: &RenderRequest) -> RenderOutcome {
        let spec = self.command(request);
        let output = match ProcessRunner::run(&spec).await {
            Ok(output) => output,
            Err(e) => {
                warn!(command = %spec.display(), error = %e, "render could not start");
                return RenderOutcome {
                    exit_code: -1,
                    stderr: e.to_string(),
                    timed_out: false,
                    video_path: None,
                };
            }
        };
        debug!(
            scene = %request.scene_class,
            exit_code = output.exit_code,
            duration_ms = output.duration_ms,
            "render finished"
        );

        let video_path = if output.passed() {
            request.find_video()
        } else {
            None
        };
        RenderOutcome {
            exit_code: output.exit_code,
            stderr: output.stderr,
            timed_out: output.timed_out,
            video_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenefix_core::{Quality, Resolution};
    use std::path::PathBuf;

    fn request(dir: PathBuf) -> RenderRequest {
        RenderRequest {
            work_dir: dir,
            script: "section_1.py".to_string(),
            scene_class: "Section1Scene".to_string(),
            quality: Quality::Low,
            resolution: None,
        }
    }

    #[test]
    fn test_command_shape() {
        let renderer = ManimRenderer::new("manim", Duration::from_secs(180));
        let mut req = request(PathBuf::from("/out"));
        assert_eq!(
            renderer.command(&req).display(),
            "manim -ql section_1.py Section1Scene"
        );

        req.resolution = Some(Resolution {
            width: 1080,
            height: 1920,
        });
        let spec = renderer.command(&req);
        assert_eq!(spec.display(), "manim -ql -r 1080,1920 section_1.py Section1Scene");
        assert_eq!(spec.cwd, Some(PathBuf::from("/out")));
        assert_eq!(spec.timeout_secs, 180);
    }

    #[tokio::test]
    async fn test_exit_zero_without_video_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = ManimRenderer::new("true", Duration::from_secs(10));
        let outcome = renderer.render(&request(dir.path().to_path_buf())).await;
        assert_eq!(outcome.exit_code, 0);
        assert!(!outcome.succeeded());
    }

    #[tokio::test]
    async fn test_exit_zero_with_video_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path().to_path_buf());
        let expected = req.expected_video_paths().remove(0);
        std::fs::create_dir_all(expected.parent().unwrap()).unwrap();
        std::fs::write(&expected, b"mp4").unwrap();

        let renderer = ManimRenderer::new("true", Duration::from_secs(10));
        let outcome = renderer.render(&req).await;
        assert!(outcome.succeeded());
        assert_eq!(outcome.video_path, Some(expected));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = ManimRenderer::new("false", Duration::from_secs(10));
        let outcome = renderer.render(&request(dir.path().to_path_buf())).await;
        assert!(!outcome.succeeded());
        assert_ne!(outcome.exit_code, 0);
        assert!(outcome.failure_message().contains("exit code"));
    }
}
