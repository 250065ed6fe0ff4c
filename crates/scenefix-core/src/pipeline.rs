//! Parallel rendering of all sections of one storyboard.
//!
//! Initial code generation runs first for every section with bounded
//! concurrency. Each section then becomes an immutable [`SectionJob`] run on
//! its own task, at most `max_workers` at a time. Sections share nothing but
//! the render loop's collaborators, so one section's failure never affects
//! another. Concatenation starts only after every job reached a terminal state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::domain::{Result, Section};
use crate::metrics::METRICS;
use crate::obs;
use crate::section_loop::{SectionRenderLoop, SectionResult};

/// One section to render, as handed to a worker.
#[derive(Debug, Clone)]
pub struct SectionJob {
    pub index: usize,
    pub section: Section,
}

/// Joins section videos into the final video.
#[async_trait]
pub trait VideoConcatenator: Send + Sync {
    async fn concat(&self, videos: &[PathBuf], output: &Path) -> Result<()>;
}

/// Outcome of a whole run, sections in storyboard order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSummary {
    pub results: Vec<SectionResult>,
    pub succeeded: usize,
    pub success_rate: f64,
    pub final_video: Option<PathBuf>,
}

impl RenderSummary {
    fn from_results(results: Vec<SectionResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        let success_rate = if results.is_empty() {
            0.0
        } else {
            succeeded as f64 / results.len() as f64
        };
        Self {
            results,
            succeeded,
            success_rate,
            final_video: None,
        }
    }

    /// Successful section videos in storyboard order.
    pub fn videos(&self) -> Vec<PathBuf> {
        self.results
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| r.video_path.clone())
            .collect()
    }
}

pub struct SectionPipeline {
    render_loop: Arc<SectionRenderLoop>,
    max_workers: usize,
    codegen_workers: usize,
    concatenator: Option<Arc<dyn VideoConcatenator>>,
}

impl SectionPipeline {
    pub fn new(render_loop: Arc<SectionRenderLoop>, max_workers: usize, codegen_workers: usize) -> Self {
        Self {
            render_loop,
            max_workers: max_workers.max(1),
            codegen_workers: codegen_workers.max(1),
            concatenator: None,
        }
    }

    pub fn with_concatenator(mut self, concatenator: Arc<dyn VideoConcatenator>) -> Self {
        self.concatenator = Some(concatenator);
        self
    }

    /// Generate first-attempt code for every section. Returns how many
    /// sections have code afterwards.
    pub async fn generate_codes(&self, sections: &[Section]) -> usize {
        let render_loop = &self.render_loop;
        let generated: Vec<bool> = stream::iter(sections)
            .map(|section| async move {
                let ok = render_loop
                    .generate_section_code(section, 1, None, None)
                    .await
                    .is_some();
                if !ok {
                    warn!(section_id = %section.id, "initial code generation failed");
                }
                ok
            })
            .buffer_unordered(self.codegen_workers)
            .collect()
            .await;
        generated.into_iter().filter(|ok| *ok).count()
    }

    /// Render every section, then concatenate the successful videos into
    /// `output` when a concatenator is configured.
    pub async fn render_all(&self, sections: Vec<Section>, output: Option<&Path>) -> RenderSummary {
        let with_code = self.generate_codes(&sections).await;
        info!(sections = sections.len(), with_code, "initial code generation finished");

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut join_set = JoinSet::new();
        for (index, section) in sections.iter().cloned().enumerate() {
            let job = SectionJob { index, section };
            let render_loop = Arc::clone(&self.render_loop);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = render_loop.render_section(&job.section).await;
                (job.index, result)
            });
        }

        let mut slots: Vec<Option<SectionResult>> = vec![None; sections.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!(error = %e, "section task did not complete"),
            }
        }

        let results: Vec<SectionResult> = sections
            .iter()
            .zip(slots)
            .map(|(section, slot)| {
                slot.unwrap_or_else(|| SectionResult {
                    section_id: section.id.clone(),
                    success: false,
                    video_path: None,
                    renders: 0,
                    repairs: 0,
                    critique_rounds: 0,
                    duration_ms: 0,
                })
            })
            .collect();

        let mut summary = RenderSummary::from_results(results);
        obs::emit_pipeline_summary(summary.results.len(), summary.succeeded, summary.success_rate);
        METRICS.flush();

        if let (Some(concatenator), Some(output)) = (&self.concatenator, output) {
            let videos = summary.videos();
            if videos.is_empty() {
                warn!("no section rendered, skipping concatenation");
            } else {
                match concatenator.concat(&videos, output).await {
                    Ok(()) => summary.final_video = Some(output.to_path_buf()),
                    Err(e) => warn!(error = %e, "concatenation failed"),
                }
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{ScriptedModel, ScriptedRenderer, ScriptedValidator};
    use crate::repair::{RepairOrchestrator, RepairPolicy};
    use crate::section_loop::LoopSettings;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingConcat {
        calls: Mutex<Vec<Vec<PathBuf>>>,
    }

    #[async_trait]
    impl VideoConcatenator for RecordingConcat {
        async fn concat(&self, videos: &[PathBuf], _output: &Path) -> Result<()> {
            self.calls.lock().unwrap().push(videos.to_vec());
            Ok(())
        }
    }

    fn pipeline(dir: &Path, replies: Vec<String>) -> SectionPipeline {
        let repairer = Arc::new(RepairOrchestrator::new(
            Arc::new(ScriptedModel::new(Vec::<String>::new())),
            Arc::new(ScriptedValidator::reject_all()),
            RepairPolicy {
                max_attempts: 1,
                local_fix: false,
                ..RepairPolicy::default()
            },
        ));
        let settings = LoopSettings {
            max_regenerate_tries: 1,
            max_fix_bug_tries: 1,
            use_feedback: false,
            ..LoopSettings::default()
        };
        let render_loop = SectionRenderLoop::new(
            dir,
            Arc::new(ScriptedModel::new(replies)),
            repairer,
            Arc::new(ScriptedRenderer::failing_on("BROKEN", "boom")),
            settings,
        );
        SectionPipeline::new(Arc::new(render_loop), 2, 2)
    }

    #[tokio::test]
    async fn test_failed_section_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("section_1.py"), "ok = 1").unwrap();
        std::fs::write(dir.path().join("section_2.py"), "BROKEN = 1").unwrap();
        std::fs::write(dir.path().join("section_3.py"), "ok = 3").unwrap();
        let sections = vec![
            Section::new("section_1", "One"),
            Section::new("section_2", "Two"),
            Section::new("section_3", "Three"),
        ];
        let concat = Arc::new(RecordingConcat::default());
        let p = pipeline(dir.path(), Vec::new()).with_concatenator(concat.clone());

        let out = dir.path().join("final.mp4");
        let summary = p.render_all(sections, Some(&out)).await;

        let ids: Vec<&str> = summary.results.iter().map(|r| r.section_id.as_str()).collect();
        assert_eq!(ids, vec!["section_1", "section_2", "section_3"]);
        assert_eq!(summary.succeeded, 2);
        assert!((summary.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!(!summary.results[1].success);
        assert_eq!(summary.final_video, Some(out));

        let calls = concat.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 2);
        assert!(calls[0][0].ends_with("Section1Scene.mp4"));
        assert!(calls[0][1].ends_with("Section3Scene.mp4"));
    }

    #[tokio::test]
    async fn test_codegen_runs_for_missing_sources() {
        let dir = tempfile::tempdir().unwrap();
        let sections = vec![Section::new("section_1", "One"), Section::new("section_2", "Two")];
        let p = pipeline(
            dir.path(),
            vec!["```python\na = 1\n```".to_string(), "```python\nb = 2\n```".to_string()],
        );

        assert_eq!(p.generate_codes(&sections).await, 2);
        assert!(dir.path().join("section_1.py").is_file());
        assert!(dir.path().join("section_2.py").is_file());
    }

    #[tokio::test]
    async fn test_empty_storyboard() {
        let dir = tempfile::tempdir().unwrap();
        let summary = pipeline(dir.path(), Vec::new()).render_all(Vec::new(), None).await;
        assert!(summary.results.is_empty());
        assert_eq!(summary.success_rate, 0.0);
    }
}
