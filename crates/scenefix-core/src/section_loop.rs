//! Per-section render loop.
//!
//! For one section: generate (or reuse) code, render, hand render failures to
//! the [`RepairOrchestrator`], and regenerate from scratch when repair gives up.
//! Once a render succeeds, optional critique rounds ask a multimodal critic
//! for layout fixes, apply them, and keep the new video only if it renders.
//!
//! Nothing here returns an error: a section that cannot be rendered within
//! its budgets is reported as failed and the caller moves on.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn, Instrument};

use crate::config::RunConfig;
use crate::critique::{CritiqueFeedback, VideoCritic};
use crate::domain::Section;
use crate::metrics::METRICS;
use crate::model::ModelClient;
use crate::obs;
use crate::positions::{apply_feedback, extract_positions, render_position_table};
use crate::prompts::{
    feedback_improve_prompt, install_base_class, layout_critique_prompt, regenerate_note,
    section_code_prompt,
};
use crate::render::{Quality, RenderRequest, Resolution, SceneRenderer};
use crate::repair::{write_repair_artifact, RepairOrchestrator};
use crate::response::clean_code_response;

/// Budgets and render settings for the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSettings {
    pub max_regenerate_tries: u32,
    pub max_fix_bug_tries: u32,
    pub feedback_rounds: u32,
    pub max_feedback_gen_code_tries: u32,
    pub max_mllm_fix_bugs_tries: u32,
    pub use_feedback: bool,
    pub max_tokens: u32,
    pub quality: Quality,
    pub resolution: Option<Resolution>,
    pub grid_image: Option<PathBuf>,
    /// Where repair logs are written; `None` keeps them in memory only.
    pub repair_log_dir: Option<PathBuf>,
}

impl LoopSettings {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            max_regenerate_tries: config.max_regenerate_tries,
            max_fix_bug_tries: config.max_fix_bug_tries,
            feedback_rounds: config.feedback_rounds,
            max_feedback_gen_code_tries: config.max_feedback_gen_code_tries,
            max_mllm_fix_bugs_tries: config.max_mllm_fix_bugs_tries,
            use_feedback: config.use_feedback,
            max_tokens: config.max_code_token_length,
            quality: config.quality,
            resolution: config.resolution(),
            grid_image: config.grid_image.clone(),
            repair_log_dir: None,
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&RunConfig::default())
    }
}

/// Terminal state of one section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionResult {
    pub section_id: String,
    pub success: bool,
    pub video_path: Option<PathBuf>,
    pub renders: u32,
    pub repairs: u32,
    pub critique_rounds: u32,
    pub duration_ms: u64,
}

/// Mutable progress of one section through the loop.
#[derive(Debug, Default)]
struct SectionState {
    code: String,
    video: Option<PathBuf>,
    renders: u32,
    repairs: u32,
    critique_rounds: u32,
}

pub struct SectionRenderLoop {
    work_dir: PathBuf,
    code_model: Arc<dyn ModelClient>,
    repairer: Arc<RepairOrchestrator>,
    renderer: Arc<dyn SceneRenderer>,
    critic: Option<Arc<dyn VideoCritic>>,
    settings: LoopSettings,
}

impl SectionRenderLoop {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        code_model: Arc<dyn ModelClient>,
        repairer: Arc<RepairOrchestrator>,
        renderer: Arc<dyn SceneRenderer>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            code_model,
            repairer,
            renderer,
            critic: None,
            settings,
        }
    }

    pub fn with_critic(mut self, critic: Arc<dyn VideoCritic>) -> Self {
        self.critic = Some(critic);
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    fn code_path(&self, section: &Section) -> PathBuf {
        self.work_dir.join(section.source_file_name())
    }

    fn write_code(&self, section: &Section, code: &str) -> bool {
        match std::fs::write(self.code_path(section), code) {
            Ok(()) => true,
            Err(e) => {
                warn!(section_id = %section.id, error = %e, "could not write section source");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Code generation
    // -----------------------------------------------------------------------

    /// Produce code for `section` and write it to `<id>.py`.
    ///
    /// Attempt 1 without feedback reuses an existing file. With feedback, the
    /// placement edits are applied directly to `current` when any of them
    /// resolve, otherwise the model is asked to rework the file. Returns `None`
    /// when the model produced nothing.
    pub async fn generate_section_code(
        &self,
        section: &Section,
        attempt: u32,
        current: Option<&str>,
        feedback: Option<&[String]>,
    ) -> Option<String> {
        let path = self.code_path(section);

        let prompt = match (feedback, current) {
            (Some(items), Some(current)) if !items.is_empty() => {
                let edits = apply_feedback(current, items);
                if !edits.skipped.is_empty() {
                    METRICS.add_feedback_skipped(edits.skipped.len() as u64);
                    obs::emit_feedback_skipped(&section.id, edits.skipped.len());
                }
                if !edits.is_empty() {
                    debug!(section_id = %section.id, applied = edits.applied.len(), "applied placement edits");
                    return self
                        .write_code(section, &edits.source)
                        .then_some(edits.source);
                }
                feedback_improve_prompt(items, current)
            }
            _ => {
                if attempt == 1 && path.is_file() {
                    match std::fs::read_to_string(&path) {
                        Ok(code) => {
                            debug!(section_id = %section.id, "reusing existing section source");
                            return Some(code);
                        }
                        Err(e) => warn!(section_id = %section.id, error = %e, "existing source unreadable"),
                    }
                }
                let note = (attempt > 1)
                    .then(|| regenerate_note(attempt, self.settings.max_regenerate_tries));
                section_code_prompt(section, note.as_deref())
            }
        };

        let completion = match self.code_model.complete(&prompt, self.settings.max_tokens).await {
            Ok(c) => c,
            Err(e) => {
                warn!(section_id = %section.id, attempt, error = %e, "code generation failed");
                return None;
            }
        };
        let code = install_base_class(&clean_code_response(&completion.text)?);
        self.write_code(section, &code).then_some(code)
    }

    // -----------------------------------------------------------------------
    // Render and repair
    // -----------------------------------------------------------------------

    /// Render the current code, repairing after each failure, up to
    /// `max_fix_tries` renders. Returns the video on success.
    async fn debug_and_fix(
        &self,
        section: &Section,
        state: &mut SectionState,
        max_fix_tries: u32,
    ) -> Option<PathBuf> {
        let scene_class = section.scene_class_name();
        let request = RenderRequest {
            work_dir: self.work_dir.clone(),
            script: section.source_file_name(),
            scene_class: scene_class.clone(),
            quality: self.settings.quality,
            resolution: self.settings.resolution,
        };

        for fix_try in 1..=max_fix_tries {
            debug!(section_id = %section.id, fix_try, max_fix_tries, "rendering");
            let outcome = self.renderer.render(&request).await;
            state.renders += 1;
            METRICS.inc_renders();

            if outcome.succeeded() {
                return outcome.video_path;
            }
            if outcome.timed_out {
                warn!(section_id = %section.id, "render timed out");
                return None;
            }

            state.repairs += 1;
            let report = self
                .repairer
                .repair(&section.id, &scene_class, &state.code, &outcome.failure_message())
                .await;
            if let Some(dir) = &self.settings.repair_log_dir {
                if let Err(e) = write_repair_artifact(&report.log, dir) {
                    warn!(section_id = %section.id, error = %e, "could not persist repair log");
                }
            }
            let Some(fixed) = report.fixed else {
                info!(section_id = %section.id, fix_try, "no fix found");
                return None;
            };
            if !self.write_code(section, &fixed) {
                return None;
            }
            state.code = fixed;
        }
        None
    }

    // -----------------------------------------------------------------------
    // Critique
    // -----------------------------------------------------------------------

    async fn request_critique(
        &self,
        critic: &dyn VideoCritic,
        section: &Section,
        code: &str,
        video: &Path,
    ) -> CritiqueFeedback {
        let table = render_position_table(&extract_positions(code));
        let prompt = layout_critique_prompt(section, &table);
        match critic
            .critique(&prompt, video, self.settings.grid_image.as_deref())
            .await
        {
            Ok(feedback) => feedback,
            Err(e) => {
                warn!(section_id = %section.id, error = %e, "critique failed, treating as no issues");
                CritiqueFeedback {
                    has_issues: false,
                    improvements: Vec::new(),
                    raw_response: format!("Error: {}", e),
                }
            }
        }
    }

    /// Apply one round of feedback. The accepted code is restored when no
    /// attempt renders.
    async fn optimize_with_feedback(
        &self,
        section: &Section,
        state: &mut SectionState,
        feedback: &CritiqueFeedback,
    ) -> bool {
        let accepted = state.code.clone();

        for attempt in 1..=self.settings.max_feedback_gen_code_tries {
            let Some(candidate) = self
                .generate_section_code(section, attempt, Some(&accepted), Some(&feedback.improvements))
                .await
            else {
                continue;
            };
            state.code = candidate;
            if let Some(video) = self
                .debug_and_fix(section, state, self.settings.max_mllm_fix_bugs_tries)
                .await
            {
                match self.promote_video(section, &video) {
                    Ok(path) => {
                        info!(section_id = %section.id, path = %path.display(), "optimized video saved");
                        state.video = Some(path);
                    }
                    Err(e) => {
                        warn!(section_id = %section.id, error = %e, "could not move optimized video");
                        state.video = Some(video);
                    }
                }
                return true;
            }
            debug!(section_id = %section.id, attempt, "feedback attempt did not render");
        }

        state.code = accepted;
        self.write_code(section, &state.code);
        false
    }

    /// Move a freshly rendered video to `optimized_videos/<id>_optimized.mp4`,
    /// renaming any earlier optimized video to `<id>_optimized.prev.mp4`.
    fn promote_video(&self, section: &Section, video: &Path) -> std::io::Result<PathBuf> {
        let dir = self.work_dir.join("optimized_videos");
        std::fs::create_dir_all(&dir)?;
        let target = dir.join(format!("{}_optimized.mp4", section.id));
        if target.exists() {
            std::fs::rename(&target, dir.join(format!("{}_optimized.prev.mp4", section.id)))?;
        }
        std::fs::rename(video, &target)?;
        Ok(target)
    }

    // -----------------------------------------------------------------------
    // Entry point
    // -----------------------------------------------------------------------

    /// Run the whole loop for one section.
    pub async fn render_section(&self, section: &Section) -> SectionResult {
        self.run_section(section)
            .instrument(obs::section_span(&section.id))
            .await
    }

    async fn run_section(&self, section: &Section) -> SectionResult {
        obs::emit_section_started(&section.id, &section.title);
        let started = Instant::now();
        let mut state = SectionState::default();

        for attempt in 1..=self.settings.max_regenerate_tries {
            let Some(code) = self.generate_section_code(section, attempt, None, None).await else {
                continue;
            };
            state.code = code;
            if let Some(video) = self
                .debug_and_fix(section, &mut state, self.settings.max_fix_bug_tries)
                .await
            {
                state.video = Some(video);
                break;
            }
        }

        if state.video.is_some() && self.settings.use_feedback {
            if let Some(critic) = self.critic.clone() {
                self.critique_rounds(critic.as_ref(), section, &mut state).await;
            }
        }

        let success = state.video.is_some();
        let duration_ms = started.elapsed().as_millis() as u64;
        obs::emit_section_finished(&section.id, duration_ms, success, state.renders);
        if !success {
            warn!(section_id = %section.id, "all attempts failed, skipping section");
        }
        SectionResult {
            section_id: section.id.clone(),
            success,
            video_path: state.video,
            renders: state.renders,
            repairs: state.repairs,
            critique_rounds: state.critique_rounds,
            duration_ms,
        }
    }

    async fn critique_rounds(&self, critic: &dyn VideoCritic, section: &Section, state: &mut SectionState) {
        for round in 1..=self.settings.feedback_rounds {
            let Some(video) = state.video.clone() else {
                return;
            };
            let feedback = self.request_critique(critic, section, &state.code, &video).await;
            state.critique_rounds += 1;
            METRICS.inc_critique_rounds();
            obs::emit_critique_round(&section.id, round, feedback.has_issues, feedback.improvements.len());

            if !feedback.needs_changes() {
                debug!(section_id = %section.id, round, "no layout changes requested");
                return;
            }
            if !self.optimize_with_feedback(section, state, &feedback).await {
                warn!(section_id = %section.id, round, "feedback round failed, keeping current version");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{ScriptedCritic, ScriptedModel, ScriptedRenderer, ScriptedValidator};
    use crate::repair::RepairPolicy;

    const GOOD: &str = "from manim import *\n\nclass Section1Scene(TeachingScene):\n    def construct(self):\n        obj = Circle()\n        self.place_at_grid(obj, 'B2')\n        self.wait(1)";

    fn fenced(body: &str) -> String {
        format!("```python\n{}\n```", body)
    }

    fn settings() -> LoopSettings {
        LoopSettings {
            max_regenerate_tries: 2,
            max_fix_bug_tries: 2,
            feedback_rounds: 2,
            max_feedback_gen_code_tries: 1,
            max_mllm_fix_bugs_tries: 1,
            use_feedback: true,
            ..LoopSettings::default()
        }
    }

    fn build(
        dir: &Path,
        code_model: Arc<ScriptedModel>,
        repair_model: Arc<ScriptedModel>,
        renderer: Arc<ScriptedRenderer>,
    ) -> SectionRenderLoop {
        let repairer = Arc::new(RepairOrchestrator::new(
            repair_model,
            Arc::new(ScriptedValidator::accept_containing("FIXED")),
            RepairPolicy {
                max_attempts: 1,
                local_fix: false,
                ..RepairPolicy::default()
            },
        ));
        SectionRenderLoop::new(dir, code_model, repairer, renderer, settings())
    }

    fn section() -> Section {
        Section::new("section_1", "Circles")
    }

    #[tokio::test]
    async fn test_renders_generated_code() {
        let dir = tempfile::tempdir().unwrap();
        let code_model = Arc::new(ScriptedModel::new([fenced(GOOD)]));
        let renderer = Arc::new(ScriptedRenderer::failing_on("BROKEN", "boom"));
        let lp = build(dir.path(), code_model.clone(), Arc::new(ScriptedModel::new(Vec::<String>::new())), renderer.clone());

        let result = lp.render_section(&section()).await;
        assert!(result.success);
        assert_eq!(result.renders, 1);
        let written = std::fs::read_to_string(dir.path().join("section_1.py")).unwrap();
        assert!(written.contains("class TeachingScene(Scene):"));
        assert!(written.contains("class Section1Scene(TeachingScene):"));
        assert_eq!(code_model.calls(), 1);
    }

    #[tokio::test]
    async fn test_existing_source_is_reused_on_first_attempt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("section_1.py"), GOOD).unwrap();
        let code_model = Arc::new(ScriptedModel::new(Vec::<String>::new()));
        let renderer = Arc::new(ScriptedRenderer::failing_on("BROKEN", "boom"));
        let lp = build(dir.path(), code_model.clone(), Arc::new(ScriptedModel::new(Vec::<String>::new())), renderer);

        assert!(lp.render_section(&section()).await.success);
        assert_eq!(code_model.calls(), 0);
    }

    #[tokio::test]
    async fn test_render_failure_is_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let code_model = Arc::new(ScriptedModel::new([fenced("BROKEN = 1")]));
        let repair_model = Arc::new(ScriptedModel::new([fenced("# FIXED\nx = 1")]));
        let renderer = Arc::new(ScriptedRenderer::failing_on(
            "BROKEN",
            "File \"section_1.py\", line 1\nNameError: name 'BROKEN' is not defined",
        ));
        let lp = build(dir.path(), code_model, repair_model, renderer.clone());

        let result = lp.render_section(&section()).await;
        assert!(result.success);
        assert_eq!(result.repairs, 1);
        assert_eq!(renderer.renders(), 2);
        let on_disk = std::fs::read_to_string(dir.path().join("section_1.py")).unwrap();
        assert!(on_disk.contains("# FIXED"));
    }

    #[tokio::test]
    async fn test_unfixable_section_fails_within_budget() {
        let dir = tempfile::tempdir().unwrap();
        let code_model = Arc::new(ScriptedModel::new([fenced("BROKEN = 1"), fenced("BROKEN = 2")]));
        let repair_model = Arc::new(ScriptedModel::new(Vec::<String>::new()));
        let renderer = Arc::new(ScriptedRenderer::failing_on("BROKEN", "SyntaxError: nope"));
        let lp = build(dir.path(), code_model.clone(), repair_model, renderer.clone());

        let result = lp.render_section(&section()).await;
        assert!(!result.success);
        assert!(result.video_path.is_none());
        // One render per regeneration: repair finds nothing and stops the fix loop.
        assert_eq!(renderer.renders(), 2);
        assert_eq!(code_model.calls(), 2);
        assert!(code_model.prompts()[1].contains("attempt 2/2"));
    }

    #[tokio::test]
    async fn test_timeout_stops_fix_loop() {
        let dir = tempfile::tempdir().unwrap();
        let code_model = Arc::new(ScriptedModel::new([fenced(GOOD), fenced(GOOD)]));
        let renderer = Arc::new(ScriptedRenderer::timing_out());
        let repair_model = Arc::new(ScriptedModel::new(Vec::<String>::new()));
        let lp = build(dir.path(), code_model, repair_model.clone(), renderer.clone());

        let result = lp.render_section(&section()).await;
        assert!(!result.success);
        assert_eq!(renderer.renders(), 2);
        assert_eq!(repair_model.calls(), 0);
    }

    #[tokio::test]
    async fn test_critique_edits_placement_and_promotes_video() {
        let dir = tempfile::tempdir().unwrap();
        let code_model = Arc::new(ScriptedModel::new([fenced(GOOD)]));
        let renderer = Arc::new(ScriptedRenderer::failing_on("BROKEN", "boom"));
        let placement = install_base_class(GOOD)
            .lines()
            .position(|l| l.contains("place_at_grid(obj"))
            .unwrap()
            + 1;
        let critic = Arc::new(ScriptedCritic::new([ScriptedCritic::issues([format!(
            "[LAYOUT] Problem: overlap; Solution: Line {}: self.place_at_grid(obj, 'D3', scale_factor=0.6)",
            placement
        )])]));
        let lp = build(dir.path(), code_model, Arc::new(ScriptedModel::new(Vec::<String>::new())), renderer)
            .with_critic(critic.clone());

        let result = lp.render_section(&section()).await;
        assert!(result.success);
        // Second round reports no issues and ends the critique.
        assert_eq!(result.critique_rounds, 2);
        assert_eq!(critic.calls(), 2);
        assert!(critic.prompts()[0].contains(&format!("|obj|place_at_grid|B2|default|{}|", placement)));

        let optimized = dir.path().join("optimized_videos/section_1_optimized.mp4");
        assert_eq!(result.video_path.as_deref(), Some(optimized.as_path()));
        let code = std::fs::read_to_string(dir.path().join("section_1.py")).unwrap();
        let placement_line = code
            .lines()
            .find(|l| l.contains("place_at_grid(obj"))
            .unwrap();
        assert!(placement_line.contains("'D3', scale_factor=0.6"));
        assert!(placement_line.starts_with("        self."));
    }

    #[tokio::test]
    async fn test_failed_feedback_round_keeps_accepted_code() {
        let dir = tempfile::tempdir().unwrap();
        let code_model = Arc::new(ScriptedModel::new([fenced(GOOD), fenced("BROKEN = 1")]));
        let renderer = Arc::new(ScriptedRenderer::failing_on("BROKEN", "boom"));
        let critic = Arc::new(ScriptedCritic::new([ScriptedCritic::issues([
            "[LAYOUT] Problem: crowded; Solution: spread things out",
        ])]));
        let lp = build(dir.path(), code_model.clone(), Arc::new(ScriptedModel::new(Vec::<String>::new())), renderer)
            .with_critic(critic);

        let result = lp.render_section(&section()).await;
        assert!(result.success);
        // No line reference, so the model was asked to rework the file.
        assert!(code_model.prompts()[1].contains("spread things out"));
        let code = std::fs::read_to_string(dir.path().join("section_1.py")).unwrap();
        assert!(!code.contains("BROKEN"));
        let video = result.video_path.unwrap();
        assert!(video.starts_with(dir.path().join("media")));
    }
}
