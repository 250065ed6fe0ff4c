//! scenefix core library
//!
//! Repair engine for generated animation scene code: error classification,
//! region extraction, patch merging, validation, tiered repair orchestration
//! and the per-section render / critique loop.

pub mod classify;
pub mod config;
pub mod critique;
pub mod domain;
pub mod fakes;
pub mod merge;
pub mod metrics;
pub mod model;
pub mod obs;
pub mod pipeline;
pub mod positions;
pub mod prompts;
pub mod region;
pub mod render;
pub mod repair;
pub mod response;
pub mod section_loop;
pub mod syntax;
pub mod telemetry;
pub mod validate;

pub use domain::{
    output_dir_for, safe_topic_name, scene_class_name, AnimationStep, Result, ScenefixError,
    Section, Storyboard, StoryboardError,
};

pub use classify::{
    brief_error, classify_error, ErrorBrief, ErrorCategory, ErrorDescriptor, ErrorKind,
    ErrorSubject, RepairScope,
};
pub use merge::{merge_patch, merge_region, MergeError, MergeStrategy, MergedSource};
pub use positions::{
    apply_feedback, extract_positions, render_position_table, FeedbackEdits, Placement,
    PositionDirective,
};
pub use region::{extract_region, CodeRegion};
pub use syntax::{check_syntax, SyntaxCheck};
pub use validate::{
    CandidateValidator, DryRunOutcome, DryRunner, GatedValidator, ValidationReport,
};

pub use config::{RunConfig, StageModels};
pub use critique::{parse_layout_critique, CritiqueFeedback, OpenAiCompatCritic, VideoCritic};
pub use model::{
    Completion, ModelClient, ModelError, OpenAiCompatClient, RetryPolicy, TokenUsage,
    TrackedModel, UsageSummary, UsageTracker,
};
pub use pipeline::{RenderSummary, SectionJob, SectionPipeline, VideoConcatenator};
pub use render::{Quality, RenderOutcome, RenderRequest, Resolution, SceneRenderer};
pub use repair::{
    read_repair_artifact, write_repair_artifact, AttemptOutcome, AttemptTier, RepairAttempt,
    RepairLog, RepairOrchestrator, RepairOutcome, RepairPolicy, RepairReport,
};
pub use section_loop::{LoopSettings, SectionRenderLoop, SectionResult};
pub use telemetry::init_tracing;
