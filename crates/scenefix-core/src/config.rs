//! Run configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//! Model endpoint settings can be overridden from the environment:
//!
//! - `SCENEFIX_API_BASE`
//! - `SCENEFIX_API_KEY`
//! - `SCENEFIX_MODEL` (code and repair stages)
//! - `SCENEFIX_CRITIC_MODEL`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Result, ScenefixError};
use crate::model::RetryPolicy;
use crate::render::{Quality, Resolution};
use crate::repair::RepairPolicy;

/// Model names per pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageModels {
    pub code: String,
    pub repair: String,
    pub critique: String,
}

impl Default for StageModels {
    fn default() -> Self {
        Self {
            code: "gpt-4o".to_string(),
            repair: "gpt-4o".to_string(),
            critique: "gemini-2.5-pro".to_string(),
        }
    }
}

/// Configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub max_code_token_length: u32,
    pub max_fix_bug_tries: u32,
    pub max_regenerate_tries: u32,
    pub max_feedback_gen_code_tries: u32,
    pub max_mllm_fix_bugs_tries: u32,
    pub feedback_rounds: u32,
    /// Full-regeneration attempts per repair (the local fix is extra).
    pub max_repair_attempts: u32,
    pub use_feedback: bool,

    pub render_timeout_secs: u64,
    pub dry_run_timeout_secs: u64,

    pub quality: Quality,
    pub resolution: Option<[u32; 2]>,
    pub manim_bin: String,
    pub python_bin: String,
    pub ffmpeg_bin: String,

    pub max_workers: usize,
    pub codegen_workers: usize,

    pub models: StageModels,
    pub api_base: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub max_retries: u32,
    pub backoff_base_ms: u64,

    pub grid_image: Option<PathBuf>,
}

/// CPU count minus one, clamped to `1..=16`.
pub fn default_max_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    cpus.saturating_sub(1).clamp(1, 16)
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_code_token_length: 10_000,
            max_fix_bug_tries: 10,
            max_regenerate_tries: 10,
            max_feedback_gen_code_tries: 3,
            max_mllm_fix_bugs_tries: 3,
            feedback_rounds: 2,
            max_repair_attempts: 3,
            use_feedback: true,
            render_timeout_secs: 180,
            dry_run_timeout_secs: 10,
            quality: Quality::Low,
            resolution: None,
            manim_bin: "manim".to_string(),
            python_bin: "python".to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
            max_workers: default_max_workers(),
            codegen_workers: 6,
            models: StageModels::default(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            max_retries: 3,
            backoff_base_ms: 100,
            grid_image: None,
        }
    }
}

impl RunConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: RunConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` (or defaults when `None`), then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_toml(&std::fs::read_to_string(p)?)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `SCENEFIX_*` overrides using `lookup` as the variable source.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base) = lookup("SCENEFIX_API_BASE") {
            self.api_base = base;
        }
        if let Some(key) = lookup("SCENEFIX_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(model) = lookup("SCENEFIX_MODEL") {
            self.models.code = model.clone();
            self.models.repair = model;
        }
        if let Some(model) = lookup("SCENEFIX_CRITIC_MODEL") {
            self.models.critique = model;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_fix_bug_tries", self.max_fix_bug_tries),
            ("max_regenerate_tries", self.max_regenerate_tries),
            ("max_feedback_gen_code_tries", self.max_feedback_gen_code_tries),
            ("max_mllm_fix_bugs_tries", self.max_mllm_fix_bugs_tries),
            ("max_repair_attempts", self.max_repair_attempts),
            ("max_code_token_length", self.max_code_token_length),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ScenefixError::InvalidConfig(format!("{} must be > 0", name)));
            }
        }
        if self.max_workers == 0 || self.codegen_workers == 0 {
            return Err(ScenefixError::InvalidConfig(
                "worker counts must be > 0".to_string(),
            ));
        }
        if self.render_timeout_secs == 0 || self.dry_run_timeout_secs == 0 {
            return Err(ScenefixError::InvalidConfig(
                "timeouts must be > 0".to_string(),
            ));
        }
        if let Some([w, h]) = self.resolution {
            if w == 0 || h == 0 {
                return Err(ScenefixError::InvalidConfig(
                    "resolution must be non-zero".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution.map(|[width, height]| Resolution { width, height })
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    pub fn dry_run_timeout(&self) -> Duration {
        Duration::from_secs(self.dry_run_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base_ms: self.backoff_base_ms,
        }
    }

    pub fn repair_policy(&self) -> RepairPolicy {
        RepairPolicy {
            max_attempts: self.max_repair_attempts,
            max_tokens: self.max_code_token_length,
            local_fix: true,
        }
    }
}
