//! Repair orchestration.
//!
//! Given a failing scene source and the error it produced, the orchestrator
//! first tries a region-level fix (classify, extract, patch, merge, validate)
//! and then escalates through whole-file regeneration tiers until a candidate
//! passes both validation gates or the attempt budget is spent.
//!
//! Every attempt is recorded in a [`RepairLog`], which can be persisted with
//! [`write_repair_artifact`] and verified with [`read_repair_artifact`].
//! Expected failures (model errors, merge failures, rejected candidates) are
//! values in the log, never errors returned to the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::classify::{classify_error, ErrorDescriptor, RepairScope};
use crate::domain::{Result, ScenefixError};
use crate::merge::{merge_region, MergeError};
use crate::metrics::METRICS;
use crate::model::ModelClient;
use crate::obs;
use crate::prompts::{local_fix_prompt, regenerate_prompt, StrategyTier};
use crate::region::extract_region;
use crate::response::clean_code_response;
use crate::validate::{CandidateValidator, ValidationReport};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Budget for one repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairPolicy {
    /// Whole-file regeneration attempts. The local fix does not count.
    pub max_attempts: u32,
    pub max_tokens: u32,
    /// Try a region-level fix before regenerating.
    pub local_fix: bool,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_tokens: 10_000,
            local_fix: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Attempt records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptTier {
    Local,
    Regenerate(StrategyTier),
}

impl AttemptTier {
    /// `local`, or the strategy tier number.
    pub fn label(&self) -> String {
        match self {
            AttemptTier::Local => "local".to_string(),
            AttemptTier::Regenerate(tier) => tier.number().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Accepted,
    RejectedSyntax,
    RejectedDryRun,
    ModelFailure,
    MergeFailed,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Accepted => "accepted",
            AttemptOutcome::RejectedSyntax => "rejected_syntax",
            AttemptOutcome::RejectedDryRun => "rejected_dry_run",
            AttemptOutcome::ModelFailure => "model_failure",
            AttemptOutcome::MergeFailed => "merge_failed",
        }
    }

    fn from_report(report: &ValidationReport) -> Self {
        if report.is_valid() {
            AttemptOutcome::Accepted
        } else if !report.syntax_valid {
            AttemptOutcome::RejectedSyntax
        } else {
            AttemptOutcome::RejectedDryRun
        }
    }
}

/// One step of the repair state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairAttempt {
    /// 0 for the local fix, then 1..=max_attempts.
    pub attempt: u32,
    pub tier: AttemptTier,
    pub scope: RepairScope,
    pub input_source: String,
    pub candidate: Option<String>,
    pub syntax_valid: bool,
    pub dry_run_valid: bool,
    pub outcome: AttemptOutcome,
    /// Validator message, model error or merge error.
    pub message: String,
}

impl RepairAttempt {
    fn failed(
        attempt: u32,
        tier: AttemptTier,
        scope: RepairScope,
        input_source: &str,
        outcome: AttemptOutcome,
        message: String,
    ) -> Self {
        Self {
            attempt,
            tier,
            scope,
            input_source: input_source.to_string(),
            candidate: None,
            syntax_valid: false,
            dry_run_valid: false,
            outcome,
            message,
        }
    }

    fn validated(
        attempt: u32,
        tier: AttemptTier,
        scope: RepairScope,
        input_source: &str,
        candidate: String,
        report: ValidationReport,
    ) -> Self {
        Self {
            attempt,
            tier,
            scope,
            input_source: input_source.to_string(),
            candidate: Some(candidate),
            syntax_valid: report.syntax_valid,
            dry_run_valid: report.dry_run_valid,
            outcome: AttemptOutcome::from_report(&report),
            message: report.message,
        }
    }

    fn accepted(&self) -> bool {
        self.outcome == AttemptOutcome::Accepted
    }
}

/// Terminal state of a repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepairOutcome {
    Fixed { tier: AttemptTier },
    Exhausted,
}

/// Audit record of one repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairLog {
    pub section_id: String,
    pub policy: RepairPolicy,
    pub raw_error: String,
    pub initial_error: ErrorDescriptor,
    pub attempts: Vec<RepairAttempt>,
    pub outcome: RepairOutcome,
    pub attempts_used: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RepairLog {
    pub fn fixed(&self) -> bool {
        matches!(self.outcome, RepairOutcome::Fixed { .. })
    }

    /// Number of whole-file regeneration attempts made.
    pub fn regenerations(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| matches!(a.tier, AttemptTier::Regenerate(_)))
            .count()
    }
}

/// What the caller gets back: the accepted source, if any, plus the log.
#[derive(Debug, Clone)]
pub struct RepairReport {
    pub fixed: Option<String>,
    pub log: RepairLog,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct RepairOrchestrator {
    model: Arc<dyn ModelClient>,
    validator: Arc<dyn CandidateValidator>,
    policy: RepairPolicy,
}

impl RepairOrchestrator {
    pub fn new(
        model: Arc<dyn ModelClient>,
        validator: Arc<dyn CandidateValidator>,
        policy: RepairPolicy,
    ) -> Self {
        Self {
            model,
            validator,
            policy,
        }
    }

    pub fn policy(&self) -> &RepairPolicy {
        &self.policy
    }

    /// Repair `source`, which failed with `raw_error`.
    ///
    /// Never fails. A candidate is returned only after it passed both
    /// validation gates; otherwise the report's outcome is `Exhausted`.
    pub async fn repair(
        &self,
        section_id: &str,
        scene_class: &str,
        source: &str,
        raw_error: &str,
    ) -> RepairReport {
        METRICS.inc_repairs_started();
        let started_at = Utc::now();
        let initial_error = classify_error(raw_error);
        info!(
            section_id = %section_id,
            kind = ?initial_error.kind,
            scope = ?initial_error.scope,
            line = ?initial_error.line,
            "repair started"
        );

        let mut attempts = Vec::new();
        let mut current_source = source.to_string();
        let mut current_error = raw_error.to_string();

        if self.policy.local_fix {
            if let Some(local) = self
                .try_local_fix(section_id, scene_class, source, raw_error, &initial_error)
                .await
            {
                obs::emit_repair_attempt(section_id, 0, "local", local.outcome.as_str());
                if local.accepted() {
                    METRICS.inc_local_fixes_accepted();
                    let fixed = local.candidate.clone();
                    attempts.push(local);
                    return self.finish(
                        section_id,
                        raw_error,
                        initial_error,
                        attempts,
                        RepairOutcome::Fixed {
                            tier: AttemptTier::Local,
                        },
                        fixed,
                        started_at,
                    );
                }
                if let Some(candidate) = &local.candidate {
                    current_source = candidate.clone();
                    current_error = local.message.clone();
                }
                attempts.push(local);
            }
        }

        for attempt in 1..=self.policy.max_attempts {
            let tier = StrategyTier::for_attempt(attempt);
            let record = self
                .try_regenerate(section_id, scene_class, attempt, tier, &current_source, &current_error)
                .await;
            obs::emit_repair_attempt(section_id, attempt, &tier.number().to_string(), record.outcome.as_str());

            if record.accepted() {
                METRICS.inc_regenerations_accepted();
                let fixed = record.candidate.clone();
                attempts.push(record);
                return self.finish(
                    section_id,
                    raw_error,
                    initial_error,
                    attempts,
                    RepairOutcome::Fixed {
                        tier: AttemptTier::Regenerate(tier),
                    },
                    fixed,
                    started_at,
                );
            }

            // A rejected candidate and its error feed the next prompt; a model
            // failure leaves both unchanged.
            if let Some(candidate) = &record.candidate {
                current_source = candidate.clone();
                current_error = record.message.clone();
            }
            attempts.push(record);
        }

        METRICS.inc_repairs_exhausted();
        self.finish(
            section_id,
            raw_error,
            initial_error,
            attempts,
            RepairOutcome::Exhausted,
            None,
            started_at,
        )
    }

    async fn try_local_fix(
        &self,
        section_id: &str,
        scene_class: &str,
        source: &str,
        raw_error: &str,
        error: &ErrorDescriptor,
    ) -> Option<RepairAttempt> {
        if error.scope == RepairScope::File {
            debug!(section_id = %section_id, "no locatable region, skipping local fix");
            return None;
        }
        let region = extract_region(source, error);
        if region.is_whole_file(source) {
            debug!(section_id = %section_id, "region covers whole file, skipping local fix");
            return None;
        }

        let tier = AttemptTier::Local;
        let scope = region.scope;
        if region.text.trim().is_empty() {
            debug!(section_id = %section_id, "region is blank, local fix cannot merge");
            return Some(RepairAttempt::failed(
                0,
                tier,
                scope,
                source,
                AttemptOutcome::MergeFailed,
                MergeError::EmptyRegion.to_string(),
            ));
        }
        let prompt = local_fix_prompt(&region, raw_error, error);
        let repaired = match self.model.complete(&prompt, self.policy.max_tokens).await {
            Ok(completion) => match clean_code_response(&completion.text) {
                Some(code) => code,
                None => {
                    return Some(RepairAttempt::failed(
                        0,
                        tier,
                        scope,
                        source,
                        AttemptOutcome::ModelFailure,
                        "model returned no code".to_string(),
                    ))
                }
            },
            Err(e) => {
                warn!(section_id = %section_id, error = %e, "local fix model call failed");
                return Some(RepairAttempt::failed(
                    0,
                    tier,
                    scope,
                    source,
                    AttemptOutcome::ModelFailure,
                    e.to_string(),
                ));
            }
        };

        let merged = match merge_region(source, &region, &repaired, error) {
            Ok(merged) => merged,
            Err(e) => {
                debug!(section_id = %section_id, error = %e, "local patch did not merge");
                return Some(RepairAttempt::failed(
                    0,
                    tier,
                    scope,
                    source,
                    AttemptOutcome::MergeFailed,
                    e.to_string(),
                ));
            }
        };
        let (first, last) = region.display_range();
        debug!(
            section_id = %section_id,
            strategy = ?merged.strategy,
            first_line = first,
            last_line = last,
            "local patch merged"
        );

        let report = self
            .validator
            .validate(section_id, &merged.source, scene_class)
            .await;
        Some(RepairAttempt::validated(0, tier, scope, source, merged.source, report))
    }

    async fn try_regenerate(
        &self,
        section_id: &str,
        scene_class: &str,
        attempt: u32,
        tier: StrategyTier,
        source: &str,
        raw_error: &str,
    ) -> RepairAttempt {
        let error = classify_error(raw_error);
        let prompt = regenerate_prompt(tier, attempt, self.policy.max_attempts, source, raw_error, &error);
        let attempt_tier = AttemptTier::Regenerate(tier);

        let candidate = match self.model.complete(&prompt, self.policy.max_tokens).await {
            Ok(completion) => clean_code_response(&completion.text),
            Err(e) => {
                warn!(section_id = %section_id, attempt, error = %e, "regeneration model call failed");
                return RepairAttempt::failed(
                    attempt,
                    attempt_tier,
                    RepairScope::File,
                    source,
                    AttemptOutcome::ModelFailure,
                    e.to_string(),
                );
            }
        };
        let Some(candidate) = candidate else {
            return RepairAttempt::failed(
                attempt,
                attempt_tier,
                RepairScope::File,
                source,
                AttemptOutcome::ModelFailure,
                "model returned no code".to_string(),
            );
        };

        let report = self.validator.validate(section_id, &candidate, scene_class).await;
        RepairAttempt::validated(attempt, attempt_tier, RepairScope::File, source, candidate, report)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        section_id: &str,
        raw_error: &str,
        initial_error: ErrorDescriptor,
        attempts: Vec<RepairAttempt>,
        outcome: RepairOutcome,
        fixed: Option<String>,
        started_at: DateTime<Utc>,
    ) -> RepairReport {
        let attempts_used = attempts.len() as u32;
        obs::emit_repair_finished(section_id, attempts_used, fixed.is_some());
        RepairReport {
            fixed,
            log: RepairLog {
                section_id: section_id.to_string(),
                policy: self.policy.clone(),
                raw_error: raw_error.to_string(),
                initial_error,
                attempts,
                outcome,
                attempts_used,
                started_at,
                finished_at: Utc::now(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Persist `<dir>/<section_id>/repair.json` and its sha256 digest.
pub fn write_repair_artifact(log: &RepairLog, dir: &Path) -> Result<PathBuf> {
    let section_dir = dir.join(&log.section_id);
    std::fs::create_dir_all(&section_dir)?;

    let artifact_path = section_dir.join("repair.json");
    let digest_path = section_dir.join("repair.digest");
    let json = serde_json::to_vec_pretty(log)?;
    let digest = sha256_hex(&json);

    std::fs::write(&artifact_path, &json)?;
    std::fs::write(&digest_path, digest.as_bytes())?;

    Ok(artifact_path)
}

/// Read `<dir>/<section_id>/repair.json` and verify its digest.
pub fn read_repair_artifact(section_id: &str, dir: &Path) -> Result<RepairLog> {
    let section_dir = dir.join(section_id);
    let json = std::fs::read(section_dir.join("repair.json"))?;
    let digest = std::fs::read_to_string(section_dir.join("repair.digest"))?;
    let actual = sha256_hex(&json);
    if digest.trim() != actual {
        return Err(ScenefixError::DigestMismatch {
            expected: digest.trim().to_string(),
            actual,
        });
    }

    Ok(serde_json::from_slice(&json)?)
}
