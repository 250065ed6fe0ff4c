//! Candidate validation.
//!
//! A candidate is accepted only after two ordered gates pass: the static
//! syntax gate ([`crate::syntax`]) and a dry run that imports the module and
//! instantiates the scene class with its `construct` body short-circuited.
//! The dry run itself is an external process, so it sits behind the
//! [`DryRunner`] seam; `scenefix-exec` provides the subprocess implementation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::syntax::check_syntax;

/// Result of one dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryRunOutcome {
    pub passed: bool,
    /// Captured stderr on failure, or a short status on success.
    pub message: String,
}

/// Executes the dry-run gate.
#[async_trait]
pub trait DryRunner: Send + Sync {
    /// Run `source` with its construct body short-circuited and instantiate
    /// `scene_class`. Implementations must not leave scratch files behind.
    async fn dry_run(&self, section_id: &str, source: &str, scene_class: &str) -> DryRunOutcome;
}

/// Combined verdict of both gates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub syntax_valid: bool,
    pub dry_run_valid: bool,
    pub message: String,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.syntax_valid && self.dry_run_valid
    }
}

/// Validates full candidate sources.
#[async_trait]
pub trait CandidateValidator: Send + Sync {
    async fn validate(&self, section_id: &str, source: &str, scene_class: &str) -> ValidationReport;
}

/// Syntax gate followed by a dry run. The dry run is never reached when the
/// syntax gate fails.
pub struct GatedValidator {
    dry_runner: Arc<dyn DryRunner>,
}

impl GatedValidator {
    pub fn new(dry_runner: Arc<dyn DryRunner>) -> Self {
        Self { dry_runner }
    }
}

#[async_trait]
impl CandidateValidator for GatedValidator {
    async fn validate(&self, section_id: &str, source: &str, scene_class: &str) -> ValidationReport {
        let syntax = check_syntax(source);
        if !syntax.valid {
            return ValidationReport {
                syntax_valid: false,
                dry_run_valid: false,
                message: syntax.message,
            };
        }

        let run = self.dry_runner.dry_run(section_id, source, scene_class).await;
        ValidationReport {
            syntax_valid: true,
            dry_run_valid: run.passed,
            message: run.message,
        }
    }
}

/// Rewrite `source` so `construct` waits briefly and returns immediately.
///
/// The rest of the body is left in place (unreachable) so imports and class
/// definitions are still exercised. Sources without a `construct` method are
/// returned unchanged.
pub fn dry_run_source(source: &str) -> String {
    let mut out = Vec::new();
    let mut patched = false;
    for line in source.split('\n') {
        out.push(line.to_string());
        if !patched && line.trim_start().starts_with("def construct(self") && line.trim_end().ends_with(':') {
            let indent = " ".repeat(line.len() - line.trim_start().len() + 4);
            out.push(format!("{}self.wait(0.1)", indent));
            out.push(format!("{}return", indent));
            patched = true;
        }
    }
    out.join("\n")
}

/// Python snippet that imports `module` and instantiates `scene_class`.
pub fn dry_run_snippet(module: &str, scene_class: &str) -> String {
    format!(
        "from {m} import {c}; scene = {c}(); print('Syntax OK')",
        m = module,
        c = scene_class
    )
}
