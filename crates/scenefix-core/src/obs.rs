//! Structured lifecycle events for sections, repairs and critique rounds.
//!
//! Every event is an `info!` (or `warn!`) with an `event` field so JSON logs can
//! be filtered by lifecycle stage.

use tracing::{info, warn};

/// RAII guard that tags everything logged inside it with the section id.
///
/// ```ignore
/// let _span = SectionSpan::enter("section_2");
/// ```
pub struct SectionSpan {
    _span: tracing::span::EnteredSpan,
}

impl SectionSpan {
    pub fn enter(section_id: &str) -> Self {
        Self {
            _span: section_span(section_id).entered(),
        }
    }
}

/// Section-scoped span for instrumenting futures that cross task boundaries.
pub fn section_span(section_id: &str) -> tracing::Span {
    tracing::info_span!("scenefix.section", section_id = %section_id)
}

pub fn emit_section_started(section_id: &str, title: &str) {
    info!(event = "section.started", section_id = %section_id, title = %title);
}

pub fn emit_section_finished(section_id: &str, duration_ms: u64, success: bool, renders: u32) {
    info!(
        event = "section.finished",
        section_id = %section_id,
        duration_ms = duration_ms,
        success = success,
        renders = renders,
    );
}

/// One repair attempt. `tier` is `local` or `1`..`3`.
pub fn emit_repair_attempt(section_id: &str, attempt: u32, tier: &str, outcome: &str) {
    info!(
        event = "repair.attempt",
        section_id = %section_id,
        attempt = attempt,
        tier = %tier,
        outcome = %outcome,
    );
}

pub fn emit_repair_finished(section_id: &str, attempts_used: u32, fixed: bool) {
    if fixed {
        info!(event = "repair.finished", section_id = %section_id, attempts_used = attempts_used, fixed = true);
    } else {
        warn!(event = "repair.finished", section_id = %section_id, attempts_used = attempts_used, fixed = false);
    }
}

pub fn emit_critique_round(section_id: &str, round: u32, has_issues: bool, suggestions: usize) {
    info!(
        event = "critique.round",
        section_id = %section_id,
        round = round,
        has_issues = has_issues,
        suggestions = suggestions,
    );
}

pub fn emit_feedback_skipped(section_id: &str, skipped: usize) {
    warn!(event = "critique.feedback_skipped", section_id = %section_id, skipped = skipped);
}

pub fn emit_pipeline_summary(total: usize, succeeded: usize, success_rate: f64) {
    info!(
        event = "pipeline.summary",
        total = total,
        succeeded = succeeded,
        success_rate = success_rate,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_span_enters() {
        let _span = SectionSpan::enter("section_1");
        emit_repair_attempt("section_1", 1, "local", "accepted");
    }
}
