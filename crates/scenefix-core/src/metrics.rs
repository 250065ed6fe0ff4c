//! Process-wide repair and render counters.
//!
//! Counters are bumped at the call site without logging; [`Metrics::flush`]
//! reports them all as one `info!` event, normally at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    repairs_started: AtomicU64,
    local_fixes_accepted: AtomicU64,
    regenerations_accepted: AtomicU64,
    repairs_exhausted: AtomicU64,
    renders_executed: AtomicU64,
    critique_rounds: AtomicU64,
    feedback_items_skipped: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            repairs_started: AtomicU64::new(0),
            local_fixes_accepted: AtomicU64::new(0),
            regenerations_accepted: AtomicU64::new(0),
            repairs_exhausted: AtomicU64::new(0),
            renders_executed: AtomicU64::new(0),
            critique_rounds: AtomicU64::new(0),
            feedback_items_skipped: AtomicU64::new(0),
        }
    }

    pub fn inc_repairs_started(&self) {
        self.repairs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_local_fixes_accepted(&self) {
        self.local_fixes_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_regenerations_accepted(&self) {
        self.regenerations_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_repairs_exhausted(&self) {
        self.repairs_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_renders(&self) {
        self.renders_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_critique_rounds(&self) {
        self.critique_rounds.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n` feedback items that named no usable line or placement call.
    pub fn add_feedback_skipped(&self, n: u64) {
        self.feedback_items_skipped.fetch_add(n, Ordering::Relaxed);
    }

    /// Emit all counters as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            repairs_started = self.repairs_started(),
            local_fixes_accepted = self.local_fixes_accepted(),
            regenerations_accepted = self.regenerations_accepted(),
            repairs_exhausted = self.repairs_exhausted(),
            renders_executed = self.renders_executed(),
            critique_rounds = self.critique_rounds(),
            feedback_items_skipped = self.feedback_items_skipped(),
        );
    }

    pub fn repairs_started(&self) -> u64 {
        self.repairs_started.load(Ordering::Relaxed)
    }

    pub fn local_fixes_accepted(&self) -> u64 {
        self.local_fixes_accepted.load(Ordering::Relaxed)
    }

    pub fn regenerations_accepted(&self) -> u64 {
        self.regenerations_accepted.load(Ordering::Relaxed)
    }

    pub fn repairs_exhausted(&self) -> u64 {
        self.repairs_exhausted.load(Ordering::Relaxed)
    }

    pub fn renders_executed(&self) -> u64 {
        self.renders_executed.load(Ordering::Relaxed)
    }

    pub fn critique_rounds(&self) -> u64 {
        self.critique_rounds.load(Ordering::Relaxed)
    }

    pub fn feedback_items_skipped(&self) -> u64 {
        self.feedback_items_skipped.load(Ordering::Relaxed)
    }

    /// Zero every counter (tests).
    pub fn reset(&self) {
        for counter in [
            &self.repairs_started,
            &self.local_fixes_accepted,
            &self.regenerations_accepted,
            &self.repairs_exhausted,
            &self.renders_executed,
            &self.critique_rounds,
            &self.feedback_items_skipped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_repairs_started();
        m.inc_repairs_started();
        m.inc_local_fixes_accepted();
        m.inc_repairs_exhausted();
        m.add_feedback_skipped(3);
        assert_eq!(m.repairs_started(), 2);
        assert_eq!(m.local_fixes_accepted(), 1);
        assert_eq!(m.repairs_exhausted(), 1);
        assert_eq!(m.feedback_items_skipped(), 3);
        assert_eq!(m.renders_executed(), 0);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_renders();
        m.inc_critique_rounds();
        m.inc_regenerations_accepted();
        m.reset();
        assert_eq!(m.renders_executed(), 0);
        assert_eq!(m.critique_rounds(), 0);
        assert_eq!(m.regenerations_accepted(), 0);
    }
}
