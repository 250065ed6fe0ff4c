//! Language model collaborators: the completion trait, retry policy and the
//! shared token-usage tracker.

pub mod http;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use http::{MediaAttachment, OpenAiCompatClient};

/// Errors from a model call.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model client not configured: {0}")]
    NotConfigured(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("api error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("attachment unreadable: {0}")]
    Attachment(#[from] std::io::Error),

    #[error("model call failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        ModelError::Http(err.to_string())
    }
}

/// Token counts reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// A model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// Text completion. Implementations retry internally and only fail once
/// their retry budget is spent.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<Completion, ModelError>;

    /// Model identifier, used as the usage-tracking key.
    fn model_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Retry settings for model calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_retries: u32,
    /// Base delay for exponential backoff (milliseconds).
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// `base * 2^retry` plus up to `base` of random jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self.backoff_base_ms.saturating_mul(2u64.saturating_pow(retry));
        let jitter = if self.backoff_base_ms > 0 {
            rand::thread_rng().gen_range(0..self.backoff_base_ms)
        } else {
            0
        };
        Duration::from_millis(exp + jitter)
    }
}

/// Run `call` until it succeeds or the policy is spent.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut call: F,
) -> Result<T, ModelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ModelError>>,
{
    let attempts = policy.max_retries.max(1);
    let mut last_error = String::new();
    for retry in 0..attempts {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                last_error = err.to_string();
                if retry + 1 < attempts {
                    let delay = policy.delay_for(retry);
                    warn!(
                        call = what,
                        attempt = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %last_error,
                        "model call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(ModelError::RetriesExhausted {
        attempts,
        last_error,
    })
}

// ---------------------------------------------------------------------------
// Usage tracking
// ---------------------------------------------------------------------------

/// Aggregated usage for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub calls: u64,
    pub totals: TokenUsage,
    pub per_model: BTreeMap<String, TokenUsage>,
}

/// Run-wide token accounting shared by all workers.
#[derive(Debug, Default)]
pub struct UsageTracker {
    inner: Mutex<UsageSummary>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, model: &str, usage: Option<&TokenUsage>) {
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.calls += 1;
        if let Some(usage) = usage {
            guard.totals.add(usage);
            guard
                .per_model
                .entry(model.to_string())
                .or_default()
                .add(usage);
        }
    }

    pub fn snapshot(&self) -> UsageSummary {
        match self.inner.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// A model client that reports every completion to a [`UsageTracker`].
pub struct TrackedModel {
    inner: Arc<dyn ModelClient>,
    tracker: Arc<UsageTracker>,
}

impl TrackedModel {
    pub fn new(inner: Arc<dyn ModelClient>, tracker: Arc<UsageTracker>) -> Self {
        Self { inner, tracker }
    }
}

#[async_trait]
impl ModelClient for TrackedModel {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<Completion, ModelError> {
        let completion = self.inner.complete(prompt, max_tokens).await?;
        self.tracker
            .record(self.inner.model_name(), completion.usage.as_ref());
        Ok(completion)
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedModel;

    #[async_trait]
    impl ModelClient for FixedModel {
        async fn complete(&self, _prompt: &str, _max_tokens: u32) -> Result<Completion, ModelError> {
            Ok(Completion {
                text: "ok".to_string(),
                usage: Some(TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                }),
            })
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_base_ms: 1,
        };
        let c = calls.clone();
        let result = retry_with_backoff(&policy, "test", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ModelError::Http("boom".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            max_retries: 2,
            backoff_base_ms: 1,
        };
        let c = calls.clone();
        let result: Result<(), ModelError> = retry_with_backoff(&policy, "test", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ModelError::EmptyResponse)
            }
        })
        .await;
        match result {
            Err(ModelError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_base_ms: 100,
        };
        let d0 = policy.delay_for(0).as_millis();
        let d2 = policy.delay_for(2).as_millis();
        assert!((100..200).contains(&d0));
        assert!((400..500).contains(&d2));
    }

    #[tokio::test]
    async fn test_tracked_model_accumulates_usage() {
        let tracker = Arc::new(UsageTracker::new());
        let model = TrackedModel::new(Arc::new(FixedModel), tracker.clone());
        model.complete("a", 10).await.unwrap();
        model.complete("b", 10).await.unwrap();

        let summary = tracker.snapshot();
        assert_eq!(summary.calls, 2);
        assert_eq!(summary.totals.total_tokens, 30);
        assert_eq!(summary.per_model["fixed"].prompt_tokens, 20);
    }

    #[test]
    fn test_tracker_is_shared_across_threads() {
        let tracker = Arc::new(UsageTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = tracker.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        t.record(
                            "m",
                            Some(&TokenUsage {
                                prompt_tokens: 1,
                                completion_tokens: 1,
                                total_tokens: 2,
                            }),
                        );
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let summary = tracker.snapshot();
        assert_eq!(summary.calls, 800);
        assert_eq!(summary.totals.total_tokens, 1600);
    }
}
