//! Layout critique of rendered section videos.
//!
//! A multimodal critic watches the rendered clip next to a reference grid image
//! and answers with JSON shaped like
//! `{"layout": {"has_issues": bool, "improvements": [{"problem", "solution"}]}}`.
//! Answers that are not valid JSON are scanned for `Problem: ...; Solution: ...`
//! lines instead. Parsing never fails.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{
    Completion, MediaAttachment, ModelClient, ModelError, OpenAiCompatClient, UsageTracker,
};
use crate::response::extract_json_block;

/// Parsed critique of one round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CritiqueFeedback {
    pub has_issues: bool,
    /// `[LAYOUT] Problem: ...; Solution: ...` items.
    pub improvements: Vec<String>,
    pub raw_response: String,
}

impl CritiqueFeedback {
    /// True when there is something to act on.
    pub fn needs_changes(&self) -> bool {
        self.has_issues && !self.improvements.is_empty()
    }
}

/// Critiques a rendered video.
#[async_trait]
pub trait VideoCritic: Send + Sync {
    async fn critique(
        &self,
        prompt: &str,
        video: &Path,
        reference_image: Option<&Path>,
    ) -> Result<CritiqueFeedback, ModelError>;
}

#[derive(Deserialize)]
struct CritiqueDoc {
    #[serde(default)]
    layout: LayoutDoc,
}

#[derive(Default, Deserialize)]
struct LayoutDoc {
    #[serde(default)]
    has_issues: bool,
    #[serde(default)]
    improvements: Vec<ImprovementDoc>,
}

#[derive(Deserialize)]
struct ImprovementDoc {
    #[serde(default)]
    problem: String,
    #[serde(default)]
    solution: String,
}

fn format_item(problem: &str, solution: &str) -> String {
    format!("[LAYOUT] Problem: {}; Solution: {}", problem.trim(), solution.trim())
}

/// Parse a critic answer. Falls back to a regex scan when the JSON is invalid.
pub fn parse_layout_critique(raw: &str) -> CritiqueFeedback {
    let json = extract_json_block(raw).unwrap_or(raw);
    if let Ok(doc) = serde_json::from_str::<CritiqueDoc>(json) {
        let improvements = doc
            .layout
            .improvements
            .iter()
            .filter(|i| !i.problem.trim().is_empty() || !i.solution.trim().is_empty())
            .map(|i| format_item(&i.problem, &i.solution))
            .collect();
        return CritiqueFeedback {
            has_issues: doc.layout.has_issues,
            improvements,
            raw_response: raw.to_string(),
        };
    }

    static PAIR: OnceLock<Regex> = OnceLock::new();
    static SOLUTION: OnceLock<Regex> = OnceLock::new();
    let pair = PAIR.get_or_init(|| {
        Regex::new(r"(?im)Problem:\s*(.*?);\s*Solution:\s*(.*?)$").expect("static regex")
    });
    let solution = SOLUTION
        .get_or_init(|| Regex::new(r"(?im)Solution\s*:\s*(.+)$").expect("static regex"));

    let mut improvements: Vec<String> = pair
        .captures_iter(raw)
        .map(|c| format_item(&c[1], &c[2]))
        .collect();
    if improvements.is_empty() {
        improvements = solution
            .captures_iter(raw)
            .map(|c| format_item("", &c[1]))
            .collect();
    }
    CritiqueFeedback {
        has_issues: !improvements.is_empty(),
        improvements,
        raw_response: raw.to_string(),
    }
}

/// Critic backed by an OpenAI-compatible multimodal model.
pub struct OpenAiCompatCritic {
    client: OpenAiCompatClient,
    max_tokens: u32,
    tracker: Option<Arc<UsageTracker>>,
}

impl OpenAiCompatCritic {
    pub fn new(client: OpenAiCompatClient, max_tokens: u32) -> Self {
        Self {
            client,
            max_tokens,
            tracker: None,
        }
    }

    pub fn with_tracker(mut self, tracker: Arc<UsageTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }
}

#[async_trait]
impl VideoCritic for OpenAiCompatCritic {
    async fn critique(
        &self,
        prompt: &str,
        video: &Path,
        reference_image: Option<&Path>,
    ) -> Result<CritiqueFeedback, ModelError> {
        let mut attachments = vec![MediaAttachment::video(video)];
        if let Some(image) = reference_image {
            if image.exists() {
                attachments.push(MediaAttachment::png(image));
            } else {
                warn!(path = %image.display(), "reference grid image missing, sending video only");
            }
        }
        let Completion { text, usage } = self
            .client
            .complete_with_media(prompt, &attachments, self.max_tokens)
            .await?;
        if let Some(tracker) = &self.tracker {
            tracker.record(self.client.model_name(), usage.as_ref());
        }
        Ok(parse_layout_critique(&text))
    }
}
