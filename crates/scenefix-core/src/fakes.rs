//! Scripted in-memory collaborators.
//!
//! Used by unit and integration tests to drive the repair orchestrator and the
//! section loop without network access or subprocesses. Every fake records what
//! it was asked so tests can assert on call order and count.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::critique::{CritiqueFeedback, VideoCritic};
use crate::model::{Completion, ModelClient, ModelError, TokenUsage};
use crate::render::{RenderOutcome, RenderRequest, SceneRenderer};
use crate::validate::{CandidateValidator, ValidationReport};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Model that replays a queue of canned replies. An empty queue answers with
/// [`ModelError::EmptyResponse`].
pub struct ScriptedModel {
    name: String,
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: "scripted".to_string(),
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue a transport failure.
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        lock(&self.replies).push_back(Err(message.into()));
        self
    }

    /// Queue a reply.
    pub fn then_reply(self, text: impl Into<String>) -> Self {
        lock(&self.replies).push_back(Ok(text.into()));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn calls(&self) -> usize {
        lock(&self.prompts).len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<Completion, ModelError> {
        lock(&self.prompts).push(prompt.to_string());
        match lock(&self.replies).pop_front() {
            Some(Ok(text)) => Ok(Completion {
                usage: Some(TokenUsage {
                    prompt_tokens: prompt.len() as u64 / 4,
                    completion_tokens: text.len() as u64 / 4,
                    total_tokens: (prompt.len() + text.len()) as u64 / 4,
                }),
                text,
            }),
            Some(Err(message)) => Err(ModelError::Api {
                status: 503,
                body: message,
            }),
            None => Err(ModelError::EmptyResponse),
        }
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Accepts candidates containing a marker and rejects everything else at the
/// dry-run gate with a fixed error message.
pub struct ScriptedValidator {
    accept_marker: Option<String>,
    rejection: String,
    seen: Mutex<Vec<String>>,
}

impl ScriptedValidator {
    pub fn accept_containing(marker: impl Into<String>) -> Self {
        Self {
            accept_marker: Some(marker.into()),
            rejection: default_rejection(),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn reject_all() -> Self {
        Self {
            accept_marker: None,
            rejection: default_rejection(),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_rejection(mut self, message: impl Into<String>) -> Self {
        self.rejection = message.into();
        self
    }

    /// Candidates validated so far, in order.
    pub fn seen(&self) -> Vec<String> {
        lock(&self.seen).clone()
    }
}

fn default_rejection() -> String {
    "Traceback (most recent call last):\n  File \"scene.py\", line 3, in construct\nNameError: name 'Circl' is not defined".to_string()
}

#[async_trait]
impl CandidateValidator for ScriptedValidator {
    async fn validate(&self, _section_id: &str, source: &str, _scene_class: &str) -> ValidationReport {
        lock(&self.seen).push(source.to_string());
        let accepted = self
            .accept_marker
            .as_deref()
            .is_some_and(|marker| source.contains(marker));
        ValidationReport {
            syntax_valid: true,
            dry_run_valid: accepted,
            message: if accepted {
                "Syntax OK".to_string()
            } else {
                self.rejection.clone()
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renderer that fails whenever the script contains `fail_marker` and
/// otherwise writes a placeholder video at the first expected output path.
pub struct ScriptedRenderer {
    fail_marker: String,
    stderr: String,
    time_out: bool,
    requests: Mutex<Vec<RenderRequest>>,
}

impl ScriptedRenderer {
    pub fn failing_on(fail_marker: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            fail_marker: fail_marker.into(),
            stderr: stderr.into(),
            time_out: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every render times out.
    pub fn timing_out() -> Self {
        Self {
            fail_marker: String::new(),
            stderr: String::new(),
            time_out: true,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn renders(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl SceneRenderer for ScriptedRenderer {
    async fn render(&self, request: &RenderRequest) -> RenderOutcome {
        lock(&self.requests).push(request.clone());
        if self.time_out {
            return RenderOutcome {
                exit_code: -1,
                stderr: String::new(),
                timed_out: true,
                video_path: None,
            };
        }

        let script = std::fs::read_to_string(request.work_dir.join(&request.script)).unwrap_or_default();
        if script.contains(&self.fail_marker) {
            return RenderOutcome {
                exit_code: 1,
                stderr: self.stderr.clone(),
                timed_out: false,
                video_path: None,
            };
        }

        let Some(target) = request.expected_video_paths().into_iter().next() else {
            return RenderOutcome {
                exit_code: 1,
                stderr: "no output path".to_string(),
                timed_out: false,
                video_path: None,
            };
        };
        let written = target
            .parent()
            .map(std::fs::create_dir_all)
            .transpose()
            .and_then(|_| std::fs::write(&target, script.as_bytes()));
        match written {
            Ok(()) => RenderOutcome {
                exit_code: 0,
                stderr: String::new(),
                timed_out: false,
                video_path: Some(target),
            },
            Err(e) => RenderOutcome {
                exit_code: 1,
                stderr: e.to_string(),
                timed_out: false,
                video_path: None,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Critic
// ---------------------------------------------------------------------------

/// Critic that replays queued feedback; an empty queue reports no issues.
#[derive(Default)]
pub struct ScriptedCritic {
    rounds: Mutex<VecDeque<CritiqueFeedback>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCritic {
    pub fn new<I>(rounds: I) -> Self
    where
        I: IntoIterator<Item = CritiqueFeedback>,
    {
        Self {
            rounds: Mutex::new(rounds.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Feedback flagging the given improvement items.
    pub fn issues<I, S>(items: I) -> CritiqueFeedback
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CritiqueFeedback {
            has_issues: true,
            improvements: items.into_iter().map(Into::into).collect(),
            raw_response: String::new(),
        }
    }

    pub fn calls(&self) -> usize {
        lock(&self.prompts).len()
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

#[async_trait]
impl VideoCritic for ScriptedCritic {
    async fn critique(
        &self,
        prompt: &str,
        _video: &Path,
        _reference_image: Option<&Path>,
    ) -> Result<CritiqueFeedback, ModelError> {
        lock(&self.prompts).push(prompt.to_string());
        Ok(lock(&self.rounds).pop_front().unwrap_or_default())
    }
}
