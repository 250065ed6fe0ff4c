//! OpenAI-compatible chat completions client.
//!
//! Serves both plain text prompts and multimodal prompts (video plus reference
//! image), the latter sent as base64 `data:` URLs in `image_url` content parts.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{retry_with_backoff, Completion, ModelClient, ModelError, RetryPolicy, TokenUsage};

/// A file sent alongside a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub path: PathBuf,
    pub mime_type: String,
}

impl MediaAttachment {
    pub fn video(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mime_type: "video/mp4".to_string(),
        }
    }

    pub fn png(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mime_type: "image/png".to_string(),
        }
    }

    /// Read the file and encode it as a `data:` URL.
    pub fn to_data_url(&self) -> Result<String, ModelError> {
        let bytes = std::fs::read(&self.path)?;
        Ok(data_url(&self.mime_type, &bytes))
    }
}

pub fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime_type,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completions client for any OpenAI-compatible endpoint.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

impl OpenAiCompatClient {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        retry: RetryPolicy,
    ) -> Result<Self, ModelError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ModelError::NotConfigured("api key is empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("scenefix/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            retry,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    async fn send_once(&self, messages: &[Value], max_tokens: u32) -> Result<Completion, ModelError> {
        let request = ChatRequest {
            model: &self.model,
            messages: messages.to_vec(),
            max_tokens,
        };
        let response = self
            .http
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ModelError::Api {
                status: status.as_u16(),
                body: truncate(&text, 500).to_string(),
            });
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| ModelError::Decode(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ModelError::EmptyResponse)?;

        debug!(model = %self.model, chars = content.len(), "completion received");
        Ok(Completion {
            text: content,
            usage: parsed.usage,
        })
    }

    async fn send(&self, messages: Vec<Value>, max_tokens: u32) -> Result<Completion, ModelError> {
        retry_with_backoff(&self.retry, &self.model, || self.send_once(&messages, max_tokens)).await
    }

    /// Prompt plus media attachments as one user message.
    pub async fn complete_with_media(
        &self,
        prompt: &str,
        attachments: &[MediaAttachment],
        max_tokens: u32,
    ) -> Result<Completion, ModelError> {
        let mut parts = vec![json!({ "type": "text", "text": prompt })];
        for attachment in attachments {
            parts.push(json!({
                "type": "image_url",
                "image_url": { "url": attachment.to_data_url()?, "detail": "high" },
            }));
        }
        self.send(vec![json!({ "role": "user", "content": parts })], max_tokens)
            .await
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<Completion, ModelError> {
        self.send(
            vec![json!({ "role": "user", "content": prompt })],
            max_tokens,
        )
        .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Guess an attachment's MIME type from its extension.
pub fn attachment_for(path: &Path) -> MediaAttachment {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => MediaAttachment::png(path),
        Some("jpg") | Some("jpeg") => MediaAttachment {
            path: path.to_path_buf(),
            mime_type: "image/jpeg".to_string(),
        },
        _ => MediaAttachment::video(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_encoding() {
        assert_eq!(data_url("image/png", b"hi"), "data:image/png;base64,aGk=");
    }

    #[test]
    fn test_attachment_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.png");
        std::fs::write(&path, b"abc").unwrap();
        let attachment = attachment_for(&path);
        assert_eq!(attachment.mime_type, "image/png");
        assert_eq!(attachment.to_data_url().unwrap(), "data:image/png;base64,YWJj");
    }

    #[test]
    fn test_missing_attachment_is_error() {
        let attachment = MediaAttachment::video("/nonexistent/clip.mp4");
        assert!(matches!(
            attachment.to_data_url(),
            Err(ModelError::Attachment(_))
        ));
    }

    #[test]
    fn test_empty_key_rejected() {
        let result = OpenAiCompatClient::new("http://localhost", " ", "m", RetryPolicy::default());
        assert!(matches!(result, Err(ModelError::NotConfigured(_))));
    }

    #[test]
    fn test_endpoint_trims_slash() {
        let client =
            OpenAiCompatClient::new("http://localhost:8080/v1/", "k", "m", RetryPolicy::default())
                .unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(client.model_name(), "m");
    }

    #[test]
    fn test_chat_response_parses_usage() {
        let raw = r#"{"choices":[{"message":{"content":"hi"}}],"usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.usage.unwrap().total_tokens, 4);
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hi"));
    }
}
