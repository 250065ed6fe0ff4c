//! Domain-level error taxonomy for scenefix.

/// Errors produced while loading or validating a storyboard.
#[derive(Debug, thiserror::Error)]
pub enum StoryboardError {
    #[error("storyboard has no sections")]
    Empty,

    #[error("section {index} is missing required field: {field}")]
    MissingField { index: usize, field: String },

    #[error("duplicate section id: {0}")]
    DuplicateId(String),
}

/// scenefix domain errors.
#[derive(Debug, thiserror::Error)]
pub enum ScenefixError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("section not found: {0}")]
    SectionNotFound(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storyboard error: {0}")]
    Storyboard(#[from] StoryboardError),

    #[error("video concatenation failed: {0}")]
    Concat(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for scenefix domain operations.
pub type Result<T> = std::result::Result<T, ScenefixError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenefix_error_display() {
        let err = ScenefixError::InvalidConfig("max_workers must be > 0".to_string());
        assert!(err.to_string().contains("invalid config"));

        let err = ScenefixError::SectionNotFound("section_3".to_string());
        assert!(err.to_string().contains("section_3"));
    }

    #[test]
    fn test_digest_mismatch_error() {
        let err = ScenefixError::DigestMismatch {
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc123"));
        assert!(msg.contains("def456"));
    }

    #[test]
    fn test_storyboard_error_wraps() {
        let err: ScenefixError = StoryboardError::DuplicateId("section_1".to_string()).into();
        assert!(err.to_string().contains("storyboard error"));
        assert!(err.to_string().contains("section_1"));
    }
}
