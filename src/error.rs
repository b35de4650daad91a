//! Session error taxonomy.
//!
//! Every per-session failure is recovered at the pipeline boundary and carried
//! in a `SessionOutcome`. Only `Configuration` is fatal, and only at startup.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    /// No usable models or an invalid setting. Fatal before any session starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Declared upload type is neither `image/*` nor `video/*`.
    #[error("unsupported media type '{0}' (expected image/* or video/*)")]
    UnsupportedMedia(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("annotated output for '{stem}' not found in {}", dir.display())]
    ArtifactNotFound { dir: PathBuf, stem: String },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("session cancelled")]
    Cancelled,
}

impl SessionError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Wraps an adapter error, keeping its context chain.
    pub fn inference(err: anyhow::Error) -> Self {
        Self::Inference(format!("{:#}", err))
    }

    /// Short stable label for logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::UnsupportedMedia(_) => "unsupported_media",
            Self::Storage(_) => "storage",
            Self::ArtifactNotFound { .. } => "artifact_not_found",
            Self::Inference(_) => "inference",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configuration_errors_are_fatal() {
        assert!(SessionError::configuration("no models").is_fatal());
        assert!(!SessionError::storage("disk full").is_fatal());
        assert!(!SessionError::Cancelled.is_fatal());
        assert!(!SessionError::ArtifactNotFound {
            dir: PathBuf::from("runs/detect/predict"),
            stem: "upload_x".into(),
        }
        .is_fatal());
    }

    #[test]
    fn inference_error_keeps_context_chain() {
        let err = anyhow::anyhow!("tensor shape mismatch").context("ONNX inference failed");
        let wrapped = SessionError::inference(err);
        assert_eq!(wrapped.kind(), "inference");
        assert_eq!(
            wrapped.to_string(),
            "inference failed: ONNX inference failed: tensor shape mismatch"
        );
    }
}
