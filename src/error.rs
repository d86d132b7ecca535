//! Error taxonomy for a single embedding invocation.
//!
//! Every variant ends up in the same `{ "error": "..." }` envelope on stderr,
//! so the `Display` text is what callers see.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    /// Stdin is not JSON, not UTF-8, or does not match the request schema
    #[error("Invalid input. Expected JSON with 'texts' array.")]
    InputFormat(#[source] Option<serde_json::Error>),

    /// `texts` is missing, null or has no elements
    #[error("No texts provided")]
    EmptyInput,

    /// The backend the model needs was not compiled into this binary
    #[error(
        "{backend} backend not available. Install with: cargo install semantic-embed --features {feature}"
    )]
    DependencyMissing {
        backend: &'static str,
        feature: &'static str,
    },

    #[error("unknown model '{name}', options: {options}")]
    UnknownModel { name: String, options: String },

    #[error("failed to load model '{model}': {reason}")]
    ModelLoad { model: String, reason: String },

    #[error("embedding failed: {0}")]
    Inference(String),

    #[error("invalid config {path}: {reason}")]
    Config { path: String, reason: String },

    #[error("invalid arguments: {0}")]
    Usage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EmbedError {
    /// Every failure maps to the same non-zero status.
    pub fn exit_code(&self) -> u8 {
        1
    }
}

pub type Result<T> = std::result::Result<T, EmbedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_format_message() {
        let err = EmbedError::InputFormat(None);
        assert_eq!(
            err.to_string(),
            "Invalid input. Expected JSON with 'texts' array."
        );
    }

    #[test]
    fn test_dependency_missing_names_remedy() {
        let err = EmbedError::DependencyMissing {
            backend: "fastembed",
            feature: "fastembed",
        };
        let msg = err.to_string();
        assert!(msg.contains("fastembed backend not available"));
        assert!(msg.contains("--features fastembed"));
    }

    #[test]
    fn test_exit_code_is_one() {
        assert_eq!(EmbedError::EmptyInput.exit_code(), 1);
        assert_eq!(EmbedError::Inference("boom".into()).exit_code(), 1);
    }
}
