//! Error taxonomy shared across the service.
//!
//! Every variant maps to exactly one HTTP status and a stable machine-readable
//! code, so handlers can return `Result<_, Error>` and let the server layer
//! serialize the `{"error": {"code", "message"}}` body.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad input from the client (missing field, out-of-range value).
    #[error("{0}")]
    Validation(String),

    /// A referenced game, session, or house rule does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Upload exceeds the configured size ceiling.
    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    /// The upload is not a parseable PDF.
    #[error("{0}")]
    UnsupportedFormat(String),

    /// The document parsed but contained no extractable text.
    #[error("no extractable text found in document")]
    EmptyDocument,

    /// The embedding backend could not be reached or rejected the request.
    #[error("embedding service error: {0}")]
    Upstream(String),

    /// The LLM call failed after the user message was persisted.
    #[error("reply generation failed: {0}")]
    Generation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound(message.into())
    }

    /// Stable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::TooLarge { .. } => "too_large",
            Error::UnsupportedFormat(_) => "unsupported_format",
            Error::EmptyDocument => "empty_document",
            Error::Upstream(_) => "upstream_unavailable",
            Error::Generation(_) => "generation_failed",
            Error::Database(_) => "persistence",
            Error::Io(_) => "io",
            Error::Internal(_) => "internal",
        }
    }
}
