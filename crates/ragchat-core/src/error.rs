//! Error taxonomy shared by the ingestion, retrieval, and lifecycle pipelines.
//!
//! Collaborator traits (embedding, vector index, stores) return
//! [`anyhow::Result`]; pipelines wrap those failures into
//! [`RagError::Dependency`] so callers only ever switch on [`ErrorKind`].

use thiserror::Error;

/// Discriminant of a [`RagError`], for exhaustive matching without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    NotFound,
    Dependency,
    ParseItem,
    Config,
}

impl ErrorKind {
    /// Stable machine-readable code used in HTTP error bodies.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "bad_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Dependency => "dependency_error",
            ErrorKind::ParseItem => "parse_error",
            ErrorKind::Config => "configuration_error",
        }
    }
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    /// An external collaborator (embedding, vector index, language model,
    /// metadata store) failed or timed out.
    #[error("{message}")]
    Dependency {
        message: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("item {item_index}: {reason}")]
    ParseItem { item_index: usize, reason: String },

    #[error("{0}")]
    Config(String),
}

impl RagError {
    pub fn validation(message: impl Into<String>) -> Self {
        RagError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        RagError::NotFound(message.into())
    }

    /// Wrap a collaborator failure with a short description of the step that failed.
    pub fn dependency(message: impl Into<String>, source: anyhow::Error) -> Self {
        RagError::Dependency {
            message: message.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RagError::Validation(_) => ErrorKind::Validation,
            RagError::Unauthorized(_) => ErrorKind::Unauthorized,
            RagError::NotFound(_) => ErrorKind::NotFound,
            RagError::Dependency { .. } => ErrorKind::Dependency,
            RagError::ParseItem { .. } => ErrorKind::ParseItem,
            RagError::Config(_) => ErrorKind::Config,
        }
    }

    /// Only dependency failures are worth re-invoking the whole operation for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RagError::Dependency { .. })
    }
}
