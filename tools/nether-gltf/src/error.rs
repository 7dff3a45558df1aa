//! Error type shared by every pipeline component

use std::path::PathBuf;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Broad error category, independent of the detail carried by the variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Format,
    ResourceNotFound,
    InvariantViolation,
    WriteConflict,
    Io,
    Config,
}

/// Failure of one asset's pipeline run
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Malformed JSON, bad container framing, or an unsupported source descriptor
    #[error("format error: {0}")]
    Format(String),

    /// External resource missing, or resolved outside the permitted roots
    #[error("resource not found: {} ({reason})", path.display())]
    ResourceNotFound { path: PathBuf, reason: String },

    /// A stage left the model with a dangling index or an out-of-range span
    #[error("stage `{stage}` broke the closed-model invariant: {detail}")]
    InvariantViolation { stage: String, detail: String },

    /// Two resources externalize to the same path with different bytes
    #[error("write conflict: two resources map to {} with different content", .0.display())]
    WriteConflict(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid pipeline config: {0}")]
    Config(String),
}

impl PipelineError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    pub(crate) fn not_found(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invariant(stage: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvariantViolation {
            stage: stage.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Format(_) => ErrorKind::Format,
            Self::ResourceNotFound { .. } => ErrorKind::ResourceNotFound,
            Self::InvariantViolation { .. } => ErrorKind::InvariantViolation,
            Self::WriteConflict(_) => ErrorKind::WriteConflict,
            Self::Io { .. } => ErrorKind::Io,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}
