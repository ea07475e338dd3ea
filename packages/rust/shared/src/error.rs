//! Error types for Porter.
//!
//! Library crates use [`PorterError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! A rejected response is *not* an error: validation verdicts are ordinary
//! values. Only faults (unknown fields, unreachable resources, an unavailable
//! model, infrastructure problems) travel through this type.

use std::path::PathBuf;

use crate::types::TaskContext;

/// Top-level error type for all Porter operations.
#[derive(Debug, thiserror::Error)]
pub enum PorterError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error during a single fetch attempt.
    #[error("network error: {0}")]
    Network(String),

    /// HTML parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Browser render bridge error (spawn, protocol, or render failure).
    #[error("render error: {0}")]
    Render(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// HTML-to-text conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// A template referenced a field the row does not have.
    #[error("unknown field `{token}`")]
    UnknownField { token: String },

    /// Every fetch strategy was exhausted for a URL.
    #[error("resource unavailable: {url} ({})", attempts.join("; "))]
    ResourceUnavailable { url: String, attempts: Vec<String> },

    /// The prompt-execution capability failed or timed out.
    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    /// A failure annotated with the row/column/template it happened in.
    #[error("{context}: {source}")]
    Task {
        context: TaskContext,
        source: Box<PorterError>,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PorterError>;

impl PorterError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn unknown_field(token: impl Into<String>) -> Self {
        Self::UnknownField {
            token: token.into(),
        }
    }

    /// Build a `ResourceUnavailable` for `url` with the per-strategy reasons.
    pub fn resource_unavailable(url: impl Into<String>, attempts: Vec<String>) -> Self {
        Self::ResourceUnavailable {
            url: url.into(),
            attempts,
        }
    }

    /// Attach task context. Already-wrapped errors keep their original context.
    pub fn with_context(self, context: TaskContext) -> Self {
        match self {
            wrapped @ Self::Task { .. } => wrapped,
            other => Self::Task {
                context,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with any task context peeled off.
    pub fn root(&self) -> &PorterError {
        match self {
            Self::Task { source, .. } => source.root(),
            other => other,
        }
    }

    /// The task context, if this error carries one.
    pub fn context(&self) -> Option<&TaskContext> {
        match self {
            Self::Task { context, .. } => Some(context),
            _ => None,
        }
    }
}
