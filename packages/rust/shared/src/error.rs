//! Error types for SiteChat.
//!
//! Library crates use [`SiteChatError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Most of these never reach a caller of the core API: fetch, generation and
//! delivery failures are downgraded to soft outcomes (skipped page, apology
//! text) where they occur. They still travel as `Result`s up to that point.

use std::path::PathBuf;

/// Top-level error type for all SiteChat operations.
#[derive(Debug, thiserror::Error)]
pub enum SiteChatError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while fetching a page (timeout, transport, non-2xx).
    #[error("network error: {0}")]
    Network(String),

    /// HTML parsing, selector, or pattern error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Generation collaborator error (missing credential, API, or response shape).
    #[error("generation error: {0}")]
    Generation(String),

    /// Delivery collaborator error (escalation notification not sent).
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad URL, invalid input).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SiteChatError>;

impl SiteChatError {
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

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
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
}
