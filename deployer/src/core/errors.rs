//! Typed failure kinds for each layer.
//!
//! Probing and building blocks never propagate these as `Err` out of the
//! engine; they travel inside `ProbeResult`, `BlockResult`, and
//! `ExecutionResult` so callers can inspect every step.

use serde::Serialize;
use thiserror::Error;

use crate::core::types::BlockId;

/// Why an approach did not round-trip. Always recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProbeError {
    #[error("could not place test artifact: {0}")]
    Write(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("request timed out")]
    Timeout,
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("served content did not match the test content")]
    ContentMismatch,
    #[error("response was not produced by the transient dynamic handler")]
    ForeignHandler,
    #[error("content generator failed: {0}")]
    Generator(String),
}

/// Category of a building block failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockErrorKind {
    Io,
    InvalidPath,
    ConfigUnwritable,
    Conflict,
    Unsupported,
}

impl BlockErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockErrorKind::Io => "io",
            BlockErrorKind::InvalidPath => "invalid_path",
            BlockErrorKind::ConfigUnwritable => "config_unwritable",
            BlockErrorKind::Conflict => "conflict",
            BlockErrorKind::Unsupported => "unsupported",
        }
    }
}

/// A building block's execute or cleanup failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{}: {message}", kind.as_str())]
pub struct BlockError {
    pub kind: BlockErrorKind,
    pub message: String,
}

impl BlockError {
    pub fn new(kind: BlockErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(BlockErrorKind::Io, message)
    }

    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::new(BlockErrorKind::InvalidPath, message)
    }

    pub fn config_unwritable(message: impl Into<String>) -> Self {
        Self::new(BlockErrorKind::ConfigUnwritable, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(BlockErrorKind::Conflict, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(BlockErrorKind::Unsupported, message)
    }
}

/// Registry miss. Raised before any block runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown strategy '{0}'")]
pub struct UnknownStrategy(pub String);

/// Best-effort reversal of one block failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("cleanup of {block} failed: {error}")]
pub struct CleanupError {
    pub block: BlockId,
    pub error: BlockError,
}
