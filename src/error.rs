//! Error types for the chanstore library.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for chanstore operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Unknown object id, display name or local source file.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The destination channel cannot be used (wrong identity, not writable, wrong kind).
    #[error("Channel unusable: {0}")]
    ChannelUnusable(String),

    /// A network or backend hiccup. Retried by the transfer loop, never surfaced on its own.
    #[error("Transient transfer failure: {0}")]
    Transient(String),

    /// Reassembled content does not match the expected digest.
    #[error("Integrity mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    /// Interrupted during a retry wait. Resume state has been persisted.
    #[error("Operation cancelled")]
    Cancelled,

    /// Catalog or resume journal could not be parsed. The file is left untouched.
    #[error("Corrupt persisted state in {}: {reason}", path.display())]
    CorruptState { path: PathBuf, reason: String },

    /// HTTP request to the channel failed with status code.
    #[error("HTTP error: {0}")]
    HttpError(u16),

    /// Network request error.
    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Local filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// XML serialization error.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Malformed gateway request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A gateway precondition (such as `Overwrite: F`) was not met.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Custom error message.
    #[error("{0}")]
    Custom(String),
}

impl StoreError {
    /// Whether the transfer loop should back off and try again.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transient(_) | StoreError::RequestError(_) => true,
            StoreError::HttpError(code) => *code == 429 || *code >= 500 || *code == 408,
            _ => false,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        StoreError::CorruptState {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for chanstore operations.
pub type Result<T> = std::result::Result<T, StoreError>;
