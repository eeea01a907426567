//! Error types for the store crate.
//!
//! Callers of `ConversationStateStore` and `ContextCache` never see these:
//! both degrade to a miss or a no-op. They surface from the raw
//! `KeyValueStore` backends and from backend setup.

use std::fmt;

/// Errors from key-value backend operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached.
    Unavailable { message: String },
    /// Reading a key failed.
    ReadFailed { key: String, message: String },
    /// Writing a key failed.
    WriteFailed { key: String, message: String },
    /// Deleting a key failed.
    DeleteFailed { key: String, message: String },
    /// A stored value could not be encoded or decoded.
    Serialization { message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { message } => write!(f, "store unavailable: {message}"),
            Self::ReadFailed { key, message } => write!(f, "read of '{key}' failed: {message}"),
            Self::WriteFailed { key, message } => write!(f, "write of '{key}' failed: {message}"),
            Self::DeleteFailed { key, message } => {
                write!(f, "delete of '{key}' failed: {message}")
            }
            Self::Serialization { message } => write!(f, "stored value is invalid: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

/// Errors from the external source of customer context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextSourceError {
    /// The source could not be reached.
    Unavailable { message: String },
    /// The source answered with data that could not be used.
    InvalidResponse { message: String },
}

impl fmt::Display for ContextSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { message } => write!(f, "context source unavailable: {message}"),
            Self::InvalidResponse { message } => {
                write!(f, "context source returned invalid data: {message}")
            }
        }
    }
}

impl std::error::Error for ContextSourceError {}
