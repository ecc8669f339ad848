//! Error types shared across the crate.
//!
//! All fallible operations converge on [`StoreError`]. Backend failures keep
//! their cause as a message so callers can log them without depending on the
//! concrete backend crate.

use thiserror::Error;

/// Errors produced by the index, the storage contract and the orchestrator.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// A caller-supplied value cannot be used, e.g. a document without a
    /// fingerprint on insert or an unparseable tokenizer descriptor.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The requested document id is not stored.
    #[error("no document with id {0}")]
    NotFound(u64),

    /// The operation needs more persisted fields than the configured storage
    /// level retains.
    #[error("storage level too low: {0}")]
    InsufficientStorageLevel(&'static str),

    /// A fresh-initialization path was invoked against an already prepared
    /// store. Raised by backends that distinguish the two.
    #[error("storage is already initialized")]
    AlreadyInitialized,

    /// Settings read back from storage are missing or cannot be parsed.
    #[error("corrupt configuration: {0}")]
    CorruptConfig(String),

    /// A storage-layer failure, with the backend's own message preserved.
    #[error("backend error: {0}")]
    Backend(String),

    #[error("encoding error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decoding error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

impl StoreError {
    /// Wrap any displayable backend failure.
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }

    /// Wrap a message as invalid input.
    pub fn invalid_input<E: std::fmt::Display>(err: E) -> Self {
        Self::InvalidInput(err.to_string())
    }
}
