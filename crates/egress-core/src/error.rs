//! Crate-wide error type

use thiserror::Error;

/// Result type alias for egress-core operations
pub type EgressResult<T> = std::result::Result<T, EgressError>;

/// Error type shared across the batch router and warehouse uploader
#[derive(Error, Debug)]
pub enum EgressError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("object storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("common error: {0}")]
    Common(#[from] egress_common::CommonError),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("warehouse driver error: {0}")]
    Warehouse(String),
}

impl EgressError {
    /// Invariant errors indicate malformed data the pipeline cannot
    /// reasonably continue past (missing payload fields, catalog rows in an
    /// unexpected shape). Callers treat these as fatal rather than
    /// retryable.
    pub fn invariant(msg: impl Into<String>) -> Self {
        EgressError::Invariant(msg.into())
    }
}
