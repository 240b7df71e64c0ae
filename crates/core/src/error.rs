use thiserror::Error;

use crate::model::{ItemId, JobId};

/// Errors surfaced by a [`MigrationStore`](crate::store::MigrationStore) backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// True when the error means the record is gone rather than the store failing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::JobNotFound(_) | StoreError::ItemNotFound(_))
    }
}

/// Errors from the credential cipher.
#[derive(Error, Debug)]
pub enum SecretError {
    #[error("encryption key error: {0}")]
    KeyLoad(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("invalid encrypted secret format: {0}")]
    Format(String),
}
