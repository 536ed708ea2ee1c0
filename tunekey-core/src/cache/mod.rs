//! Credential persistence.
//!
//! The manager persists exactly one credential record. This module provides:
//! - [`TokenCache`] - trait for credential storage backends
//! - [`MemoryCache`] - in-memory implementation for tests and ephemeral use
//! - [`FileCache`] - single JSON record on disk, written atomically

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

mod file;
mod memory;

pub use file::FileCache;
pub use memory::MemoryCache;

use crate::model::Credentials;

/// Error type for credential cache operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem I/O failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The stored record could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    Backend { message: String },
}

/// Abstraction over credential storage backends.
///
/// Implementations must never leave a partially written record behind:
/// a crash mid-`store` leaves either the previous record or the new one.
#[async_trait]
pub trait TokenCache: Send + Sync {
    /// Load the persisted credential record, if any.
    async fn load(&self) -> Result<Option<Credentials>, StoreError>;

    /// Persist the credential record, replacing any previous one.
    async fn store(&self, credentials: &Credentials) -> Result<(), StoreError>;

    /// Remove the persisted record. A no-op if none exists.
    async fn clear(&self) -> Result<(), StoreError>;
}
