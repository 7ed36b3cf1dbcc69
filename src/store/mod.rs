//! Key/value persistence behind the merge engine.
//!
//! Each key maps to a JSON value plus metadata carrying the write clock.
//! Backends only promise that a single `put` is atomic; there are no
//! transactions across `get_with_metadata` and `put`.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

/// Per-key metadata kept beside the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub update_at: u64,
}

/// A value as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub value: Value,
    pub metadata: Metadata,
}

/// Errors that can occur in a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error reading or writing a file.
    #[error("I/O error for {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),
    /// A stored entry could not be decoded.
    #[error("corrupt entry {}: {}", .0.display(), .1)]
    Corrupt(PathBuf, #[source] serde_json::Error),
    /// An entry could not be encoded.
    #[error("failed to encode entry: {0}")]
    Encode(#[source] serde_json::Error),
    /// Key cannot be stored (e.g. would escape the data directory).
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// The store adapter consumed by the merge engine.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the value and metadata for `key`, or `None` if never written.
    async fn get_with_metadata(&self, key: &str) -> Result<Option<StoredEntry>, StoreError>;

    /// Replaces the entry for `key` wholesale.
    async fn put(&self, key: &str, value: &Value, metadata: Metadata) -> Result<(), StoreError>;

    /// Lists stored keys in ascending order.
    async fn list(&self) -> Result<Vec<String>, StoreError>;
}
