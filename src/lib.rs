//! KV Sync
//!
//! A small synchronization endpoint: clients push timestamped records to a
//! server-held key/value store and get back the authoritative record, chosen
//! by last-write-wins.

pub mod client;
pub mod config;
pub mod merge;
pub mod record;
pub mod server;
pub mod store;

pub use client::{ClientError, SyncClient};
pub use config::{ConfigError, ServerConfig, StoreBackend};
pub use merge::{system_now_millis, Clock, MergeEngine, TiePolicy};
pub use record::{NamedRecord, SyncRecord};
pub use server::{AuthScheme, Authenticator, OperationClass, SyncError};
pub use store::{FileStore, KvStore, MemoryStore, Metadata, StoreError, StoredEntry};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
