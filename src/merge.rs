//! Last-write-wins merge of an incoming record against the stored entry.
//!
//! The merge never edits a stored value in place: the stored entry either
//! survives untouched or is replaced wholesale by the incoming one. The
//! caller always gets back the authoritative record and is expected to adopt
//! it as ground truth.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::record::SyncRecord;
use crate::store::{KvStore, Metadata, StoreError};

/// Source of "now" in milliseconds since epoch.
pub type Clock = fn() -> u64;

/// Wall-clock time from the system.
pub fn system_now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Which side wins when stored and incoming timestamps are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TiePolicy {
    /// Equal timestamps keep the stored entry. Retries become no-ops.
    #[default]
    StoredWins,
    /// Equal timestamps overwrite with the incoming entry.
    IncomingWins,
}

impl TiePolicy {
    /// Returns true if the stored entry beats the incoming one.
    pub fn stored_wins(self, stored: u64, incoming: u64) -> bool {
        match self {
            TiePolicy::StoredWins => stored >= incoming,
            TiePolicy::IncomingWins => stored > incoming,
        }
    }

    /// Parse from string name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "stored-wins" | "stored" => Some(TiePolicy::StoredWins),
            "incoming-wins" | "incoming" => Some(TiePolicy::IncomingWins),
            _ => None,
        }
    }
}

/// Resolves incoming records against the store.
#[derive(Clone)]
pub struct MergeEngine {
    store: Arc<dyn KvStore>,
    tie_policy: TiePolicy,
    clock: Clock,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn KvStore>, tie_policy: TiePolicy) -> Self {
        Self {
            store,
            tie_policy,
            clock: system_now_millis,
        }
    }

    /// Replaces the clock used to stamp clockless writes.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn tie_policy(&self) -> TiePolicy {
        self.tie_policy
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Merges `incoming` into the store and returns the winning record.
    ///
    /// An `update_at` of `0` is stamped with the server clock and always wins,
    /// whatever the tie policy. The stamp is bumped past the stored clock when
    /// needed to keep `update_at` monotonic per key; at `u64::MAX` it stays put.
    pub async fn merge(&self, mut incoming: SyncRecord) -> Result<SyncRecord, StoreError> {
        let stored = self.store.get_with_metadata(&incoming.key).await?;

        let clockless = incoming.is_clockless();
        if clockless {
            let floor = stored
                .as_ref()
                .map_or(1, |entry| entry.metadata.update_at.saturating_add(1));
            incoming.update_at = (self.clock)().max(floor);
        }

        if let Some(entry) = stored.filter(|_| !clockless) {
            let stored_at = entry.metadata.update_at;
            if self.tie_policy.stored_wins(stored_at, incoming.update_at) {
                tracing::debug!(
                    key = %incoming.key,
                    stored_at,
                    incoming_at = incoming.update_at,
                    "stored entry wins"
                );
                return Ok(SyncRecord {
                    key: incoming.key,
                    value: entry.value,
                    update_at: stored_at,
                });
            }
        }

        self.store
            .put(
                &incoming.key,
                &incoming.value,
                Metadata {
                    update_at: incoming.update_at,
                },
            )
            .await?;

        tracing::debug!(
            key = %incoming.key,
            update_at = incoming.update_at,
            "incoming entry wins"
        );

        Ok(incoming)
    }
}
