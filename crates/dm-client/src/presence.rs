//! Presence tracker
//!
//! Maps users to online/last-seen state, mutated only by explicit
//! connect/disconnect events from the transport. Queries about unknown
//! users answer offline-at-epoch: presence is under-claimed on any
//! uncertainty, never over-claimed.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dm_core::{PresenceRecord, UserId};
use tokio::sync::broadcast;

/// Buffer for presence change fan-out
const CHANGE_BUFFER_SIZE: usize = 64;

/// A presence transition observed for one user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceChange {
    pub record: PresenceRecord,
}

/// Tracks per-user presence across the process
pub struct PresenceTracker {
    records: DashMap<UserId, PresenceRecord>,
    changes_tx: broadcast::Sender<PresenceChange>,
}

impl PresenceTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        let (changes_tx, _) = broadcast::channel(CHANGE_BUFFER_SIZE);
        Self {
            records: DashMap::new(),
            changes_tx,
        }
    }

    /// Apply a `user_online` event
    pub fn set_online(&self, user_id: UserId) {
        let record = PresenceRecord::online(user_id);
        self.records.insert(user_id, record);
        self.changes_tx.send(PresenceChange { record }).ok();

        tracing::debug!(user_id = %user_id, "User online");
    }

    /// Apply a `user_offline` event, stamping last-seen
    pub fn set_offline(&self, user_id: UserId) {
        let record = PresenceRecord::offline(user_id);
        self.records.insert(user_id, record);
        self.changes_tx.send(PresenceChange { record }).ok();

        tracing::debug!(user_id = %user_id, "User offline");
    }

    /// Whether a user is currently online. Unknown users are offline.
    #[must_use]
    pub fn is_online(&self, user_id: UserId) -> bool {
        self.records.get(&user_id).is_some_and(|r| r.is_online)
    }

    /// When a user was last seen. Unknown users report the Unix epoch.
    #[must_use]
    pub fn last_seen(&self, user_id: UserId) -> DateTime<Utc> {
        self.records
            .get(&user_id)
            .map_or(DateTime::UNIX_EPOCH, |r| r.last_seen_at)
    }

    /// Full record for a user, defaulting to offline-at-epoch
    #[must_use]
    pub fn record(&self, user_id: UserId) -> PresenceRecord {
        self.records
            .get(&user_id)
            .map_or_else(|| PresenceRecord::unknown(user_id), |r| *r)
    }

    /// Subscribe to presence transitions
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceChange> {
        self.changes_tx.subscribe()
    }

    /// Drop all records (logout teardown)
    pub fn clear(&self) {
        self.records.clear();
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PresenceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceTracker")
            .field("records", &self.records.len())
            .finish()
    }
}
