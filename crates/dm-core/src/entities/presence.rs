//! Presence record - online/offline status per user

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// Online status of a single user
///
/// `is_online` transitions only through explicit connect/disconnect
/// events; typing activity never implies presence. An unknown user is
/// reported as offline with `last_seen_at` at the Unix epoch, which
/// under-claims presence rather than over-claiming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub is_online: bool,
    pub last_seen_at: DateTime<Utc>,
}

impl PresenceRecord {
    /// Record for a user that just came online
    #[must_use]
    pub fn online(user_id: UserId) -> Self {
        Self {
            user_id,
            is_online: true,
            last_seen_at: Utc::now(),
        }
    }

    /// Record for a user that just went offline, stamping last-seen
    #[must_use]
    pub fn offline(user_id: UserId) -> Self {
        Self {
            user_id,
            is_online: false,
            last_seen_at: Utc::now(),
        }
    }

    /// The default for a user never observed: offline since the epoch
    #[must_use]
    pub fn unknown(user_id: UserId) -> Self {
        Self {
            user_id,
            is_online: false,
            last_seen_at: DateTime::UNIX_EPOCH,
        }
    }
}
