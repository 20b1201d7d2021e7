//! Typing state - per (user, conversation) composing indicator

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{ConversationId, UserId};

/// Quiet period after which a typing indicator self-heals, in milliseconds
pub const TYPING_QUIET_PERIOD_MS: u64 = 3000;

/// A live typing indicator for one user in one conversation
///
/// Unique per (user, conversation): a fresh keystroke signal replaces the
/// state rather than appending. `expires_at` is the local self-healing
/// fallback for a dropped stop event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingState {
    pub user_id: UserId,
    pub conversation_id: ConversationId,
    pub expires_at: DateTime<Utc>,
}

impl TypingState {
    /// Start or refresh a typing indicator expiring after the quiet period
    #[must_use]
    pub fn begin(user_id: UserId, conversation_id: ConversationId) -> Self {
        Self {
            user_id,
            conversation_id,
            expires_at: Utc::now() + Duration::milliseconds(TYPING_QUIET_PERIOD_MS as i64),
        }
    }

    /// Whether the quiet period has elapsed without renewal
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state_not_expired() {
        let state = TypingState::begin(UserId::random(), ConversationId::random());
        assert!(!state.is_expired(Utc::now()));
    }

    #[test]
    fn test_expires_after_quiet_period() {
        let state = TypingState::begin(UserId::random(), ConversationId::random());
        let later = Utc::now() + Duration::milliseconds(TYPING_QUIET_PERIOD_MS as i64 + 100);
        assert!(state.is_expired(later));
    }
}
