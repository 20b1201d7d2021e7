//! Conversation entity

use serde::{Deserialize, Serialize};

use crate::value_objects::{ConversationId, UserId};

/// A direct conversation between participants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: Vec<UserId>,
    /// Whether the recipient has accepted the conversation request
    #[serde(default)]
    pub accepted: bool,
}

impl Conversation {
    /// Create a new conversation
    #[must_use]
    pub fn new(id: ConversationId, participants: Vec<UserId>) -> Self {
        Self {
            id,
            participants,
            accepted: false,
        }
    }

    /// Check whether a user participates in this conversation
    #[must_use]
    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }

    /// The other participant in a two-party conversation
    #[must_use]
    pub fn peer_of(&self, user_id: UserId) -> Option<UserId> {
        self.participants.iter().copied().find(|p| *p != user_id)
    }
}
