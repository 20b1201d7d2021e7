//! Message entity - a single direct message and its delivery state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::value_objects::{ConversationId, MessageId, UserId};

/// Media duration cap for audio/video messages, in seconds
pub const MAX_MEDIA_DURATION_SECS: u32 = 60;

/// Kind of message payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
}

impl MessageKind {
    /// Whether this kind carries a playable duration
    #[must_use]
    pub fn has_duration(self) -> bool {
        matches!(self, Self::Video | Self::Audio)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// Delivery state of an outbound message
///
/// `Sent` is terminal for content; only `seen_by` keeps growing after it.
/// `Failed` is terminal for the attempt; a retry is a new message with a
/// new placeholder id, never a mutation of the failed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Optimistic local insert, waiting for the server ack
    Sending,
    /// Acked by the server under its assigned id
    #[default]
    Sent,
    /// Send attempt failed; retryable by explicit user action only
    Failed,
}

/// A direct message
///
/// Created either by an optimistic local insert (placeholder id, state
/// `Sending`) or from a server payload (server id, state `Sent`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    /// Playback duration in seconds, for audio/video only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    pub created_at: DateTime<Utc>,
    /// Users who have seen this message; never includes the sender
    #[serde(default)]
    pub seen_by: HashSet<UserId>,
    /// Local delivery state; not part of the wire format
    #[serde(default, skip_serializing)]
    pub delivery: DeliveryState,
}

impl Message {
    /// Create an optimistic outbound message with a fresh placeholder id
    #[must_use]
    pub fn outbound(
        conversation_id: ConversationId,
        sender_id: UserId,
        kind: MessageKind,
        content: String,
        duration: Option<u32>,
    ) -> Self {
        Self {
            id: MessageId::placeholder(),
            conversation_id,
            sender_id,
            kind,
            content,
            duration,
            created_at: Utc::now(),
            seen_by: HashSet::new(),
            delivery: DeliveryState::Sending,
        }
    }

    /// Check whether a user has seen this message.
    ///
    /// The sender is implicitly aware of their own message and always
    /// counts as having seen it.
    #[must_use]
    pub fn is_seen_by(&self, user_id: UserId) -> bool {
        user_id == self.sender_id || self.seen_by.contains(&user_id)
    }

    /// Union viewers into `seen_by`. The sender's own id is never
    /// recorded as a viewer. Returns true if the set grew.
    pub fn mark_seen_by<I>(&mut self, viewers: I) -> bool
    where
        I: IntoIterator<Item = UserId>,
    {
        let before = self.seen_by.len();
        self.seen_by
            .extend(viewers.into_iter().filter(|v| *v != self.sender_id));
        self.seen_by.len() > before
    }

    /// Merge a newer copy of the same message into this one.
    ///
    /// Last-writer-wins on the immutable fields, union on `seen_by`, and
    /// the delivery state never regresses from `Sent`. Keyed upsert with
    /// this merge is how concurrent updates from the send pipeline, the
    /// receive pipeline and seen broadcasts compose without lost updates.
    pub fn merge_from(&mut self, other: &Message) {
        self.content.clone_from(&other.content);
        self.kind = other.kind;
        self.duration = other.duration;
        self.created_at = other.created_at;
        let other_seen = other.seen_by.iter().copied();
        self.mark_seen_by(other_seen);
        if self.delivery != DeliveryState::Sent {
            self.delivery = other.delivery;
        }
    }

    /// Check if message content is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }
}
