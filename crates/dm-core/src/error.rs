//! Domain errors

use thiserror::Error;

use crate::entities::MAX_MEDIA_DURATION_SECS;
use crate::value_objects::{ConversationId, MessageId};

/// Domain layer errors
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("Not a participant of conversation {0}")]
    NotAParticipant(ConversationId),

    #[error("Message content is empty")]
    EmptyContent,

    #[error("Media duration {got}s exceeds the {MAX_MEDIA_DURATION_SECS}s limit")]
    MediaTooLong { got: u32 },

    #[error("Message {0} is not in a retryable state")]
    NotRetryable(MessageId),
}

impl DomainError {
    /// Check if this is a validation error (rejected before any network call)
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::EmptyContent | Self::MediaTooLong { .. })
    }
}
