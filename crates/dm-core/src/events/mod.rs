//! Wire-event vocabulary
//!
//! The complete, enumerated set of events exchanged over the transport,
//! one enum per direction. Internally tagged JSON keeps the wire format
//! self-describing while the contract stays checkable at compile time.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::entities::Message;
use crate::value_objects::{ConversationId, MessageId, UserId};

/// Events a client sends to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Subscribe this connection to a conversation's room
    JoinConversation { conversation_id: ConversationId },
    /// Unsubscribe this connection from a conversation's room
    LeaveConversation { conversation_id: ConversationId },
    /// Composing indicator, start or stop
    Typing {
        conversation_id: ConversationId,
        is_typing: bool,
    },
    /// A persisted message, to be fanned out to room peers
    MessageNew { message: Message },
    /// Read receipt for one message
    MessageSeen {
        message_id: MessageId,
        conversation_id: ConversationId,
        seen_by: HashSet<UserId>,
    },
}

/// Events the server pushes to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A peer's composing indicator changed
    Typing {
        user_id: UserId,
        conversation_id: ConversationId,
        is_typing: bool,
    },
    /// A peer sent a message in a joined conversation
    MessageNew { message: Message },
    /// A peer saw a message in a joined conversation
    MessageSeen {
        message_id: MessageId,
        conversation_id: ConversationId,
        seen_by: HashSet<UserId>,
    },
    /// A user connected
    UserOnline { user_id: UserId },
    /// A user disconnected
    UserOffline { user_id: UserId },
}

impl ClientEvent {
    /// Event type name as it appears on the wire
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JoinConversation { .. } => "join_conversation",
            Self::LeaveConversation { .. } => "leave_conversation",
            Self::Typing { .. } => "typing",
            Self::MessageNew { .. } => "message_new",
            Self::MessageSeen { .. } => "message_seen",
        }
    }
}

impl ServerEvent {
    /// Event type name as it appears on the wire
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Typing { .. } => "typing",
            Self::MessageNew { .. } => "message_new",
            Self::MessageSeen { .. } => "message_seen",
            Self::UserOnline { .. } => "user_online",
            Self::UserOffline { .. } => "user_offline",
        }
    }

    /// The conversation this event is scoped to, if any.
    ///
    /// Presence events are user-scoped, not room-scoped.
    #[must_use]
    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            Self::Typing {
                conversation_id, ..
            }
            | Self::MessageSeen {
                conversation_id, ..
            } => Some(*conversation_id),
            Self::MessageNew { message } => Some(message.conversation_id),
            Self::UserOnline { .. } | Self::UserOffline { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::MessageKind;

    #[test]
    fn test_client_event_tag() {
        let event = ClientEvent::JoinConversation {
            conversation_id: ConversationId::random(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "join_conversation");
    }

    #[test]
    fn test_typing_event_roundtrip() {
        let event = ServerEvent::Typing {
            user_id: UserId::random(),
            conversation_id: ConversationId::random(),
            is_typing: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_message_new_carries_conversation() {
        let message = Message::outbound(
            ConversationId::random(),
            UserId::random(),
            MessageKind::Text,
            "hello".to_string(),
            None,
        );
        let conversation_id = message.conversation_id;
        let event = ServerEvent::MessageNew { message };
        assert_eq!(event.conversation_id(), Some(conversation_id));
        assert_eq!(event.name(), "message_new");
    }

    #[test]
    fn test_presence_events_not_room_scoped() {
        let event = ServerEvent::UserOnline {
            user_id: UserId::random(),
        };
        assert_eq!(event.conversation_id(), None);
    }

    #[test]
    fn test_unknown_event_rejected() {
        let result: Result<ServerEvent, _> =
            serde_json::from_str(r#"{"type":"message_edit","message_id":"x"}"#);
        assert!(result.is_err());
    }
}
