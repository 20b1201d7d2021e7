//! Domain layer for the direct-messaging realtime subsystem.
//!
//! Pure types: identifiers, entities, the wire-event vocabulary and
//! domain errors. No I/O lives here.

pub mod entities;
pub mod error;
pub mod events;
pub mod value_objects;

pub use entities::{
    Conversation, DeliveryState, Message, MessageKind, PresenceRecord, TypingState,
    MAX_MEDIA_DURATION_SECS, TYPING_QUIET_PERIOD_MS,
};
pub use error::DomainError;
pub use events::{ClientEvent, ServerEvent};
pub use value_objects::{ConversationId, IdParseError, MessageId, UserId};
