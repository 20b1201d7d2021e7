//! Domain entities

mod conversation;
mod message;
mod presence;
mod typing;

pub use conversation::Conversation;
pub use message::{DeliveryState, Message, MessageKind, MAX_MEDIA_DURATION_SECS};
pub use presence::PresenceRecord;
pub use typing::{TypingState, TYPING_QUIET_PERIOD_MS};
