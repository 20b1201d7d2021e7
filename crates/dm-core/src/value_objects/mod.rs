//! Value objects

mod ids;

pub use ids::{ConversationId, IdParseError, MessageId, UserId};
