//! Realtime direct-messaging client
//!
//! Presence, typing indicators, read receipts and message delivery over
//! one persistent transport connection, with optimistic local state that
//! converges on server truth through merge-by-key upserts.
//!
//! The entry point is [`RealtimeClient`], created on login with a
//! [`transport::Connector`] and a [`api::ConversationApi`]; everything
//! else hangs off it.

pub mod api;
pub mod client;
pub mod delivery;
pub mod error;
pub mod presence;
pub mod receipts;
pub mod rooms;
pub mod store;
pub mod transport;
pub mod typing;

pub use api::{ConversationApi, MediaUpload, MediaUploader, RestApi, SendMessageRequest};
pub use client::RealtimeClient;
pub use delivery::DeliveryPipeline;
pub use error::RealtimeError;
pub use presence::{PresenceChange, PresenceTracker};
pub use receipts::ReadReceiptReconciler;
pub use rooms::RoomMembership;
pub use store::{MessageStore, StoreEvent};
pub use transport::{
    Backoff, ConnectError, ConnectedPair, ConnectionState, Connector, EventSink,
    TransportChannel, TransportEvent, WsConnector,
};
pub use typing::{TypingChange, TypingPublisher, TypingTracker};
