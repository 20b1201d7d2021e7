//! Transport channel
//!
//! One persistent bidirectional connection per authenticated user. The
//! channel owns reconnect/backoff and nothing else: it has no room
//! knowledge, and surfaces `TransportEvent::Open` on every (re)connect so
//! room membership can re-join on its own.

mod backoff;
mod channel;
mod ws;

pub use backoff::Backoff;
pub use channel::{ConnectionState, TransportChannel, TransportEvent};
pub use ws::WsConnector;

use async_trait::async_trait;
use dm_core::{ClientEvent, ServerEvent};
use tokio::sync::mpsc;

/// A live connection produced by a [`Connector`]: outbound client events
/// go into `outbound`, inbound server events come out of `inbound`.
/// The connection is considered lost when either side closes.
pub struct ConnectedPair {
    pub outbound: mpsc::Sender<ClientEvent>,
    pub inbound: mpsc::Receiver<ServerEvent>,
}

/// Errors when establishing a single connection attempt
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Token rejected; fatal, never retried
    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// Server unreachable or handshake failed; retryable
    #[error("Network failure: {0}")]
    Network(String),
}

/// Establishes one connection attempt against the gateway.
///
/// Production uses [`WsConnector`]; tests plug in an in-process broker.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, auth_token: &str) -> Result<ConnectedPair, ConnectError>;
}

/// One-way signal send into the transport.
///
/// The seam the typing, room and delivery components are injected with,
/// so each can be exercised against a captured sink in tests.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn emit(&self, event: ClientEvent) -> Result<(), crate::error::RealtimeError>;
}

#[async_trait]
impl EventSink for TransportChannel {
    async fn emit(&self, event: ClientEvent) -> Result<(), crate::error::RealtimeError> {
        self.send(event).await
    }
}
