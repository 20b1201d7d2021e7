//! In-process connector
//!
//! Bridges a [`dm_client`] transport to a shared [`Broker`] over plain
//! channels, standing in for the WebSocket gateway. Scenario tests drive
//! several clients against one broker with real reconnect, room and
//! fan-out semantics and no sockets.

use crate::broker::Broker;
use async_trait::async_trait;
use dm_client::transport::{ConnectError, ConnectedPair, Connector};
use dm_core::{ClientEvent, ServerEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Per-direction buffer between a client and the broker
const PIPE_BUFFER_SIZE: usize = 64;

/// Connects clients to an in-process [`Broker`]
pub struct BrokerConnector {
    broker: Arc<Broker>,
    /// When set, connect attempts fail as network errors
    unreachable: AtomicBool,
}

impl BrokerConnector {
    /// Create a connector against the given broker
    #[must_use]
    pub fn new(broker: Arc<Broker>) -> Self {
        Self {
            broker,
            unreachable: AtomicBool::new(false),
        }
    }

    /// Simulate the broker being unreachable (or reachable again)
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for BrokerConnector {
    async fn connect(&self, auth_token: &str) -> Result<ConnectedPair, ConnectError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ConnectError::Network("broker unreachable".into()));
        }

        let user_id = self
            .broker
            .resolve_token(auth_token)
            .map_err(|e| ConnectError::Auth(e.to_string()))?;

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientEvent>(PIPE_BUFFER_SIZE);
        let (inbound_tx, inbound_rx) = mpsc::channel::<ServerEvent>(PIPE_BUFFER_SIZE);

        let connection_id = self.broker.register(user_id, inbound_tx).await;

        // Drain the client's outbound events into the broker until the
        // client drops its side, then tear the connection down
        let broker = Arc::clone(&self.broker);
        tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                if broker.handle_event(connection_id, event).await.is_err() {
                    break;
                }
            }
            broker.unregister(connection_id).await;
        });

        Ok(ConnectedPair {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
