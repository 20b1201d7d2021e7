//! WebSocket connector
//!
//! Production [`Connector`] over tokio-tungstenite. Events are JSON text
//! frames; the auth token rides as a query parameter on the handshake.

use super::{ConnectError, ConnectedPair, Connector};
use async_trait::async_trait;
use dm_core::{ClientEvent, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

/// Per-direction buffer between the channel pump and the socket tasks
const SOCKET_BUFFER_SIZE: usize = 100;

/// Connects to the WebSocket gateway
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Create a connector for the given gateway URL
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, auth_token: &str) -> Result<ConnectedPair, ConnectError> {
        let url = format!("{}?token={}", self.url, auth_token);

        let (socket, _response) = connect_async(&url).await.map_err(|e| match e {
            tungstenite::Error::Http(response)
                if response.status() == 401 || response.status() == 403 =>
            {
                ConnectError::Auth(format!("handshake rejected: {}", response.status()))
            }
            other => ConnectError::Network(other.to_string()),
        })?;

        tracing::info!("WebSocket connection established");

        let (mut ws_sink, mut ws_stream) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientEvent>(SOCKET_BUFFER_SIZE);
        let (inbound_tx, inbound_rx) = mpsc::channel::<ServerEvent>(SOCKET_BUFFER_SIZE);

        // Writer: serialize client events onto the socket
        tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to serialize client event");
                        continue;
                    }
                };
                if ws_sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            ws_sink.close().await.ok();
        });

        // Reader: deserialize server events off the socket
        tokio::spawn(async move {
            while let Some(frame) = ws_stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if inbound_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "Ignoring unparseable frame");
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("Server closed the WebSocket");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "WebSocket read error");
                        break;
                    }
                }
            }
            // Dropping inbound_tx signals the pump that the connection is gone
        });

        Ok(ConnectedPair {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
