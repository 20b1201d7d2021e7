//! Transport channel state machine
//!
//! Owns the connection lifecycle: connect, pump, reconnect with backoff
//! on unexpected close, terminal close on shutdown or exhausted retries.

use super::{Backoff, ConnectError, ConnectedPair, Connector};
use crate::error::RealtimeError;
use dm_common::ReconnectConfig;
use dm_core::{ClientEvent, ServerEvent};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;

/// Buffer for outbound client events while the channel is reconnecting
const OUTBOUND_BUFFER_SIZE: usize = 100;

/// Buffer for the fan-out of transport events to subscribers
const EVENT_BUFFER_SIZE: usize = 256;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Attempting to (re)connect
    Connecting,
    /// Connected and pumping events
    Open,
    /// Closed for good: shutdown, auth rejection or exhausted retries
    Closed,
}

/// Events surfaced to transport subscribers
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection (re)established; room membership must re-join now
    Open,
    /// Connection lost; `will_retry` is false on terminal close
    Closed { will_retry: bool },
    /// A server event arrived
    Event(ServerEvent),
}

/// Handle to the persistent bidirectional connection.
///
/// Created on login, torn down on logout. Injected into the presence,
/// typing, room and delivery components rather than imported globally.
pub struct TransportChannel {
    outbound_tx: mpsc::Sender<ClientEvent>,
    events_tx: broadcast::Sender<TransportEvent>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    subscribed: Arc<Notify>,
    task: JoinHandle<()>,
}

impl TransportChannel {
    /// Connect to the gateway and start the pump task.
    ///
    /// The first attempt is made inline: an invalid token fails with
    /// [`RealtimeError::Auth`], an unreachable server with
    /// [`RealtimeError::Network`]. Backoff applies only to reconnects
    /// after an unexpected close.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        auth_token: impl Into<String>,
        reconnect: ReconnectConfig,
    ) -> Result<Self, RealtimeError> {
        let auth_token = auth_token.into();

        let pair = connector.connect(&auth_token).await.map_err(|e| match e {
            ConnectError::Auth(msg) => RealtimeError::Auth(msg),
            ConnectError::Network(msg) => RealtimeError::Network(msg),
        })?;

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER_SIZE);
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Open);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let subscribed = Arc::new(Notify::new());

        let task = tokio::spawn(run(
            pair,
            connector,
            auth_token,
            reconnect,
            outbound_rx,
            events_tx.clone(),
            state_tx,
            shutdown_rx,
            subscribed.clone(),
        ));

        Ok(Self {
            outbound_tx,
            events_tx,
            state_rx,
            shutdown_tx,
            subscribed,
            task,
        })
    }

    /// Subscribe to transport events.
    ///
    /// The pump holds the initial [`TransportEvent::Open`] until the first
    /// subscriber exists, so attaching after `connect` returns cannot miss
    /// it.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        let receiver = self.events_tx.subscribe();
        self.subscribed.notify_one();
        receiver
    }

    /// Send a one-way client event.
    ///
    /// Events sent while the channel is reconnecting are buffered and
    /// flushed once the connection is back.
    pub async fn send(&self, event: ClientEvent) -> Result<(), RealtimeError> {
        self.outbound_tx
            .send(event)
            .await
            .map_err(|_| RealtimeError::ChannelClosed)
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Whether the connection is currently open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Close the channel for good (logout). No reconnect is attempted.
    pub fn shutdown(&self) {
        self.shutdown_tx.send(true).ok();
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        self.shutdown_tx.send(true).ok();
        self.task.abort();
    }
}

/// Why the pump loop stopped
#[derive(Debug, PartialEq, Eq)]
enum Disconnect {
    /// Connection lost unexpectedly; reconnect with backoff
    Lost,
    /// Explicit shutdown; terminal
    Shutdown,
}

#[allow(clippy::too_many_arguments)]
async fn run(
    mut pair: ConnectedPair,
    connector: Arc<dyn Connector>,
    auth_token: String,
    reconnect: ReconnectConfig,
    mut outbound_rx: mpsc::Receiver<ClientEvent>,
    events_tx: broadcast::Sender<TransportEvent>,
    state_tx: watch::Sender<ConnectionState>,
    mut shutdown_rx: watch::Receiver<bool>,
    subscribed: Arc<Notify>,
) {
    let mut backoff = Backoff::new(reconnect);

    // Hold the first Open until someone is listening; a subscriber
    // attached right after connect() returns must not miss it.
    loop {
        tokio::select! {
            () = subscribed.notified() => break,
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    close_terminal(&state_tx, &events_tx);
                    return;
                }
            }
        }
    }

    loop {
        state_tx.send(ConnectionState::Open).ok();
        events_tx.send(TransportEvent::Open).ok();
        backoff.reset();

        let reason = pump(&mut pair, &mut outbound_rx, &events_tx, &mut shutdown_rx).await;

        if reason == Disconnect::Shutdown {
            tracing::info!("Transport channel shut down");
            close_terminal(&state_tx, &events_tx);
            return;
        }

        tracing::warn!("Transport connection lost, reconnecting");
        state_tx.send(ConnectionState::Connecting).ok();
        events_tx.send(TransportEvent::Closed { will_retry: true }).ok();

        match reconnect_loop(&connector, &auth_token, &mut backoff, &mut shutdown_rx).await {
            Some(new_pair) => pair = new_pair,
            None => {
                close_terminal(&state_tx, &events_tx);
                return;
            }
        }
    }
}

fn close_terminal(
    state_tx: &watch::Sender<ConnectionState>,
    events_tx: &broadcast::Sender<TransportEvent>,
) {
    state_tx.send(ConnectionState::Closed).ok();
    events_tx
        .send(TransportEvent::Closed { will_retry: false })
        .ok();
}

/// Pump events in both directions until the connection dies or a
/// shutdown is requested.
async fn pump(
    pair: &mut ConnectedPair,
    outbound_rx: &mut mpsc::Receiver<ClientEvent>,
    events_tx: &broadcast::Sender<TransportEvent>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Disconnect {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return Disconnect::Shutdown;
                }
            }
            outbound = outbound_rx.recv() => match outbound {
                Some(event) => {
                    tracing::trace!(event = event.name(), "Sending client event");
                    if pair.outbound.send(event).await.is_err() {
                        return Disconnect::Lost;
                    }
                }
                // All handles dropped
                None => return Disconnect::Shutdown,
            },
            inbound = pair.inbound.recv() => match inbound {
                Some(event) => {
                    tracing::trace!(event = event.name(), "Received server event");
                    events_tx.send(TransportEvent::Event(event)).ok();
                }
                None => return Disconnect::Lost,
            },
        }
    }
}

/// Retry the connection with exponential backoff.
///
/// Returns `None` when retries are exhausted, the token is rejected, or
/// a shutdown arrives mid-backoff.
async fn reconnect_loop(
    connector: &Arc<dyn Connector>,
    auth_token: &str,
    backoff: &mut Backoff,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Option<ConnectedPair> {
    loop {
        let delay = match backoff.next_delay() {
            Some(delay) => delay,
            None => {
                tracing::warn!(
                    attempts = backoff.attempts(),
                    "Reconnect attempts exhausted"
                );
                return None;
            }
        };

        tracing::debug!(delay_ms = delay.as_millis(), "Waiting before reconnect");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return None;
                }
            }
        }

        match connector.connect(auth_token).await {
            Ok(pair) => {
                tracing::info!(attempt = backoff.attempts(), "Reconnected");
                return Some(pair);
            }
            Err(ConnectError::Auth(msg)) => {
                tracing::error!(error = %msg, "Token rejected during reconnect");
                return None;
            }
            Err(ConnectError::Network(msg)) => {
                tracing::debug!(error = %msg, "Reconnect attempt failed");
            }
        }
    }
}
