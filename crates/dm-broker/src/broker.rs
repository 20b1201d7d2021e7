//! Connection registry and room-scoped fan-out
//!
//! Tracks live connections per user, conversation room membership per
//! connection, and delivers server events with room scoping: typing, new
//! messages and seen updates reach only the members of the event's room,
//! never the sender's own connections. Presence transitions fire on the
//! first connection of a user and the departure of their last one, so a
//! second device never flaps the indicator.

use dashmap::DashMap;
use dm_core::{ClientEvent, ConversationId, ServerEvent, UserId};
use std::collections::HashSet;
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifies one live connection; a user may hold several
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Broker-side errors
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Unknown or revoked token")]
    UnknownToken,

    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),
}

struct ConnectionHandle {
    user_id: UserId,
    sender: mpsc::Sender<ServerEvent>,
}

/// In-process realtime broker
pub struct Broker {
    connections: DashMap<ConnectionId, ConnectionHandle>,
    user_connections: DashMap<UserId, HashSet<ConnectionId>>,
    rooms: DashMap<ConversationId, HashSet<ConnectionId>>,
    tokens: DashMap<String, UserId>,
}

impl Broker {
    /// Create an empty broker
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            user_connections: DashMap::new(),
            rooms: DashMap::new(),
            tokens: DashMap::new(),
        }
    }

    // --- auth ----------------------------------------------------------

    /// Accept a token for a user
    pub fn authorize(&self, token: impl Into<String>, user_id: UserId) {
        self.tokens.insert(token.into(), user_id);
    }

    /// Revoke a token; later connects with it fail as auth errors
    pub fn revoke(&self, token: &str) {
        self.tokens.remove(token);
    }

    /// Resolve a token to its user
    pub fn resolve_token(&self, token: &str) -> Result<UserId, BrokerError> {
        self.tokens
            .get(token)
            .map(|entry| *entry.value())
            .ok_or(BrokerError::UnknownToken)
    }

    // --- connection lifecycle --------------------------------------------

    /// Register a live connection for a user.
    ///
    /// The user's first connection announces `user_online` to everyone
    /// else; additional devices register silently.
    pub async fn register(
        &self,
        user_id: UserId,
        sender: mpsc::Sender<ServerEvent>,
    ) -> ConnectionId {
        let connection_id = ConnectionId::new();
        self.connections
            .insert(connection_id, ConnectionHandle { user_id, sender });

        let first_of_user = {
            let mut set = self.user_connections.entry(user_id).or_default();
            set.insert(connection_id);
            set.len() == 1
        };

        tracing::info!(
            user_id = %user_id,
            connection_id = %connection_id,
            "Connection registered"
        );

        if first_of_user {
            self.broadcast_presence(ServerEvent::UserOnline { user_id }, user_id)
                .await;
        }
        connection_id
    }

    /// Remove a connection, leaving all of its rooms.
    ///
    /// The departure of a user's last connection announces
    /// `user_offline`. Unknown ids are ignored, so racing teardown paths
    /// are safe.
    pub async fn unregister(&self, connection_id: ConnectionId) {
        let Some((_, handle)) = self.connections.remove(&connection_id) else {
            return;
        };
        let user_id = handle.user_id;

        // Drop the connection from every room, GC-ing emptied ones
        self.rooms.retain(|_, members| {
            members.remove(&connection_id);
            !members.is_empty()
        });

        let last_of_user = self
            .user_connections
            .remove_if_mut(&user_id, |_, set| {
                set.remove(&connection_id);
                set.is_empty()
            })
            .is_some();

        tracing::info!(
            user_id = %user_id,
            connection_id = %connection_id,
            "Connection unregistered"
        );

        if last_of_user {
            self.broadcast_presence(ServerEvent::UserOffline { user_id }, user_id)
                .await;
        }
    }

    /// Forcibly drop all of a user's connections (test plumbing for
    /// simulating a network loss; the client sees its stream end)
    pub async fn kill_user(&self, user_id: UserId) {
        let ids: Vec<ConnectionId> = self
            .user_connections
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for connection_id in ids {
            self.unregister(connection_id).await;
        }
    }

    /// Number of live connections for a user
    #[must_use]
    pub fn connection_count(&self, user_id: UserId) -> usize {
        self.user_connections
            .get(&user_id)
            .map_or(0, |set| set.len())
    }

    /// Number of connections joined to a room
    #[must_use]
    pub fn room_size(&self, conversation_id: ConversationId) -> usize {
        self.rooms
            .get(&conversation_id)
            .map_or(0, |members| members.len())
    }

    // --- event routing ---------------------------------------------------

    /// Route one client event from a connection
    pub async fn handle_event(
        &self,
        connection_id: ConnectionId,
        event: ClientEvent,
    ) -> Result<(), BrokerError> {
        let user_id = self
            .connections
            .get(&connection_id)
            .map(|handle| handle.user_id)
            .ok_or(BrokerError::UnknownConnection(connection_id))?;

        tracing::trace!(
            user_id = %user_id,
            connection_id = %connection_id,
            event = event.name(),
            "Routing client event"
        );

        match event {
            ClientEvent::JoinConversation { conversation_id } => {
                self.rooms
                    .entry(conversation_id)
                    .or_default()
                    .insert(connection_id);
            }
            ClientEvent::LeaveConversation { conversation_id } => {
                self.rooms.remove_if_mut(&conversation_id, |_, members| {
                    members.remove(&connection_id);
                    members.is_empty()
                });
            }
            ClientEvent::Typing {
                conversation_id,
                is_typing,
            } => {
                self.broadcast_room(
                    conversation_id,
                    user_id,
                    ServerEvent::Typing {
                        user_id,
                        conversation_id,
                        is_typing,
                    },
                )
                .await;
            }
            ClientEvent::MessageNew { message } => {
                let conversation_id = message.conversation_id;
                self.broadcast_room(conversation_id, user_id, ServerEvent::MessageNew { message })
                    .await;
            }
            ClientEvent::MessageSeen {
                message_id,
                conversation_id,
                seen_by,
            } => {
                self.broadcast_room(
                    conversation_id,
                    user_id,
                    ServerEvent::MessageSeen {
                        message_id,
                        conversation_id,
                        seen_by,
                    },
                )
                .await;
            }
        }
        Ok(())
    }

    /// Deliver an event to every room member except the sending user.
    ///
    /// Deliveries are independent and unordered across recipients; a
    /// full or closed receiver only loses its own copy.
    async fn broadcast_room(
        &self,
        conversation_id: ConversationId,
        sender: UserId,
        event: ServerEvent,
    ) {
        let members: Vec<ConnectionId> = self
            .rooms
            .get(&conversation_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        for connection_id in members {
            let target = self
                .connections
                .get(&connection_id)
                .map(|h| (h.user_id, h.sender.clone()));
            let Some((user_id, sender_handle)) = target else {
                continue;
            };
            if user_id == sender {
                continue;
            }
            if sender_handle.send(event.clone()).await.is_err() {
                tracing::debug!(
                    connection_id = %connection_id,
                    "Dropping event for dead connection"
                );
            }
        }
    }

    /// Deliver a presence transition to every connection of other users
    async fn broadcast_presence(&self, event: ServerEvent, about: UserId) {
        let targets: Vec<mpsc::Sender<ServerEvent>> = self
            .connections
            .iter()
            .filter(|entry| entry.user_id != about)
            .map(|entry| entry.sender.clone())
            .collect();

        tracing::debug!(
            user_id = %about,
            event = event.name(),
            recipients = targets.len(),
            "Broadcasting presence"
        );

        for sender in targets {
            sender.send(event.clone()).await.ok();
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("connections", &self.connections.len())
            .field("users", &self.user_connections.len())
            .field("rooms", &self.rooms.len())
            .finish()
    }
}
