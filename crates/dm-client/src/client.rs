//! Realtime client facade
//!
//! Wires the transport, presence, typing, rooms, store, reconciler and
//! delivery pipeline together behind one handle created on login and torn
//! down on logout. A single router task drains transport events into the
//! component that owns each one; components never subscribe to the
//! transport themselves.

use crate::api::ConversationApi;
use crate::delivery::DeliveryPipeline;
use crate::error::RealtimeError;
use crate::presence::{PresenceChange, PresenceTracker};
use crate::receipts::ReadReceiptReconciler;
use crate::rooms::RoomMembership;
use crate::store::{MessageStore, StoreEvent};
use crate::transport::{Connector, TransportChannel, TransportEvent};
use crate::typing::{TypingChange, TypingPublisher, TypingTracker};
use dm_common::RealtimeConfig;
use dm_core::{
    Conversation, ConversationId, Message, MessageId, MessageKind, PresenceRecord, ServerEvent,
    UserId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// One logged-in user's realtime messaging session
pub struct RealtimeClient {
    user_id: UserId,
    api: Arc<dyn ConversationApi>,
    transport: Arc<TransportChannel>,
    presence: Arc<PresenceTracker>,
    typing_publisher: Arc<TypingPublisher>,
    typing_tracker: Arc<TypingTracker>,
    rooms: Arc<RoomMembership>,
    store: Arc<MessageStore>,
    reconciler: Arc<ReadReceiptReconciler>,
    pipeline: Arc<DeliveryPipeline>,
    router: JoinHandle<()>,
}

impl RealtimeClient {
    /// Log in: connect the transport and start routing events.
    ///
    /// Fails fast on a rejected token or an unreachable gateway; after a
    /// successful login, reconnects are handled internally.
    pub async fn connect(
        config: &RealtimeConfig,
        user_id: UserId,
        auth_token: impl Into<String>,
        connector: Arc<dyn Connector>,
        api: Arc<dyn ConversationApi>,
    ) -> Result<Self, RealtimeError> {
        let transport =
            Arc::new(TransportChannel::connect(connector, auth_token, config.reconnect).await?);

        let quiet_period = Duration::from_millis(config.typing_quiet_ms);
        let presence = Arc::new(PresenceTracker::new());
        let typing_publisher = Arc::new(TypingPublisher::new(transport.clone(), quiet_period));
        let typing_tracker = Arc::new(TypingTracker::new(quiet_period));
        let rooms = Arc::new(RoomMembership::new(transport.clone()));
        let store = Arc::new(MessageStore::new());
        let reconciler = Arc::new(ReadReceiptReconciler::new(
            user_id,
            api.clone(),
            transport.clone(),
            store.clone(),
            config.seen_batch_max,
        ));
        let pipeline = Arc::new(DeliveryPipeline::new(
            user_id,
            api.clone(),
            transport.clone(),
            store.clone(),
            typing_publisher.clone(),
            reconciler.clone(),
            rooms.clone(),
        ));

        let router = tokio::spawn(route_events(
            transport.subscribe(),
            presence.clone(),
            typing_tracker.clone(),
            rooms.clone(),
            reconciler.clone(),
            pipeline.clone(),
        ));

        tracing::info!(user_id = %user_id, "Realtime client connected");

        Ok(Self {
            user_id,
            api,
            transport,
            presence,
            typing_publisher,
            typing_tracker,
            rooms,
            store,
            reconciler,
            pipeline,
            router,
        })
    }

    /// The logged-in user
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Whether the transport is currently open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    // --- conversations -----------------------------------------------------

    /// Open a view onto a conversation: join its room and mark it visible
    pub async fn open_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), RealtimeError> {
        self.rooms.join(conversation_id).await?;
        self.pipeline.set_visible(conversation_id, true);
        Ok(())
    }

    /// Close a view: hide it and drop this view's room interest
    pub async fn close_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), RealtimeError> {
        self.pipeline.set_visible(conversation_id, false);
        self.rooms.leave(conversation_id).await
    }

    /// Join a conversation room without a visible view (background sync)
    pub async fn join_room(&self, conversation_id: ConversationId) -> Result<(), RealtimeError> {
        self.rooms.join(conversation_id).await
    }

    /// Leave a conversation room
    pub async fn leave_room(&self, conversation_id: ConversationId) -> Result<(), RealtimeError> {
        self.rooms.leave(conversation_id).await
    }

    // --- messaging ---------------------------------------------------------

    /// Send a message (optimistic insert, then persist and announce)
    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        kind: MessageKind,
        content: String,
        duration: Option<u32>,
    ) -> Result<Message, RealtimeError> {
        self.pipeline
            .send(conversation_id, kind, content, duration)
            .await
    }

    /// Retry a failed message as a fresh attempt
    pub async fn retry_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<Message, RealtimeError> {
        self.pipeline.retry(conversation_id, message_id).await
    }

    /// Discard a failed message the user chose not to retry
    pub fn discard_message(&self, conversation_id: ConversationId, message_id: MessageId) {
        self.pipeline.discard(conversation_id, message_id);
    }

    /// Upload media and send the resulting URL in one step
    pub async fn send_media(
        &self,
        conversation_id: ConversationId,
        kind: MessageKind,
        uploader: &dyn crate::api::MediaUploader,
        bytes: Vec<u8>,
    ) -> Result<Message, RealtimeError> {
        self.pipeline
            .send_media(conversation_id, kind, uploader, bytes)
            .await
    }

    /// Messages of a conversation in chronological order
    #[must_use]
    pub fn messages(&self, conversation_id: ConversationId) -> Vec<Message> {
        self.store.messages(conversation_id)
    }

    /// Fetch the user's conversations from the persistence API
    pub async fn sync_conversations(&self) -> Result<Vec<Conversation>, RealtimeError> {
        self.api.fetch_conversations().await
    }

    /// Fetch persisted history and merge it into the store.
    ///
    /// Merges are keyed upserts, so a resync after missed broadcasts
    /// converges instead of duplicating. A visible conversation gets its
    /// freshly landed backlog handed to the read-receipt reconciler.
    pub async fn sync_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, RealtimeError> {
        let history = self.api.fetch_messages(conversation_id).await?;
        for message in history {
            self.store.upsert(message);
        }
        if self.pipeline.is_visible(conversation_id) {
            self.reconciler.observe_conversation(conversation_id);
        }
        Ok(self.store.messages(conversation_id))
    }

    /// Subscribe to message store changes
    pub fn subscribe_messages(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    // --- typing ------------------------------------------------------------

    /// Report a keystroke in a conversation
    pub async fn notify_typing(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), RealtimeError> {
        self.typing_publisher.notify_typing(conversation_id).await
    }

    /// Peers currently typing in a conversation
    #[must_use]
    pub fn typing_users(&self, conversation_id: ConversationId) -> Vec<UserId> {
        self.typing_tracker.typing_users(conversation_id)
    }

    /// Subscribe to peer typing changes
    pub fn subscribe_typing(&self) -> broadcast::Receiver<TypingChange> {
        self.typing_tracker.subscribe()
    }

    // --- presence ----------------------------------------------------------

    /// Presence record for a user (offline-at-epoch when unknown)
    #[must_use]
    pub fn presence(&self, user_id: UserId) -> PresenceRecord {
        self.presence.record(user_id)
    }

    /// Subscribe to presence transitions
    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceChange> {
        self.presence.subscribe()
    }

    // --- lifecycle ---------------------------------------------------------

    /// Log out: close the transport and drop all realtime state.
    ///
    /// No reconnect is attempted and nothing further is emitted.
    pub fn shutdown(&self) {
        tracing::info!(user_id = %self.user_id, "Realtime client shutting down");
        self.transport.shutdown();
        self.typing_publisher.cancel_all();
        self.typing_tracker.clear();
        self.rooms.clear();
        self.reconciler.clear();
        self.pipeline.clear();
        self.presence.clear();
        self.store.clear();
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.transport.shutdown();
        self.router.abort();
    }
}

/// Drain transport events into the owning components
async fn route_events(
    mut events: broadcast::Receiver<TransportEvent>,
    presence: Arc<PresenceTracker>,
    typing_tracker: Arc<TypingTracker>,
    rooms: Arc<RoomMembership>,
    reconciler: Arc<ReadReceiptReconciler>,
    pipeline: Arc<DeliveryPipeline>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Router lagged behind transport events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        match event {
            TransportEvent::Open => {
                // The server forgot this connection's rooms
                if let Err(e) = rooms.rejoin_all().await {
                    tracing::warn!(error = %e, "Room re-join after reconnect failed");
                }
            }
            TransportEvent::Closed { will_retry: true } => {
                tracing::debug!("Transport lost, awaiting reconnect");
            }
            TransportEvent::Closed { will_retry: false } => {
                tracing::info!("Transport closed, router stopping");
                return;
            }
            TransportEvent::Event(server_event) => {
                dispatch(&presence, &typing_tracker, &reconciler, &pipeline, server_event);
            }
        }
    }
}

fn dispatch(
    presence: &PresenceTracker,
    typing_tracker: &TypingTracker,
    reconciler: &ReadReceiptReconciler,
    pipeline: &DeliveryPipeline,
    event: ServerEvent,
) {
    match event {
        ServerEvent::Typing {
            user_id,
            conversation_id,
            is_typing,
        } => typing_tracker.apply(user_id, conversation_id, is_typing),
        ServerEvent::MessageNew { message } => pipeline.receive(message),
        ServerEvent::MessageSeen {
            message_id,
            conversation_id,
            seen_by,
        } => reconciler.apply_remote(conversation_id, message_id, seen_by),
        ServerEvent::UserOnline { user_id } => presence.set_online(user_id),
        ServerEvent::UserOffline { user_id } => presence.set_offline(user_id),
    }
}
