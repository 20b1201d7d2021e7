//! In-memory persistence fake
//!
//! Stands in for the REST API: assigns server ids on create, records
//! seen marks, and injects failures on demand. One backend is shared by
//! every client in a test so all of them observe the same durable state.

use async_trait::async_trait;
use dashmap::DashMap;
use dm_client::{ConversationApi, RealtimeError, SendMessageRequest};
use dm_core::{
    Conversation, ConversationId, DeliveryState, Message, MessageId, UserId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared durable state behind every test client's API handle
pub struct ApiBackend {
    messages: DashMap<ConversationId, Vec<Message>>,
    fail_create: AtomicBool,
    fail_seen: AtomicBool,
}

impl ApiBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages: DashMap::new(),
            fail_create: AtomicBool::new(false),
            fail_seen: AtomicBool::new(false),
        }
    }

    /// Make message creation fail with a network error
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make seen flushes fail with a network error
    pub fn set_fail_seen(&self, fail: bool) {
        self.fail_seen.store(fail, Ordering::SeqCst);
    }

    /// Durable copy of one message, if persisted
    #[must_use]
    pub fn message(&self, conversation_id: ConversationId, message_id: MessageId) -> Option<Message> {
        self.messages
            .get(&conversation_id)?
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
    }

    /// Number of persisted messages in a conversation
    #[must_use]
    pub fn message_count(&self, conversation_id: ConversationId) -> usize {
        self.messages
            .get(&conversation_id)
            .map_or(0, |list| list.len())
    }
}

impl Default for ApiBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-user handle onto the shared backend, as the auth token would
/// scope a real API client
pub struct InMemoryApi {
    backend: Arc<ApiBackend>,
    user_id: UserId,
}

impl InMemoryApi {
    #[must_use]
    pub fn new(backend: Arc<ApiBackend>, user_id: UserId) -> Self {
        Self { backend, user_id }
    }
}

#[async_trait]
impl ConversationApi for InMemoryApi {
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>, RealtimeError> {
        Ok(Vec::new())
    }

    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, RealtimeError> {
        Ok(self
            .backend
            .messages
            .get(&conversation_id)
            .map_or_else(Vec::new, |list| list.clone()))
    }

    async fn create_message(
        &self,
        conversation_id: ConversationId,
        request: SendMessageRequest,
    ) -> Result<Message, RealtimeError> {
        if self.backend.fail_create.load(Ordering::SeqCst) {
            return Err(RealtimeError::Network("persist unavailable".into()));
        }

        // The server mints the durable id and stamps the sender
        let mut message = Message::outbound(
            conversation_id,
            self.user_id,
            request.kind,
            request.content,
            request.duration,
        );
        message.delivery = DeliveryState::Sent;

        self.backend
            .messages
            .entry(conversation_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn mark_seen(
        &self,
        conversation_id: ConversationId,
        message_ids: &[MessageId],
    ) -> Result<(), RealtimeError> {
        if self.backend.fail_seen.load(Ordering::SeqCst) {
            return Err(RealtimeError::Network("seen endpoint unavailable".into()));
        }

        if let Some(mut list) = self.backend.messages.get_mut(&conversation_id) {
            for message in list.iter_mut() {
                if message_ids.contains(&message.id) {
                    message.mark_seen_by([self.user_id]);
                }
            }
        }
        Ok(())
    }
}
