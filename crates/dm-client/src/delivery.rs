//! Message delivery pipeline
//!
//! Send path: validate, insert optimistically under a placeholder id,
//! persist through the API, re-key to the server id on ack and announce
//! to the room. Failures mark the local copy `Failed` and stop there;
//! a retry is an explicit user action that mints a fresh placeholder,
//! never an automatic resend.
//!
//! Receive path: room broadcasts land in the store, and if the
//! conversation view is visible the message goes straight to the
//! read-receipt reconciler.

use crate::api::{ConversationApi, MediaUploader, SendMessageRequest};
use crate::error::RealtimeError;
use crate::receipts::ReadReceiptReconciler;
use crate::rooms::RoomMembership;
use crate::store::MessageStore;
use crate::transport::EventSink;
use crate::typing::TypingPublisher;
use dashmap::DashSet;
use dm_core::{
    ClientEvent, ConversationId, DeliveryState, DomainError, Message, MessageId, MessageKind,
    UserId, MAX_MEDIA_DURATION_SECS,
};
use std::sync::Arc;

/// Sends, retries and receives messages for one authenticated user
pub struct DeliveryPipeline {
    user_id: UserId,
    api: Arc<dyn ConversationApi>,
    sink: Arc<dyn EventSink>,
    store: Arc<MessageStore>,
    typing: Arc<TypingPublisher>,
    reconciler: Arc<ReadReceiptReconciler>,
    rooms: Arc<RoomMembership>,
    visible: DashSet<ConversationId>,
}

impl DeliveryPipeline {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        user_id: UserId,
        api: Arc<dyn ConversationApi>,
        sink: Arc<dyn EventSink>,
        store: Arc<MessageStore>,
        typing: Arc<TypingPublisher>,
        reconciler: Arc<ReadReceiptReconciler>,
        rooms: Arc<RoomMembership>,
    ) -> Self {
        Self {
            user_id,
            api,
            sink,
            store,
            typing,
            reconciler,
            rooms,
            visible: DashSet::new(),
        }
    }

    /// Send a message.
    ///
    /// The optimistic copy is in the store (state `Sending`) before any
    /// network call, so subscribed views render it immediately. On ack the
    /// placeholder is re-keyed and peers are notified; on failure the copy
    /// is marked `Failed` and the error is returned.
    pub async fn send(
        &self,
        conversation_id: ConversationId,
        kind: MessageKind,
        content: String,
        duration: Option<u32>,
    ) -> Result<Message, RealtimeError> {
        validate_payload(kind, &content, duration)?;

        // Sending implies the user stopped composing
        if let Err(e) = self.typing.stop_typing(conversation_id).await {
            tracing::debug!(error = %e, "Typing stop not delivered before send");
        }

        let optimistic = Message::outbound(conversation_id, self.user_id, kind, content, duration);
        let placeholder_id = optimistic.id;
        self.store.upsert(optimistic.clone());

        let request = SendMessageRequest {
            kind,
            content: optimistic.content,
            duration,
        };

        match self.api.create_message(conversation_id, request).await {
            Ok(acked) => {
                tracing::debug!(
                    conversation_id = %conversation_id,
                    message_id = %acked.id,
                    "Message persisted"
                );
                self.store
                    .resolve_placeholder(conversation_id, placeholder_id, acked.clone());
                let sent = self
                    .store
                    .get(conversation_id, acked.id)
                    .unwrap_or(acked);

                self.sink
                    .emit(ClientEvent::MessageNew {
                        message: sent.clone(),
                    })
                    .await?;
                Ok(sent)
            }
            Err(e) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Message send failed"
                );
                self.store.mark_failed(conversation_id, placeholder_id);
                Err(e)
            }
        }
    }

    /// Retry a failed message as a new attempt.
    ///
    /// The payload is re-sent under a fresh placeholder id; the failed
    /// copy stays in the store as its own entry, never merged into the
    /// new attempt. Only `Failed` messages are retryable.
    pub async fn retry(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<Message, RealtimeError> {
        let failed = self
            .store
            .get(conversation_id, message_id)
            .ok_or(DomainError::MessageNotFound(message_id))?;
        if failed.delivery != DeliveryState::Failed {
            return Err(DomainError::NotRetryable(message_id).into());
        }

        self.send(conversation_id, failed.kind, failed.content, failed.duration)
            .await
    }

    /// Discard a failed message the user chose not to retry
    pub fn discard(&self, conversation_id: ConversationId, message_id: MessageId) {
        self.store.remove(conversation_id, message_id);
    }

    /// Upload media through the given uploader, then send the resulting
    /// URL as the message content.
    pub async fn send_media(
        &self,
        conversation_id: ConversationId,
        kind: MessageKind,
        uploader: &dyn MediaUploader,
        bytes: Vec<u8>,
    ) -> Result<Message, RealtimeError> {
        let upload = uploader.upload(bytes, kind).await?;
        self.send(conversation_id, kind, upload.secure_url, upload.duration)
            .await
    }

    /// Apply an incoming room broadcast.
    ///
    /// Broadcasts for rooms this client never joined are dropped. When
    /// the conversation is visible the message is handed to the
    /// reconciler in the same pass.
    pub fn receive(&self, message: Message) {
        let conversation_id = message.conversation_id;
        if !self.rooms.is_joined(conversation_id) {
            tracing::debug!(
                conversation_id = %conversation_id,
                "Dropping broadcast for unjoined conversation"
            );
            return;
        }

        self.store.upsert(message.clone());
        if self.visible.contains(&conversation_id) {
            self.reconciler
                .observe_visible(conversation_id, &[message]);
        }
    }

    /// Mark a conversation view visible or hidden.
    ///
    /// Becoming visible reconciles the backlog: everything unseen in the
    /// store is observed at once.
    pub fn set_visible(&self, conversation_id: ConversationId, visible: bool) {
        if visible {
            self.visible.insert(conversation_id);
            self.reconciler.observe_conversation(conversation_id);
        } else {
            self.visible.remove(&conversation_id);
        }
    }

    /// Whether a conversation view is currently visible
    #[must_use]
    pub fn is_visible(&self, conversation_id: ConversationId) -> bool {
        self.visible.contains(&conversation_id)
    }

    /// Forget visibility state (logout teardown)
    pub fn clear(&self) {
        self.visible.clear();
    }
}

/// Reject out-of-bounds payloads before any network call
fn validate_payload(
    kind: MessageKind,
    content: &str,
    duration: Option<u32>,
) -> Result<(), DomainError> {
    if content.trim().is_empty() {
        return Err(DomainError::EmptyContent);
    }
    if let Some(secs) = duration {
        if kind.has_duration() && secs > MAX_MEDIA_DURATION_SECS {
            return Err(DomainError::MediaTooLong { got: secs });
        }
    }
    Ok(())
}
