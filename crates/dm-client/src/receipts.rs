//! Read-receipt reconciler
//!
//! Turns "these peer messages are on screen" into seen state everywhere it
//! lives: batched into one REST mark-seen call, unioned into the local
//! store on success, and announced to room peers over the transport. At
//! most one flush per conversation is in flight; messages observed
//! meanwhile wait for the next batch, and ids confirmed by an earlier
//! batch are dropped before they reach the wire again. A failed batch is
//! dropped, not
//! restored: unseen state is re-derived from the store on the next
//! observation instead of hammering the API with duplicates.

use crate::api::ConversationApi;
use crate::error::RealtimeError;
use crate::store::MessageStore;
use crate::transport::EventSink;
use dashmap::DashMap;
use dm_core::{ClientEvent, ConversationId, Message, MessageId, UserId};
use std::sync::Arc;

#[derive(Default)]
struct Batch {
    pending: Vec<MessageId>,
    in_flight: bool,
}

struct Inner {
    user_id: UserId,
    api: Arc<dyn ConversationApi>,
    sink: Arc<dyn EventSink>,
    store: Arc<MessageStore>,
    batch_max: usize,
    batches: DashMap<ConversationId, Batch>,
}

/// Reconciles locally observed messages into seen state
pub struct ReadReceiptReconciler {
    inner: Arc<Inner>,
}

impl ReadReceiptReconciler {
    /// Create a reconciler for the given viewer
    #[must_use]
    pub fn new(
        user_id: UserId,
        api: Arc<dyn ConversationApi>,
        sink: Arc<dyn EventSink>,
        store: Arc<MessageStore>,
        batch_max: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                user_id,
                api,
                sink,
                store,
                batch_max,
                batches: DashMap::new(),
            }),
        }
    }

    /// Report messages currently visible in a conversation view.
    ///
    /// Own messages and already-seen messages are skipped; the rest join
    /// the conversation's pending batch and a flush starts unless one is
    /// already in flight.
    pub fn observe_visible(&self, conversation_id: ConversationId, messages: &[Message]) {
        let unseen = messages
            .iter()
            .filter(|m| !m.is_seen_by(self.inner.user_id))
            .map(|m| m.id);
        self.inner.enqueue(conversation_id, unseen);
    }

    /// Report that a whole conversation view is visible, deriving unseen
    /// messages from the store.
    pub fn observe_conversation(&self, conversation_id: ConversationId) {
        let unseen = self
            .inner
            .store
            .unseen_for(conversation_id, self.inner.user_id);
        self.inner.enqueue(conversation_id, unseen);
    }

    /// Apply a peer's seen broadcast to all local copies
    pub fn apply_remote(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        seen_by: impl IntoIterator<Item = UserId>,
    ) {
        self.inner
            .store
            .apply_remote_seen(conversation_id, message_id, seen_by);
    }

    /// Whether a flush is currently in flight for a conversation
    #[must_use]
    pub fn is_flushing(&self, conversation_id: ConversationId) -> bool {
        self.inner
            .batches
            .get(&conversation_id)
            .is_some_and(|b| b.in_flight)
    }

    /// Forget pending batches (logout teardown)
    pub fn clear(&self) {
        self.inner.batches.clear();
    }
}

impl Inner {
    fn enqueue(
        self: &Arc<Self>,
        conversation_id: ConversationId,
        ids: impl IntoIterator<Item = MessageId>,
    ) {
        let batch_to_flush = {
            let mut batch = self.batches.entry(conversation_id).or_default();
            for id in ids {
                if !batch.pending.contains(&id) {
                    batch.pending.push(id);
                }
            }
            // Never flush empty, never flush concurrently
            if batch.in_flight || batch.pending.is_empty() {
                None
            } else {
                batch.in_flight = true;
                Some(take_up_to(&mut batch.pending, self.batch_max))
            }
        };

        if let Some(first) = batch_to_flush {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                inner.run_flushes(conversation_id, first).await;
            });
        }
    }

    /// Flush batches until the pending queue drains
    async fn run_flushes(self: Arc<Self>, conversation_id: ConversationId, mut batch: Vec<MessageId>) {
        loop {
            // A queued id may have been confirmed by an earlier batch;
            // it must not hit the wire a second time
            batch.retain(|&id| !self.already_seen(conversation_id, id));
            if !batch.is_empty() {
                self.flush_one(conversation_id, &batch).await;
            }

            let next = {
                let mut state = self.batches.entry(conversation_id).or_default();
                if state.pending.is_empty() {
                    state.in_flight = false;
                    None
                } else {
                    Some(take_up_to(&mut state.pending, self.batch_max))
                }
            };

            match next {
                Some(next_batch) => batch = next_batch,
                None => break,
            }
        }
    }

    fn already_seen(&self, conversation_id: ConversationId, message_id: MessageId) -> bool {
        self.store
            .get(conversation_id, message_id)
            .is_some_and(|m| m.is_seen_by(self.user_id))
    }

    async fn flush_one(&self, conversation_id: ConversationId, batch: &[MessageId]) {
        match self.api.mark_seen(conversation_id, batch).await {
            Ok(()) => {
                tracing::debug!(
                    conversation_id = %conversation_id,
                    count = batch.len(),
                    "Seen batch flushed"
                );
                for &message_id in batch {
                    self.confirm_seen(conversation_id, message_id).await;
                }
            }
            Err(e) => {
                // Dropped, not restored: the store still reports these as
                // unseen, so the next observation re-derives the batch.
                tracing::warn!(
                    conversation_id = %conversation_id,
                    count = batch.len(),
                    error = %e,
                    "Seen batch flush failed"
                );
            }
        }
    }

    /// Union the viewer into the local copy and announce it to the room
    async fn confirm_seen(&self, conversation_id: ConversationId, message_id: MessageId) {
        if !self.store.mark_seen(conversation_id, message_id, self.user_id) {
            return;
        }
        let Some(message) = self.store.get(conversation_id, message_id) else {
            return;
        };
        let result: Result<(), RealtimeError> = self
            .sink
            .emit(ClientEvent::MessageSeen {
                message_id,
                conversation_id,
                seen_by: message.seen_by,
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(message_id = %message_id, error = %e, "Seen broadcast not sent");
        }
    }
}

fn take_up_to(pending: &mut Vec<MessageId>, max: usize) -> Vec<MessageId> {
    let take = pending.len().min(max);
    pending.drain(..take).collect()
}
