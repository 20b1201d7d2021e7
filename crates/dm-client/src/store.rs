//! Message store
//!
//! Per-conversation message lists with merge-by-key upserts. The same
//! message can arrive from the send pipeline (optimistic insert, then the
//! server ack) and from the receive pipeline (room broadcasts), in any
//! order; every write path converges through [`Message::merge_from`] so
//! no update is lost. Seen broadcasts that race ahead of their message
//! are buffered and applied once the message lands.

use dashmap::DashMap;
use dm_core::{ConversationId, DeliveryState, Message, MessageId, UserId};
use std::collections::HashSet;
use tokio::sync::broadcast;

/// Buffer for store change fan-out to views
const CHANGE_BUFFER_SIZE: usize = 256;

/// A visible change to stored messages
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A message appeared in a conversation
    Added(Message),
    /// An existing message changed (seen-set growth, delivery state)
    Updated(Message),
    /// An optimistic placeholder was re-keyed to its server id
    Rekeyed {
        placeholder_id: MessageId,
        message: Message,
    },
}

/// In-memory store of conversation messages
pub struct MessageStore {
    conversations: DashMap<ConversationId, Vec<Message>>,
    /// Seen-sets that arrived before their message
    pending_seen: DashMap<MessageId, HashSet<UserId>>,
    changes_tx: broadcast::Sender<StoreEvent>,
}

impl MessageStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        let (changes_tx, _) = broadcast::channel(CHANGE_BUFFER_SIZE);
        Self {
            conversations: DashMap::new(),
            pending_seen: DashMap::new(),
            changes_tx,
        }
    }

    /// Insert or merge a message under its id.
    ///
    /// An unknown id appends in `created_at` order; a known id merges,
    /// with last-writer-wins fields and a grow-only seen-set.
    pub fn upsert(&self, mut message: Message) {
        // A seen broadcast may have outrun this message
        if let Some((_, buffered)) = self.pending_seen.remove(&message.id) {
            message.mark_seen_by(buffered);
        }

        let mut entry = self.conversations.entry(message.conversation_id).or_default();
        let list = entry.value_mut();

        if let Some(existing) = list.iter_mut().find(|m| m.id == message.id) {
            existing.merge_from(&message);
            let updated = existing.clone();
            drop(entry);
            self.notify(StoreEvent::Updated(updated));
        } else {
            let position = list.partition_point(|m| m.created_at <= message.created_at);
            list.insert(position, message.clone());
            drop(entry);
            self.notify(StoreEvent::Added(message));
        }
    }

    /// Re-key an optimistic placeholder to the server-assigned message.
    ///
    /// Local-only state (the seen-set accumulated while in flight) is
    /// carried over; the placeholder id disappears from the store. If the
    /// server copy already landed through a room broadcast, the
    /// placeholder is simply dropped into it.
    pub fn resolve_placeholder(
        &self,
        conversation_id: ConversationId,
        placeholder_id: MessageId,
        mut acked: Message,
    ) {
        acked.delivery = DeliveryState::Sent;
        if let Some((_, buffered)) = self.pending_seen.remove(&acked.id) {
            acked.mark_seen_by(buffered);
        }

        let mut entry = self.conversations.entry(conversation_id).or_default();
        let list = entry.value_mut();

        if let Some(placeholder_pos) = list.iter().position(|m| m.id == placeholder_id) {
            let placeholder = list.remove(placeholder_pos);
            acked.mark_seen_by(placeholder.seen_by.iter().copied());

            if let Some(existing) = list.iter_mut().find(|m| m.id == acked.id) {
                existing.merge_from(&acked);
                acked = existing.clone();
            } else {
                let position = list.partition_point(|m| m.created_at <= acked.created_at);
                list.insert(position, acked.clone());
            }
            drop(entry);

            tracing::debug!(
                placeholder_id = %placeholder_id,
                message_id = %acked.id,
                "Placeholder re-keyed to server id"
            );
            self.notify(StoreEvent::Rekeyed {
                placeholder_id,
                message: acked,
            });
        } else {
            drop(entry);
            // Placeholder already gone (cleared view); store the ack alone
            self.upsert(acked);
        }
    }

    /// Mark an optimistic message as failed
    pub fn mark_failed(&self, conversation_id: ConversationId, message_id: MessageId) {
        let updated = self.conversations.get_mut(&conversation_id).and_then(|mut list| {
            list.iter_mut().find(|m| m.id == message_id).map(|message| {
                message.delivery = DeliveryState::Failed;
                message.clone()
            })
        });

        if let Some(message) = updated {
            tracing::debug!(message_id = %message_id, "Message send failed");
            self.notify(StoreEvent::Updated(message));
        }
    }

    /// Remove a failed message, ahead of a retry under a fresh placeholder
    pub fn remove(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Option<Message> {
        let mut list = self.conversations.get_mut(&conversation_id)?;
        let position = list.iter().position(|m| m.id == message_id)?;
        Some(list.remove(position))
    }

    /// Apply a seen broadcast to a stored message.
    ///
    /// Unknown ids are buffered rather than dropped: the broadcast may
    /// have overtaken its own `message_new` on the wire.
    pub fn apply_remote_seen(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        seen_by: impl IntoIterator<Item = UserId>,
    ) {
        let viewers: Vec<UserId> = seen_by.into_iter().collect();

        if !self.contains(conversation_id, message_id) {
            tracing::trace!(message_id = %message_id, "Buffering seen-set for unknown message");
            self.pending_seen
                .entry(message_id)
                .or_default()
                .extend(viewers);
            return;
        }

        let updated = self.conversations.get_mut(&conversation_id).and_then(|mut list| {
            list.iter_mut().find(|m| m.id == message_id).and_then(|message| {
                message.mark_seen_by(viewers).then(|| message.clone())
            })
        });

        if let Some(message) = updated {
            self.notify(StoreEvent::Updated(message));
        }
    }

    /// Mark a message seen by the local viewer. Returns true if the
    /// seen-set grew (i.e. the receipt is worth sending).
    pub fn mark_seen(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        viewer: UserId,
    ) -> bool {
        let updated = self.conversations.get_mut(&conversation_id).and_then(|mut list| {
            list.iter_mut().find(|m| m.id == message_id).and_then(|message| {
                message.mark_seen_by([viewer]).then(|| message.clone())
            })
        });

        match updated {
            Some(message) => {
                self.notify(StoreEvent::Updated(message));
                true
            }
            None => false,
        }
    }

    /// Messages of a conversation in `created_at` order
    #[must_use]
    pub fn messages(&self, conversation_id: ConversationId) -> Vec<Message> {
        self.conversations
            .get(&conversation_id)
            .map_or_else(Vec::new, |list| list.clone())
    }

    /// Look up one message by id
    #[must_use]
    pub fn get(&self, conversation_id: ConversationId, message_id: MessageId) -> Option<Message> {
        self.conversations
            .get(&conversation_id)?
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
    }

    /// Peer messages the viewer has not seen yet, oldest first
    #[must_use]
    pub fn unseen_for(&self, conversation_id: ConversationId, viewer: UserId) -> Vec<MessageId> {
        self.conversations
            .get(&conversation_id)
            .map_or_else(Vec::new, |list| {
                list.iter()
                    .filter(|m| !m.is_seen_by(viewer))
                    .map(|m| m.id)
                    .collect()
            })
    }

    /// Subscribe to store changes
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.changes_tx.subscribe()
    }

    /// Drop everything (logout teardown)
    pub fn clear(&self) {
        self.conversations.clear();
        self.pending_seen.clear();
    }

    fn contains(&self, conversation_id: ConversationId, message_id: MessageId) -> bool {
        self.conversations
            .get(&conversation_id)
            .is_some_and(|list| list.iter().any(|m| m.id == message_id))
    }

    fn notify(&self, event: StoreEvent) {
        self.changes_tx.send(event).ok();
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("conversations", &self.conversations.len())
            .field("pending_seen", &self.pending_seen.len())
            .finish()
    }
}
