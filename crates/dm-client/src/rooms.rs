//! Room membership
//!
//! Ref-counted joins so multiple views of the same conversation share one
//! server-side subscription. Join/leave signals go to the wire only on the
//! 0→1 and 1→0 transitions; everything in between is local bookkeeping.
//! On reconnect the whole set is re-joined, since the server forgets
//! subscriptions when a connection drops.

use crate::error::RealtimeError;
use crate::transport::EventSink;
use dashmap::DashMap;
use dm_core::{ClientEvent, ConversationId};
use std::sync::Arc;

/// Ref-counted conversation room subscriptions
pub struct RoomMembership {
    sink: Arc<dyn EventSink>,
    counts: DashMap<ConversationId, usize>,
}

impl RoomMembership {
    /// Create an empty membership emitting through the given sink
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            counts: DashMap::new(),
        }
    }

    /// Register one view's interest in a conversation.
    ///
    /// Only the first interested view reaches the wire; further joins of
    /// the same room just bump the count.
    pub async fn join(&self, conversation_id: ConversationId) -> Result<(), RealtimeError> {
        let mut newly_joined = false;
        self.counts
            .entry(conversation_id)
            .and_modify(|count| *count += 1)
            .or_insert_with(|| {
                newly_joined = true;
                1
            });

        if newly_joined {
            tracing::debug!(conversation_id = %conversation_id, "Joining conversation room");
            self.sink
                .emit(ClientEvent::JoinConversation { conversation_id })
                .await?;
        }
        Ok(())
    }

    /// Drop one view's interest in a conversation.
    ///
    /// The wire sees the leave only when the last view departs. A leave
    /// without a matching join is a no-op rather than an underflow.
    pub async fn leave(&self, conversation_id: ConversationId) -> Result<(), RealtimeError> {
        let mut departed = false;
        self.counts.remove_if_mut(&conversation_id, |_, count| {
            *count -= 1;
            departed = *count == 0;
            departed
        });

        if departed {
            tracing::debug!(conversation_id = %conversation_id, "Leaving conversation room");
            self.sink
                .emit(ClientEvent::LeaveConversation { conversation_id })
                .await?;
        }
        Ok(())
    }

    /// Re-announce every held subscription.
    ///
    /// Driven by `TransportEvent::Open`: the server dropped this
    /// connection's rooms when it fell, so all of them are joined again
    /// regardless of ref-count.
    pub async fn rejoin_all(&self) -> Result<(), RealtimeError> {
        let rooms: Vec<ConversationId> = self.counts.iter().map(|entry| *entry.key()).collect();

        if !rooms.is_empty() {
            tracing::info!(rooms = rooms.len(), "Re-joining conversation rooms");
        }
        for conversation_id in rooms {
            self.sink
                .emit(ClientEvent::JoinConversation { conversation_id })
                .await?;
        }
        Ok(())
    }

    /// Whether any view currently holds this room
    #[must_use]
    pub fn is_joined(&self, conversation_id: ConversationId) -> bool {
        self.counts.contains_key(&conversation_id)
    }

    /// Number of views holding this room
    #[must_use]
    pub fn view_count(&self, conversation_id: ConversationId) -> usize {
        self.counts.get(&conversation_id).map_or(0, |count| *count)
    }

    /// Forget all subscriptions without emitting (logout teardown)
    pub fn clear(&self) {
        self.counts.clear();
    }
}

impl std::fmt::Debug for RoomMembership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomMembership")
            .field("rooms", &self.counts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<ClientEvent>>,
    }

    impl RecordingSink {
        fn names(&self) -> Vec<&'static str> {
            self.events.lock().iter().map(ClientEvent::name).collect()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn emit(&self, event: ClientEvent) -> Result<(), RealtimeError> {
            self.events.lock().push(event);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_join_emits_once() {
        let sink = Arc::new(RecordingSink::default());
        let rooms = RoomMembership::new(sink.clone());
        let conversation_id = ConversationId::random();

        rooms.join(conversation_id).await.unwrap();
        rooms.join(conversation_id).await.unwrap();
        rooms.join(conversation_id).await.unwrap();

        assert_eq!(sink.names(), vec!["join_conversation"]);
        assert_eq!(rooms.view_count(conversation_id), 3);
    }

    #[tokio::test]
    async fn test_leave_emits_on_last_view() {
        let sink = Arc::new(RecordingSink::default());
        let rooms = RoomMembership::new(sink.clone());
        let conversation_id = ConversationId::random();

        // Two views open, then both close; one join/leave pair on the wire
        rooms.join(conversation_id).await.unwrap();
        rooms.join(conversation_id).await.unwrap();
        rooms.leave(conversation_id).await.unwrap();
        assert!(rooms.is_joined(conversation_id));
        assert_eq!(sink.names(), vec!["join_conversation"]);

        rooms.leave(conversation_id).await.unwrap();
        assert!(!rooms.is_joined(conversation_id));
        assert_eq!(sink.names(), vec!["join_conversation", "leave_conversation"]);
    }

    #[tokio::test]
    async fn test_unmatched_leave_is_noop() {
        let sink = Arc::new(RecordingSink::default());
        let rooms = RoomMembership::new(sink.clone());
        let conversation_id = ConversationId::random();

        rooms.leave(conversation_id).await.unwrap();
        assert!(sink.names().is_empty());
        assert_eq!(rooms.view_count(conversation_id), 0);
    }

    #[tokio::test]
    async fn test_rejoin_all_covers_held_rooms() {
        let sink = Arc::new(RecordingSink::default());
        let rooms = RoomMembership::new(sink.clone());
        let first = ConversationId::random();
        let second = ConversationId::random();
        let left = ConversationId::random();

        rooms.join(first).await.unwrap();
        rooms.join(second).await.unwrap();
        rooms.join(left).await.unwrap();
        rooms.leave(left).await.unwrap();
        sink.events.lock().clear();

        rooms.rejoin_all().await.unwrap();

        let mut joined: Vec<ConversationId> = sink
            .events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ClientEvent::JoinConversation { conversation_id } => Some(*conversation_id),
                _ => None,
            })
            .collect();
        joined.sort();
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(joined, expected);
    }

    #[tokio::test]
    async fn test_clear_forgets_silently() {
        let sink = Arc::new(RecordingSink::default());
        let rooms = RoomMembership::new(sink.clone());
        let conversation_id = ConversationId::random();

        rooms.join(conversation_id).await.unwrap();
        rooms.clear();

        assert!(!rooms.is_joined(conversation_id));
        assert_eq!(sink.names(), vec!["join_conversation"]);
    }
}
