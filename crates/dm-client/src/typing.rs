//! Typing signals, both directions
//!
//! The send side debounces raw keystroke notifications into a single
//! `typing{true}` until a quiet period elapses or a message send forces
//! a stop. The receive side mirrors a peer's indicator with a local
//! expiry fallback, so a dropped stop event cannot leave a stale
//! indicator beyond the quiet period. Dual expiry (explicit stop OR
//! local timeout) is the resilience property everything here serves.

use crate::error::RealtimeError;
use crate::transport::EventSink;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dm_core::{ClientEvent, ConversationId, TypingState, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Buffer for typing change fan-out to views
const CHANGE_BUFFER_SIZE: usize = 64;

// ---------------------------------------------------------------------------
// Send side
// ---------------------------------------------------------------------------

struct PublisherSlot {
    generation: u64,
    timer: JoinHandle<()>,
}

struct PublisherInner {
    sink: Arc<dyn EventSink>,
    quiet_period: Duration,
    slots: DashMap<ConversationId, PublisherSlot>,
}

/// Debounces the local user's keystrokes into start/stop typing signals
pub struct TypingPublisher {
    inner: Arc<PublisherInner>,
}

impl TypingPublisher {
    /// Create a publisher emitting through the given sink
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>, quiet_period: Duration) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                sink,
                quiet_period,
                slots: DashMap::new(),
            }),
        }
    }

    /// Record a keystroke in a conversation.
    ///
    /// The first call emits `typing{true}` and arms the quiet timer;
    /// every further call within the window only re-arms the timer, so
    /// spamming keystrokes never re-emits the start signal.
    pub async fn notify_typing(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), RealtimeError> {
        let newly_typing = match self.inner.slots.entry(conversation_id) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                slot.generation += 1;
                slot.timer.abort();
                slot.timer = spawn_quiet_timer(&self.inner, conversation_id, slot.generation);
                false
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PublisherSlot {
                    generation: 0,
                    timer: spawn_quiet_timer(&self.inner, conversation_id, 0),
                });
                true
            }
        };

        if newly_typing {
            tracing::trace!(conversation_id = %conversation_id, "Typing started");
            self.inner
                .sink
                .emit(ClientEvent::Typing {
                    conversation_id,
                    is_typing: true,
                })
                .await?;
        }
        Ok(())
    }

    /// Force-cancel the indicator, emitting `typing{false}` immediately.
    ///
    /// Called on message send: sending implies the user stopped
    /// composing. A no-op when not currently typing.
    pub async fn stop_typing(&self, conversation_id: ConversationId) -> Result<(), RealtimeError> {
        if let Some((_, slot)) = self.inner.slots.remove(&conversation_id) {
            slot.timer.abort();
            tracing::trace!(conversation_id = %conversation_id, "Typing stopped");
            self.inner
                .sink
                .emit(ClientEvent::Typing {
                    conversation_id,
                    is_typing: false,
                })
                .await?;
        }
        Ok(())
    }

    /// Whether the local user is currently marked typing here
    #[must_use]
    pub fn is_typing(&self, conversation_id: ConversationId) -> bool {
        self.inner.slots.contains_key(&conversation_id)
    }

    /// Cancel all pending timers without emitting (view unmount)
    pub fn cancel_all(&self) {
        self.inner.slots.retain(|_, slot| {
            slot.timer.abort();
            false
        });
    }
}

/// Arm the quiet timer; on expiry without renewal, emit the stop signal.
fn spawn_quiet_timer(
    inner: &Arc<PublisherInner>,
    conversation_id: ConversationId,
    generation: u64,
) -> JoinHandle<()> {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        tokio::time::sleep(inner.quiet_period).await;

        // A refresh bumped the generation; this timer is stale
        let expired = inner
            .slots
            .remove_if(&conversation_id, |_, slot| slot.generation == generation)
            .is_some();

        if expired {
            tracing::trace!(conversation_id = %conversation_id, "Typing quiet period elapsed");
            inner
                .sink
                .emit(ClientEvent::Typing {
                    conversation_id,
                    is_typing: false,
                })
                .await
                .ok();
        }
    })
}

// ---------------------------------------------------------------------------
// Receive side
// ---------------------------------------------------------------------------

/// A peer's typing indicator changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingChange {
    pub user_id: UserId,
    pub conversation_id: ConversationId,
    pub is_typing: bool,
}

struct ActiveTyping {
    generation: u64,
    state: TypingState,
    expiry: JoinHandle<()>,
}

struct TrackerInner {
    quiet_period: Duration,
    states: DashMap<(ConversationId, UserId), ActiveTyping>,
    changes_tx: broadcast::Sender<TypingChange>,
}

/// Mirrors peers' typing indicators with a local expiry fallback
pub struct TypingTracker {
    inner: Arc<TrackerInner>,
}

impl TypingTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new(quiet_period: Duration) -> Self {
        let (changes_tx, _) = broadcast::channel(CHANGE_BUFFER_SIZE);
        Self {
            inner: Arc::new(TrackerInner {
                quiet_period,
                states: DashMap::new(),
                changes_tx,
            }),
        }
    }

    /// Apply an incoming `typing` event from a peer
    pub fn apply(&self, user_id: UserId, conversation_id: ConversationId, is_typing: bool) {
        let key = (conversation_id, user_id);

        if is_typing {
            match self.inner.states.entry(key) {
                Entry::Occupied(mut occupied) => {
                    // Refresh: replace, never append
                    let active = occupied.get_mut();
                    active.generation += 1;
                    active.state = TypingState::begin(user_id, conversation_id);
                    active.expiry.abort();
                    active.expiry = spawn_expiry(&self.inner, key, active.generation);
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(ActiveTyping {
                        generation: 0,
                        state: TypingState::begin(user_id, conversation_id),
                        expiry: spawn_expiry(&self.inner, key, 0),
                    });
                    self.notify(user_id, conversation_id, true);
                }
            }
        } else if let Some((_, active)) = self.inner.states.remove(&key) {
            active.expiry.abort();
            self.notify(user_id, conversation_id, false);
        }
    }

    /// Whether a peer is currently typing in a conversation
    #[must_use]
    pub fn is_typing(&self, conversation_id: ConversationId, user_id: UserId) -> bool {
        self.inner.states.contains_key(&(conversation_id, user_id))
    }

    /// All peers currently typing in a conversation
    #[must_use]
    pub fn typing_users(&self, conversation_id: ConversationId) -> Vec<UserId> {
        self.inner
            .states
            .iter()
            .filter(|entry| entry.key().0 == conversation_id)
            .map(|entry| entry.value().state.user_id)
            .collect()
    }

    /// Live indicator states for a conversation, with their expiry stamps
    #[must_use]
    pub fn states(&self, conversation_id: ConversationId) -> Vec<TypingState> {
        self.inner
            .states
            .iter()
            .filter(|entry| entry.key().0 == conversation_id)
            .map(|entry| entry.value().state)
            .collect()
    }

    /// Subscribe to typing changes
    pub fn subscribe(&self) -> broadcast::Receiver<TypingChange> {
        self.inner.changes_tx.subscribe()
    }

    /// Drop all indicators (logout teardown)
    pub fn clear(&self) {
        self.inner.states.retain(|_, active| {
            active.expiry.abort();
            false
        });
    }

    fn notify(&self, user_id: UserId, conversation_id: ConversationId, is_typing: bool) {
        self.inner
            .changes_tx
            .send(TypingChange {
                user_id,
                conversation_id,
                is_typing,
            })
            .ok();
    }
}

/// Local fallback against a dropped stop event: clear after the quiet
/// period unless the indicator was refreshed meanwhile.
fn spawn_expiry(
    inner: &Arc<TrackerInner>,
    key: (ConversationId, UserId),
    generation: u64,
) -> JoinHandle<()> {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        tokio::time::sleep(inner.quiet_period).await;

        let expired = inner
            .states
            .remove_if(&key, |_, active| active.generation == generation)
            .is_some();

        if expired {
            tracing::debug!(
                user_id = %key.1,
                conversation_id = %key.0,
                "Typing indicator expired locally"
            );
            inner
                .changes_tx
                .send(TypingChange {
                    user_id: key.1,
                    conversation_id: key.0,
                    is_typing: false,
                })
                .ok();
        }
    })
}
