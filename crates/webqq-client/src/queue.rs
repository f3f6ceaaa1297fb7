//! Receive queue between the poller and the consumer.
//!
//! Messages are delivered in strict arrival order and stamped with a
//! sequence number at push time. The queue is bounded; what happens when it
//! is full is decided by an [`OverflowPolicy`].

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, broadcast};
use tracing::{debug, warn};
use webqq_core::model::{MediaPayload, Message, ReceivedMessage};

use crate::error::{ClientError, ClientResult};

/// Capacity of the media update broadcast channel.
const MEDIA_UPDATE_CAPACITY: usize = 256;

/// Behavior of [`ReceiveQueue::push`] when the queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued message.
    #[default]
    DropOldest,
    /// Discard the message being pushed.
    DropNewest,
    /// Wait until a consumer makes room.
    Block,
}

/// A downloaded (or failed) image payload for an already queued message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpdate {
    /// Sequence number of the message.
    pub seq: u64,
    /// Index of the part within the message.
    pub part_index: usize,
    pub payload: MediaPayload,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<ReceivedMessage>,
    next_seq: u64,
    dropped: u64,
    closed: bool,
}

/// Thread-safe FIFO of received messages.
#[derive(Debug)]
pub struct ReceiveQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    policy: OverflowPolicy,
    not_empty: Notify,
    not_full: Notify,
    media_updates: broadcast::Sender<MediaUpdate>,
}

impl Default for ReceiveQueue {
    fn default() -> Self {
        Self::new(1024, OverflowPolicy::default())
    }
}

impl ReceiveQueue {
    /// Creates a queue holding at most `capacity` messages (0 = unbounded).
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let (media_updates, _) = broadcast::channel(MEDIA_UPDATE_CAPACITY);
        Self {
            state: Mutex::new(QueueState {
                next_seq: 1,
                ..Default::default()
            }),
            capacity,
            policy,
            not_empty: Notify::new(),
            not_full: Notify::new(),
            media_updates,
        }
    }

    // The critical sections never panic, so a poisoned lock still guards
    // consistent data.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_full(&self, state: &QueueState) -> bool {
        self.capacity > 0 && state.messages.len() >= self.capacity
    }

    /// Appends a message.
    ///
    /// Returns the sequence number assigned to it, or `None` if it was
    /// discarded under [`OverflowPolicy::DropNewest`]. With
    /// [`OverflowPolicy::Block`] this waits for room.
    ///
    /// # Errors
    ///
    /// Fails with `QueueClosed` once [`close`](Self::close) was called.
    pub async fn push(&self, message: Message) -> ClientResult<Option<u64>> {
        loop {
            let room = self.not_full.notified();
            tokio::pin!(room);
            room.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return Err(ClientError::queue_closed());
                }

                let full = self.is_full(&state);
                if !full || self.policy != OverflowPolicy::Block {
                    if full {
                        state.dropped += 1;
                        if self.policy == OverflowPolicy::DropNewest {
                            warn!(
                                dropped = state.dropped,
                                kind = ?message.kind(),
                                "receive queue full, dropping incoming message"
                            );
                            return Ok(None);
                        }
                        if let Some(evicted) = state.messages.pop_front() {
                            warn!(
                                dropped = state.dropped,
                                seq = evicted.seq,
                                "receive queue full, dropping oldest message"
                            );
                        }
                    }

                    let seq = state.next_seq;
                    state.next_seq += 1;
                    state.messages.push_back(ReceivedMessage::new(seq, message));
                    drop(state);

                    self.not_empty.notify_one();
                    return Ok(Some(seq));
                }
            }

            debug!("receive queue full, waiting for room");
            room.await;
        }
    }

    /// Waits for the next message.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn recv(&self) -> Option<ReceivedMessage> {
        loop {
            let ready = self.not_empty.notified();
            tokio::pin!(ready);
            ready.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(message) = state.messages.pop_front() {
                    drop(state);
                    self.not_full.notify_waiters();
                    return Some(message);
                }
                if state.closed {
                    return None;
                }
            }

            ready.await;
        }
    }

    /// Waits up to `timeout` for the next message.
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<ReceivedMessage> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .ok()
            .flatten()
    }

    /// Returns the next message if one is queued.
    pub fn try_recv(&self) -> Option<ReceivedMessage> {
        let message = self.lock().messages.pop_front();
        if message.is_some() {
            self.not_full.notify_waiters();
        }
        message
    }

    /// Removes and returns every queued message.
    pub fn drain(&self) -> Vec<ReceivedMessage> {
        let messages: Vec<_> = self.lock().messages.drain(..).collect();
        if !messages.is_empty() {
            self.not_full.notify_waiters();
        }
        messages
    }

    /// Returns the number of queued messages.
    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of messages dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Closes the queue: pushes fail and waiting consumers wake up.
    ///
    /// Messages already queued can still be received.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Subscribes to media updates.
    pub fn subscribe_media(&self) -> broadcast::Receiver<MediaUpdate> {
        self.media_updates.subscribe()
    }

    /// Applies a media update to the queued message it belongs to and
    /// broadcasts it to subscribers.
    ///
    /// Returns true if the message was still queued and the part updated.
    pub fn apply_media_update(&self, update: MediaUpdate) -> bool {
        let applied = {
            let mut state = self.lock();
            // Sequence numbers are increasing, so the queue is sorted by seq.
            match state.messages.binary_search_by_key(&update.seq, |m| m.seq) {
                Ok(index) => match &mut state.messages[index].message {
                    Message::Chat(envelope) => envelope
                        .parts
                        .get_mut(update.part_index)
                        .is_some_and(|part| part.set_payload(update.payload.clone())),
                    _ => false,
                },
                Err(_) => false,
            }
        };

        debug!(
            seq = update.seq,
            part = update.part_index,
            applied,
            "media update"
        );
        // No subscribers is fine.
        let _ = self.media_updates.send(update);
        applied
    }
}
