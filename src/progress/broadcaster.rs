//! In-memory publish/subscribe hub for progress events.
//!
//! Keeps the latest event per in-flight queue item next to a
//! `tokio::sync::broadcast` channel. Publishing never waits on a subscriber:
//! one that falls behind loses its oldest events and sees the loss as a lag.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{ProgressEnvelope, ProgressEvent, StreamFrame};

struct State {
    snapshot: HashMap<i64, ProgressEvent>,
    /// None once the hub is closed. Dropping it ends every receiver.
    event_tx: Option<broadcast::Sender<ProgressEvent>>,
    subscribers: HashMap<u64, CancellationToken>,
}

struct Shared {
    state: Mutex<State>,
    next_subscriber_id: AtomicU64,
}

impl Shared {
    fn remove_subscriber(&self, id: u64) -> bool {
        let removed = self.state.lock().unwrap().subscribers.remove(&id);
        if let Some(token) = &removed {
            token.cancel();
        }
        removed.is_some()
    }
}

/// Cloneable handle to the progress hub.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    shared: Arc<Shared>,
}

impl ProgressBroadcaster {
    /// Create a hub whose subscribers buffer up to `buffer_size` events.
    /// The channel rounds the capacity up to a power of two.
    pub fn new(buffer_size: usize) -> Self {
        let (event_tx, _) = broadcast::channel(buffer_size.max(1));
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    snapshot: HashMap::new(),
                    event_tx: Some(event_tx),
                    subscribers: HashMap::new(),
                }),
                next_subscriber_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a subscriber.
    ///
    /// The snapshot and the receiver are taken under the same lock as
    /// `publish`, so every event is either in the snapshot or in the stream.
    pub fn subscribe(&self) -> Subscription {
        let id = self
            .shared
            .next_subscriber_id
            .fetch_add(1, Ordering::Relaxed);
        let unsubscribed = CancellationToken::new();

        let (initial, event_rx) = {
            let mut state = self.shared.state.lock().unwrap();
            let event_rx = match state.event_tx.as_ref().map(|tx| tx.subscribe()) {
                Some(event_rx) => {
                    state.subscribers.insert(id, unsubscribed.clone());
                    event_rx
                }
                None => {
                    // Closed hub: hand out a receiver whose sender is already gone
                    unsubscribed.cancel();
                    broadcast::channel(1).1
                }
            };
            (sorted_snapshot(&state.snapshot), event_rx)
        };
        debug!("Progress subscriber {} registered", id);

        Subscription {
            id,
            initial,
            stream: ProgressStream {
                id,
                event_rx,
                unsubscribed,
                dropped: 0,
                hub: Arc::downgrade(&self.shared),
            },
        }
    }

    /// Remove a subscriber. Its stream ends after draining buffered events.
    /// Returns false if the id is unknown.
    pub fn unsubscribe(&self, id: u64) -> bool {
        self.shared.remove_subscriber(id)
    }

    /// Record `event` as the latest state of its item and hand it to every
    /// subscriber. Only in-flight items are kept in the snapshot.
    pub fn publish(&self, event: ProgressEvent) {
        let mut state = self.shared.state.lock().unwrap();
        if state.event_tx.is_none() {
            return;
        }

        if event.status.is_in_flight() {
            state.snapshot.insert(event.queue_item_id, event.clone());
        } else {
            state.snapshot.remove(&event.queue_item_id);
        }

        if let Some(event_tx) = &state.event_tx {
            // Err only means nobody is listening
            let _ = event_tx.send(event);
        }
    }

    /// Latest event of every in-flight item, ordered by queue item id.
    pub fn snapshot(&self) -> Vec<ProgressEvent> {
        sorted_snapshot(&self.shared.state.lock().unwrap().snapshot)
    }

    /// Drop an item from the snapshot without notifying subscribers.
    pub fn forget(&self, queue_item_id: i64) {
        self.shared
            .state
            .lock()
            .unwrap()
            .snapshot
            .remove(&queue_item_id);
    }

    /// End every subscriber stream and ignore later publishes.
    pub fn close(&self) {
        let subscribers: Vec<_> = {
            let mut state = self.shared.state.lock().unwrap();
            if state.event_tx.take().is_none() {
                return;
            }
            state.subscribers.drain().map(|(_, token)| token).collect()
        };
        for token in &subscribers {
            token.cancel();
        }
        info!(
            "Progress broadcaster closed ({} subscribers)",
            subscribers.len()
        );
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().unwrap().event_tx.is_none()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().unwrap().subscribers.len()
    }
}

fn sorted_snapshot(snapshot: &HashMap<i64, ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events: Vec<_> = snapshot.values().cloned().collect();
    events.sort_by_key(|e| e.queue_item_id);
    events
}

/// A registered subscriber: its id, the snapshot taken at registration
/// and the live event stream.
pub struct Subscription {
    pub id: u64,
    pub initial: Vec<ProgressEvent>,
    pub stream: ProgressStream,
}

impl Subscription {
    /// Wire frames: the initial snapshot first, then one update per event,
    /// with a heartbeat whenever `heartbeat` elapses without an event.
    pub fn into_frames(self, heartbeat: Duration) -> impl Stream<Item = StreamFrame> {
        let initial = StreamFrame::Message(ProgressEnvelope::Initial(self.initial));
        let updates = stream::unfold(self.stream, move |mut events| async move {
            match tokio::time::timeout(heartbeat, events.recv()).await {
                Ok(Some(event)) => Some((
                    StreamFrame::Message(ProgressEnvelope::Update(event)),
                    events,
                )),
                Ok(None) => None,
                Err(_) => Some((StreamFrame::Heartbeat, events)),
            }
        });
        stream::once(async move { initial }).chain(updates)
    }
}

/// Receiving half of a subscription. Unsubscribes when dropped.
pub struct ProgressStream {
    id: u64,
    event_rx: broadcast::Receiver<ProgressEvent>,
    unsubscribed: CancellationToken,
    dropped: u64,
    hub: Weak<Shared>,
}

impl ProgressStream {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or None once the subscription is closed and drained.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            if self.unsubscribed.is_cancelled() {
                return self.try_recv();
            }
            let result = tokio::select! {
                biased;
                result = self.event_rx.recv() => result,
                _ = self.unsubscribed.cancelled() => continue,
            };
            match result {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => self.record_lag(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.event_rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(n)) => self.record_lag(n),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Events discarded because this subscriber fell behind.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    fn record_lag(&mut self, n: u64) {
        warn!("Progress subscriber {} lagged by {} events", self.id, n);
        self.dropped += n;
    }
}

impl Drop for ProgressStream {
    fn drop(&mut self) {
        if let Some(shared) = self.hub.upgrade() {
            shared.remove_subscriber(self.id);
        }
    }
}
