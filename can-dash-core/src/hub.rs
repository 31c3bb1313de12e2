//! Frame hub
//!
//! Central broker between bus readers and display consumers. Readers call
//! [`FrameHub::ingest_raw_frame`] from their own threads; the hub broadcasts
//! the raw frame, decodes it against the current signal database snapshot
//! and broadcasts one event per decoded signal.
//!
//! Two pieces of shared state live here, both replaced wholesale rather than
//! mutated in place:
//! - the active [`SignalDatabase`], an `Arc` swapped under a write lock;
//! - the subscriber registry, a copy-on-write `Arc<Vec<_>>` so broadcasts
//!   iterate a snapshot and never hold the lock while calling handlers.

use crate::message_decoder::MessageDecoder;
use crate::signals::SignalDatabase;
use crate::types::{DecodedSignal, Frame, HubEvent, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Handle returned by subscribe calls, used to unsubscribe
pub type SubscriptionId = u64;

/// Callback invoked for each broadcast event, on the publishing thread
pub type EventHandler = Arc<dyn Fn(&HubEvent) + Send + Sync>;

/// Which events a subscriber wants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    RawFrames,
    Signals,
    All,
}

impl Interest {
    pub fn wants(&self, event: &HubEvent) -> bool {
        matches!(
            (self, event),
            (Interest::All, _)
                | (Interest::RawFrames, HubEvent::RawFrame(_))
                | (Interest::Signals, HubEvent::Signal(_))
        )
    }
}

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    interest: Interest,
    handler: EventHandler,
}

/// Hub counters since creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub frames_ingested: u64,
    pub signals_emitted: u64,
    pub decode_errors: u64,
}

/// Thread-safe frame broker
pub struct FrameHub {
    database: RwLock<Option<Arc<SignalDatabase>>>,
    subscribers: RwLock<Arc<Vec<Subscriber>>>,
    next_subscription: AtomicU64,
    frames_ingested: AtomicU64,
    signals_emitted: AtomicU64,
    decode_errors: AtomicU64,
}

impl FrameHub {
    /// Create a hub with no database and no subscribers
    pub fn new() -> Self {
        Self {
            database: RwLock::new(None),
            subscribers: RwLock::new(Arc::new(Vec::new())),
            next_subscription: AtomicU64::new(1),
            frames_ingested: AtomicU64::new(0),
            signals_emitted: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        }
    }

    /// Publish a raw frame and its decoded signals to all subscribers.
    ///
    /// Safe to call concurrently from any number of reader threads. Events
    /// for one call are delivered in order: the raw frame first, then each
    /// decoded signal in definition order.
    pub fn ingest_raw_frame(&self, frame: Frame) {
        self.frames_ingested.fetch_add(1, Ordering::Relaxed);
        let subscribers = self.subscriber_snapshot();

        let event = HubEvent::RawFrame(frame);
        Self::dispatch(&subscribers, &event);

        if let HubEvent::RawFrame(frame) = &event {
            self.decode_and_broadcast(&subscribers, frame);
        }
    }

    fn decode_and_broadcast(&self, subscribers: &[Subscriber], frame: &Frame) {
        let Some(database) = self.database() else {
            return;
        };
        let Some(message_def) = database.lookup(frame.identifier) else {
            log::trace!("Unknown CAN ID: 0x{:X} on {}", frame.identifier, frame.bus_name);
            return;
        };

        let values = match MessageDecoder::decode(message_def, &frame.payload) {
            Ok(values) => values,
            Err(e) => {
                self.decode_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "DBC decode error bus={} id=0x{:X} dlc={}: {}",
                    frame.bus_name,
                    frame.identifier,
                    frame.dlc(),
                    e
                );
                return;
            }
        };

        for (signal_name, value) in values {
            let event = HubEvent::Signal(DecodedSignal {
                bus_name: frame.bus_name.clone(),
                identifier: frame.identifier,
                message_name: message_def.name.clone(),
                signal_name: signal_name.to_string(),
                value,
                timestamp: frame.timestamp,
            });
            self.signals_emitted.fetch_add(1, Ordering::Relaxed);
            Self::dispatch(subscribers, &event);
        }
    }

    fn dispatch(subscribers: &[Subscriber], event: &HubEvent) {
        for subscriber in subscribers.iter().filter(|s| s.interest.wants(event)) {
            let handler = &subscriber.handler;
            if panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                log::error!(
                    "Subscriber {} panicked while handling event from {}",
                    subscriber.id,
                    event.bus_name()
                );
            }
        }
    }

    /// Load a DBC file and make it the active database.
    ///
    /// The file is parsed before the swap; on failure the previous database
    /// stays active and the error is returned.
    pub fn load_database(&self, path: &Path) -> Result<Arc<SignalDatabase>> {
        let database = SignalDatabase::load(path)?;
        Ok(self.set_database(database))
    }

    /// Replace the active database in a single swap
    pub fn set_database(&self, database: SignalDatabase) -> Arc<SignalDatabase> {
        let database = Arc::new(database);
        *write_lock(&self.database) = Some(Arc::clone(&database));
        log::info!(
            "Active signal database replaced ({} messages)",
            database.stats().num_messages
        );
        database
    }

    /// Drop the active database; subsequent frames are only broadcast raw
    pub fn clear_database(&self) {
        *write_lock(&self.database) = None;
    }

    /// Snapshot of the active database
    pub fn database(&self) -> Option<Arc<SignalDatabase>> {
        read_lock(&self.database).clone()
    }

    /// Register a handler for events matching `interest`
    pub fn subscribe(&self, interest: Interest, handler: EventHandler) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let mut registry = write_lock(&self.subscribers);
        let mut updated = Vec::with_capacity(registry.len() + 1);
        updated.extend(registry.iter().cloned());
        updated.push(Subscriber {
            id,
            interest,
            handler,
        });
        *registry = Arc::new(updated);
        log::debug!("Subscriber {} registered for {:?}", id, interest);
        id
    }

    /// Register a queue that receives events on the consumer's own thread.
    ///
    /// Forwarding uses `try_send` and never blocks the publishing reader.
    /// With `capacity: None` the queue is unbounded and nothing is dropped.
    /// A bounded queue drops events that arrive while it is full and counts
    /// them in [`EventReceiver::dropped`].
    pub fn subscribe_queue(&self, interest: Interest, capacity: Option<usize>) -> EventReceiver {
        let (tx, rx) = match capacity {
            Some(cap) => crossbeam_channel::bounded(cap),
            None => crossbeam_channel::unbounded(),
        };
        let dropped = Arc::new(AtomicU64::new(0));

        let handler = queue_forwarder(tx, Arc::clone(&dropped));
        let id = self.subscribe(interest, handler);

        EventReceiver { id, rx, dropped }
    }

    /// Remove a subscription; returns false if the id was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = write_lock(&self.subscribers);
        if !registry.iter().any(|s| s.id == id) {
            return false;
        }
        let updated: Vec<Subscriber> = registry.iter().filter(|s| s.id != id).cloned().collect();
        *registry = Arc::new(updated);
        log::debug!("Subscriber {} removed", id);
        true
    }

    pub fn subscriber_count(&self) -> usize {
        read_lock(&self.subscribers).len()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            frames_ingested: self.frames_ingested.load(Ordering::Relaxed),
            signals_emitted: self.signals_emitted.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }

    fn subscriber_snapshot(&self) -> Arc<Vec<Subscriber>> {
        Arc::clone(&read_lock(&self.subscribers))
    }
}

impl Default for FrameHub {
    fn default() -> Self {
        Self::new()
    }
}

fn queue_forwarder(tx: Sender<HubEvent>, dropped: Arc<AtomicU64>) -> EventHandler {
    Arc::new(move |event: &HubEvent| match tx.try_send(event.clone()) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if total == 1 || total % 1000 == 0 {
                log::warn!("Consumer queue full, {} events dropped so far", total);
            }
        }
        // Consumer went away without unsubscribing
        Err(TrySendError::Disconnected(_)) => {}
    })
}

// A panicking writer cannot leave these locks half-updated: every write is a
// single assignment, so the poisoned value is still consistent.
fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// Consumer end of a hub queue subscription
pub struct EventReceiver {
    id: SubscriptionId,
    rx: Receiver<HubEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventReceiver {
    /// Subscription id, for [`FrameHub::unsubscribe`]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Take the next event if one is queued
    pub fn try_recv(&self) -> Option<HubEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<HubEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Take up to `max` queued events without blocking
    pub fn drain(&self, max: usize) -> Vec<HubEvent> {
        self.rx.try_iter().take(max).collect()
    }

    /// Number of events currently queued
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Events dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
