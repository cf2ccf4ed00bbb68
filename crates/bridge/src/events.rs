//! Single-subscriber event streams
//!
//! Both the hotplug stream and each session's data stream allow at most
//! one active subscriber: a new subscription detaches the previous one
//! instead of stacking on top of it. `EventStream` makes that policy
//! explicit and owns the sink slot, so publishers never talk to a
//! subscriber directly.

use async_channel::{Receiver, Sender, bounded};
use std::sync::Mutex;
use tracing::warn;

/// An event stream with at most one active subscriber
pub struct EventStream<T> {
    capacity: usize,
    sink: Mutex<Option<Sender<T>>>,
}

impl<T> EventStream<T> {
    /// Create a stream whose subscriber channel holds `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            sink: Mutex::new(None),
        }
    }

    /// Subscribe to the stream, replacing any prior subscriber
    ///
    /// The previous subscriber's receiver is closed; events published
    /// from now on go only to the returned receiver.
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = bounded(self.capacity);
        let mut sink = self.sink.lock().unwrap();
        if let Some(old) = sink.replace(tx) {
            old.close();
        }
        rx
    }

    /// Detach the current subscriber, if any
    pub fn unsubscribe(&self) {
        if let Some(old) = self.sink.lock().unwrap().take() {
            old.close();
        }
    }

    /// Whether a subscriber is currently attached
    pub fn has_subscriber(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }

    /// Publish an event to the current subscriber
    ///
    /// Events published with no subscriber attached are dropped, as are
    /// events for a subscriber that went away. A full buffer also drops
    /// the event rather than blocking the publisher; the publisher may
    /// be a pump thread that must stay responsive to its stop flag.
    ///
    /// Returns `true` if the event was delivered to a live subscriber.
    pub fn publish(&self, event: T) -> bool {
        let mut sink = self.sink.lock().unwrap();
        let Some(tx) = sink.as_ref() else {
            return false;
        };

        match tx.try_send(event) {
            Ok(()) => true,
            Err(async_channel::TrySendError::Full(_)) => {
                warn!("event subscriber is not keeping up, dropping event");
                false
            }
            Err(async_channel::TrySendError::Closed(_)) => {
                *sink = None;
                false
            }
        }
    }
}
