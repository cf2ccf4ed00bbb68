//! Pending permission tracking
//!
//! The OS answers permission prompts asynchronously, so the bridge has
//! to remember who is waiting for which device. At most one waiter per
//! device is allowed; registering a second one for the same device
//! supersedes the first (the service resolves the superseded waiter
//! with a denial so no caller hangs).

use protocol::DeviceId;
use std::collections::HashMap;

/// One pending waiter per device
///
/// `T` is whatever the owner needs to resume when the grant arrives;
/// the broker only enforces the one-pending-per-device policy.
#[derive(Default)]
pub struct PermissionBroker<T> {
    pending: HashMap<DeviceId, T>,
}

impl<T> PermissionBroker<T> {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Register a waiter for a device
    ///
    /// Returns the superseded waiter when one was already pending; the
    /// caller must resolve it (replace-pending policy).
    pub fn register(&mut self, device_id: DeviceId, waiter: T) -> Option<T> {
        self.pending.insert(device_id, waiter)
    }

    /// Remove and return the waiter for a device, if any
    pub fn take(&mut self, device_id: DeviceId) -> Option<T> {
        self.pending.remove(&device_id)
    }

    /// Whether a waiter is pending for a device
    pub fn has_pending(&self, device_id: DeviceId) -> bool {
        self.pending.contains_key(&device_id)
    }

    /// Drain every pending waiter (used at shutdown)
    pub fn drain(&mut self) -> Vec<(DeviceId, T)> {
        self.pending.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_waiter_roundtrip() {
        let mut broker = PermissionBroker::new();
        assert!(broker.register(DeviceId(1), "first").is_none());
        assert!(broker.has_pending(DeviceId(1)));
        assert_eq!(broker.take(DeviceId(1)), Some("first"));
        assert!(!broker.has_pending(DeviceId(1)));
    }

    #[test]
    fn test_second_request_supersedes_first() {
        let mut broker = PermissionBroker::new();
        assert!(broker.register(DeviceId(1), "first").is_none());
        let superseded = broker.register(DeviceId(1), "second");
        assert_eq!(superseded, Some("first"));
        assert_eq!(broker.take(DeviceId(1)), Some("second"));
    }

    #[test]
    fn test_independent_devices() {
        let mut broker = PermissionBroker::new();
        broker.register(DeviceId(1), "a");
        broker.register(DeviceId(2), "b");
        assert_eq!(broker.take(DeviceId(2)), Some("b"));
        assert!(broker.has_pending(DeviceId(1)));
    }

    #[test]
    fn test_take_unknown_device() {
        let mut broker: PermissionBroker<&str> = PermissionBroker::new();
        assert_eq!(broker.take(DeviceId(9)), None);
    }
}
