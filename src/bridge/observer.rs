//! Observer registries for bridge events.
//!
//! Each bridge owns one [`Observers`] set with three registries:
//! connection established, connection lost, and status updates. Callbacks
//! run synchronously on the bridge event loop, in subscription order. A
//! panicking callback is logged and skipped; the remaining callbacks still
//! run.

// ============================================================================
// Imports
// ============================================================================

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::error;

use crate::identifiers::SubscriptionId;
use crate::protocol::StatusUpdate;

// ============================================================================
// Types
// ============================================================================

/// Shared observer callback.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

// ============================================================================
// ObserverRegistry
// ============================================================================

/// Ordered list of callbacks for one kind of event.
pub struct ObserverRegistry<T: ?Sized> {
    /// Registry name used in logs.
    name: &'static str,
    entries: Mutex<Vec<(SubscriptionId, Callback<T>)>>,
}

impl<T: ?Sized> ObserverRegistry<T> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Appends a callback.
    pub fn subscribe(&self, id: SubscriptionId, callback: Callback<T>) {
        self.entries.lock().push((id, callback));
    }

    /// Removes a callback. Returns `false` if `id` is not registered here.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Invokes every callback with `event`, isolating panics.
    ///
    /// Callbacks run outside the lock, so they may subscribe or unsubscribe.
    /// Returns the number of callbacks that completed normally.
    pub fn notify(&self, event: &T) -> usize {
        let snapshot: Vec<(SubscriptionId, Callback<T>)> = self.entries.lock().clone();

        let mut delivered = 0;
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    error!(registry = self.name, subscription = %id, "Subscriber panicked");
                }
            }
        }
        delivered
    }

    /// Number of callbacks.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no callback is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Removes every callback.
    #[inline]
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

// ============================================================================
// Observers
// ============================================================================

/// The three event registries owned by one bridge.
///
/// Subscription ids are unique across all three registries.
pub struct Observers {
    next_id: AtomicU64,
    /// Channel opened.
    pub connect: ObserverRegistry<()>,
    /// Channel lost involuntarily.
    pub disconnect: ObserverRegistry<()>,
    /// Status update received.
    pub status: ObserverRegistry<StatusUpdate>,
}

impl Default for Observers {
    fn default() -> Self {
        Self::new()
    }
}

impl Observers {
    /// Creates empty registries.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connect: ObserverRegistry::new("connect"),
            disconnect: ObserverRegistry::new("disconnect"),
            status: ObserverRegistry::new("status"),
        }
    }

    /// Allocates a fresh subscription id.
    #[inline]
    pub fn next_id(&self) -> SubscriptionId {
        SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Removes `id` from whichever registry holds it.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.connect.unsubscribe(id) || self.disconnect.unsubscribe(id) || self.status.unsubscribe(id)
    }

    /// Removes every callback from every registry.
    pub fn clear(&self) {
        self.connect.clear();
        self.disconnect.clear();
        self.status.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
