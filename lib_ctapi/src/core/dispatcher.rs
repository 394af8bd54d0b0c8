//! # Subscriber Dispatcher
//!
//! Fans one list's batch out to every callback subscribed to that list.
//!
//! ## Core Design Principles:
//!
//! 1.  **Zero-Copy Fan-out**: The batch is wrapped in an `Arc` once; every
//!     subscriber receives a pointer to the same allocation.
//!
//! 2.  **Lock-free callbacks**: Matching callbacks are collected under the lock
//!     and invoked after it is released, so a callback may register further
//!     subscriptions without deadlocking.
//!
//! 3.  **Isolation**: A panicking callback is caught and logged; the remaining
//!     subscribers of the list still run and the worker keeps polling.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::model::EventBatch;

/// A subscriber callback.
pub type Subscriber = Arc<dyn Fn(Arc<EventBatch>) + Send + Sync>;

/// Multimap from list name to subscriber callbacks.
#[derive(Default)]
pub struct Dispatcher {
    subscribers: Mutex<Vec<(String, Subscriber)>>,
}

impl Dispatcher {
    /// No subscribers yet.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, Subscriber)>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a callback for a list. Registrations are never removed.
    pub fn subscribe(&self, list: &str, callback: Subscriber) {
        self.lock().push((list.to_string(), callback));
        log::debug!("Subscriber registered for list '{}'", list);
    }

    /// Number of callbacks registered for a list.
    pub fn subscriber_count(&self, list: &str) -> usize {
        self.lock().iter().filter(|(name, _)| name == list).count()
    }

    /// Invokes every subscriber of `batch.list` once with the batch.
    ///
    /// Returns how many callbacks completed without panicking.
    pub fn deliver(&self, batch: EventBatch) -> usize {
        let targets: Vec<Subscriber> = self
            .lock()
            .iter()
            .filter(|(name, _)| *name == batch.list)
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        let frame = Arc::new(batch);
        let mut delivered = 0;
        for callback in targets {
            match catch_unwind(AssertUnwindSafe(|| callback(Arc::clone(&frame)))) {
                Ok(()) => delivered += 1,
                Err(_) => log::error!(
                    "{} Subscriber for list '{}' panicked; continuing with the rest",
                    frame.host,
                    frame.list
                ),
            }
        }
        delivered
    }
}
