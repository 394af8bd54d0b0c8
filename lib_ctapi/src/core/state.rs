//! Connection lifecycle states and the active-side view the worker publishes.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Lifecycle of one connection worker.
///
/// `Connecting → Active → Degraded(backoff) → Connecting → … → Stopped`.
/// `Stopped` is terminal and only entered through `stop()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// Opening a session.
    Connecting,
    /// Session open, polling.
    Active,
    /// Waiting out a reconnect delay.
    Degraded {
        /// Delay being waited out.
        backoff: Duration,
    },
    /// Worker has exited and the session is closed.
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Active => f.write_str("active"),
            ConnectionState::Degraded { backoff } => {
                write!(f, "degraded (retry in {:.1}s)", backoff.as_secs_f64())
            }
            ConnectionState::Stopped => f.write_str("stopped"),
        }
    }
}

/// Lists and tags live on the current session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveSets {
    /// Lists created on the session.
    pub lists: BTreeSet<String>,
    /// `(list, tag)` pairs acknowledged by the session.
    pub tags: BTreeSet<(String, String)>,
}

/// Active-side view written only by the worker and read by observers.
#[derive(Default)]
pub struct ActiveView {
    inner: Mutex<ActiveSets>,
}

impl ActiveView {
    fn lock(&self) -> MutexGuard<'_, ActiveSets> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current sets.
    pub fn get(&self) -> ActiveSets {
        self.lock().clone()
    }

    /// Replaces the published sets.
    pub fn publish(&self, sets: ActiveSets) {
        *self.lock() = sets;
    }

    /// Forgets everything; the session is gone.
    pub fn clear(&self) {
        *self.lock() = ActiveSets::default();
    }
}
