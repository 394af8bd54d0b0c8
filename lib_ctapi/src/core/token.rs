//! # Delivery Token
//!
//! One binary lock shared by every member of a cluster. Holding the guard is
//! the right to invoke subscriber callbacks; dropping it releases the token,
//! so every exit path out of a delivery section (including errors and task
//! cancellation) gives it back.
//!
//! Waiters on a bounded acquire are served in FIFO order, which is what keeps
//! members that cycle at different rates from starving each other.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Shared mutual-exclusion token for subscriber delivery.
#[derive(Debug, Clone, Default)]
pub struct DeliveryToken {
    inner: Arc<Mutex<()>>,
}

/// Proof of holding the delivery token. Released on drop.
#[derive(Debug)]
pub struct DeliveryGuard {
    _guard: OwnedMutexGuard<()>,
}

impl DeliveryToken {
    /// A fresh, unheld token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the token, waiting at most `wait`. A zero wait tries once
    /// without blocking.
    pub async fn acquire(&self, wait: Duration) -> Option<DeliveryGuard> {
        if wait.is_zero() {
            return self.try_acquire();
        }
        tokio::time::timeout(wait, Arc::clone(&self.inner).lock_owned())
            .await
            .ok()
            .map(|guard| DeliveryGuard { _guard: guard })
    }

    /// Acquires the token only if nobody holds it.
    pub fn try_acquire(&self) -> Option<DeliveryGuard> {
        Arc::clone(&self.inner)
            .try_lock_owned()
            .ok()
            .map(|guard| DeliveryGuard { _guard: guard })
    }

    /// True while some member holds the token.
    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_is_exclusive_until_dropped() {
        let token = DeliveryToken::new();
        let other = token.clone();

        let guard = token.try_acquire().expect("free token");
        assert!(other.is_held());
        assert!(other.try_acquire().is_none());
        assert!(other.acquire(Duration::from_millis(20)).await.is_none());

        drop(guard);
        assert!(!other.is_held());
        assert!(other.acquire(Duration::ZERO).await.is_some());
    }

    #[tokio::test]
    async fn test_bounded_wait_receives_released_token() {
        let token = DeliveryToken::new();
        let guard = token.try_acquire().expect("free token");

        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.acquire(Duration::from_secs(2)).await.is_some() });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
        assert!(handle.await.unwrap());
    }
}
