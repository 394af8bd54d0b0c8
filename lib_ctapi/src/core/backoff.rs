//! Reconnect backoff: the first wait is the floor, every further wait doubles
//! until it reaches the ceiling. A successful open resets it.

use std::time::Duration;

/// Doubling delay between reconnect attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `floor`. A ceiling below the floor is raised to it.
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    /// The delay the next call to `next_delay` will return.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Returns the delay to wait now and advances to the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        delay
    }

    /// Back to the floor.
    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}
