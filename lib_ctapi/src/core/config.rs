//! Per-connection tuning. Every field has a default so a site file only
//! needs to name what it changes.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::core::model::{EventMask, ListMode};

/// How a cluster member holds the delivery token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TokenPolicy {
    /// Acquire before delivering, release at the end of the cycle.
    #[default]
    PerCycle,
    /// Keep the token across cycles until the session is left. The holder is
    /// the only publisher; the other members stand by.
    Sticky,
}

/// Rejected connection tuning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid connection config: {0}")]
pub struct InvalidConfig(pub String);

/// # Connection Config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    /// Pacing sleep between poll cycles.
    pub scan_interval_ms: u64,
    /// First reconnect delay.
    pub backoff_floor_ms: u64,
    /// Largest reconnect delay.
    pub backoff_ceiling_ms: u64,
    /// How long a cycle may wait for the delivery token; 0 only tries once.
    pub token_wait_ms: u64,
    /// Token holding policy inside a cluster.
    pub token_policy: TokenPolicy,
    /// Mode every tag list is created with.
    pub list_mode: ListMode,
    /// Events drained from every list.
    pub event_mask: EventMask,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 100,
            backoff_floor_ms: 500,
            backoff_ceiling_ms: 10_000,
            token_wait_ms: 100,
            token_policy: TokenPolicy::PerCycle,
            list_mode: ListMode::default(),
            event_mask: EventMask::default(),
        }
    }
}

impl ConnectionConfig {
    /// Pacing sleep as a `Duration`.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    /// First reconnect delay as a `Duration`.
    pub fn backoff_floor(&self) -> Duration {
        Duration::from_millis(self.backoff_floor_ms)
    }

    /// Largest reconnect delay as a `Duration`.
    pub fn backoff_ceiling(&self) -> Duration {
        Duration::from_millis(self.backoff_ceiling_ms)
    }

    /// Token wait as a `Duration`.
    pub fn token_wait(&self) -> Duration {
        Duration::from_millis(self.token_wait_ms)
    }

    /// Checks the values a worker cannot run with.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.scan_interval_ms == 0 {
            return Err(InvalidConfig("scanIntervalMs must be greater than zero".into()));
        }
        if self.backoff_floor_ms == 0 {
            return Err(InvalidConfig("backoffFloorMs must be greater than zero".into()));
        }
        if self.backoff_ceiling_ms < self.backoff_floor_ms {
            return Err(InvalidConfig(format!(
                "backoffCeilingMs ({}) is below backoffFloorMs ({})",
                self.backoff_ceiling_ms, self.backoff_floor_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.scan_interval(), Duration::from_millis(100));
        assert_eq!(config.backoff_floor(), Duration::from_millis(500));
        assert_eq!(config.backoff_ceiling(), Duration::from_secs(10));
        assert_eq!(config.token_policy, TokenPolicy::PerCycle);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"scanIntervalMs": 250, "tokenPolicy": "sticky"}"#).unwrap();
        assert_eq!(config.scan_interval_ms, 250);
        assert_eq!(config.token_policy, TokenPolicy::Sticky);
        assert_eq!(config.backoff_ceiling_ms, 10_000);
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let config = ConnectionConfig {
            backoff_floor_ms: 2_000,
            backoff_ceiling_ms: 1_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let zero_scan = ConnectionConfig {
            scan_interval_ms: 0,
            ..Default::default()
        };
        assert!(zero_scan.validate().is_err());
    }
}
