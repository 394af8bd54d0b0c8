//! # Site Configuration
//!
//! A JSON5 file naming the endpoints of a site, the connection tuning shared
//! by all of them and the tag lists to poll:
//!
//! ```json5
//! {
//!   endpoints: [
//!     { host: "10.0.0.1", username: "engineer", password: "secret" },
//!     { host: "10.0.0.2", username: "engineer", password: "secret", mode: 4 },
//!   ],
//!   connection: { scanIntervalMs: 250, tokenPolicy: "sticky" },
//!   lists: {
//!     pumps: ["Pump1_Speed", { name: "Pump1_Flow", deadbandPercent: 0.5 }],
//!   },
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::connections::cluster::ClusterConnection;
use crate::core::config::{ConnectionConfig, InvalidConfig};
use crate::core::model::{Endpoint, TagOptions};

/// Errors while loading a site file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid JSON5 or does not match the schema.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// The file parsed but its content is unusable.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<InvalidConfig> for ConfigError {
    fn from(e: InvalidConfig) -> Self {
        ConfigError::Invalid(e.0)
    }
}

/// A tag entry: a bare name, or a name with add options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagSpec {
    /// Tag added with default options.
    Name(String),
    /// Tag added with explicit options.
    Detailed {
        /// Tag name.
        name: String,
        /// Options passed to the host.
        #[serde(flatten)]
        options: TagOptions,
    },
}

impl TagSpec {
    /// Tag name.
    pub fn name(&self) -> &str {
        match self {
            TagSpec::Name(name) => name,
            TagSpec::Detailed { name, .. } => name,
        }
    }

    /// Add options, defaults for a bare name.
    pub fn options(&self) -> TagOptions {
        match self {
            TagSpec::Name(_) => TagOptions::default(),
            TagSpec::Detailed { options, .. } => options.clone(),
        }
    }
}

/// # Site Config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    /// Endpoints, one cluster member each.
    pub endpoints: Vec<Endpoint>,
    /// Tuning shared by every member.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Tag lists by name.
    #[serde(default)]
    pub lists: BTreeMap<String, Vec<TagSpec>>,
}

impl SiteConfig {
    /// Reads and validates a site file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_json5_str(&content)?;
        log::info!(
            "Loaded site config {:?}: {} endpoints, {} lists",
            path,
            config.endpoints.len(),
            config.lists.len()
        );
        Ok(config)
    }

    /// Parses and validates site JSON5 text.
    pub fn from_json5_str(text: &str) -> Result<Self, ConfigError> {
        let config: SiteConfig = json5::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the site can be connected to.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::Invalid("at least one endpoint is required".to_string()));
        }
        if let Some(e) = self.endpoints.iter().find(|e| e.host.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("endpoint with empty host: {:?}", e)));
        }
        for (list, tags) in &self.lists {
            if list.trim().is_empty() {
                return Err(ConfigError::Invalid("list with empty name".to_string()));
            }
            if tags.iter().any(|t| t.name().trim().is_empty()) {
                return Err(ConfigError::Invalid(format!("list {} has a tag with an empty name", list)));
            }
        }
        self.connection.validate()?;
        Ok(())
    }

    /// Number of `(list, tag)` entries.
    pub fn tag_count(&self) -> usize {
        self.lists.values().map(Vec::len).sum()
    }

    /// Requests every configured list and tag on `cluster`.
    pub fn apply_to(&self, cluster: &ClusterConnection) {
        for (list, tags) in &self.lists {
            cluster.add_list(list);
            for tag in tags {
                cluster.add_tag_with(list, tag.name(), tag.options());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::TokenPolicy;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SITE: &str = r#"{
        // Two redundant servers.
        endpoints: [
            { host: "10.0.0.1", username: "engineer", password: "secret" },
            { host: "10.0.0.2", username: "engineer", password: "secret", mode: 4 },
        ],
        connection: { scanIntervalMs: 250, tokenPolicy: "sticky" },
        lists: {
            pumps: ["Pump1_Speed", { name: "Pump1_Flow", deadbandPercent: 0.5 }],
        },
    }"#;

    #[test]
    fn test_site_file_parses_with_defaults() {
        let site = SiteConfig::from_json5_str(SITE).unwrap();

        assert_eq!(site.endpoints.len(), 2);
        assert_eq!(site.endpoints[1].mode.0, 4);
        assert_eq!(site.connection.scan_interval_ms, 250);
        assert_eq!(site.connection.backoff_floor_ms, 500);
        assert_eq!(site.connection.token_policy, TokenPolicy::Sticky);
        assert_eq!(site.tag_count(), 2);

        let pumps = &site.lists["pumps"];
        assert_eq!(pumps[0].options(), TagOptions::default());
        assert_eq!(pumps[1].name(), "Pump1_Flow");
        let flow = pumps[1].options();
        assert_eq!(flow.deadband_percent, 0.5);
        assert_eq!(flow.poll_period_ms, 300);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SITE.as_bytes()).unwrap();
        let site = SiteConfig::load(file.path()).unwrap();
        assert_eq!(site.endpoints[0].host, "10.0.0.1");
    }

    #[test]
    fn test_site_without_endpoints_is_rejected() {
        let err = SiteConfig::from_json5_str("{ endpoints: [] }").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bad_tuning_is_rejected() {
        let text = r#"{
            endpoints: [{ host: "a", username: "u", password: "p" }],
            connection: { backoffFloorMs: 1000, backoffCeilingMs: 10 },
        }"#;
        assert!(matches!(SiteConfig::from_json5_str(text), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        assert!(matches!(SiteConfig::from_json5_str("{ endpoints: "), Err(ConfigError::Parse(_))));
        assert!(matches!(
            SiteConfig::load(Path::new("/nonexistent/site.json5")),
            Err(ConfigError::Io(_))
        ));
    }
}
