//! # Configuration Modules
//!
//! Site files describing which endpoints to connect to and which lists and
//! tags to poll. Per-connection tuning (`ConnectionConfig`) lives in
//! `core::config` so it is available without this feature.

/// JSON5 site files: endpoints, connection tuning, lists and tags.
pub mod config_site;

pub use config_site::{ConfigError, SiteConfig, TagSpec};
