//! # lib_ctapi
//!
//! Client-side connections to a CtAPI process-control host. A `Connection`
//! keeps one session alive against one endpoint, converges host-side tag
//! lists toward what callers asked for, polls them for change events and fans
//! batches out to subscribers. A `ClusterConnection` runs several of them under
//! one shared delivery token so only one member invokes subscriber code at a time.
//!
//! Modules are gated by cargo features the same way across the workspace:
//! `configs`, `loggers`, `simulator` (or `full` for all of them).

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Session adapter boundary, data model, errors and the pieces the workers share.
pub mod core;
/// Long-running connections, clusters and one-shot direct sessions.
pub mod connections;

/// Connection tuning and JSON5 site files.
#[cfg(feature = "configs")]
pub mod configs;
/// fern-based console and file logging.
#[cfg(feature = "loggers")]
pub mod loggers;
/// In-memory host implementing the session adapter.
#[cfg(any(test, feature = "simulator"))]
pub mod simulator;

// --- Public API Re-exports ---
pub use crate::connections::{ClusterConnection, Connection, ConnectionSnapshot, DirectSession};
pub use crate::core::config::{ConnectionConfig, TokenPolicy};
pub use crate::core::error::{CtApiError, ErrorDisposition, HostStatus};
pub use crate::core::model::{
    Endpoint, EventBatch, EventMask, ListMode, OpenMode, TagEvent, TagOptions, TagValue,
};
pub use crate::core::state::ConnectionState;
