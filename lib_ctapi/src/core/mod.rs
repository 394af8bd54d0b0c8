//! # Core Connection Engine
//!
//! The building blocks every connection worker is assembled from. Nothing in
//! here owns a thread or a task; the `connections` module composes these parts
//! into running workers.
//!
//! ## Core Components:
//!
//! - **`adapter`**: The session adapter boundary. The worker only ever talks to
//!   the host through the `SessionFactory` / `Session` traits.
//!
//! - **`error`**: Typed host failures and the classification of host status
//!   codes into reconnect / skip-tag / transient dispositions.
//!
//! - **`registry`**: The caller-facing "requested" side of the state. Lists and
//!   tags are appended from any thread and never removed.
//!
//! - **`dispatcher`**: Per-list subscriber fan-out. One `Arc<EventBatch>` is
//!   shared by every subscriber of a list.
//!
//! - **`token`**: The delivery token shared by the members of a cluster.
//!
//! - **`backoff`**: Doubling reconnect delay with a floor and a ceiling.
//!
//! - **`state`**: Connection lifecycle states and the snapshot published for
//!   observers.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Session adapter traits consumed by the workers.
pub mod adapter;
/// Exponential reconnect backoff.
pub mod backoff;
/// Per-connection tuning.
pub mod config;
/// Subscriber fan-out keyed by list name.
pub mod dispatcher;
/// Host error taxonomy and status-code classification.
pub mod error;
/// Endpoints, modes, tag values and event batches.
pub mod model;
/// Append-only requested lists and tags.
pub mod registry;
/// Connection states and observable snapshots.
pub mod state;
/// Cross-connection delivery token.
pub mod token;

// --- Public API Re-exports ---
pub use adapter::{ListHandle, SearchRow, Session, SessionFactory, TagHandle};
pub use backoff::Backoff;
pub use dispatcher::{Dispatcher, Subscriber};
pub use error::{CtApiError, ErrorDisposition, HostStatus};
pub use registry::{Registry, TagRequest};
pub use token::{DeliveryGuard, DeliveryToken};
