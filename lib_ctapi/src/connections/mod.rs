//! # Connections Module
//!
//! Long-running clients of a CtAPI host.
//!
//! ## Contained Modules:
//! - **`connection`**: The public `Connection` handle. Registration calls land
//!   in its registry; a background worker owns the session.
//! - **`worker`**: The reconnect state machine and the scan cycle (reconcile,
//!   refresh, drain, deliver, sleep).
//! - **`cluster`**: `ClusterConnection`, which mirrors registrations to several
//!   connections sharing one delivery token.
//! - **`direct`**: One-shot sessions for reads, writes, remote calls and
//!   searches outside the polling loop.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Multi-endpoint connections sharing one delivery token.
pub mod cluster;
/// The public connection handle.
pub mod connection;
/// One-shot sessions.
pub mod direct;
/// Background worker driving one session.
mod worker;

// --- Public API Re-exports ---
pub use cluster::ClusterConnection;
pub use connection::{Connection, ConnectionSnapshot};
pub use direct::DirectSession;
