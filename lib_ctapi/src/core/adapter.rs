//! # Session Adapter Boundary
//!
//! The connection core never touches the native library. It opens sessions
//! through a `SessionFactory` and issues every tag and list operation through
//! the resulting `Session`. A session is owned by exactly one worker, which is
//! why every operation takes `&mut self`.
//!
//! Implementations backed by a blocking native binding are expected to move
//! their calls off the async executor themselves (for example with
//! `tokio::task::spawn_blocking`).

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::core::error::CtApiError;
use crate::core::model::{Endpoint, EventMask, ListMode, TagOptions, TagValue};

/// Host-assigned handle of a tag list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListHandle(pub u64);

/// Host-assigned handle of a tag inside a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagHandle(pub u64);

/// One row of a search result: field name to textual value.
pub type SearchRow = BTreeMap<String, String>;

/// Opens sessions against an endpoint.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    /// Session type produced by this factory.
    type Session: Session;

    /// Opens an authenticated session, or fails with `FailedToConnect`.
    async fn open(&self, endpoint: &Endpoint) -> Result<Self::Session, CtApiError>;
}

/// An open session against one host.
#[async_trait]
pub trait Session: Send + 'static {
    /// Closes the session. Handles obtained from it are invalid afterwards.
    async fn close(&mut self);

    /// Creates a tag list.
    async fn create_list(&mut self, mode: ListMode) -> Result<ListHandle, CtApiError>;

    /// Releases a tag list.
    async fn free_list(&mut self, list: ListHandle) -> Result<(), CtApiError>;

    /// Adds a tag to a list.
    async fn add_tag(
        &mut self,
        list: ListHandle,
        tag: &str,
        options: &TagOptions,
    ) -> Result<TagHandle, CtApiError>;

    /// Refreshes a list against the host.
    async fn refresh_list(&mut self, list: ListHandle) -> Result<(), CtApiError>;

    /// Pops the next pending change event of the list, if any.
    async fn next_event(
        &mut self,
        list: ListHandle,
        mask: EventMask,
    ) -> Result<Option<TagHandle>, CtApiError>;

    /// Reads a tag's value as of the last list refresh.
    async fn read_value(&mut self, tag: TagHandle) -> Result<TagValue, CtApiError>;

    /// Reads a single tag directly, outside of any list.
    async fn read_tag(&mut self, tag: &str) -> Result<TagValue, CtApiError>;

    /// Writes a single tag directly.
    async fn write_tag(&mut self, tag: &str, value: &TagValue) -> Result<(), CtApiError>;

    /// Runs a remote procedure and returns its result.
    async fn call_function(&mut self, expression: &str) -> Result<TagValue, CtApiError>;

    /// Runs a paged search query and collects every row.
    async fn search(&mut self, query: &str) -> Result<Vec<SearchRow>, CtApiError>;
}
