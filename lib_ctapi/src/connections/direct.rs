//! # Direct Session
//!
//! A session opened for a handful of one-shot calls: reading or writing a
//! single tag, evaluating a function on the host, or searching its object
//! tables. No lists, no polling, no reconnects; errors go straight back to
//! the caller.

use crate::core::adapter::{SearchRow, Session, SessionFactory};
use crate::core::error::CtApiError;
use crate::core::model::{Endpoint, TagValue};

/// An open session owned by the caller.
pub struct DirectSession<S: Session> {
    session: S,
    host: String,
    closed: bool,
}

impl<S: Session> DirectSession<S> {
    /// Opens a session on `endpoint`.
    pub async fn open<F>(factory: &F, endpoint: &Endpoint) -> Result<Self, CtApiError>
    where
        F: SessionFactory<Session = S>,
    {
        let session = factory.open(endpoint).await?;
        log::debug!("{} Direct session opened", endpoint.host);
        Ok(Self {
            session,
            host: endpoint.host.clone(),
            closed: false,
        })
    }

    /// Endpoint host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Current value of a tag.
    pub async fn read_tag(&mut self, tag: &str) -> Result<TagValue, CtApiError> {
        self.session.read_tag(tag).await
    }

    /// Writes a tag.
    pub async fn write_tag(&mut self, tag: &str, value: &TagValue) -> Result<(), CtApiError> {
        log::info!("{} Writing {} = {}", self.host, tag, value);
        self.session.write_tag(tag, value).await
    }

    /// Evaluates a function expression on the host, e.g. `Version(3)`.
    pub async fn call_function(&mut self, expression: &str) -> Result<TagValue, CtApiError> {
        self.session.call_function(expression).await
    }

    /// Rows of a host object search. Each row maps field names to values.
    pub async fn search(&mut self, query: &str) -> Result<Vec<SearchRow>, CtApiError> {
        self.session.search(query).await
    }

    /// Closes the session.
    pub async fn close(mut self) {
        self.session.close().await;
        self.closed = true;
        log::debug!("{} Direct session closed", self.host);
    }
}

impl<S: Session> Drop for DirectSession<S> {
    fn drop(&mut self) {
        if !self.closed {
            log::warn!("{} Direct session dropped without close()", self.host);
        }
    }
}
