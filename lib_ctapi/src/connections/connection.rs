//! # Connection
//!
//! The caller-facing handle of one endpoint connection. Building it spawns
//! the background worker on the current tokio runtime; registration calls
//! only append to the requested state and never block on the host.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connections::worker::Worker;
use crate::core::adapter::SessionFactory;
use crate::core::config::{ConnectionConfig, InvalidConfig};
use crate::core::dispatcher::{Dispatcher, Subscriber};
use crate::core::model::{Endpoint, EventBatch, TagOptions};
use crate::core::registry::Registry;
use crate::core::state::{ActiveView, ConnectionState};
use crate::core::token::DeliveryToken;

/// State shared between the handle and its worker.
pub(crate) struct Shared {
    pub(crate) endpoint: Endpoint,
    pub(crate) config: ConnectionConfig,
    pub(crate) registry: Registry,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) active: ActiveView,
}

/// Point-in-time view of a connection's requested and active state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    /// Endpoint host.
    pub host: String,
    /// Worker state.
    pub state: ConnectionState,
    /// Requested lists.
    pub lists_requested: BTreeSet<String>,
    /// Requested `(list, tag)` pairs.
    pub tags_requested: BTreeSet<(String, String)>,
    /// Lists live on the current session.
    pub lists_active: BTreeSet<String>,
    /// `(list, tag)` pairs live on the current session.
    pub tags_active: BTreeSet<(String, String)>,
}

impl ConnectionSnapshot {
    /// True when every active list and tag is also requested.
    pub fn active_within_requested(&self) -> bool {
        self.lists_active.is_subset(&self.lists_requested)
            && self.tags_active.is_subset(&self.tags_requested)
    }

    /// True when everything requested is live on the session.
    pub fn converged(&self) -> bool {
        self.lists_active == self.lists_requested && self.tags_active == self.tags_requested
    }
}

/// # Connection
///
/// Keeps one session alive against one endpoint and delivers change events
/// of its tag lists to subscribers.
pub struct Connection {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl Connection {
    /// Validates `config` and starts a standalone connection. Must be called
    /// from within a tokio runtime.
    pub fn spawn<F: SessionFactory>(
        endpoint: Endpoint,
        factory: F,
        config: ConnectionConfig,
    ) -> Result<Self, InvalidConfig> {
        Self::spawn_with_token(endpoint, factory, config, None)
    }

    /// Starts a connection that must hold `token` (when given) while it
    /// invokes subscribers.
    pub fn spawn_with_token<F: SessionFactory>(
        endpoint: Endpoint,
        factory: F,
        config: ConnectionConfig,
        token: Option<DeliveryToken>,
    ) -> Result<Self, InvalidConfig> {
        config.validate()?;

        let shared = Arc::new(Shared {
            endpoint,
            config,
            registry: Registry::new(),
            dispatcher: Dispatcher::new(),
            active: ActiveView::default(),
        });
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let worker = Worker::new(Arc::clone(&shared), factory, token, cancel.clone(), state_tx);
        let handle = tokio::spawn(worker.run());

        Ok(Self {
            shared,
            cancel,
            worker: Mutex::new(Some(handle)),
            state_rx,
        })
    }

    /// Endpoint host.
    pub fn host(&self) -> &str {
        &self.shared.endpoint.host
    }

    /// Tuning this connection runs with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Requests a tag list. Idempotent.
    pub fn add_list(&self, name: &str) {
        if self.shared.registry.add_list(name) {
            log::debug!("{} Requested tag list {}", self.host(), name);
        }
    }

    /// Requests a tag in a list with default options. Idempotent.
    pub fn add_tag(&self, list: &str, tag: &str) {
        self.add_tag_with(list, tag, TagOptions::default());
    }

    /// Requests a tag in a list. The first registration's options win.
    pub fn add_tag_with(&self, list: &str, tag: &str, options: TagOptions) {
        if self.shared.registry.add_tag(list, tag, options) {
            log::debug!("{} Requested tag {} -> {}", self.host(), list, tag);
        }
    }

    /// Invokes `callback` once per cycle with each non-empty batch of `list`.
    pub fn subscribe<C>(&self, list: &str, callback: C)
    where
        C: Fn(Arc<EventBatch>) + Send + Sync + 'static,
    {
        self.subscribe_shared(list, Arc::new(callback));
    }

    /// Same as `subscribe` for a callback that is already shared.
    pub fn subscribe_shared(&self, list: &str, callback: Subscriber) {
        self.shared.dispatcher.subscribe(list, callback);
    }

    /// Current worker state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Requested and active state. Active is read first, so the snapshot
    /// never shows an active entry missing from the requested side.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        let active = self.shared.active.get();
        let state = self.state();
        ConnectionSnapshot {
            host: self.host().to_string(),
            state,
            lists_requested: self.shared.registry.lists().into_iter().collect(),
            tags_requested: self
                .shared
                .registry
                .tags()
                .into_iter()
                .map(|t| (t.list, t.tag))
                .collect(),
            lists_active: active.lists,
            tags_active: active.tags,
        }
    }

    /// Stops the worker and waits until it has released the token and closed
    /// its session. Later calls return immediately.
    pub async fn stop(&self) {
        let handle = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(handle) = handle else {
            return;
        };

        log::info!("{} Stopping connection", self.host());
        self.cancel.cancel();
        if let Err(e) = handle.await {
            log::error!("{} Connection worker ended abnormally: {}", self.host(), e);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
