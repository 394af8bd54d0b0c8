//! # Connection Worker
//!
//! One tokio task per connection. It owns the session exclusively and is the
//! only code that issues calls against it.
//!
//! ## Workflow:
//! 1.  **Connecting**: open a session. Success resets the backoff to its floor;
//!     failure waits out the next backoff delay (`Degraded`) and retries.
//! 2.  **Active**: every cycle reconciles requested lists/tags into the session,
//!     refreshes each active list and, while authorized by the delivery token,
//!     drains its events into one batch for its subscribers. Then it sleeps for
//!     the scan interval.
//! 3.  A lost link tears the session down and goes back to `Connecting` after
//!     one backoff delay. Transient errors keep the session; the first
//!     faulted cycle after a clean one skips the pacing sleep, later
//!     consecutive ones do not. Unknown tags are logged and skipped.
//! 4.  Cancellation is observed at the top of every cycle and during every
//!     sleep; the token is released and the session closed before exit.

use chrono::Utc;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::connections::connection::Shared;
use crate::core::adapter::{ListHandle, Session, SessionFactory, TagHandle};
use crate::core::backoff::Backoff;
use crate::core::config::TokenPolicy;
use crate::core::error::{CtApiError, ErrorDisposition, HostStatus};
use crate::core::model::{EventBatch, TagEvent};
use crate::core::state::{ActiveSets, ConnectionState};
use crate::core::token::{DeliveryGuard, DeliveryToken};

/// Sleeps for `delay` unless cancelled first. Returns `false` on cancellation.
async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Why a session was left.
#[derive(Debug, PartialEq, Eq)]
enum SessionExit {
    Stopped,
    LinkLost,
}

/// The session is unusable and must be reopened.
struct LinkLost(CtApiError);

pub(crate) struct Worker<F: SessionFactory> {
    shared: Arc<Shared>,
    factory: F,
    token: Option<DeliveryToken>,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
    backoff: Backoff,
}

impl<F: SessionFactory> Worker<F> {
    pub(crate) fn new(
        shared: Arc<Shared>,
        factory: F,
        token: Option<DeliveryToken>,
        cancel: CancellationToken,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let backoff = Backoff::new(shared.config.backoff_floor(), shared.config.backoff_ceiling());
        Self {
            shared,
            factory,
            token,
            cancel,
            state_tx,
            backoff,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Waits out a reconnect delay. Returns `false` if stopped meanwhile.
    async fn pause(&self, delay: Duration) -> bool {
        self.set_state(ConnectionState::Degraded { backoff: delay });
        sleep_or_cancel(&self.cancel, delay).await
    }

    pub(crate) async fn run(mut self) {
        let host = self.shared.endpoint.host.clone();
        log::info!("{} Connection worker started", host);

        while !self.cancel.is_cancelled() {
            self.set_state(ConnectionState::Connecting);

            let opened = tokio::select! {
                _ = self.cancel.cancelled() => break,
                opened = self.factory.open(&self.shared.endpoint) => opened,
            };

            match opened {
                Ok(session) => {
                    log::info!("{} Session opened", host);
                    self.backoff.reset();
                    self.set_state(ConnectionState::Active);

                    let exit = SessionRun::new(&self.shared, session, self.token.as_ref(), &self.cancel)
                        .run()
                        .await;
                    if exit == SessionExit::Stopped {
                        break;
                    }

                    let delay = self.backoff.next_delay();
                    log::warn!("{} Reconnecting in {:.1}s", host, delay.as_secs_f64());
                    if !self.pause(delay).await {
                        break;
                    }
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    log::warn!(
                        "{} Connection failed ({}), retrying in {:.1}s",
                        host,
                        e,
                        delay.as_secs_f64()
                    );
                    if !self.pause(delay).await {
                        break;
                    }
                }
            }
        }

        self.shared.active.clear();
        self.set_state(ConnectionState::Stopped);
        log::info!("{} Connection stopped", host);
    }
}

/// Host-side state of one created list.
struct ActiveList {
    handle: ListHandle,
    /// Reverse mapping from tag handle to tag name.
    tags: HashMap<TagHandle, String>,
}

/// Everything that lives exactly as long as one open session.
struct SessionRun<'a, S: Session> {
    shared: &'a Shared,
    session: S,
    token: Option<&'a DeliveryToken>,
    cancel: &'a CancellationToken,
    host: &'a str,
    lists: HashMap<String, ActiveList>,
    list_order: Vec<String>,
    tags: HashSet<(String, String)>,
    rejected: HashSet<(String, String)>,
    orphans_reported: HashSet<(String, String)>,
    seen_revision: Option<u64>,
    pending: bool,
    held: Option<DeliveryGuard>,
}

impl<'a, S: Session> SessionRun<'a, S> {
    fn new(
        shared: &'a Shared,
        session: S,
        token: Option<&'a DeliveryToken>,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            shared,
            session,
            token,
            cancel,
            host: &shared.endpoint.host,
            lists: HashMap::new(),
            list_order: Vec::new(),
            tags: HashSet::new(),
            rejected: HashSet::new(),
            orphans_reported: HashSet::new(),
            seen_revision: None,
            pending: false,
            held: None,
        }
    }

    async fn run(mut self) -> SessionExit {
        log::info!("{} Running event check loop", self.host);
        let scan = self.shared.config.scan_interval();

        let mut faulted_before = false;
        let exit = loop {
            if self.cancel.is_cancelled() {
                break SessionExit::Stopped;
            }

            match self.cycle().await {
                // First faulted cycle after a clean one retries without the
                // pacing sleep; a persisting fault is paced like any cycle.
                Ok(faulted) => {
                    let retry_now = faulted && !faulted_before;
                    faulted_before = faulted;
                    if retry_now {
                        tokio::task::yield_now().await;
                    } else if !sleep_or_cancel(self.cancel, scan).await {
                        break SessionExit::Stopped;
                    }
                }
                Err(LinkLost(e)) => {
                    log::warn!("{} Connection lost: {}", self.host, e);
                    break SessionExit::LinkLost;
                }
            }
        };

        self.teardown().await;
        exit
    }

    /// One scan cycle. `Ok(true)` means a transient fault was seen.
    async fn cycle(&mut self) -> Result<bool, LinkLost> {
        let mut faulted = self.reconcile().await?;
        let mut denied = false;

        let names = self.list_order.clone();
        for name in &names {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(handle) = self.lists.get(name).map(|l| l.handle) else {
                continue;
            };

            if let Err(e) = self.session.refresh_list(handle).await {
                faulted |= self.classify(e, &format!("refreshing list {}", name))?;
                continue;
            }

            if denied {
                continue;
            }
            if !self.authorized().await {
                denied = true;
                continue;
            }
            faulted |= self.drain_and_deliver(name, handle).await?;
        }

        if self.shared.config.token_policy == TokenPolicy::PerCycle && self.held.take().is_some() {
            log::trace!("{} Delivery token released", self.host);
        }
        Ok(faulted)
    }

    /// Sorts a failed call. `Ok(true)` for transient, `Ok(false)` for a
    /// skipped tag, `Err` when the session has to go.
    fn classify(&self, err: CtApiError, context: &str) -> Result<bool, LinkLost> {
        match err.disposition() {
            ErrorDisposition::Reconnect => Err(LinkLost(err)),
            ErrorDisposition::SkipTag => {
                log::warn!("{} Tag does not exist while {}: {}", self.host, context, err);
                Ok(false)
            }
            ErrorDisposition::Transient => {
                match err.status() {
                    Some(HostStatus::TagProblem) => {
                        log::warn!("{} Tag problem while {}", self.host, context)
                    }
                    Some(HostStatus::GeneralFailure) | Some(HostStatus::InvalidAccess) => {
                        log::warn!("{} Host error while {}: {}", self.host, context, err)
                    }
                    _ => log::error!("{} Unexpected error while {}: {}", self.host, context, err),
                }
                Ok(true)
            }
        }
    }

    /// Creates requested lists and adds requested tags the session lacks.
    async fn reconcile(&mut self) -> Result<bool, LinkLost> {
        let shared = self.shared;
        let registry = &shared.registry;
        let revision = registry.revision();
        if self.seen_revision == Some(revision) && !self.pending {
            return Ok(false);
        }

        let mut faulted = false;
        let mut pending = false;

        for name in registry.lists() {
            if self.lists.contains_key(&name) {
                continue;
            }
            match self.session.create_list(shared.config.list_mode).await {
                Ok(handle) => {
                    log::info!("{} Created tag list {}", self.host, name);
                    self.lists.insert(
                        name.clone(),
                        ActiveList {
                            handle,
                            tags: HashMap::new(),
                        },
                    );
                    self.list_order.push(name);
                }
                Err(e) => {
                    pending = true;
                    faulted |= self.classify(e, &format!("creating tag list {}", name))?;
                }
            }
        }

        for request in registry.tags() {
            let key = (request.list.clone(), request.tag.clone());
            if self.tags.contains(&key) || self.rejected.contains(&key) {
                continue;
            }

            let Some(handle) = self.lists.get(&request.list).map(|l| l.handle) else {
                pending = true;
                if !registry.has_list(&request.list) && self.orphans_reported.insert(key) {
                    log::warn!(
                        "{} Tag {} waits for list {} which has not been added",
                        self.host,
                        request.tag,
                        request.list
                    );
                }
                continue;
            };

            match self.session.add_tag(handle, &request.tag, &request.options).await {
                Ok(tag_handle) => {
                    log::debug!("{} Added tag {} -> {}", self.host, request.list, request.tag);
                    if let Some(list) = self.lists.get_mut(&request.list) {
                        list.tags.insert(tag_handle, request.tag.clone());
                    }
                    self.tags.insert(key);
                }
                Err(e) if e.disposition() == ErrorDisposition::SkipTag => {
                    log::warn!("{} Tag does not exist: {}", self.host, e);
                    self.rejected.insert(key);
                }
                Err(e) => {
                    pending = true;
                    faulted |= self.classify(e, &format!("adding tag {}", request.tag))?;
                }
            }
        }

        self.seen_revision = Some(revision);
        self.pending = pending;
        self.publish();
        Ok(faulted)
    }

    fn publish(&self) {
        self.shared.active.publish(ActiveSets {
            lists: self.lists.keys().cloned().collect(),
            tags: self.tags.iter().cloned().collect::<BTreeSet<_>>(),
        });
    }

    /// Whether this cycle may invoke subscribers.
    async fn authorized(&mut self) -> bool {
        let Some(token) = self.token else {
            return true;
        };
        if self.held.is_some() {
            return true;
        }
        match token.acquire(self.shared.config.token_wait()).await {
            Some(guard) => {
                log::trace!("{} Delivery token acquired", self.host);
                self.held = Some(guard);
                true
            }
            None => {
                log::debug!("{} Delivery token busy, skipping delivery this cycle", self.host);
                false
            }
        }
    }

    /// Drains every pending event of one list and delivers them as one batch.
    async fn drain_and_deliver(&mut self, name: &str, handle: ListHandle) -> Result<bool, LinkLost> {
        let timestamp = Utc::now();
        let mask = self.shared.config.event_mask;
        let mut events = Vec::new();
        let mut faulted = false;

        while !self.cancel.is_cancelled() {
            let changed = match self.session.next_event(handle, mask).await {
                Ok(Some(changed)) => changed,
                Ok(None) => break,
                Err(e) => {
                    faulted |= self.classify(e, &format!("draining list {}", name))?;
                    break;
                }
            };

            let Some(tag) = self.lists.get(name).and_then(|l| l.tags.get(&changed)).cloned() else {
                log::debug!("{} Event for unknown tag handle {:?} in {}", self.host, changed, name);
                continue;
            };

            match self.session.read_value(changed).await {
                Ok(value) => events.push(TagEvent { tag, value }),
                Err(e) => faulted |= self.classify(e, &format!("reading {}", tag))?,
            }
        }

        if !events.is_empty() {
            let count = events.len();
            let delivered = self.shared.dispatcher.deliver(EventBatch {
                timestamp,
                list: name.to_string(),
                host: self.host.to_string(),
                events,
            });
            log::trace!(
                "{} Delivered {} events from {} to {} subscribers",
                self.host,
                count,
                name,
                delivered
            );
        }
        Ok(faulted)
    }

    /// Releases the token, frees the lists and closes the session.
    async fn teardown(mut self) {
        if self.held.take().is_some() {
            log::info!("{} Delivery token released", self.host);
        }
        for name in &self.list_order {
            if let Some(list) = self.lists.get(name) {
                if let Err(e) = self.session.free_list(list.handle).await {
                    log::debug!("{} Could not free list {}: {}", self.host, name, e);
                }
            }
        }
        self.session.close().await;
        self.shared.active.clear();
        log::info!("{} Session closed", self.host);
    }
}
