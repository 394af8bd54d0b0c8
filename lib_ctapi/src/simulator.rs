//! # Simulated Host
//!
//! An in-memory CtAPI host implementing the session adapter. It backs the
//! crate's tests and the `--simulate` mode of the servers.
//!
//! Value changes are staged per list and become visible to `next_event` only
//! after the list is refreshed, the same order of operations a real host
//! imposes. Each queued event carries the value it was raised with, so a tag
//! that changes twice between refreshes produces two events with two values.
//!
//! Faults can be provoked from the outside: an unreachable host, a dropped
//! link (code 233 on every call of the sessions open at that moment), removed
//! tags (code 424 on read) and one-shot errors for any operation. Handles of
//! freed or foreign lists fail with `UnknownList`.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::adapter::{ListHandle, SearchRow, Session, SessionFactory, TagHandle};
use crate::core::error::{CtApiError, CODE_GENERAL_FAILURE, CODE_LINK_NOT_CONNECTED};
use crate::core::model::{Endpoint, EventMask, ListMode, OpenMode, TagOptions, TagValue};

/// Operations a fault can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    /// `SessionFactory::open`.
    Open,
    /// `Session::create_list`.
    CreateList,
    /// `Session::add_tag`.
    AddTag,
    /// `Session::refresh_list`.
    RefreshList,
    /// `Session::next_event`.
    NextEvent,
    /// `Session::read_value`.
    ReadValue,
    /// `Session::read_tag`.
    ReadTag,
    /// `Session::write_tag`.
    WriteTag,
    /// `Session::call_function`.
    CallFunction,
    /// `Session::search`.
    Search,
}

struct SimTag {
    value: TagValue,
    removed: bool,
}

struct SimList {
    session: u64,
    members: HashMap<u64, String>,
    staged: VecDeque<(u64, TagValue)>,
    pending: VecDeque<(u64, TagValue)>,
}

#[derive(Default)]
struct HostState {
    unreachable: bool,
    tags: HashMap<String, SimTag>,
    lists: HashMap<u64, SimList>,
    last_event_value: HashMap<u64, TagValue>,
    next_handle: u64,
    live_sessions: HashSet<u64>,
    lost_sessions: HashSet<u64>,
    session_modes: HashMap<u64, OpenMode>,
    next_session: u64,
    faults: HashMap<SimOp, VecDeque<CtApiError>>,
    calls: HashMap<SimOp, usize>,
    functions: HashMap<String, TagValue>,
    searches: HashMap<String, Vec<SearchRow>>,
    open_attempts: usize,
    sessions_opened: usize,
    sessions_closed: usize,
    lists_created: usize,
}

impl HostState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn take_fault(&mut self, op: SimOp) -> Option<CtApiError> {
        self.faults.get_mut(&op).and_then(VecDeque::pop_front)
    }

    /// Checks the session and consumes an injected fault for `op`.
    fn enter(&mut self, session: u64, op: SimOp) -> Result<(), CtApiError> {
        *self.calls.entry(op).or_default() += 1;
        if self.lost_sessions.contains(&session) || !self.live_sessions.contains(&session) {
            return Err(CtApiError::General {
                code: CODE_LINK_NOT_CONNECTED,
            });
        }
        match self.take_fault(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn stage(&mut self, tag: &str, value: &TagValue) {
        let live = &self.live_sessions;
        for list in self.lists.values_mut().filter(|l| live.contains(&l.session)) {
            let handles: Vec<u64> = list
                .members
                .iter()
                .filter(|(_, name)| name.as_str() == tag)
                .map(|(handle, _)| *handle)
                .collect();
            for handle in handles {
                list.staged.push_back((handle, value.clone()));
            }
        }
    }

    fn tag_of(&self, handle: u64) -> Option<&str> {
        self.lists
            .values()
            .find_map(|l| l.members.get(&handle))
            .map(String::as_str)
    }
}

fn unknown_list(list: ListHandle) -> CtApiError {
    CtApiError::UnknownList {
        list: format!("{:?}", list),
    }
}

/// In-memory host. Cloning shares the same host.
#[derive(Clone, Default)]
pub struct SimulatedHost {
    inner: Arc<Mutex<HostState>>,
}

impl SimulatedHost {
    /// An empty, reachable host.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates (or restores) a tag with a value.
    pub fn define_tag(&self, name: &str, value: TagValue) {
        self.lock().tags.insert(
            name.to_string(),
            SimTag {
                value,
                removed: false,
            },
        );
    }

    /// Changes one tag and raises a change event on every list holding it.
    pub fn set_value(&self, name: &str, value: TagValue) {
        self.set_values([(name, value)]);
    }

    /// Applies several changes atomically: no refresh can observe a subset.
    pub fn set_values<'a, I>(&self, changes: I)
    where
        I: IntoIterator<Item = (&'a str, TagValue)>,
    {
        let mut host = self.lock();
        for (name, value) in changes {
            host.tags
                .entry(name.to_string())
                .and_modify(|t| t.value = value.clone())
                .or_insert_with(|| SimTag {
                    value: value.clone(),
                    removed: false,
                });
            host.stage(name, &value);
        }
    }

    /// Makes a tag unknown: reads and adds fail with code 424. Lists that
    /// hold it receive a status event.
    pub fn remove_tag(&self, name: &str) {
        let mut host = self.lock();
        let value = match host.tags.get_mut(name) {
            Some(tag) => {
                tag.removed = true;
                tag.value.clone()
            }
            None => return,
        };
        host.stage(name, &value);
    }

    /// Makes `open` fail (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    /// Loses the link of every session open right now.
    pub fn drop_link(&self) {
        let mut host = self.lock();
        let live: Vec<u64> = host.live_sessions.iter().copied().collect();
        host.lost_sessions.extend(live);
    }

    /// Makes the next call of `op` fail with `err`. Faults queue up.
    pub fn inject_fault(&self, op: SimOp, err: CtApiError) {
        self.lock().faults.entry(op).or_default().push_back(err);
    }

    /// Result returned by `call_function` for `expression`.
    pub fn define_function(&self, expression: &str, result: TagValue) {
        self.lock().functions.insert(expression.to_string(), result);
    }

    /// Rows returned by `search` for `query`.
    pub fn define_search(&self, query: &str, rows: Vec<SearchRow>) {
        self.lock().searches.insert(query.to_string(), rows);
    }

    /// Current value of a tag, ignoring removal.
    pub fn value(&self, name: &str) -> Option<TagValue> {
        self.lock().tags.get(name).map(|t| t.value.clone())
    }

    /// Calls to `open`, successful or not.
    pub fn open_attempts(&self) -> usize {
        self.lock().open_attempts
    }

    /// Sessions opened successfully.
    pub fn sessions_opened(&self) -> usize {
        self.lock().sessions_opened
    }

    /// Sessions closed.
    pub fn sessions_closed(&self) -> usize {
        self.lock().sessions_closed
    }

    /// Lists created over the host's lifetime.
    pub fn lists_created(&self) -> usize {
        self.lock().lists_created
    }

    /// Calls made to `op` by sessions, failed ones included.
    pub fn calls(&self, op: SimOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or_default()
    }

    /// Lists currently allocated.
    pub fn live_lists(&self) -> usize {
        self.lock().lists.len()
    }
}

#[async_trait]
impl SessionFactory for SimulatedHost {
    type Session = SimulatedSession;

    async fn open(&self, endpoint: &Endpoint) -> Result<SimulatedSession, CtApiError> {
        let mut host = self.lock();
        host.open_attempts += 1;
        if let Some(err) = host.take_fault(SimOp::Open) {
            return Err(err);
        }
        if host.unreachable {
            return Err(CtApiError::FailedToConnect {
                host: endpoint.host.clone(),
                code: CODE_LINK_NOT_CONNECTED,
            });
        }

        host.next_session += 1;
        let id = host.next_session;
        host.live_sessions.insert(id);
        host.session_modes.insert(id, endpoint.mode);
        host.sessions_opened += 1;
        Ok(SimulatedSession {
            host: self.clone(),
            id,
        })
    }
}

/// A session against a `SimulatedHost`.
pub struct SimulatedSession {
    host: SimulatedHost,
    id: u64,
}

#[async_trait]
impl Session for SimulatedSession {
    async fn close(&mut self) {
        let mut host = self.host.lock();
        if host.live_sessions.remove(&self.id) {
            host.sessions_closed += 1;
        }
        host.lost_sessions.remove(&self.id);
        host.session_modes.remove(&self.id);
        let id = self.id;
        let handles: Vec<u64> = host
            .lists
            .values()
            .filter(|l| l.session == id)
            .flat_map(|l| l.members.keys().copied())
            .collect();
        for handle in handles {
            host.last_event_value.remove(&handle);
        }
        host.lists.retain(|_, l| l.session != id);
    }

    async fn create_list(&mut self, _mode: ListMode) -> Result<ListHandle, CtApiError> {
        let mut host = self.host.lock();
        host.enter(self.id, SimOp::CreateList)?;
        let handle = host.handle();
        host.lists.insert(
            handle,
            SimList {
                session: self.id,
                members: HashMap::new(),
                staged: VecDeque::new(),
                pending: VecDeque::new(),
            },
        );
        host.lists_created += 1;
        Ok(ListHandle(handle))
    }

    async fn free_list(&mut self, list: ListHandle) -> Result<(), CtApiError> {
        let mut host = self.host.lock();
        if host.lost_sessions.contains(&self.id) {
            return Err(CtApiError::General {
                code: CODE_LINK_NOT_CONNECTED,
            });
        }
        match host.lists.remove(&list.0) {
            Some(_) => Ok(()),
            None => Err(unknown_list(list)),
        }
    }

    async fn add_tag(
        &mut self,
        list: ListHandle,
        tag: &str,
        _options: &TagOptions,
    ) -> Result<TagHandle, CtApiError> {
        let mut host = self.host.lock();
        host.enter(self.id, SimOp::AddTag)?;
        if !host.tags.get(tag).is_some_and(|t| !t.removed) {
            return Err(CtApiError::TagDoesNotExist { tag: tag.to_string() });
        }
        if !host.lists.contains_key(&list.0) {
            return Err(unknown_list(list));
        }
        let handle = host.handle();
        if let Some(sim_list) = host.lists.get_mut(&list.0) {
            sim_list.members.insert(handle, tag.to_string());
        }
        Ok(TagHandle(handle))
    }

    async fn refresh_list(&mut self, list: ListHandle) -> Result<(), CtApiError> {
        let mut host = self.host.lock();
        host.enter(self.id, SimOp::RefreshList)?;
        let sim_list = host.lists.get_mut(&list.0).ok_or_else(|| unknown_list(list))?;
        let staged: Vec<_> = sim_list.staged.drain(..).collect();
        sim_list.pending.extend(staged);
        Ok(())
    }

    async fn next_event(
        &mut self,
        list: ListHandle,
        mask: EventMask,
    ) -> Result<Option<TagHandle>, CtApiError> {
        let mut host = self.host.lock();
        host.enter(self.id, SimOp::NextEvent)?;
        if !mask.contains(EventMask::NEW) && !mask.contains(EventMask::STATUS) {
            return Ok(None);
        }
        let popped = host
            .lists
            .get_mut(&list.0)
            .and_then(|l| l.pending.pop_front());
        Ok(popped.map(|(handle, value)| {
            host.last_event_value.insert(handle, value);
            TagHandle(handle)
        }))
    }

    async fn read_value(&mut self, tag: TagHandle) -> Result<TagValue, CtApiError> {
        let mut host = self.host.lock();
        host.enter(self.id, SimOp::ReadValue)?;
        let name = host
            .tag_of(tag.0)
            .map(str::to_string)
            .ok_or(CtApiError::UnknownTag {
                tag: format!("{:?}", tag),
            })?;
        match host.tags.get(&name) {
            Some(t) if !t.removed => Ok(host
                .last_event_value
                .get(&tag.0)
                .cloned()
                .unwrap_or_else(|| t.value.clone())),
            _ => Err(CtApiError::TagDoesNotExist { tag: name }),
        }
    }

    async fn read_tag(&mut self, tag: &str) -> Result<TagValue, CtApiError> {
        let mut host = self.host.lock();
        host.enter(self.id, SimOp::ReadTag)?;
        match host.tags.get(tag) {
            Some(t) if !t.removed => Ok(t.value.clone()),
            _ => Err(CtApiError::TagDoesNotExist { tag: tag.to_string() }),
        }
    }

    async fn write_tag(&mut self, tag: &str, value: &TagValue) -> Result<(), CtApiError> {
        let mut host = self.host.lock();
        host.enter(self.id, SimOp::WriteTag)?;
        if host
            .session_modes
            .get(&self.id)
            .is_some_and(|m| m.contains(OpenMode::READ_ONLY))
        {
            return Err(CtApiError::General {
                code: CODE_GENERAL_FAILURE,
            });
        }
        match host.tags.get_mut(tag) {
            Some(t) if !t.removed => t.value = value.clone(),
            _ => return Err(CtApiError::TagDoesNotExist { tag: tag.to_string() }),
        }
        host.stage(tag, value);
        Ok(())
    }

    async fn call_function(&mut self, expression: &str) -> Result<TagValue, CtApiError> {
        let mut host = self.host.lock();
        host.enter(self.id, SimOp::CallFunction)?;
        host.functions
            .get(expression)
            .cloned()
            .ok_or(CtApiError::General {
                code: CODE_GENERAL_FAILURE,
            })
    }

    async fn search(&mut self, query: &str) -> Result<Vec<SearchRow>, CtApiError> {
        let mut host = self.host.lock();
        host.enter(self.id, SimOp::Search)?;
        Ok(host.searches.get(query).cloned().unwrap_or_default())
    }
}
