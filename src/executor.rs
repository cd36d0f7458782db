//! Session registry: the ambient component that tracks every live session so
//! siblings/parents/children can hand off events without sharing a lock across the
//! sessions themselves. Scoped to just the bookkeeping a `Session` (C9) needs —
//! chart loading and CLI argument wiring live in the `fsm` demo binary instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use crate::event::{Event, SessionId};

#[derive(Default)]
struct RegistryState {
    senders: HashMap<SessionId, Sender<Box<Event>>>,
    parents: HashMap<SessionId, SessionId>,
}

/// Shared across every session spawned from the same root chart. Each session
/// registers its external-queue sender on start and deregisters on exit; a parent
/// session registers the `SessionId -> parent SessionId` edge before spawning a
/// child so `#_parent` sends can be routed immediately.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
    next_id: AtomicU32,
}

impl std::fmt::Debug for RegistryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryState")
            .field("sessions", &self.senders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SessionRegistry {
    pub fn new() -> SessionRegistry {
        SessionRegistry {
            state: Mutex::new(RegistryState::default()),
            next_id: AtomicU32::new(1),
        }
    }

    pub fn allocate_session_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register(&self, session_id: SessionId, sender: Sender<Box<Event>>, parent: Option<SessionId>) {
        let mut state = self.state.lock().unwrap();
        state.senders.insert(session_id, sender);
        if let Some(p) = parent {
            state.parents.insert(session_id, p);
        }
    }

    pub fn deregister(&self, session_id: SessionId) {
        let mut state = self.state.lock().unwrap();
        state.senders.remove(&session_id);
        state.parents.remove(&session_id);
    }

    pub fn parent_of(&self, session_id: SessionId) -> Option<SessionId> {
        self.state.lock().unwrap().parents.get(&session_id).copied()
    }

    pub fn send_to_session(&self, session_id: SessionId, event: Event) -> Result<(), String> {
        let state = self.state.lock().unwrap();
        let sender = state
            .senders
            .get(&session_id)
            .ok_or_else(|| format!("no session #{session_id}"))?;
        sender
            .send(Box::new(event))
            .map_err(|e| format!("session #{session_id} is gone: {e}"))
    }

}

/// Resolves `<invoke src="...">` to a buildable chart. Standing in for the
/// resource-fetching half of the out-of-scope XML parser: a caller registers every
/// chart it wants invocable under the same string its documents use as `src` before
/// starting the root session, and `Session::start_invokes` looks it up here instead
/// of fetching and parsing a document at runtime.
#[derive(Debug, Default)]
pub struct ChartRegistry {
    charts: Mutex<HashMap<String, Arc<crate::chart::Chart>>>,
}

impl ChartRegistry {
    pub fn new() -> ChartRegistry {
        ChartRegistry::default()
    }

    pub fn register(&self, src: impl Into<String>, chart: Arc<crate::chart::Chart>) {
        self.charts.lock().unwrap().insert(src.into(), chart);
    }

    pub fn get(&self, src: &str) -> Option<Arc<crate::chart::Chart>> {
        self.charts.lock().unwrap().get(src).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_to_unregistered_session_is_an_error() {
        let registry = SessionRegistry::new();
        assert!(registry.send_to_session(99, Event::internal("x")).is_err());
    }

    #[test]
    fn parent_lookup_reflects_registration() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = std::sync::mpsc::channel();
        registry.register(2, tx, Some(1));
        assert_eq!(registry.parent_of(2), Some(1));
    }
}
