//! Session registry
//!
//! Single owner of every [`CallSession`]. All reads and writes go through one
//! lock so a command's update and a concurrent engine callback's update are
//! applied one at a time. Callers only ever receive clones.
//!
//! Removed ids are remembered (up to a bounded count) so that a late engine
//! event or a late host command for a finished call is reported as
//! [`CallError::SessionClosed`] instead of resurrecting the call.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::call::{CallDirection, CallId, CallSession, CallState, CallStats};
use crate::error::{CallError, CallResult};

/// Default number of closed call ids kept for late-event detection
pub const DEFAULT_CLOSED_SESSION_MEMORY: usize = 256;

#[derive(Debug, Default)]
struct RegistryInner {
    sessions: HashMap<CallId, CallSession>,
    closed_order: VecDeque<CallId>,
    closed: HashSet<CallId>,
}

impl RegistryInner {
    fn insert(&mut self, session: CallSession) -> CallResult<()> {
        if self.sessions.contains_key(&session.id) || self.closed.contains(&session.id) {
            return Err(CallError::DuplicateSession {
                call_id: session.id,
            });
        }
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    fn remember_closed(&mut self, id: CallId, capacity: usize) {
        if !self.closed.insert(id.clone()) {
            return;
        }
        self.closed_order.push_back(id);
        while self.closed_order.len() > capacity {
            if let Some(evicted) = self.closed_order.pop_front() {
                self.closed.remove(&evicted);
            }
        }
    }
}

/// Thread-safe store of active call sessions keyed by [`CallId`]
#[derive(Debug)]
pub struct SessionRegistry {
    inner: RwLock<RegistryInner>,
    closed_capacity: usize,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::with_closed_memory(DEFAULT_CLOSED_SESSION_MEMORY)
    }

    /// Create a registry remembering up to `capacity` closed ids
    ///
    /// At least one id is always remembered.
    pub fn with_closed_memory(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            closed_capacity: capacity.max(1),
        }
    }

    /// Allocate a fresh id and insert a session in [`CallState::Idle`]
    pub fn create(
        &self,
        remote_address: impl Into<String>,
        direction: CallDirection,
    ) -> CallResult<CallId> {
        let id = CallId::new_random();
        self.insert(id.clone(), remote_address, direction)?;
        Ok(id)
    }

    /// Insert a session under a caller-supplied id
    pub fn insert(
        &self,
        id: CallId,
        remote_address: impl Into<String>,
        direction: CallDirection,
    ) -> CallResult<()> {
        let session = CallSession::new(id.clone(), remote_address, direction);
        self.inner.write().insert(session)?;
        debug!(call_id = %id, ?direction, "session created");
        Ok(())
    }

    /// Look up a session; absence is not an error
    pub fn get(&self, id: &CallId) -> Option<CallSession> {
        self.inner.read().sessions.get(id).cloned()
    }

    /// Look up a session that must exist and still be open
    pub fn require_open(&self, id: &CallId) -> CallResult<CallSession> {
        let inner = self.inner.read();
        let closed = || CallError::SessionClosed { call_id: id.clone() };
        match inner.sessions.get(id) {
            Some(session) if session.is_closed() => Err(closed()),
            Some(session) => Ok(session.clone()),
            None if inner.closed.contains(id) => Err(closed()),
            None => Err(CallError::UnknownSession { call_id: id.clone() }),
        }
    }

    /// Apply `mutation` to the session under the write lock
    ///
    /// The mutation runs against a copy; the record is only replaced when it
    /// returns `Ok`, so a failed mutation leaves no partial change behind.
    pub fn update<R>(
        &self,
        id: &CallId,
        mutation: impl FnOnce(&mut CallSession) -> CallResult<R>,
    ) -> CallResult<R> {
        let mut inner = self.inner.write();
        let is_closed = inner.closed.contains(id);
        let Some(current) = inner.sessions.get_mut(id) else {
            return Err(if is_closed {
                CallError::SessionClosed { call_id: id.clone() }
            } else {
                CallError::UnknownSession { call_id: id.clone() }
            });
        };

        let mut draft = current.clone();
        let result = mutation(&mut draft)?;
        *current = draft;
        trace!(call_id = %id, state = %current.state, "session updated");
        Ok(result)
    }

    /// Delete a session and remember its id as closed
    ///
    /// Idempotent: removing an absent id is a no-op.
    pub fn remove(&self, id: &CallId) -> Option<CallSession> {
        let mut inner = self.inner.write();
        let removed = inner.sessions.remove(id);
        if removed.is_some() {
            inner.remember_closed(id.clone(), self.closed_capacity);
            debug!(call_id = %id, "session removed");
        }
        removed
    }

    /// Whether `id` belonged to a session that has since been removed
    pub fn is_closed(&self, id: &CallId) -> bool {
        self.inner.read().closed.contains(id)
    }

    pub fn contains(&self, id: &CallId) -> bool {
        self.inner.read().sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().sessions.is_empty()
    }

    /// Snapshot of all sessions, oldest first
    pub fn sessions(&self) -> Vec<CallSession> {
        let mut sessions: Vec<CallSession> = self.inner.read().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    /// Sessions currently in `state`
    pub fn sessions_in_state(&self, state: CallState) -> Vec<CallSession> {
        self.sessions().into_iter().filter(|s| s.state == state).collect()
    }

    pub fn stats(&self) -> CallStats {
        let inner = self.inner.read();
        let mut stats = CallStats {
            total_sessions: inner.sessions.len(),
            recently_closed: inner.closed.len(),
            ..Default::default()
        };
        for session in inner.sessions.values() {
            match session.state {
                CallState::Early | CallState::Connecting => stats.ringing_or_connecting += 1,
                CallState::Confirmed => stats.connected_calls += 1,
                _ => {}
            }
            if session.is_muted {
                stats.muted_calls += 1;
            }
            if session.is_on_hold {
                stats.held_calls += 1;
            }
        }
        stats
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_create_and_get() {
        let registry = SessionRegistry::new();
        let id = registry.create("sip:100@example.com", CallDirection::Outgoing).unwrap();

        let session = registry.get(&id).unwrap();
        assert_eq!(session.state, CallState::Idle);
        assert_eq!(session.remote_address, "sip:100@example.com");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_unknown_is_none() {
        let registry = SessionRegistry::new();
        assert!(registry.get(&CallId::from("missing")).is_none());
    }

    #[test]
    fn test_insert_duplicate_rejected() {
        let registry = SessionRegistry::new();
        let id = CallId::from("engine-7");
        registry.insert(id.clone(), "sip:a@b", CallDirection::Incoming).unwrap();
        let err = registry.insert(id.clone(), "sip:a@b", CallDirection::Incoming).unwrap_err();
        assert_eq!(err, CallError::DuplicateSession { call_id: id });
    }

    #[test]
    fn test_update_unknown_session() {
        let registry = SessionRegistry::new();
        let id = CallId::from("nope");
        let err = registry.update(&id, |s| s.set_muted(true)).unwrap_err();
        assert_eq!(err, CallError::UnknownSession { call_id: id });
    }

    #[test]
    fn test_failed_update_leaves_record_untouched() {
        let registry = SessionRegistry::new();
        let id = registry.create("sip:a@b", CallDirection::Outgoing).unwrap();
        registry.update(&id, |s| s.transition(CallState::Confirmed)).unwrap();

        let result = registry.update(&id, |s| {
            s.is_muted = true;
            s.transition(CallState::Early)
        });
        assert!(result.is_err());

        let session = registry.get(&id).unwrap();
        assert!(!session.is_muted);
        assert_eq!(session.state, CallState::Confirmed);
    }

    #[test]
    fn test_remove_is_idempotent_and_remembered() {
        let registry = SessionRegistry::new();
        let id = registry.create("sip:a@b", CallDirection::Outgoing).unwrap();

        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none());
        assert!(registry.is_empty());
        assert!(registry.is_closed(&id));

        assert_eq!(
            registry.require_open(&id).unwrap_err(),
            CallError::SessionClosed { call_id: id.clone() }
        );
        assert_eq!(
            registry.update(&id, |s| s.set_on_hold(true)).unwrap_err(),
            CallError::SessionClosed { call_id: id.clone() }
        );
        assert!(registry.insert(id, "sip:a@b", CallDirection::Incoming).is_err());
    }

    #[test]
    fn test_closed_memory_is_bounded() {
        let registry = SessionRegistry::with_closed_memory(2);
        let ids: Vec<CallId> = (0..3)
            .map(|_| registry.create("sip:a@b", CallDirection::Outgoing).unwrap())
            .collect();
        for id in &ids {
            registry.remove(id);
        }
        assert!(!registry.is_closed(&ids[0]));
        assert!(registry.is_closed(&ids[1]));
        assert!(registry.is_closed(&ids[2]));
        assert_eq!(registry.stats().recently_closed, 2);
    }

    #[test]
    fn test_zero_closed_memory_still_remembers_last_call() {
        let registry = SessionRegistry::with_closed_memory(0);
        let id = registry.create("sip:a@b", CallDirection::Outgoing).unwrap();
        registry.remove(&id);
        assert!(registry.is_closed(&id));
        assert_eq!(
            registry.update(&id, |s| s.set_muted(true)).unwrap_err(),
            CallError::SessionClosed { call_id: id.clone() }
        );
    }

    #[test]
    fn test_stats() {
        let registry = SessionRegistry::new();
        let a = registry.create("sip:a@b", CallDirection::Outgoing).unwrap();
        let b = registry.create("sip:c@d", CallDirection::Outgoing).unwrap();
        registry.update(&a, |s| s.transition(CallState::Confirmed)).unwrap();
        registry.update(&a, |s| s.set_muted(true)).unwrap();
        registry.update(&b, |s| s.transition(CallState::Early)).unwrap();
        registry.update(&b, |s| s.set_on_hold(true)).unwrap();

        let stats = registry.stats();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.connected_calls, 1);
        assert_eq!(stats.ringing_or_connecting, 1);
        assert_eq!(stats.muted_calls, 1);
        assert_eq!(stats.held_calls, 1);
        assert_eq!(registry.sessions_in_state(CallState::Early).len(), 1);
    }

    #[test]
    fn test_concurrent_updates_are_isolated() {
        let registry = Arc::new(SessionRegistry::new());
        let a = registry.create("sip:a@b", CallDirection::Outgoing).unwrap();
        let b = registry.create("sip:c@d", CallDirection::Outgoing).unwrap();

        let muter = {
            let registry = registry.clone();
            let a = a.clone();
            std::thread::spawn(move || {
                for i in 0..1000 {
                    registry.update(&a, |s| s.set_muted(i % 2 == 0)).unwrap();
                }
            })
        };
        let stepper = {
            let registry = registry.clone();
            let b = b.clone();
            std::thread::spawn(move || {
                let states = [
                    CallState::Calling,
                    CallState::Early,
                    CallState::Connecting,
                    CallState::Confirmed,
                ];
                for state in states {
                    registry.update(&b, |s| s.transition(state)).unwrap();
                }
            })
        };
        muter.join().unwrap();
        stepper.join().unwrap();

        let a = registry.get(&a).unwrap();
        let b = registry.get(&b).unwrap();
        assert!(!a.is_muted);
        assert_eq!(a.state, CallState::Idle);
        assert_eq!(b.state, CallState::Confirmed);
        assert!(!b.is_muted);
    }
}
