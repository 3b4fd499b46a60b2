//! Call identifiers, call states and the per-call state machine
//!
//! A [`CallSession`] is the core's record of one call. It never talks to the
//! engine; it only validates and applies changes. The
//! [`SessionRegistry`](crate::registry::SessionRegistry) owns every session and
//! is the only way to reach one.
//!
//! ```text
//! Idle -> Calling -> Early -> Connecting -> Confirmed -> Disconnected
//!   \________\__________\__________\____________\______^
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CallError, CallResult};

/// Unique identifier for a call
///
/// Generated client-side from a random UUID when a call is placed, or taken
/// verbatim from the engine for calls it announces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Generate a new 128-bit random call identifier
    pub fn new_random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CallId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for CallId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Current state of a call
///
/// Variants are declared in lifecycle order; the derived ordering is what
/// the state machine uses to reject backwards transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Session exists but nothing has been sent yet
    Idle,
    /// INVITE sent (or inbound callback being set up)
    Calling,
    /// Provisional response received, remote is ringing
    Early,
    /// Final response received, waiting for ACK
    Connecting,
    /// Dialog established
    Confirmed,
    /// Call is over
    Disconnected,
}

impl CallState {
    /// Check if the call has ended
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Disconnected)
    }

    /// Check if the call is established
    pub fn is_established(&self) -> bool {
        matches!(self, CallState::Confirmed)
    }

    /// Whether the state machine accepts `self -> to`
    pub fn can_transition(&self, to: CallState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == CallState::Disconnected || to > *self
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Idle => write!(f, "Idle"),
            CallState::Calling => write!(f, "Calling"),
            CallState::Early => write!(f, "Early"),
            CallState::Connecting => write!(f, "Connecting"),
            CallState::Confirmed => write!(f, "Confirmed"),
            CallState::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Direction of a call (from the host's perspective)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    /// Placed by the host
    Outgoing,
    /// Announced by the engine or answered on behalf of a remote channel
    Incoming,
}

/// Progress of a blind transfer (REFER)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    /// REFER handed to the engine, no report yet
    Pending,
    /// Transferee reported a provisional response
    InProgress,
    /// Transfer target answered
    Completed,
    /// Transfer was refused or failed
    Failed,
}

impl TransferStatus {
    /// Decode an engine transfer status report
    ///
    /// The engine reports either a boolean success flag (`1`/`0`) or the SIP
    /// status code carried in the NOTIFY sipfrag.
    pub fn from_engine_code(code: i32) -> Self {
        match code {
            1 => TransferStatus::Completed,
            100..=199 => TransferStatus::InProgress,
            200..=299 => TransferStatus::Completed,
            _ => TransferStatus::Failed,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }
}

/// Outcome of applying a state to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State moved forward (or to Disconnected)
    Advanced { from: CallState, to: CallState },
    /// Session was already in the requested state
    Unchanged,
}

/// The core's record of one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    pub id: CallId,
    /// Fully qualified target (or source) SIP URI
    pub remote_address: String,
    pub direction: CallDirection,
    pub state: CallState,
    pub is_muted: bool,
    pub is_on_hold: bool,
    /// Last known blind transfer status, if a transfer was attempted
    pub transfer: Option<TransferStatus>,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallSession {
    /// Create a session in [`CallState::Idle`]
    pub fn new(id: CallId, remote_address: impl Into<String>, direction: CallDirection) -> Self {
        Self {
            id,
            remote_address: remote_address.into(),
            direction,
            state: CallState::Idle,
            is_muted: false,
            is_on_hold: false,
            transfer: None,
            created_at: Utc::now(),
            connected_at: None,
            ended_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_terminal()
    }

    fn ensure_open(&self) -> CallResult<()> {
        if self.is_closed() {
            return Err(CallError::SessionClosed {
                call_id: self.id.clone(),
            });
        }
        Ok(())
    }

    /// Move the session to `to`, enforcing lifecycle order
    pub fn transition(&mut self, to: CallState) -> CallResult<Transition> {
        self.ensure_open()?;

        let from = self.state;
        if from == to {
            return Ok(Transition::Unchanged);
        }
        if !from.can_transition(to) {
            return Err(CallError::invalid_state(&self.id, from, format!("transition to {}", to)));
        }

        match to {
            CallState::Confirmed => {
                if self.connected_at.is_none() {
                    self.connected_at = Some(Utc::now());
                }
            }
            CallState::Disconnected => {
                self.ended_at = Some(Utc::now());
            }
            _ => {}
        }
        self.state = to;

        Ok(Transition::Advanced { from, to })
    }

    pub fn set_muted(&mut self, muted: bool) -> CallResult<()> {
        self.ensure_open()?;
        self.is_muted = muted;
        Ok(())
    }

    pub fn set_on_hold(&mut self, on_hold: bool) -> CallResult<()> {
        self.ensure_open()?;
        self.is_on_hold = on_hold;
        Ok(())
    }

    /// Require an established dialog for mid-call requests (DTMF, REFER)
    pub fn ensure_established(&self, operation: &str) -> CallResult<()> {
        self.ensure_open()?;
        if !self.state.is_established() {
            return Err(CallError::invalid_state(&self.id, self.state, operation));
        }
        Ok(())
    }

    /// Record that a blind transfer was requested
    ///
    /// Does not change [`CallState`]; the engine reports the outcome later.
    pub fn begin_transfer(&mut self) -> CallResult<()> {
        self.ensure_established("blind transfer")?;
        self.transfer = Some(TransferStatus::Pending);
        Ok(())
    }

    pub fn record_transfer_status(&mut self, status: TransferStatus) -> CallResult<()> {
        self.ensure_open()?;
        self.transfer = Some(status);
        Ok(())
    }
}

/// Snapshot of registry contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStats {
    pub total_sessions: usize,
    /// Sessions past Calling but not yet Confirmed
    pub ringing_or_connecting: usize,
    pub connected_calls: usize,
    pub muted_calls: usize,
    pub held_calls: usize,
    /// Closed ids still remembered for late-event detection
    pub recently_closed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> CallSession {
        CallSession::new(CallId::from("call-1"), "sip:100@example.com", CallDirection::Outgoing)
    }

    #[test]
    fn test_random_ids_are_unique() {
        let a = CallId::new_random();
        let b = CallId::new_random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_forward_transitions() {
        let mut s = session();
        assert_eq!(
            s.transition(CallState::Calling).unwrap(),
            Transition::Advanced {
                from: CallState::Idle,
                to: CallState::Calling
            }
        );
        s.transition(CallState::Early).unwrap();
        s.transition(CallState::Confirmed).unwrap();
        assert!(s.connected_at.is_some());
        assert_eq!(s.state, CallState::Confirmed);
    }

    #[test]
    fn test_same_state_is_unchanged() {
        let mut s = session();
        s.transition(CallState::Calling).unwrap();
        assert_eq!(s.transition(CallState::Calling).unwrap(), Transition::Unchanged);
    }

    #[test]
    fn test_backwards_transition_rejected() {
        let mut s = session();
        s.transition(CallState::Confirmed).unwrap();
        let err = s.transition(CallState::Early).unwrap_err();
        assert!(matches!(
            err,
            CallError::InvalidState {
                current_state: CallState::Confirmed,
                ..
            }
        ));
        assert_eq!(s.state, CallState::Confirmed);
    }

    #[test]
    fn test_disconnect_from_any_open_state() {
        for start in [
            CallState::Idle,
            CallState::Calling,
            CallState::Early,
            CallState::Connecting,
            CallState::Confirmed,
        ] {
            let mut s = session();
            s.state = start;
            s.transition(CallState::Disconnected).unwrap();
            assert!(s.is_closed());
            assert!(s.ended_at.is_some());
        }
    }

    #[test]
    fn test_closed_session_rejects_everything() {
        let mut s = session();
        s.transition(CallState::Disconnected).unwrap();

        assert!(matches!(s.set_muted(true), Err(CallError::SessionClosed { .. })));
        assert!(matches!(s.set_on_hold(true), Err(CallError::SessionClosed { .. })));
        assert!(matches!(
            s.transition(CallState::Disconnected),
            Err(CallError::SessionClosed { .. })
        ));
        assert!(!s.is_muted);
    }

    #[test]
    fn test_flags_are_independent() {
        let mut s = session();
        s.set_muted(true).unwrap();
        s.set_on_hold(true).unwrap();
        s.set_muted(false).unwrap();
        assert!(!s.is_muted);
        assert!(s.is_on_hold);
        assert_eq!(s.state, CallState::Idle);
    }

    #[test]
    fn test_transfer_requires_established_call() {
        let mut s = session();
        s.transition(CallState::Early).unwrap();
        assert!(matches!(s.begin_transfer(), Err(CallError::InvalidState { .. })));

        s.transition(CallState::Confirmed).unwrap();
        s.begin_transfer().unwrap();
        assert_eq!(s.transfer, Some(TransferStatus::Pending));
        assert_eq!(s.state, CallState::Confirmed);
    }

    #[test]
    fn test_transfer_status_codes() {
        assert_eq!(TransferStatus::from_engine_code(1), TransferStatus::Completed);
        assert_eq!(TransferStatus::from_engine_code(0), TransferStatus::Failed);
        assert_eq!(TransferStatus::from_engine_code(180), TransferStatus::InProgress);
        assert_eq!(TransferStatus::from_engine_code(200), TransferStatus::Completed);
        assert_eq!(TransferStatus::from_engine_code(603), TransferStatus::Failed);
        assert!(!TransferStatus::InProgress.is_final());
    }
}
