//! Host-facing call events
//!
//! The host registers one [`CallEventListener`]. Every method has a no-op
//! default so a listener only implements what it cares about. Hosts that
//! would rather drain a stream can use [`ChannelListener`].

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::call::{CallId, TransferStatus};
use crate::error::{CallError, EngineException};

/// Normalized notification delivered to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CallEvent {
    /// Call placed, answered or announced by the engine; sent before any
    /// state event for the call
    CallStarted {
        call_id: CallId,
        name: String,
        number: String,
    },
    CallRinging { call_id: CallId },
    CallConnecting { call_id: CallId },
    CallConnected { call_id: CallId },
    CallEnded { call_id: CallId },
    MuteStatusUpdated { call_id: CallId, muted: bool },
    HoldStatusUpdated { call_id: CallId, on_hold: bool },
    TransferStatusChanged {
        call_id: CallId,
        status: TransferStatus,
    },
    /// Non-fatal engine failure, forwarded verbatim
    Exception {
        call_id: CallId,
        exception: EngineException,
    },
}

impl CallEvent {
    /// Call this event belongs to
    pub fn call_id(&self) -> &CallId {
        match self {
            CallEvent::CallStarted { call_id, .. }
            | CallEvent::CallRinging { call_id }
            | CallEvent::CallConnecting { call_id }
            | CallEvent::CallConnected { call_id }
            | CallEvent::CallEnded { call_id }
            | CallEvent::MuteStatusUpdated { call_id, .. }
            | CallEvent::HoldStatusUpdated { call_id, .. }
            | CallEvent::TransferStatusChanged { call_id, .. }
            | CallEvent::Exception { call_id, .. } => call_id,
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            CallEvent::CallStarted { .. } => "call_started",
            CallEvent::CallRinging { .. } => "call_ringing",
            CallEvent::CallConnecting { .. } => "call_connecting",
            CallEvent::CallConnected { .. } => "call_connected",
            CallEvent::CallEnded { .. } => "call_ended",
            CallEvent::MuteStatusUpdated { .. } => "mute_status_updated",
            CallEvent::HoldStatusUpdated { .. } => "hold_status_updated",
            CallEvent::TransferStatusChanged { .. } => "transfer_status_changed",
            CallEvent::Exception { .. } => "exception",
        }
    }

    /// The failure this event reports, for exception events
    pub fn error(&self) -> Option<CallError> {
        match self {
            CallEvent::Exception { call_id, exception } => Some(CallError::Engine {
                call_id: call_id.clone(),
                exception: exception.clone(),
            }),
            _ => None,
        }
    }
}

/// Receiver of normalized call events
///
/// Called synchronously on the engine's callback thread (or the command
/// context for `on_call_started`). Implementations should return quickly and
/// may call back into the core.
pub trait CallEventListener: Send + Sync {
    /// A call was placed or answered, or the engine announced one itself
    ///
    /// Engine-announced calls carry an empty `name` and `number`; the session
    /// is [`Incoming`](crate::call::CallDirection::Incoming) with no remote
    /// address.
    fn on_call_started(&self, _call_id: &CallId, _name: &str, _number: &str) {}

    fn on_call_ringing(&self, _call_id: &CallId) {}

    fn on_call_connecting(&self, _call_id: &CallId) {}

    fn on_call_connected(&self, _call_id: &CallId) {}

    fn on_call_ended(&self, _call_id: &CallId) {}

    fn on_mute_status_updated(&self, _call_id: &CallId, _muted: bool) {}

    fn on_hold_status_updated(&self, _call_id: &CallId, _on_hold: bool) {}

    fn on_transfer_status_changed(&self, _call_id: &CallId, _status: TransferStatus) {}

    fn on_exception(&self, _call_id: &CallId, _exception: &EngineException) {}

    /// Entry point used by the notifier; fans out to the methods above
    fn on_event(&self, event: CallEvent) {
        match event {
            CallEvent::CallStarted {
                call_id,
                name,
                number,
            } => self.on_call_started(&call_id, &name, &number),
            CallEvent::CallRinging { call_id } => self.on_call_ringing(&call_id),
            CallEvent::CallConnecting { call_id } => self.on_call_connecting(&call_id),
            CallEvent::CallConnected { call_id } => self.on_call_connected(&call_id),
            CallEvent::CallEnded { call_id } => self.on_call_ended(&call_id),
            CallEvent::MuteStatusUpdated { call_id, muted } => {
                self.on_mute_status_updated(&call_id, muted)
            }
            CallEvent::HoldStatusUpdated { call_id, on_hold } => {
                self.on_hold_status_updated(&call_id, on_hold)
            }
            CallEvent::TransferStatusChanged { call_id, status } => {
                self.on_transfer_status_changed(&call_id, status)
            }
            CallEvent::Exception { call_id, exception } => self.on_exception(&call_id, &exception),
        }
    }
}

/// Listener that forwards every event into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<CallEvent>,
}

impl ChannelListener {
    /// Create the listener and the receiver the host drains
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CallEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl CallEventListener for ChannelListener {
    fn on_event(&self, event: CallEvent) {
        if let Err(e) = self.tx.send(event) {
            warn!(kind = e.0.kind(), "call event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MuteOnly {
        seen: Mutex<Vec<bool>>,
    }

    impl CallEventListener for MuteOnly {
        fn on_mute_status_updated(&self, _call_id: &CallId, muted: bool) {
            self.seen.lock().push(muted);
        }
    }

    #[test]
    fn test_default_fan_out() {
        let listener = MuteOnly::default();
        let id = CallId::from("c1");
        listener.on_event(CallEvent::CallRinging { call_id: id.clone() });
        listener.on_event(CallEvent::MuteStatusUpdated {
            call_id: id,
            muted: true,
        });
        assert_eq!(*listener.seen.lock(), vec![true]);
    }

    #[tokio::test]
    async fn test_channel_listener() {
        let (listener, mut rx) = ChannelListener::new();
        let id = CallId::from("c1");
        listener.on_event(CallEvent::CallEnded { call_id: id.clone() });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.call_id(), &id);
        assert_eq!(event.kind(), "call_ended");
    }

    #[test]
    fn test_exception_event_converts_to_error() {
        let event = CallEvent::Exception {
            call_id: CallId::from("c1"),
            exception: EngineException {
                event_type: crate::engine::EngineCommand::HoldUnholdCall,
                message: "488 not acceptable".to_string(),
            },
        };
        let err = event.error().unwrap();
        assert_eq!(err.category(), "engine");
        assert!(err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "Engine exception for call c1: hold/unhold failed: 488 not acceptable"
        );
        assert!(CallEvent::CallEnded {
            call_id: CallId::from("c1")
        }
        .error()
        .is_none());
    }

    #[test]
    fn test_event_json_shape() {
        let event = CallEvent::HoldStatusUpdated {
            call_id: CallId::from("c1"),
            on_hold: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "hold_status_updated");
        assert_eq!(json["call_id"], "c1");
        assert_eq!(json["on_hold"], true);
    }
}
