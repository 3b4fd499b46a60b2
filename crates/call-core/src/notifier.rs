//! Event notifier
//!
//! Turns raw engine callbacks into normalized [`CallEvent`]s. Each callback
//! first updates the session through the [`SessionRegistry`], and only events
//! that reflect a real change reach the host. The listener is always invoked
//! with no registry lock held.
//!
//! State names map as follows:
//!
//! | engine state   | host notification               |
//! |----------------|---------------------------------|
//! | `CALLING`      | none (`call_started` already sent) |
//! | `EARLY`        | `call_ringing`                  |
//! | `CONNECTING`   | `call_connecting`               |
//! | `CONFIRMED`    | `call_connected`                |
//! | `DISCONNECTED` | `call_ended`, then the session is removed |
//!
//! A `CONFIRMED` that skips `CONNECTING` produces `call_connecting` first so
//! the host always observes the full progression.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, trace, warn};

use crate::call::{CallDirection, CallId, CallState, TransferStatus, Transition};
use crate::engine::{EngineCallState, EngineCommand, EngineFeature};
use crate::error::{CallError, EngineException};
use crate::events::{CallEvent, CallEventListener};
use crate::registry::SessionRegistry;

/// Normalizes engine callbacks and delivers them to the registered listener
pub struct EventNotifier {
    registry: Arc<SessionRegistry>,
    listener: RwLock<Option<Arc<dyn CallEventListener>>>,
}

impl std::fmt::Debug for EventNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventNotifier")
            .field("sessions", &self.registry.len())
            .field("has_listener", &self.has_listener())
            .finish()
    }
}

impl EventNotifier {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            listener: RwLock::new(None),
        }
    }

    /// Register the host listener, replacing any previous one
    pub fn set_listener(&self, listener: Arc<dyn CallEventListener>) {
        *self.listener.write() = Some(listener);
    }

    pub fn clear_listener(&self) {
        *self.listener.write() = None;
    }

    pub fn has_listener(&self) -> bool {
        self.listener.read().is_some()
    }

    /// Deliver `event` to the listener, if one is registered
    pub fn notify(&self, event: CallEvent) {
        let listener = self.listener.read().clone();
        match listener {
            Some(listener) => {
                trace!(call_id = %event.call_id(), kind = event.kind(), "delivering call event");
                listener.on_event(event);
            }
            None => debug!(
                call_id = %event.call_id(),
                kind = event.kind(),
                "no listener, event dropped"
            ),
        }
    }

    /// Engine reported a call state change
    pub fn handle_state_changed(&self, call_id: &str, state: i32, state_name: &str) {
        let engine_state = EngineCallState::parse(state_name);
        let Some(target) = engine_state.to_call_state() else {
            debug!(call_id, state, state_name, "engine state has no host mapping");
            return;
        };
        let Some(id) = parse_call_id(call_id) else {
            warn!(state_name, "state change without call id");
            return;
        };

        if !self.adopt_if_new(&id, target) {
            return;
        }

        let transition = match self.registry.update(&id, |session| session.transition(target)) {
            Ok(transition) => transition,
            Err(e) => {
                log_dropped(&id, "state change", &e);
                return;
            }
        };
        let Transition::Advanced { from, to } = transition else {
            trace!(call_id = %id, state = %target, "duplicate state report");
            return;
        };
        debug!(call_id = %id, %from, %to, "call state advanced");

        match to {
            CallState::Idle | CallState::Calling => {}
            CallState::Early => self.notify(CallEvent::CallRinging { call_id: id }),
            CallState::Connecting => self.notify(CallEvent::CallConnecting { call_id: id }),
            CallState::Confirmed => {
                if from < CallState::Connecting {
                    self.notify(CallEvent::CallConnecting { call_id: id.clone() });
                }
                self.notify(CallEvent::CallConnected { call_id: id });
            }
            CallState::Disconnected => {
                info!(call_id = %id, "call ended");
                self.notify(CallEvent::CallEnded { call_id: id.clone() });
                self.registry.remove(&id);
            }
        }
    }

    /// Engine confirmed a mute or hold toggle
    pub fn handle_feature_toggled(&self, call_id: &str, feature_name: &str, status: bool) {
        let feature = EngineFeature::parse(feature_name);
        if let EngineFeature::Unknown(name) = &feature {
            debug!(call_id, feature = %name, "ignoring unknown feature");
            return;
        }
        let Some(id) = parse_call_id(call_id) else {
            warn!(feature_name, "feature toggle without call id");
            return;
        };

        let applied = self.registry.update(&id, |session| match &feature {
            EngineFeature::Mute => session.set_muted(status),
            EngineFeature::Hold => session.set_on_hold(status),
            EngineFeature::Unknown(_) => Ok(()),
        });
        if let Err(e) = applied {
            log_dropped(&id, "feature toggle", &e);
            return;
        }

        let event = match feature {
            EngineFeature::Hold => CallEvent::HoldStatusUpdated {
                call_id: id,
                on_hold: status,
            },
            _ => CallEvent::MuteStatusUpdated {
                call_id: id,
                muted: status,
            },
        };
        self.notify(event);
    }

    /// Engine reported progress of a blind transfer
    pub fn handle_transfer_status(&self, call_id: &str, code: i32) {
        let Some(id) = parse_call_id(call_id) else {
            warn!(code, "transfer status without call id");
            return;
        };
        let status = TransferStatus::from_engine_code(code);
        let recorded = self
            .registry
            .update(&id, |session| session.record_transfer_status(status));
        if let Err(e) = recorded {
            log_dropped(&id, "transfer status", &e);
            return;
        }
        debug!(call_id = %id, code, ?status, "transfer status");
        self.notify(CallEvent::TransferStatusChanged { call_id: id, status });
    }

    /// Engine reported a failed command; forwarded without touching the session
    pub fn handle_exception(&self, call_id: &str, event_type: i32, message: &str) {
        let exception = EngineException {
            event_type: EngineCommand::from_code(event_type),
            message: message.to_string(),
        };
        error!(call_id, %exception, "engine exception");
        self.notify(CallEvent::Exception {
            call_id: CallId::from(call_id),
            exception,
        });
    }

    /// Create a session for a call the engine announced on its own
    ///
    /// Only `CALLING` or `EARLY` can start a call the registry does not know.
    /// Anything later is a stray report for a call that is gone (or whose id
    /// has aged out of the closed-id memory) and is dropped. An adopted call
    /// is announced with `call_started` before its first state event.
    /// Returns `false` when the event should be dropped.
    fn adopt_if_new(&self, id: &CallId, target: CallState) -> bool {
        if self.registry.contains(id) {
            return true;
        }
        if self.registry.is_closed(id) {
            debug!(call_id = %id, state = %target, "late state change for finished call");
            return false;
        }
        if !matches!(target, CallState::Calling | CallState::Early) {
            debug!(call_id = %id, state = %target, "state change for unknown call");
            return false;
        }
        // A concurrent insert for the same id is fine; the update below sees it.
        if self
            .registry
            .insert(id.clone(), String::new(), CallDirection::Incoming)
            .is_ok()
        {
            info!(call_id = %id, state = %target, "adopted engine-announced call");
            self.notify(CallEvent::CallStarted {
                call_id: id.clone(),
                name: String::new(),
                number: String::new(),
            });
        }
        true
    }
}

fn parse_call_id(raw: &str) -> Option<CallId> {
    if raw.trim().is_empty() {
        None
    } else {
        Some(CallId::from(raw))
    }
}

fn log_dropped(id: &CallId, what: &str, err: &CallError) {
    match err {
        CallError::SessionClosed { .. } => {
            debug!(call_id = %id, error = %err, "{} for closed call ignored", what)
        }
        _ => warn!(call_id = %id, error = %err, "{} dropped", what),
    }
}
