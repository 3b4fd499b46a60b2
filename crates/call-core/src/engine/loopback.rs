//! In-process loopback engine
//!
//! Records every command it receives and lets the caller feed callbacks back
//! into the attached sink. With [`LoopbackBehavior::AutoProgress`] it also
//! plays the part of a well-behaved remote party: outbound calls ring and
//! answer, hangups disconnect, toggles are confirmed.
//!
//! Scripted callbacks go through a single queue drained by one task, so they
//! reach the sink in the order they were produced, like a real engine's
//! serialized notification thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{
    AnswerCall, EngineCallState, EngineEvent, EngineEventSink, EngineFeature, OutboundCall,
    SipEngine,
};
use crate::call::CallId;
use crate::error::EngineError;

/// How the loopback engine reacts to commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopbackBehavior {
    /// Only record commands; callbacks come from [`LoopbackEngine::emit`]
    Manual,
    /// Answer every call and confirm every toggle, `step` apart
    AutoProgress { step: Duration },
}

/// A command as seen by the loopback engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCommand {
    Initialize,
    SetProxy(String),
    SetDefaultAccount(String),
    InitiateCall(OutboundCall),
    AnswerCall(AnswerCall),
    EndCall(CallId),
    ToggleHold { call_id: CallId, status: bool },
    ToggleMute { call_id: CallId, status: bool },
    SendDtmf { call_id: CallId, digits: String },
    BlindTransfer { call_id: CallId, destination: String },
}

impl RecordedCommand {
    /// Call this command targets, if any
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            RecordedCommand::InitiateCall(call) => Some(&call.call_id),
            RecordedCommand::AnswerCall(call) => Some(&call.call_id),
            RecordedCommand::EndCall(call_id)
            | RecordedCommand::ToggleHold { call_id, .. }
            | RecordedCommand::ToggleMute { call_id, .. }
            | RecordedCommand::SendDtmf { call_id, .. }
            | RecordedCommand::BlindTransfer { call_id, .. } => Some(call_id),
            _ => None,
        }
    }
}

type Scripted = (Duration, EngineEvent);

/// Scriptable [`SipEngine`] for tests and demos
pub struct LoopbackEngine {
    behavior: LoopbackBehavior,
    sink: Arc<RwLock<Option<Weak<dyn EngineEventSink>>>>,
    commands: Mutex<Vec<RecordedCommand>>,
    initialized: AtomicBool,
    init_failure: Option<String>,
    script_tx: Mutex<Option<mpsc::UnboundedSender<Scripted>>>,
}

impl std::fmt::Debug for LoopbackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackEngine")
            .field("behavior", &self.behavior)
            .field("commands", &self.commands.lock().len())
            .field("initialized", &self.initialized.load(Ordering::SeqCst))
            .finish()
    }
}

impl LoopbackEngine {
    pub fn new(behavior: LoopbackBehavior) -> Self {
        Self {
            behavior,
            sink: Arc::new(RwLock::new(None)),
            commands: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
            init_failure: None,
            script_tx: Mutex::new(None),
        }
    }

    /// Engine that only records commands
    pub fn manual() -> Self {
        Self::new(LoopbackBehavior::Manual)
    }

    /// Engine that plays a cooperative remote party
    pub fn auto_progress(step: Duration) -> Self {
        Self::new(LoopbackBehavior::AutoProgress { step })
    }

    /// Make `initialize_and_prepare` fail with `reason`
    pub fn failing_init(reason: impl Into<String>) -> Self {
        Self {
            init_failure: Some(reason.into()),
            ..Self::manual()
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// All commands received so far
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.commands.lock().clone()
    }

    /// Commands received for one call
    pub fn commands_for(&self, call_id: &CallId) -> Vec<RecordedCommand> {
        self.commands
            .lock()
            .iter()
            .filter(|c| c.call_id() == Some(call_id))
            .cloned()
            .collect()
    }

    pub fn clear_commands(&self) {
        self.commands.lock().clear();
    }

    /// Deliver a callback to the attached sink on the caller's thread
    pub fn emit(&self, event: EngineEvent) {
        deliver(&self.sink, &event);
    }

    /// Convenience for a state callback
    pub fn emit_state(&self, call_id: &CallId, state: EngineCallState) {
        self.emit(EngineEvent::state(call_id.as_str(), state));
    }

    fn record(&self, command: RecordedCommand) {
        debug!(?command, "loopback engine command");
        self.commands.lock().push(command);
    }

    fn step(&self) -> Option<Duration> {
        match self.behavior {
            LoopbackBehavior::AutoProgress { step } => Some(step),
            LoopbackBehavior::Manual => None,
        }
    }

    /// Queue scripted callbacks for in-order delivery
    fn script(&self, events: Vec<EngineEvent>) {
        let Some(step) = self.step() else {
            return;
        };

        let mut guard = self.script_tx.lock();
        if guard.is_none() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    handle.spawn(run_script(self.sink.clone(), rx));
                    *guard = Some(tx);
                }
                Err(_) => {
                    warn!("no tokio runtime; delivering scripted engine events inline");
                    drop(guard);
                    for event in &events {
                        deliver(&self.sink, event);
                    }
                    return;
                }
            }
        }

        if let Some(tx) = guard.as_ref() {
            for event in events {
                if tx.send((step, event)).is_err() {
                    warn!("loopback script task stopped");
                    break;
                }
            }
        }
    }
}

fn deliver(sink: &RwLock<Option<Weak<dyn EngineEventSink>>>, event: &EngineEvent) {
    let target = sink.read().as_ref().and_then(Weak::upgrade);
    match target {
        Some(sink) => event.deliver(sink.as_ref()),
        None => debug!(?event, "no engine sink attached; event dropped"),
    }
}

async fn run_script(
    sink: Arc<RwLock<Option<Weak<dyn EngineEventSink>>>>,
    mut rx: mpsc::UnboundedReceiver<Scripted>,
) {
    while let Some((delay, event)) = rx.recv().await {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        deliver(&sink, &event);
    }
}

impl SipEngine for LoopbackEngine {
    fn initialize_and_prepare(&self) -> Result<(), EngineError> {
        self.record(RecordedCommand::Initialize);
        if let Some(reason) = &self.init_failure {
            return Err(EngineError::InitializationFailed { reason: reason.clone() });
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn attach(&self, sink: Weak<dyn EngineEventSink>) {
        *self.sink.write() = Some(sink);
    }

    fn set_proxy_server_address(&self, address: &str) -> Result<(), EngineError> {
        self.record(RecordedCommand::SetProxy(address.to_string()));
        let scheme = address.split(':').next().unwrap_or_default();
        if !scheme.eq_ignore_ascii_case("sip") && !scheme.eq_ignore_ascii_case("sips") {
            return Err(EngineError::Configuration {
                reason: format!("proxy address is not a SIP URI: {}", address),
            });
        }
        Ok(())
    }

    fn set_default_account(&self, account_id: &str) -> Result<(), EngineError> {
        self.record(RecordedCommand::SetDefaultAccount(account_id.to_string()));
        Ok(())
    }

    fn initiate_call(&self, call: OutboundCall) {
        let id = call.call_id.as_str().to_string();
        self.record(RecordedCommand::InitiateCall(call));
        self.script(vec![
            EngineEvent::state(id.as_str(), EngineCallState::Calling),
            EngineEvent::state(id.as_str(), EngineCallState::Early),
            EngineEvent::state(id.as_str(), EngineCallState::Connecting),
            EngineEvent::state(id.as_str(), EngineCallState::Confirmed),
        ]);
    }

    fn answer_call(&self, call: AnswerCall) {
        let id = call.call_id.as_str().to_string();
        self.record(RecordedCommand::AnswerCall(call));
        self.script(vec![
            EngineEvent::state(id.as_str(), EngineCallState::Connecting),
            EngineEvent::state(id.as_str(), EngineCallState::Confirmed),
        ]);
    }

    fn end_call(&self, call_id: &CallId) {
        self.record(RecordedCommand::EndCall(call_id.clone()));
        self.script(vec![EngineEvent::state(
            call_id.as_str(),
            EngineCallState::Disconnected,
        )]);
    }

    fn toggle_hold(&self, call_id: &CallId, status: bool) {
        self.record(RecordedCommand::ToggleHold {
            call_id: call_id.clone(),
            status,
        });
        self.script(vec![EngineEvent::feature(
            call_id.as_str(),
            EngineFeature::Hold,
            status,
        )]);
    }

    fn toggle_mute(&self, call_id: &CallId, status: bool) {
        self.record(RecordedCommand::ToggleMute {
            call_id: call_id.clone(),
            status,
        });
        self.script(vec![EngineEvent::feature(
            call_id.as_str(),
            EngineFeature::Mute,
            status,
        )]);
    }

    fn send_dtmf(&self, call_id: &CallId, digits: &str) {
        self.record(RecordedCommand::SendDtmf {
            call_id: call_id.clone(),
            digits: digits.to_string(),
        });
    }

    fn blind_transfer(&self, call_id: &CallId, destination: &str) {
        self.record(RecordedCommand::BlindTransfer {
            call_id: call_id.clone(),
            destination: destination.to_string(),
        });
        self.script(vec![
            EngineEvent::TransferStatusChanged {
                call_id: call_id.as_str().to_string(),
                status: 100,
            },
            EngineEvent::TransferStatusChanged {
                call_id: call_id.as_str().to_string(),
                status: 200,
            },
        ]);
    }
}
