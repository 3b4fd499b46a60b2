//! The call core
//!
//! [`CallCore`] wires the registry, notifier and dispatcher around one
//! injected [`SipEngine`]. It is the engine's event sink and the host's
//! command surface. Build one with [`CallCoreBuilder`], register a listener,
//! then call [`CallCore::start`] once.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::call::{CallId, CallSession, CallStats};
use crate::config::{AccountConfig, CallCoreConfig};
use crate::dispatcher::{AnswerRequest, CallDispatcher};
use crate::engine::{EngineEventSink, SipEngine};
use crate::error::{CallError, CallResult, EngineError};
use crate::events::CallEventListener;
use crate::notifier::EventNotifier;
use crate::registry::SessionRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    InitFailed(CallError),
}

/// Call-control core bound to one SIP engine
pub struct CallCore {
    config: Arc<CallCoreConfig>,
    registry: Arc<SessionRegistry>,
    notifier: Arc<EventNotifier>,
    dispatcher: CallDispatcher,
    engine: Arc<dyn SipEngine>,
    lifecycle: Mutex<Lifecycle>,
}

impl std::fmt::Debug for CallCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallCore")
            .field("lifecycle", &*self.lifecycle.lock())
            .field("sessions", &self.registry.len())
            .finish()
    }
}

impl CallCore {
    /// Create a core; the engine is not touched until [`start`](Self::start)
    pub fn new(config: CallCoreConfig, engine: Arc<dyn SipEngine>) -> CallResult<Arc<Self>> {
        config.validate()?;
        let config = Arc::new(config);
        let registry = Arc::new(SessionRegistry::with_closed_memory(
            config.closed_session_memory,
        ));
        let notifier = Arc::new(EventNotifier::new(registry.clone()));
        let dispatcher = CallDispatcher::new(
            config.clone(),
            registry.clone(),
            notifier.clone(),
            engine.clone(),
        );

        Ok(Arc::new(Self {
            config,
            registry,
            notifier,
            dispatcher,
            engine,
            lifecycle: Mutex::new(Lifecycle::Created),
        }))
    }

    /// Attach to the engine and run its one-time initialization
    ///
    /// A second call returns [`CallError::AlreadyStarted`]. If the engine
    /// fails to initialize or rejects the proxy or default account, every
    /// later call returns that original failure.
    pub fn start(self: &Arc<Self>) -> CallResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        match &*lifecycle {
            Lifecycle::Running => return Err(CallError::AlreadyStarted),
            Lifecycle::InitFailed(err) => return Err(err.clone()),
            Lifecycle::Created => {}
        }

        let sink: Arc<dyn EngineEventSink> = self.clone();
        self.engine.attach(Arc::downgrade(&sink));

        if let Err(e) = self.configure_engine() {
            error!(error = %e, "engine start-up failed");
            let err = CallError::from(e);
            *lifecycle = Lifecycle::InitFailed(err.clone());
            return Err(err);
        }

        *lifecycle = Lifecycle::Running;
        info!(proxy = ?self.config.proxy_server, "call core started");
        Ok(())
    }

    fn configure_engine(&self) -> Result<(), EngineError> {
        self.engine.initialize_and_prepare()?;
        if let Some(proxy) = &self.config.proxy_server {
            self.engine.set_proxy_server_address(proxy)?;
        }
        if let Some(AccountConfig::Userless { account_id }) = &self.config.account {
            self.engine.set_default_account(account_id)?;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        *self.lifecycle.lock() == Lifecycle::Running
    }

    fn ensure_running(&self) -> CallResult<()> {
        match &*self.lifecycle.lock() {
            Lifecycle::Running => Ok(()),
            Lifecycle::Created => Err(CallError::NotStarted),
            Lifecycle::InitFailed(err) => Err(err.clone()),
        }
    }

    /// Register the host listener, replacing any previous one
    pub fn set_listener(&self, listener: Arc<dyn CallEventListener>) {
        self.notifier.set_listener(listener);
    }

    pub fn clear_listener(&self) {
        self.notifier.clear_listener();
    }

    pub fn config(&self) -> &CallCoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    // ===== Commands =====

    pub fn place_call(&self, number: &str, account: &AccountConfig) -> CallResult<CallId> {
        self.ensure_running()?;
        self.dispatcher.place_call(number, account)
    }

    pub fn place_default_call(&self, number: &str) -> CallResult<CallId> {
        self.ensure_running()?;
        self.dispatcher.place_default_call(number)
    }

    pub fn answer_call(&self, request: &AnswerRequest) -> CallResult<CallId> {
        self.ensure_running()?;
        self.dispatcher.answer_call(request)
    }

    pub fn end_call(&self, call_id: &CallId) -> CallResult<()> {
        self.ensure_running()?;
        self.dispatcher.end_call(call_id)
    }

    pub fn toggle_mute(&self, call_id: &CallId, status: bool) -> CallResult<()> {
        self.ensure_running()?;
        self.dispatcher.toggle_mute(call_id, status)
    }

    pub fn toggle_hold(&self, call_id: &CallId, status: bool) -> CallResult<()> {
        self.ensure_running()?;
        self.dispatcher.toggle_hold(call_id, status)
    }

    pub fn send_dtmf(&self, call_id: &CallId, digits: &str) -> CallResult<()> {
        self.ensure_running()?;
        self.dispatcher.send_dtmf(call_id, digits)
    }

    pub fn blind_transfer(&self, call_id: &CallId, destination: &str) -> CallResult<()> {
        self.ensure_running()?;
        self.dispatcher.blind_transfer(call_id, destination)
    }

    // ===== Queries =====

    pub fn session(&self, call_id: &CallId) -> Option<CallSession> {
        self.registry.get(call_id)
    }

    pub fn sessions(&self) -> Vec<CallSession> {
        self.registry.sessions()
    }

    pub fn stats(&self) -> CallStats {
        self.registry.stats()
    }
}

impl EngineEventSink for CallCore {
    fn on_call_state_changed(&self, call_id: &str, state: i32, state_name: &str) {
        self.notifier.handle_state_changed(call_id, state, state_name);
    }

    fn on_feature_toggled(&self, call_id: &str, feature_name: &str, status: bool) {
        self.notifier.handle_feature_toggled(call_id, feature_name, status);
    }

    fn on_transfer_status_changed(&self, call_id: &str, status: i32) {
        self.notifier.handle_transfer_status(call_id, status);
    }

    fn on_exception_raised(&self, call_id: &str, event_type: i32, message: &str) {
        self.notifier.handle_exception(call_id, event_type, message);
    }
}

/// Builder for [`CallCore`]
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use sipcall_core::{AccountConfig, CallCoreBuilder, LoopbackEngine};
///
/// let core = CallCoreBuilder::new()
///     .proxy_server("sip:proxy.example.com;transport=tcp")
///     .account(AccountConfig::credentialed("web_user", "pw", "pbx.example.com"))
///     .engine(Arc::new(LoopbackEngine::manual()))
///     .build()
///     .unwrap();
/// core.start().unwrap();
/// ```
pub struct CallCoreBuilder {
    config: CallCoreConfig,
    engine: Option<Arc<dyn SipEngine>>,
    listener: Option<Arc<dyn CallEventListener>>,
}

impl CallCoreBuilder {
    pub fn new() -> Self {
        Self {
            config: CallCoreConfig::default(),
            engine: None,
            listener: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: CallCoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn proxy_server(mut self, proxy: impl Into<String>) -> Self {
        self.config = self.config.with_proxy_server(proxy);
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.config = self.config.with_domain(domain);
        self
    }

    pub fn account(mut self, account: AccountConfig) -> Self {
        self.config = self.config.with_account(account);
        self
    }

    pub fn command_queue_depth(mut self, depth: usize) -> Self {
        self.config = self.config.with_command_queue_depth(depth);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn SipEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn CallEventListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn build(self) -> CallResult<Arc<CallCore>> {
        let engine = self
            .engine
            .ok_or_else(|| CallError::invalid_configuration("engine", "a SIP engine is required"))?;
        let core = CallCore::new(self.config, engine)?;
        match self.listener {
            Some(listener) => core.set_listener(listener),
            None => warn!("call core built without a listener; events will be dropped"),
        }
        Ok(core)
    }
}

impl Default for CallCoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
