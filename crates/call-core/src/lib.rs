//! # sipcall-core
//!
//! Call-control core for embedding SIP voice calls in a host application.
//!
//! The core sits between a host (UI, bridge, bot) and a SIP engine that does
//! the actual signaling and media. It keeps one session per call, enforces
//! the call lifecycle, validates host commands before they reach the engine,
//! and turns the engine's raw callbacks into a small set of normalized
//! events.
//!
//! ```text
//!   host ──commands──▶ CallDispatcher ──▶ SipEngine
//!    ▲                      │                 │
//!    │                SessionRegistry ◀───────┤ callbacks
//!    └────events──── EventNotifier ◀──────────┘
//! ```
//!
//! The engine is injected through the [`SipEngine`] trait. It reports back
//! through [`EngineEventSink`], which [`CallCore`] implements.
//! [`LoopbackEngine`] is an in-process engine for tests and demos.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use sipcall_core::{
//!     AccountConfig, CallCoreBuilder, CallEventListener, CallId, EngineCallState, LoopbackEngine,
//! };
//!
//! struct Printer;
//!
//! impl CallEventListener for Printer {
//!     fn on_call_connected(&self, call_id: &CallId) {
//!         println!("connected: {}", call_id);
//!     }
//! }
//!
//! let engine = Arc::new(LoopbackEngine::manual());
//! let core = CallCoreBuilder::new()
//!     .account(AccountConfig::credentialed("web_user", "pw", "pbx.example.com"))
//!     .engine(engine.clone())
//!     .listener(Arc::new(Printer))
//!     .build()?;
//! core.start()?;
//!
//! let call_id = core.place_default_call("100")?;
//! engine.emit_state(&call_id, EngineCallState::Confirmed);
//! assert!(core.session(&call_id).is_some());
//! # Ok::<(), sipcall_core::CallError>(())
//! ```

pub mod call;
pub mod call_core;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod handle;
pub mod notifier;
pub mod registry;

pub use call::{
    CallDirection, CallId, CallSession, CallState, CallStats, TransferStatus, Transition,
};
pub use call_core::{CallCore, CallCoreBuilder};
pub use config::{AccountConfig, CallCoreConfig, DEFAULT_COMMAND_QUEUE_DEPTH};
pub use dispatcher::{AnswerRequest, CallDispatcher};
pub use engine::{
    AnswerCall, Credentials, EngineCallState, EngineCommand, EngineEvent, EngineEventSink,
    EngineFeature, LoopbackBehavior, LoopbackEngine, OutboundCall, RecordedCommand, SipEngine,
    SipHeader,
};
pub use error::{CallError, CallResult, EngineError, EngineException};
pub use events::{CallEvent, CallEventListener, ChannelListener};
pub use handle::CoreHandle;
pub use notifier::EventNotifier;
pub use registry::SessionRegistry;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
