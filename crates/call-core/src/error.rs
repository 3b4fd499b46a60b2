//! Error types for the call-control core
//!
//! Errors fall into two propagation paths:
//!
//! - **Synchronous rejections** - bad input, unknown or closed sessions,
//!   misconfiguration. These are returned from the command that caused them
//!   and never produce a side effect.
//! - **Engine failures** - anything the SIP engine reports after accepting a
//!   command. These never come back from a command call; they arrive through
//!   [`CallEventListener::on_exception`](crate::events::CallEventListener::on_exception)
//!   as an [`EngineException`].
//!
//! Nothing here is fatal to the process except [`CallError::EngineInitFailed`],
//! which must abort start-up.
//!
//! # Handling Pattern
//!
//! ```rust,no_run
//! # use sipcall_core::{CallCore, CallError};
//! # use std::sync::Arc;
//! # fn example(core: Arc<CallCore>, call_id: sipcall_core::CallId) {
//! match core.toggle_mute(&call_id, true) {
//!     Ok(()) => {
//!         // Wait for on_mute_status_updated before changing the UI
//!     }
//!     Err(CallError::SessionClosed { .. }) => {
//!         // Call already ended, nothing to mute
//!     }
//!     Err(e) => tracing::warn!(category = e.category(), "mute rejected: {}", e),
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::call::{CallId, CallState};
use crate::engine::EngineCommand;

/// Result type alias for call-core operations
pub type CallResult<T> = Result<T, CallError>;

/// Opaque failure reported by the SIP engine for a previously issued command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineException {
    /// Which engine command failed
    pub event_type: EngineCommand,
    /// Engine-provided description, forwarded verbatim
    pub message: String,
}

impl std::fmt::Display for EngineException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.event_type, self.message)
    }
}

/// Errors returned by the engine boundary itself
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Engine initialization failed: {reason}")]
    InitializationFailed { reason: String },

    #[error("Engine rejected configuration: {reason}")]
    Configuration { reason: String },
}

/// Error types for call-control operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Caller input rejected before any side effect
    #[error("Invalid argument {argument}: {reason}")]
    InvalidArgument { argument: &'static str, reason: String },

    #[error("Unknown session: {call_id}")]
    UnknownSession { call_id: CallId },

    #[error("Session already exists: {call_id}")]
    DuplicateSession { call_id: CallId },

    #[error("Invalid state for call {call_id}: {operation} not allowed in {current_state}")]
    InvalidState {
        call_id: CallId,
        current_state: CallState,
        operation: String,
    },

    #[error("Session closed: {call_id}")]
    SessionClosed { call_id: CallId },

    #[error("Engine exception for call {call_id}: {exception}")]
    Engine {
        call_id: CallId,
        exception: EngineException,
    },

    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Engine initialization failed: {reason}")]
    EngineInitFailed { reason: String },

    #[error("Call core already started")]
    AlreadyStarted,

    #[error("Call core not started")]
    NotStarted,

    #[error("Call core unavailable: command queue closed")]
    CoreUnavailable,
}

impl CallError {
    /// Create an invalid argument error
    pub fn invalid_argument(argument: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            argument,
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(
        call_id: &CallId,
        current_state: CallState,
        operation: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            call_id: call_id.clone(),
            current_state,
            operation: operation.into(),
        }
    }

    /// Check if error refers to the state or existence of a session
    pub fn is_session_error(&self) -> bool {
        matches!(
            self,
            CallError::UnknownSession { .. }
                | CallError::DuplicateSession { .. }
                | CallError::InvalidState { .. }
                | CallError::SessionClosed { .. }
        )
    }

    /// Check if retrying the same operation later can succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            CallError::Engine { .. } | CallError::NotStarted => true,

            CallError::InvalidArgument { .. }
            | CallError::InvalidConfiguration { .. }
            | CallError::EngineInitFailed { .. }
            | CallError::SessionClosed { .. }
            | CallError::AlreadyStarted
            | CallError::CoreUnavailable => false,

            _ => false,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            CallError::InvalidArgument { .. } => "input",

            CallError::UnknownSession { .. }
            | CallError::DuplicateSession { .. }
            | CallError::InvalidState { .. }
            | CallError::SessionClosed { .. } => "session",

            CallError::Engine { .. } | CallError::EngineInitFailed { .. } => "engine",

            CallError::InvalidConfiguration { .. } => "configuration",

            CallError::AlreadyStarted | CallError::NotStarted | CallError::CoreUnavailable => {
                "lifecycle"
            }
        }
    }
}

impl From<EngineError> for CallError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InitializationFailed { reason } => CallError::EngineInitFailed { reason },
            EngineError::Configuration { reason } => {
                CallError::invalid_configuration("engine", reason)
            }
        }
    }
}
