//! Boundary with the underlying SIP engine
//!
//! The engine (transport, transactions, dialogs, media) is an opaque
//! collaborator injected as `Arc<dyn SipEngine>`. Commands go down through
//! [`SipEngine`]; callbacks come back up through [`EngineEventSink`].
//!
//! The engine speaks in strings and integers (`"CONFIRMED"`, `"TOGGLE_MUTE"`,
//! event type `4`). This module is the adapter layer that turns those into
//! closed enums, each with an explicit unknown variant, so business logic
//! never matches on raw strings.

use std::fmt;
use std::sync::Weak;

use serde::{Deserialize, Serialize};

use crate::call::{CallId, CallState};
use crate::error::EngineError;

pub mod loopback;

pub use loopback::{LoopbackBehavior, LoopbackEngine, RecordedCommand};

/// Engine command kinds, as numbered in engine exception reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineCommand {
    MakeCall,
    AnswerCall,
    HoldUnholdCall,
    HangupCall,
    MuteUnmuteCall,
    SendDtmfTone,
    BlindTransferCall,
    /// Code this core does not know about
    Other(i32),
}

impl EngineCommand {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => EngineCommand::MakeCall,
            2 => EngineCommand::AnswerCall,
            3 => EngineCommand::HoldUnholdCall,
            4 => EngineCommand::HangupCall,
            5 => EngineCommand::MuteUnmuteCall,
            6 => EngineCommand::SendDtmfTone,
            7 => EngineCommand::BlindTransferCall,
            other => EngineCommand::Other(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            EngineCommand::MakeCall => 1,
            EngineCommand::AnswerCall => 2,
            EngineCommand::HoldUnholdCall => 3,
            EngineCommand::HangupCall => 4,
            EngineCommand::MuteUnmuteCall => 5,
            EngineCommand::SendDtmfTone => 6,
            EngineCommand::BlindTransferCall => 7,
            EngineCommand::Other(code) => *code,
        }
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineCommand::MakeCall => write!(f, "make call"),
            EngineCommand::AnswerCall => write!(f, "answer call"),
            EngineCommand::HoldUnholdCall => write!(f, "hold/unhold"),
            EngineCommand::HangupCall => write!(f, "hangup"),
            EngineCommand::MuteUnmuteCall => write!(f, "mute/unmute"),
            EngineCommand::SendDtmfTone => write!(f, "send DTMF"),
            EngineCommand::BlindTransferCall => write!(f, "blind transfer"),
            EngineCommand::Other(code) => write!(f, "command {}", code),
        }
    }
}

/// Invite-session state names reported by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCallState {
    Null,
    Calling,
    Incoming,
    Early,
    Connecting,
    Confirmed,
    Disconnected,
    /// Name introduced by a newer engine; ignored
    Unknown(String),
}

impl EngineCallState {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "NULL" => EngineCallState::Null,
            "CALLING" => EngineCallState::Calling,
            "INCOMING" => EngineCallState::Incoming,
            "EARLY" => EngineCallState::Early,
            "CONNECTING" => EngineCallState::Connecting,
            "CONFIRMED" => EngineCallState::Confirmed,
            "DISCONNECTED" | "DISCONNCTD" => EngineCallState::Disconnected,
            _ => EngineCallState::Unknown(name.to_string()),
        }
    }

    /// The engine's name for this state
    pub fn name(&self) -> &str {
        match self {
            EngineCallState::Null => "NULL",
            EngineCallState::Calling => "CALLING",
            EngineCallState::Incoming => "INCOMING",
            EngineCallState::Early => "EARLY",
            EngineCallState::Connecting => "CONNECTING",
            EngineCallState::Confirmed => "CONFIRMED",
            EngineCallState::Disconnected => "DISCONNECTED",
            EngineCallState::Unknown(name) => name,
        }
    }

    /// The engine's numeric code for this state
    pub fn code(&self) -> i32 {
        match self {
            EngineCallState::Null => 0,
            EngineCallState::Calling => 1,
            EngineCallState::Incoming => 2,
            EngineCallState::Early => 3,
            EngineCallState::Connecting => 4,
            EngineCallState::Confirmed => 5,
            EngineCallState::Disconnected => 6,
            EngineCallState::Unknown(_) => -1,
        }
    }

    /// Core state this engine state drives, if any
    pub fn to_call_state(&self) -> Option<CallState> {
        match self {
            EngineCallState::Calling => Some(CallState::Calling),
            EngineCallState::Early => Some(CallState::Early),
            EngineCallState::Connecting => Some(CallState::Connecting),
            EngineCallState::Confirmed => Some(CallState::Confirmed),
            EngineCallState::Disconnected => Some(CallState::Disconnected),
            EngineCallState::Null
            | EngineCallState::Incoming
            | EngineCallState::Unknown(_) => None,
        }
    }
}

/// Call features the engine reports toggles for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineFeature {
    Mute,
    Hold,
    Unknown(String),
}

impl EngineFeature {
    pub const MUTE: &'static str = "TOGGLE_MUTE";
    pub const HOLD: &'static str = "TOGGLE_HOLD";

    pub fn parse(name: &str) -> Self {
        match name {
            Self::MUTE => EngineFeature::Mute,
            Self::HOLD => EngineFeature::Hold,
            other => EngineFeature::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            EngineFeature::Mute => Self::MUTE,
            EngineFeature::Hold => Self::HOLD,
            EngineFeature::Unknown(name) => name,
        }
    }
}

/// Credentials handed to the engine for an outbound call
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Digest credentials used for proxy authentication
    Digest {
        username: String,
        password: String,
        domain: String,
    },
    /// Account already provisioned on the engine
    PreRegistered { account_id: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Digest { username, domain, .. } => f
                .debug_struct("Digest")
                .field("username", username)
                .field("password", &"<redacted>")
                .field("domain", domain)
                .finish(),
            Credentials::PreRegistered { account_id } => f
                .debug_struct("PreRegistered")
                .field("account_id", account_id)
                .finish(),
        }
    }
}

/// Outbound call request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCall {
    pub call_id: CallId,
    /// Fully qualified target URI, e.g. `sip:100@pbx.example.com`
    pub to: String,
    pub credentials: Credentials,
}

/// Custom SIP header attached to a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipHeader {
    pub name: String,
    pub value: String,
}

impl SipHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Call-back request used to pick up an inbound channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerCall {
    pub call_id: CallId,
    pub dest_uri: String,
    pub headers: Vec<SipHeader>,
}

/// Command surface of the SIP engine
///
/// Every call command is fire-and-forget: acceptance is reported later
/// through [`EngineEventSink`], failures through
/// [`EngineEventSink::on_exception_raised`].
pub trait SipEngine: Send + Sync {
    /// One-time engine setup; must precede every other command
    fn initialize_and_prepare(&self) -> Result<(), EngineError>;

    /// Register the callback target
    fn attach(&self, sink: Weak<dyn EngineEventSink>);

    /// Route every call through `address`
    fn set_proxy_server_address(&self, address: &str) -> Result<(), EngineError>;

    /// Provision the account used for userless calls
    fn set_default_account(&self, account_id: &str) -> Result<(), EngineError>;

    fn initiate_call(&self, call: OutboundCall);

    fn answer_call(&self, call: AnswerCall);

    fn end_call(&self, call_id: &CallId);

    fn toggle_hold(&self, call_id: &CallId, status: bool);

    fn toggle_mute(&self, call_id: &CallId, status: bool);

    fn send_dtmf(&self, call_id: &CallId, digits: &str);

    fn blind_transfer(&self, call_id: &CallId, destination: &str);
}

/// Raw callbacks delivered by the engine, serialized per engine instance
pub trait EngineEventSink: Send + Sync {
    fn on_call_state_changed(&self, call_id: &str, state: i32, state_name: &str);

    fn on_feature_toggled(&self, call_id: &str, feature_name: &str, status: bool);

    fn on_transfer_status_changed(&self, call_id: &str, status: i32);

    fn on_exception_raised(&self, call_id: &str, event_type: i32, message: &str);
}

/// A raw engine callback as a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    StateChanged {
        call_id: String,
        state: i32,
        state_name: String,
    },
    FeatureToggled {
        call_id: String,
        feature_name: String,
        status: bool,
    },
    TransferStatusChanged {
        call_id: String,
        status: i32,
    },
    Exception {
        call_id: String,
        event_type: i32,
        message: String,
    },
}

impl EngineEvent {
    /// State change carrying the engine's own code and name for `state`
    pub fn state(call_id: impl Into<String>, state: EngineCallState) -> Self {
        EngineEvent::StateChanged {
            call_id: call_id.into(),
            state: state.code(),
            state_name: state.name().to_string(),
        }
    }

    pub fn feature(call_id: impl Into<String>, feature: EngineFeature, status: bool) -> Self {
        EngineEvent::FeatureToggled {
            call_id: call_id.into(),
            feature_name: feature.name().to_string(),
            status,
        }
    }

    /// Hand this event to `sink` as the engine would
    pub fn deliver(&self, sink: &dyn EngineEventSink) {
        match self {
            EngineEvent::StateChanged {
                call_id,
                state,
                state_name,
            } => sink.on_call_state_changed(call_id, *state, state_name),
            EngineEvent::FeatureToggled {
                call_id,
                feature_name,
                status,
            } => sink.on_feature_toggled(call_id, feature_name, *status),
            EngineEvent::TransferStatusChanged { call_id, status } => {
                sink.on_transfer_status_changed(call_id, *status)
            }
            EngineEvent::Exception {
                call_id,
                event_type,
                message,
            } => sink.on_exception_raised(call_id, *event_type, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(EngineCallState::parse("CONFIRMED"), EngineCallState::Confirmed);
        assert_eq!(EngineCallState::parse("early"), EngineCallState::Early);
        assert_eq!(
            EngineCallState::parse("REJECTED_UNKNOWN"),
            EngineCallState::Unknown("REJECTED_UNKNOWN".to_string())
        );
        assert_eq!(EngineCallState::Calling.to_call_state(), Some(CallState::Calling));
        assert_eq!(EngineCallState::Incoming.to_call_state(), None);
        assert_eq!(EngineCallState::Unknown("X".into()).to_call_state(), None);
    }

    #[test]
    fn test_command_codes() {
        for code in 1..=7 {
            assert_eq!(EngineCommand::from_code(code).code(), code);
        }
        assert_eq!(EngineCommand::from_code(4), EngineCommand::HangupCall);
        assert_eq!(EngineCommand::from_code(42), EngineCommand::Other(42));
        assert_eq!(EngineCommand::BlindTransferCall.to_string(), "blind transfer");
    }

    #[test]
    fn test_features() {
        assert_eq!(EngineFeature::parse("TOGGLE_MUTE"), EngineFeature::Mute);
        assert_eq!(EngineFeature::parse("TOGGLE_HOLD"), EngineFeature::Hold);
        assert_eq!(
            EngineFeature::parse("TOGGLE_VIDEO"),
            EngineFeature::Unknown("TOGGLE_VIDEO".to_string())
        );
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::Digest {
            username: "web_user".to_string(),
            password: "secret".to_string(),
            domain: "pbx.example.com".to_string(),
        };
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("web_user"));
        assert!(!rendered.contains("secret"));
    }
}
