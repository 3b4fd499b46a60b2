//! Command dispatcher
//!
//! Validates host commands, updates the registry, and forwards the work to
//! the engine. Nothing reaches the engine unless validation succeeded, and a
//! rejected command leaves the registry untouched.

use std::sync::Arc;

use tracing::{debug, info};

use crate::call::{CallDirection, CallId, CallState};
use crate::config::{AccountConfig, CallCoreConfig};
use crate::engine::{AnswerCall, OutboundCall, SipEngine, SipHeader};
use crate::error::{CallError, CallResult};
use crate::events::CallEvent;
use crate::notifier::EventNotifier;
use crate::registry::SessionRegistry;

/// Header carrying the host's channel id on an answered call
pub const CHANNEL_ID_HEADER: &str = "X-Channel-Id";
/// Header carrying the media address on an answered call
pub const MEDIA_ADDR_HEADER: &str = "X-Media-Ipv4-Addr";

/// Parameters for answering a call on behalf of a remote channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRequest {
    /// URI the engine should connect to
    pub dest_uri: String,
    /// Host-side channel identifier
    pub channel_id: String,
    /// IPv4 address media should be sent to
    pub media_addr: String,
}

impl AnswerRequest {
    pub fn new(
        dest_uri: impl Into<String>,
        channel_id: impl Into<String>,
        media_addr: impl Into<String>,
    ) -> Self {
        Self {
            dest_uri: dest_uri.into(),
            channel_id: channel_id.into(),
            media_addr: media_addr.into(),
        }
    }

    fn validate(&self) -> CallResult<()> {
        if self.dest_uri.trim().is_empty() {
            return Err(CallError::invalid_argument("dest_uri", "must not be empty"));
        }
        if self.channel_id.trim().is_empty() {
            return Err(CallError::invalid_argument("channel_id", "must not be empty"));
        }
        if self.media_addr.trim().is_empty() {
            return Err(CallError::invalid_argument("media_addr", "must not be empty"));
        }
        Ok(())
    }
}

/// Executes host commands against the registry and the engine
pub struct CallDispatcher {
    config: Arc<CallCoreConfig>,
    registry: Arc<SessionRegistry>,
    notifier: Arc<EventNotifier>,
    engine: Arc<dyn SipEngine>,
}

impl CallDispatcher {
    pub fn new(
        config: Arc<CallCoreConfig>,
        registry: Arc<SessionRegistry>,
        notifier: Arc<EventNotifier>,
        engine: Arc<dyn SipEngine>,
    ) -> Self {
        Self {
            config,
            registry,
            notifier,
            engine,
        }
    }

    /// Place an outbound call to `number` using `account`
    ///
    /// The host is told the call started before the engine has confirmed
    /// anything; progress arrives later as engine events.
    pub fn place_call(&self, number: &str, account: &AccountConfig) -> CallResult<CallId> {
        let number = number.trim();
        let target = qualify_target(number, self.config.domain_for(account))?;
        account.validate()?;

        let id = self.registry.create(target.clone(), CallDirection::Outgoing)?;
        self.registry.update(&id, |session| session.transition(CallState::Calling))?;
        info!(call_id = %id, target = %target, "placing call");

        self.notifier.notify(CallEvent::CallStarted {
            call_id: id.clone(),
            name: number.to_string(),
            number: number.to_string(),
        });
        self.engine.initiate_call(OutboundCall {
            call_id: id.clone(),
            to: target,
            credentials: account.credentials(),
        });
        Ok(id)
    }

    /// Place a call with the configured default account
    pub fn place_default_call(&self, number: &str) -> CallResult<CallId> {
        let account = self
            .config
            .account
            .as_ref()
            .ok_or_else(|| {
                CallError::invalid_configuration("account", "no default account configured")
            })?;
        self.place_call(number, account)
    }

    /// Answer a call for a remote channel
    pub fn answer_call(&self, request: &AnswerRequest) -> CallResult<CallId> {
        request.validate()?;

        let id = self.registry.create(request.dest_uri.clone(), CallDirection::Incoming)?;
        self.registry.update(&id, |session| session.transition(CallState::Calling))?;
        info!(call_id = %id, channel_id = %request.channel_id, "answering call");

        self.notifier.notify(CallEvent::CallStarted {
            call_id: id.clone(),
            name: request.channel_id.clone(),
            number: request.dest_uri.clone(),
        });
        self.engine.answer_call(AnswerCall {
            call_id: id.clone(),
            dest_uri: request.dest_uri.clone(),
            headers: vec![
                SipHeader::new(CHANNEL_ID_HEADER, request.channel_id.clone()),
                SipHeader::new(MEDIA_ADDR_HEADER, request.media_addr.clone()),
            ],
        });
        Ok(id)
    }

    /// Ask the engine to hang up; the session ends when the engine confirms
    pub fn end_call(&self, call_id: &CallId) -> CallResult<()> {
        self.registry.require_open(call_id)?;
        info!(call_id = %call_id, "ending call");
        self.engine.end_call(call_id);
        Ok(())
    }

    /// Request mute or unmute; the flag changes when the engine confirms
    pub fn toggle_mute(&self, call_id: &CallId, status: bool) -> CallResult<()> {
        self.registry.require_open(call_id)?;
        debug!(call_id = %call_id, status, "toggle mute");
        self.engine.toggle_mute(call_id, status);
        Ok(())
    }

    /// Request hold or resume; the flag changes when the engine confirms
    pub fn toggle_hold(&self, call_id: &CallId, status: bool) -> CallResult<()> {
        self.registry.require_open(call_id)?;
        debug!(call_id = %call_id, status, "toggle hold");
        self.engine.toggle_hold(call_id, status);
        Ok(())
    }

    pub fn send_dtmf(&self, call_id: &CallId, digits: &str) -> CallResult<()> {
        validate_dtmf(digits)?;
        self.registry.require_open(call_id)?.ensure_established("send DTMF")?;
        debug!(call_id = %call_id, digits, "sending DTMF");
        self.engine.send_dtmf(call_id, digits);
        Ok(())
    }

    /// Transfer an established call to `destination` (number or SIP URI)
    pub fn blind_transfer(&self, call_id: &CallId, destination: &str) -> CallResult<()> {
        let target = qualify_target(destination.trim(), self.config.domain.as_deref())?;
        self.registry.update(call_id, |session| session.begin_transfer())?;
        info!(call_id = %call_id, target = %target, "blind transfer");
        self.engine.blind_transfer(call_id, &target);
        Ok(())
    }
}

/// Build the SIP URI for a dialed number
///
/// `sip:`/`sips:` URIs pass through unchanged, `user@host` gets a `sip:`
/// scheme, and a bare number is qualified with `domain`.
pub fn qualify_target(number: &str, domain: Option<&str>) -> CallResult<String> {
    let number = number.trim();
    if number.is_empty() {
        return Err(CallError::invalid_argument("number", "must not be empty"));
    }
    if number.chars().any(|c| c.is_whitespace() || c.is_control() || matches!(c, '<' | '>' | '"')) {
        return Err(CallError::invalid_argument(
            "number",
            format!("not a dialable target: {:?}", number),
        ));
    }

    let lower = number.to_ascii_lowercase();
    if let Some(rest) = lower.strip_prefix("sips:").or_else(|| lower.strip_prefix("sip:")) {
        if rest.is_empty() {
            return Err(CallError::invalid_argument("number", "URI has no target"));
        }
        return Ok(number.to_string());
    }

    if number.contains('@') {
        if number.starts_with('@') || number.ends_with('@') {
            return Err(CallError::invalid_argument("number", "incomplete user@host"));
        }
        return Ok(format!("sip:{}", number));
    }

    match domain.map(str::trim).filter(|d| !d.is_empty()) {
        Some(domain) => Ok(format!("sip:{}@{}", number, domain)),
        None => Err(CallError::invalid_configuration(
            "domain",
            "no SIP domain to qualify the dialed number with",
        )),
    }
}

/// Check a DTMF digit string: `0-9`, `*`, `#`, `A-D`
pub fn validate_dtmf(digits: &str) -> CallResult<()> {
    if digits.is_empty() {
        return Err(CallError::invalid_argument("digits", "must not be empty"));
    }
    if let Some(bad) = digits
        .chars()
        .find(|c| !(c.is_ascii_digit() || matches!(c.to_ascii_uppercase(), '*' | '#' | 'A'..='D')))
    {
        return Err(CallError::invalid_argument("digits", format!("invalid DTMF digit {:?}", bad)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Credentials, LoopbackEngine, RecordedCommand};

    fn setup(
        config: CallCoreConfig,
    ) -> (CallDispatcher, Arc<SessionRegistry>, Arc<LoopbackEngine>) {
        let registry = Arc::new(SessionRegistry::new());
        let notifier = Arc::new(EventNotifier::new(registry.clone()));
        let engine = Arc::new(LoopbackEngine::manual());
        let dispatcher =
            CallDispatcher::new(Arc::new(config), registry.clone(), notifier, engine.clone());
        (dispatcher, registry, engine)
    }

    fn account() -> AccountConfig {
        AccountConfig::credentialed("web_user", "pw", "pbx.example.com")
    }

    #[test]
    fn test_qualify_target() {
        let domain = Some("pbx.example.com");
        assert_eq!(qualify_target("100", domain).unwrap(), "sip:100@pbx.example.com");
        assert_eq!(qualify_target(" 100 ", domain).unwrap(), "sip:100@pbx.example.com");
        assert_eq!(qualify_target("sip:bob@example.org", None).unwrap(), "sip:bob@example.org");
        assert_eq!(qualify_target("SIPS:bob@example.org", None).unwrap(), "SIPS:bob@example.org");
        assert_eq!(qualify_target("bob@example.org", None).unwrap(), "sip:bob@example.org");

        assert!(matches!(qualify_target("", None), Err(CallError::InvalidArgument { .. })));
        assert!(matches!(
            qualify_target("1 00", Some("d")),
            Err(CallError::InvalidArgument { .. })
        ));
        assert!(matches!(qualify_target("sip:", None), Err(CallError::InvalidArgument { .. })));
        assert!(matches!(qualify_target("bob@", None), Err(CallError::InvalidArgument { .. })));
        assert!(matches!(qualify_target("100", None), Err(CallError::InvalidConfiguration { .. })));
    }

    #[test]
    fn test_validate_dtmf() {
        assert!(validate_dtmf("0123456789*#ABCDabcd").is_ok());
        assert!(validate_dtmf("").is_err());
        assert!(validate_dtmf("12E").is_err());
        assert!(validate_dtmf("1 2").is_err());
    }

    #[test]
    fn test_place_call_creates_calling_session() {
        let (dispatcher, registry, engine) = setup(CallCoreConfig::new());
        let id = dispatcher.place_call("100", &account()).unwrap();

        let session = registry.get(&id).unwrap();
        assert_eq!(session.state, CallState::Calling);
        assert_eq!(session.direction, CallDirection::Outgoing);
        assert_eq!(session.remote_address, "sip:100@pbx.example.com");

        match &engine.commands()[..] {
            [RecordedCommand::InitiateCall(call)] => {
                assert_eq!(call.call_id, id);
                assert_eq!(call.to, "sip:100@pbx.example.com");
                assert!(matches!(call.credentials, Credentials::Digest { .. }));
            }
            other => panic!("unexpected commands {:?}", other),
        }
    }

    #[test]
    fn test_invalid_number_has_no_side_effects() {
        let (dispatcher, registry, engine) = setup(CallCoreConfig::new());
        let err = dispatcher.place_call("", &account()).unwrap_err();
        assert!(matches!(err, CallError::InvalidArgument { .. }));
        assert!(registry.is_empty());
        assert!(engine.commands().is_empty());
    }

    #[test]
    fn test_place_default_call_requires_account() {
        let (dispatcher, _, _) = setup(CallCoreConfig::new());
        let err = dispatcher.place_default_call("100").unwrap_err();
        assert!(matches!(err, CallError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_userless_account_uses_config_domain() {
        let config = CallCoreConfig::new()
            .with_domain("pbx.example.com")
            .with_account(AccountConfig::userless("kiosk-7"));
        let (dispatcher, registry, _) = setup(config);
        let id = dispatcher.place_default_call("200").unwrap();
        assert_eq!(registry.get(&id).unwrap().remote_address, "sip:200@pbx.example.com");
    }

    #[test]
    fn test_answer_call_sends_channel_headers() {
        let (dispatcher, registry, engine) = setup(CallCoreConfig::new());
        let id = dispatcher
            .answer_call(&AnswerRequest::new("sip:bridge@media.example.com", "chan-9", "10.0.0.5"))
            .unwrap();

        assert_eq!(registry.get(&id).unwrap().direction, CallDirection::Incoming);
        match &engine.commands()[..] {
            [RecordedCommand::AnswerCall(call)] => {
                assert_eq!(call.headers[0], SipHeader::new(CHANNEL_ID_HEADER, "chan-9"));
                assert_eq!(call.headers[1], SipHeader::new(MEDIA_ADDR_HEADER, "10.0.0.5"));
            }
            other => panic!("unexpected commands {:?}", other),
        }

        let err = dispatcher
            .answer_call(&AnswerRequest::new("sip:bridge@media.example.com", "", "10.0.0.5"))
            .unwrap_err();
        assert!(matches!(err, CallError::InvalidArgument { argument: "channel_id", .. }));
    }

    #[test]
    fn test_commands_on_unknown_session() {
        let (dispatcher, _, engine) = setup(CallCoreConfig::new());
        let id = CallId::from("missing");
        assert!(matches!(dispatcher.end_call(&id), Err(CallError::UnknownSession { .. })));
        assert!(matches!(dispatcher.toggle_mute(&id, true), Err(CallError::UnknownSession { .. })));
        assert!(matches!(dispatcher.toggle_hold(&id, true), Err(CallError::UnknownSession { .. })));
        assert!(engine.commands().is_empty());
    }

    #[test]
    fn test_toggle_does_not_change_flag_before_confirmation() {
        let (dispatcher, registry, engine) = setup(CallCoreConfig::new());
        let id = dispatcher.place_call("100", &account()).unwrap();
        dispatcher.toggle_mute(&id, true).unwrap();

        assert!(!registry.get(&id).unwrap().is_muted);
        assert!(engine
            .commands_for(&id)
            .contains(&RecordedCommand::ToggleMute { call_id: id.clone(), status: true }));
    }

    #[test]
    fn test_dtmf_and_transfer_require_confirmed_call() {
        let config = CallCoreConfig::new().with_domain("pbx.example.com");
        let (dispatcher, registry, engine) = setup(config);
        let id = dispatcher.place_call("100", &account()).unwrap();

        assert!(matches!(dispatcher.send_dtmf(&id, "1"), Err(CallError::InvalidState { .. })));
        assert!(matches!(
            dispatcher.blind_transfer(&id, "300"),
            Err(CallError::InvalidState { .. })
        ));

        registry.update(&id, |s| s.transition(CallState::Confirmed)).unwrap();
        engine.clear_commands();

        dispatcher.send_dtmf(&id, "12#").unwrap();
        dispatcher.blind_transfer(&id, "300").unwrap();
        assert_eq!(
            engine.commands(),
            vec![
                RecordedCommand::SendDtmf {
                    call_id: id.clone(),
                    digits: "12#".to_string()
                },
                RecordedCommand::BlindTransfer {
                    call_id: id.clone(),
                    destination: "sip:300@pbx.example.com".to_string()
                },
            ]
        );
        assert!(registry.get(&id).unwrap().transfer.is_some());
    }
}
