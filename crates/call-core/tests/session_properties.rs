//! Property and concurrency tests for call sessions

mod common;

use std::sync::Arc;
use std::thread;

use common::{started_core, test_account};
use proptest::prelude::*;
use sipcall_core::{
    CallError, CallState, EngineCallState, EngineEvent, EngineFeature, LoopbackEngine,
};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn valid_numbers_always_create_calling_session(number in "[0-9+*#]{1,15}") {
        let engine = Arc::new(LoopbackEngine::manual());
        let (core, _listener) = started_core(engine.clone());

        let call_id = core.place_call(&number, &test_account()).unwrap();
        let session = core.session(&call_id).unwrap();

        prop_assert_eq!(session.state, CallState::Calling);
        prop_assert_eq!(session.remote_address, format!("sip:{}@pbx.example.com", number));
        prop_assert_eq!(core.stats().total_sessions, 1);
    }

    #[test]
    fn blank_numbers_never_create_sessions(number in "[ \t]{0,4}") {
        let engine = Arc::new(LoopbackEngine::manual());
        let (core, listener) = started_core(engine.clone());

        let err = core.place_call(&number, &test_account()).unwrap_err();
        let is_invalid_argument = matches!(err, CallError::InvalidArgument { .. });

        prop_assert!(is_invalid_argument);
        prop_assert_eq!(core.stats().total_sessions, 0);
        prop_assert!(listener.events().is_empty());
    }
}

#[test]
fn test_concurrent_mute_and_state_events_are_isolated() {
    let engine = Arc::new(LoopbackEngine::manual());
    let (core, _listener) = started_core(engine.clone());
    let muted = core.place_call("100", &test_account()).unwrap();
    let progressing = core.place_call("200", &test_account()).unwrap();

    let muter = {
        let core = core.clone();
        let engine = engine.clone();
        let muted = muted.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                core.toggle_mute(&muted, true).unwrap();
                engine.emit(EngineEvent::feature(muted.as_str(), EngineFeature::Mute, true));
            }
        })
    };
    let stepper = {
        let engine = engine.clone();
        let progressing = progressing.clone();
        thread::spawn(move || {
            let states = [
                EngineCallState::Early,
                EngineCallState::Connecting,
                EngineCallState::Confirmed,
            ];
            for state in states {
                engine.emit_state(&progressing, state);
            }
        })
    };
    muter.join().unwrap();
    stepper.join().unwrap();

    let muted = core.session(&muted).unwrap();
    let progressing = core.session(&progressing).unwrap();
    assert!(muted.is_muted);
    assert_eq!(muted.state, CallState::Calling);
    assert!(!progressing.is_muted);
    assert_eq!(progressing.state, CallState::Confirmed);
}
