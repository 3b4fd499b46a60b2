//! Shared helpers for call-core integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sipcall_core::{
    AccountConfig, CallCore, CallCoreBuilder, CallEvent, CallEventListener, CallId, LoopbackEngine,
};

/// Listener that keeps every event it receives, in order
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<CallEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<CallEvent> {
        self.events.lock().clone()
    }

    /// Event kinds delivered for one call
    pub fn kinds_for(&self, call_id: &CallId) -> Vec<&'static str> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.call_id() == call_id)
            .map(|e| e.kind())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Poll until `kind` has been seen for `call_id` or `timeout` elapses
    pub async fn wait_for(&self, call_id: &CallId, kind: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.kinds_for(call_id).iter().any(|k| *k == kind) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl CallEventListener for RecordingListener {
    fn on_event(&self, event: CallEvent) {
        self.events.lock().push(event);
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("sipcall_core=debug")
        .with_test_writer()
        .try_init();
}

pub fn test_account() -> AccountConfig {
    AccountConfig::credentialed("web_user", "s3cret", "pbx.example.com")
}

/// Started core on `engine` with the test account and a recording listener
pub fn started_core(engine: Arc<LoopbackEngine>) -> (Arc<CallCore>, Arc<RecordingListener>) {
    init_tracing();
    let listener = Arc::new(RecordingListener::default());
    let core = CallCoreBuilder::new()
        .proxy_server("sip:proxy.example.com;transport=tcp")
        .account(test_account())
        .engine(engine)
        .listener(listener.clone())
        .build()
        .expect("Failed to build core");
    core.start().expect("Failed to start core");
    (core, listener)
}
