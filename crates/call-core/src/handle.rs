//! Command marshaling
//!
//! [`CoreHandle`] is a cloneable async front for a [`CallCore`]. Commands are
//! queued on a bounded channel and executed one at a time by a single task,
//! so every engine command is issued from the same context regardless of
//! which task the host calls from. Each command's result comes back on a
//! oneshot channel.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::call::CallId;
use crate::call_core::CallCore;
use crate::config::AccountConfig;
use crate::dispatcher::AnswerRequest;
use crate::error::{CallError, CallResult};

type Reply<T> = oneshot::Sender<CallResult<T>>;

#[derive(Debug)]
enum CoreCommand {
    PlaceCall {
        number: String,
        account: Option<AccountConfig>,
        reply: Reply<CallId>,
    },
    AnswerCall {
        request: AnswerRequest,
        reply: Reply<CallId>,
    },
    EndCall {
        call_id: CallId,
        reply: Reply<()>,
    },
    ToggleMute {
        call_id: CallId,
        status: bool,
        reply: Reply<()>,
    },
    ToggleHold {
        call_id: CallId,
        status: bool,
        reply: Reply<()>,
    },
    SendDtmf {
        call_id: CallId,
        digits: String,
        reply: Reply<()>,
    },
    BlindTransfer {
        call_id: CallId,
        destination: String,
        reply: Reply<()>,
    },
    Shutdown,
}

/// Async, cloneable handle that serializes commands onto one task
#[derive(Debug, Clone)]
pub struct CoreHandle {
    tx: mpsc::Sender<CoreCommand>,
}

impl CoreHandle {
    /// Spawn the command task for `core` on the current runtime
    pub fn spawn(core: Arc<CallCore>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(core.config().command_queue_depth);
        let task = tokio::spawn(run_command_loop(core, rx));
        (Self { tx }, task)
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> CoreCommand) -> CallResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| CallError::CoreUnavailable)?;
        rx.await.map_err(|_| CallError::CoreUnavailable)?
    }

    pub async fn place_call(
        &self,
        number: impl Into<String>,
        account: AccountConfig,
    ) -> CallResult<CallId> {
        let number = number.into();
        self.request(|reply| CoreCommand::PlaceCall {
            number,
            account: Some(account),
            reply,
        })
        .await
    }

    pub async fn place_default_call(&self, number: impl Into<String>) -> CallResult<CallId> {
        let number = number.into();
        self.request(|reply| CoreCommand::PlaceCall {
            number,
            account: None,
            reply,
        })
        .await
    }

    pub async fn answer_call(&self, request: AnswerRequest) -> CallResult<CallId> {
        self.request(|reply| CoreCommand::AnswerCall { request, reply }).await
    }

    pub async fn end_call(&self, call_id: &CallId) -> CallResult<()> {
        let call_id = call_id.clone();
        self.request(|reply| CoreCommand::EndCall { call_id, reply }).await
    }

    pub async fn toggle_mute(&self, call_id: &CallId, status: bool) -> CallResult<()> {
        let call_id = call_id.clone();
        self.request(|reply| CoreCommand::ToggleMute {
            call_id,
            status,
            reply,
        })
        .await
    }

    pub async fn toggle_hold(&self, call_id: &CallId, status: bool) -> CallResult<()> {
        let call_id = call_id.clone();
        self.request(|reply| CoreCommand::ToggleHold {
            call_id,
            status,
            reply,
        })
        .await
    }

    pub async fn send_dtmf(&self, call_id: &CallId, digits: impl Into<String>) -> CallResult<()> {
        let call_id = call_id.clone();
        let digits = digits.into();
        self.request(|reply| CoreCommand::SendDtmf {
            call_id,
            digits,
            reply,
        })
        .await
    }

    pub async fn blind_transfer(
        &self,
        call_id: &CallId,
        destination: impl Into<String>,
    ) -> CallResult<()> {
        let call_id = call_id.clone();
        let destination = destination.into();
        self.request(|reply| CoreCommand::BlindTransfer {
            call_id,
            destination,
            reply,
        })
        .await
    }

    /// Stop the command task after the commands already queued
    pub async fn shutdown(&self) -> CallResult<()> {
        self.tx
            .send(CoreCommand::Shutdown)
            .await
            .map_err(|_| CallError::CoreUnavailable)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

async fn run_command_loop(core: Arc<CallCore>, mut rx: mpsc::Receiver<CoreCommand>) {
    info!("call core command loop started");
    while let Some(command) = rx.recv().await {
        if matches!(command, CoreCommand::Shutdown) {
            break;
        }
        execute(&core, command);
    }
    info!("call core command loop stopped");
}

fn execute(core: &CallCore, command: CoreCommand) {
    // A dropped reply receiver only means the caller stopped waiting.
    match command {
        CoreCommand::PlaceCall {
            number,
            account,
            reply,
        } => {
            let result = match &account {
                Some(account) => core.place_call(&number, account),
                None => core.place_default_call(&number),
            };
            let _ = reply.send(result);
        }
        CoreCommand::AnswerCall { request, reply } => {
            let _ = reply.send(core.answer_call(&request));
        }
        CoreCommand::EndCall { call_id, reply } => {
            let _ = reply.send(core.end_call(&call_id));
        }
        CoreCommand::ToggleMute {
            call_id,
            status,
            reply,
        } => {
            let _ = reply.send(core.toggle_mute(&call_id, status));
        }
        CoreCommand::ToggleHold {
            call_id,
            status,
            reply,
        } => {
            let _ = reply.send(core.toggle_hold(&call_id, status));
        }
        CoreCommand::SendDtmf {
            call_id,
            digits,
            reply,
        } => {
            let _ = reply.send(core.send_dtmf(&call_id, &digits));
        }
        CoreCommand::BlindTransfer {
            call_id,
            destination,
            reply,
        } => {
            let _ = reply.send(core.blind_transfer(&call_id, &destination));
        }
        CoreCommand::Shutdown => debug!("shutdown handled by command loop"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_core::CallCoreBuilder;
    use crate::engine::{LoopbackEngine, RecordedCommand};

    fn started_core() -> (Arc<CallCore>, Arc<LoopbackEngine>) {
        let engine = Arc::new(LoopbackEngine::manual());
        let core = CallCoreBuilder::new()
            .account(AccountConfig::credentialed("web_user", "pw", "pbx.example.com"))
            .engine(engine.clone())
            .build()
            .unwrap();
        core.start().unwrap();
        (core, engine)
    }

    #[tokio::test]
    async fn test_commands_run_through_queue() {
        let (core, engine) = started_core();
        let (handle, _task) = CoreHandle::spawn(core.clone());

        let id = handle.place_default_call("100").await.unwrap();
        handle.toggle_hold(&id, true).await.unwrap();
        assert!(core.session(&id).is_some());
        assert!(engine
            .commands_for(&id)
            .contains(&RecordedCommand::ToggleHold {
                call_id: id.clone(),
                status: true
            }));

        let err = handle.end_call(&CallId::from("missing")).await.unwrap_err();
        assert!(matches!(err, CallError::UnknownSession { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let (core, _) = started_core();
        let (handle, task) = CoreHandle::spawn(core);

        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert_eq!(
            handle.place_default_call("100").await.unwrap_err(),
            CallError::CoreUnavailable
        );
    }
}
