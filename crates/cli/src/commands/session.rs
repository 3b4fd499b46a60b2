//! A started core on the loopback engine, with its event stream

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use sipcall_core::{
    CallCore, CallCoreBuilder, CallCoreConfig, CallEvent, CallId, ChannelListener, CoreHandle,
    LoopbackEngine,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::output::print_event;

/// How long to wait for the engine before giving up on a step
const STEP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct LoopbackSession {
    pub handle: CoreHandle,
    core: Arc<CallCore>,
    task: JoinHandle<()>,
    events: mpsc::UnboundedReceiver<CallEvent>,
    json: bool,
}

impl LoopbackSession {
    pub fn start(config: CallCoreConfig, step: Duration, json: bool) -> Result<Self> {
        let (listener, events) = ChannelListener::new();
        let core = CallCoreBuilder::new()
            .config(config)
            .engine(Arc::new(LoopbackEngine::auto_progress(step)))
            .listener(Arc::new(listener))
            .build()
            .context("building call core")?;
        core.start().context("starting call core")?;

        let (handle, task) = CoreHandle::spawn(core.clone());
        info!(step_ms = step.as_millis() as u64, "loopback session started");
        Ok(Self {
            handle,
            core,
            task,
            events,
            json,
        })
    }

    /// Print events until one for `call_id` matches `done`
    pub async fn wait_for(
        &mut self,
        call_id: &CallId,
        what: &str,
        done: impl Fn(&CallEvent) -> bool,
    ) -> Result<()> {
        loop {
            let event = tokio::time::timeout(STEP_TIMEOUT, self.events.recv())
                .await
                .map_err(|_| anyhow!("timed out waiting for {}", what))?
                .ok_or_else(|| anyhow!("event stream closed while waiting for {}", what))?;
            print_event(&event, self.json)?;

            if event.call_id() != call_id {
                continue;
            }
            if done(&event) {
                return Ok(());
            }
            if matches!(event, CallEvent::CallEnded { .. }) {
                bail!("call ended while waiting for {}", what);
            }
        }
    }

    /// Print whatever arrives during `period`
    pub async fn idle(&mut self, period: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + period;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.events.recv()).await {
            print_event(&event, self.json)?;
        }
        Ok(())
    }

    /// Stop the command loop and report what is left in the registry
    pub async fn finish(self) -> Result<()> {
        self.handle.shutdown().await?;
        self.task.await.context("command loop panicked")?;
        let stats = self.core.stats();
        debug!(?stats, "loopback session finished");
        if stats.total_sessions > 0 {
            bail!("{} call(s) still active at exit", stats.total_sessions);
        }
        Ok(())
    }
}
