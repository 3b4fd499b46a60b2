//! Answer command - pick up a call for a remote channel

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use sipcall_core::{AnswerRequest, CallCoreConfig, CallEvent};

use super::session::LoopbackSession;

#[derive(Args, Debug)]
pub struct AnswerArgs {
    /// URI the engine should connect to
    #[arg(long)]
    pub dest_uri: String,

    /// Channel id sent as X-Channel-Id
    #[arg(long)]
    pub channel_id: String,

    /// Media address sent as X-Media-Ipv4-Addr
    #[arg(long)]
    pub media_addr: String,

    /// Seconds to stay connected
    #[arg(short, long, default_value_t = 2)]
    pub duration: u64,

    /// Delay between simulated engine events, in milliseconds
    #[arg(long, default_value_t = 50)]
    pub step_ms: u64,
}

pub async fn execute(args: AnswerArgs, config: CallCoreConfig, json: bool) -> Result<()> {
    let mut session = LoopbackSession::start(config, Duration::from_millis(args.step_ms), json)?;

    let request = AnswerRequest::new(args.dest_uri, args.channel_id, args.media_addr);
    let call_id = session.handle.answer_call(request).await?;

    session
        .wait_for(&call_id, "connect", |e| matches!(e, CallEvent::CallConnected { .. }))
        .await?;
    session.idle(Duration::from_secs(args.duration)).await?;

    session.handle.end_call(&call_id).await?;
    session
        .wait_for(&call_id, "hangup", |e| matches!(e, CallEvent::CallEnded { .. }))
        .await?;

    session.finish().await
}
