//! Call command - place an outbound call

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use sipcall_core::{CallCoreConfig, CallEvent};
use tracing::info;

use super::session::LoopbackSession;

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Number or SIP URI to dial
    pub number: String,

    /// Mute once connected
    #[arg(long)]
    pub mute: bool,

    /// Put on hold once connected
    #[arg(long)]
    pub hold: bool,

    /// DTMF digits to send once connected
    #[arg(long)]
    pub dtmf: Option<String>,

    /// Blind-transfer to this number or URI before hanging up
    #[arg(long)]
    pub transfer: Option<String>,

    /// Seconds to stay connected
    #[arg(short, long, default_value_t = 2)]
    pub duration: u64,

    /// Delay between simulated engine events, in milliseconds
    #[arg(long, default_value_t = 50)]
    pub step_ms: u64,
}

pub async fn execute(args: CallArgs, config: CallCoreConfig, json: bool) -> Result<()> {
    let mut session = LoopbackSession::start(config, Duration::from_millis(args.step_ms), json)?;

    let call_id = session
        .handle
        .place_default_call(args.number.clone())
        .await
        .with_context(|| format!("calling {}", args.number))?;
    info!(call_id = %call_id, "call placed");

    session
        .wait_for(&call_id, "answer", |e| matches!(e, CallEvent::CallConnected { .. }))
        .await?;

    if args.mute {
        session.handle.toggle_mute(&call_id, true).await?;
        session
            .wait_for(&call_id, "mute", |e| matches!(e, CallEvent::MuteStatusUpdated { .. }))
            .await?;
    }
    if args.hold {
        session.handle.toggle_hold(&call_id, true).await?;
        session
            .wait_for(&call_id, "hold", |e| matches!(e, CallEvent::HoldStatusUpdated { .. }))
            .await?;
    }
    if let Some(digits) = &args.dtmf {
        session.handle.send_dtmf(&call_id, digits.clone()).await?;
    }

    session.idle(Duration::from_secs(args.duration)).await?;

    if let Some(destination) = &args.transfer {
        session.handle.blind_transfer(&call_id, destination.clone()).await?;
        session
            .wait_for(&call_id, "transfer", |e| {
                matches!(e, CallEvent::TransferStatusChanged { status, .. } if status.is_final())
            })
            .await?;
    }

    session.handle.end_call(&call_id).await?;
    session
        .wait_for(&call_id, "hangup", |e| matches!(e, CallEvent::CallEnded { .. }))
        .await?;

    session.finish().await
}
