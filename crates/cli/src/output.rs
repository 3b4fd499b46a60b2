//! Rendering call events for the terminal

use anyhow::Result;
use colored::Colorize;
use sipcall_core::CallEvent;

pub fn print_event(event: &CallEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    let id = short_id(event.call_id().as_str());
    match event {
        CallEvent::CallStarted { name, number, .. } => {
            println!("{} {} started ({} <{}>)", "●".blue(), id, name, number)
        }
        CallEvent::CallRinging { .. } => println!("{} {} ringing", "●".yellow(), id),
        CallEvent::CallConnecting { .. } => println!("{} {} connecting", "●".yellow(), id),
        CallEvent::CallConnected { .. } => println!("{} {} connected", "●".green(), id),
        CallEvent::CallEnded { .. } => println!("{} {} ended", "●".dimmed(), id),
        CallEvent::MuteStatusUpdated { muted, .. } => {
            println!("  {} {}", id, if *muted { "muted" } else { "unmuted" })
        }
        CallEvent::HoldStatusUpdated { on_hold, .. } => {
            println!("  {} {}", id, if *on_hold { "on hold" } else { "resumed" })
        }
        CallEvent::TransferStatusChanged { status, .. } => {
            println!("  {} transfer {:?}", id, status)
        }
        CallEvent::Exception { .. } => {
            if let Some(err) = event.error() {
                println!("{} {}", "!".red().bold(), err)
            }
        }
    }
    Ok(())
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
