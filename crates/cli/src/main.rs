//! Command-line driver for the sipcall call-control core
//!
//! Runs calls against the in-process loopback engine so a configuration and
//! the core's event flow can be exercised without a SIP network.

mod commands;
mod output;
mod settings;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sipcall", version, about = "Drive the sipcall call-control core")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true, env = "SIPCALL_CONFIG")]
    config: Option<PathBuf>,

    /// Override the outbound proxy
    #[arg(long, global = true)]
    proxy: Option<String>,

    /// Override the SIP domain used to qualify numbers
    #[arg(long, global = true)]
    domain: Option<String>,

    /// Use a userless account pre-provisioned on the engine
    #[arg(long, global = true)]
    account_id: Option<String>,

    /// Print events as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "sipcall_core=info,sipcall=info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Place a call and walk it through the requested actions
    Call(commands::call::CallArgs),
    /// Answer a call on behalf of a remote channel
    Answer(commands::answer::AnswerArgs),
    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(commands::config::ConfigCommand),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = settings::Overrides {
        proxy: cli.proxy,
        domain: cli.domain,
        account_id: cli.account_id,
    };

    match cli.command {
        Commands::Config(command) => {
            commands::config::execute(command, cli.config.as_deref(), &overrides)
        }
        Commands::Call(args) => {
            let config = settings::resolve(cli.config.as_deref(), &overrides)?;
            commands::call::execute(args, config, cli.json).await
        }
        Commands::Answer(args) => {
            let config = settings::resolve(cli.config.as_deref(), &overrides)?;
            commands::answer::execute(args, config, cli.json).await
        }
    }
}
