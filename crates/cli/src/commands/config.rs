//! Config command - inspect or create the configuration file

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use sipcall_core::{AccountConfig, CallCoreConfig};

use crate::settings::{self, Overrides};

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,
    /// Validate the configuration and summarize it
    Check,
    /// Write a starter configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the default configuration path
    Path,
}

pub fn execute(command: ConfigCommand, path: Option<&Path>, overrides: &Overrides) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let config = settings::resolve(path, overrides)?;
            print!("{}", config.to_toml_string()?);
        }
        ConfigCommand::Check => {
            let (_, loaded_from) = settings::load(path)?;
            let config = settings::resolve(path, overrides)?;
            match loaded_from {
                Some(file) => println!("{} {}", "ok".green().bold(), file.display()),
                None => println!("{} built-in defaults", "ok".green().bold()),
            }
            summarize(&config);
        }
        ConfigCommand::Init { force } => {
            let target = match path {
                Some(path) => path.to_path_buf(),
                None => settings::default_config_path()
                    .ok_or_else(|| anyhow!("no user config directory"))?,
            };
            if target.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", target.display());
            }
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let starter = CallCoreConfig::new()
                .with_proxy_server("sip:proxy.example.com;transport=tcp")
                .with_domain("pbx.example.com")
                .with_account(AccountConfig::credentialed("user", "change-me", "pbx.example.com"));
            std::fs::write(&target, starter.to_toml_string()?)
                .with_context(|| format!("writing {}", target.display()))?;
            println!("wrote {}", target.display());
        }
        ConfigCommand::Path => match settings::default_config_path() {
            Some(path) => println!("{}", path.display()),
            None => bail!("no user config directory"),
        },
    }
    Ok(())
}

fn summarize(config: &CallCoreConfig) {
    println!("  proxy:   {}", config.proxy_server.as_deref().unwrap_or("-"));
    println!("  domain:  {}", config.domain.as_deref().unwrap_or("-"));
    match &config.account {
        Some(AccountConfig::Credentialed { username, domain, .. }) => {
            println!("  account: {}@{}", username, domain)
        }
        Some(AccountConfig::Userless { account_id }) => {
            println!("  account: {} (userless)", account_id)
        }
        None => println!("  account: {}", "none - calls need --account-id".yellow()),
    }
    println!("  queue:   {}", config.command_queue_depth);
}
