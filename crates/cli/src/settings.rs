//! Locating and loading the configuration file

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sipcall_core::{AccountConfig, CallCoreConfig};
use tracing::debug;

/// Values given on the command line that win over the file
#[derive(Debug, Default)]
pub struct Overrides {
    pub proxy: Option<String>,
    pub domain: Option<String>,
    pub account_id: Option<String>,
}

impl Overrides {
    fn apply(&self, mut config: CallCoreConfig) -> CallCoreConfig {
        if let Some(proxy) = &self.proxy {
            config = config.with_proxy_server(proxy.clone());
        }
        if let Some(domain) = &self.domain {
            config = config.with_domain(domain.clone());
        }
        if let Some(account_id) = &self.account_id {
            config = config.with_account(AccountConfig::userless(account_id.clone()));
        }
        config
    }
}

/// `<config dir>/sipcall/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sipcall").join("config.toml"))
}

/// Load the configuration file, if any
///
/// An explicit path must exist. The default path is optional; without it the
/// built-in defaults are used.
pub fn load(path: Option<&Path>) -> Result<(CallCoreConfig, Option<PathBuf>)> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => path,
            None => {
                debug!("no configuration file, using defaults");
                return Ok((CallCoreConfig::default(), None));
            }
        },
    };

    let config = CallCoreConfig::load(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    debug!(path = %path.display(), "configuration loaded");
    Ok((config, Some(path)))
}

/// Load, apply overrides and validate
pub fn resolve(path: Option<&Path>, overrides: &Overrides) -> Result<CallCoreConfig> {
    let (config, _) = load(path)?;
    let config = overrides.apply(config);
    config.validate().context("invalid configuration")?;
    Ok(config)
}
