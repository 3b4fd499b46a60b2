//! Call-core configuration
//!
//! Everything deployment-specific (proxy, SIP domain, account credentials)
//! is injected here; nothing is compiled in. Configuration can be built in
//! code with the `with_*` methods or loaded from TOML:
//!
//! ```toml
//! proxy_server = "sip:proxy.example.com;transport=tcp"
//! domain = "pbx.example.com"
//!
//! [account]
//! username = "web_10eb"
//! password = "s3cret"
//! domain = "pbx.example.com"
//! ```
//!
//! An `[account]` table holds either `username`/`password`/`domain` or a
//! single `account_id` for a userless account, never both.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::Credentials;
use crate::error::{CallError, CallResult};
use crate::registry::DEFAULT_CLOSED_SESSION_MEMORY;

/// Default depth of the command queue behind [`CoreHandle`](crate::CoreHandle)
pub const DEFAULT_COMMAND_QUEUE_DEPTH: usize = 1000;

/// Account used to authenticate outbound calls
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AccountSettings", into = "AccountSettings")]
pub enum AccountConfig {
    /// Digest credentials supplied at call time
    Credentialed {
        username: String,
        password: String,
        domain: String,
    },
    /// Account pre-provisioned on the engine, referenced by id
    Userless { account_id: String },
}

impl AccountConfig {
    pub fn credentialed(
        username: impl Into<String>,
        password: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self::Credentialed {
            username: username.into(),
            password: password.into(),
            domain: domain.into(),
        }
    }

    pub fn userless(account_id: impl Into<String>) -> Self {
        Self::Userless {
            account_id: account_id.into(),
        }
    }

    /// Domain that outbound targets should be qualified with, if the account
    /// carries one
    pub fn domain(&self) -> Option<&str> {
        match self {
            AccountConfig::Credentialed { domain, .. } => Some(domain),
            AccountConfig::Userless { .. } => None,
        }
    }

    pub fn is_userless(&self) -> bool {
        matches!(self, AccountConfig::Userless { .. })
    }

    /// Check every required field is present
    pub fn validate(&self) -> CallResult<()> {
        match self {
            AccountConfig::Credentialed {
                username,
                password,
                domain,
            } => {
                require_non_empty("account.username", username)?;
                require_non_empty("account.password", password)?;
                require_non_empty("account.domain", domain)
            }
            AccountConfig::Userless { account_id } => {
                require_non_empty("account.account_id", account_id)
            }
        }
    }

    /// Credentials the engine should use for a call on this account
    pub fn credentials(&self) -> Credentials {
        match self {
            AccountConfig::Credentialed {
                username,
                password,
                domain,
            } => Credentials::Digest {
                username: username.clone(),
                password: password.clone(),
                domain: domain.clone(),
            },
            AccountConfig::Userless { account_id } => Credentials::PreRegistered {
                account_id: account_id.clone(),
            },
        }
    }
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountConfig::Credentialed { username, domain, .. } => f
                .debug_struct("Credentialed")
                .field("username", username)
                .field("password", &"<redacted>")
                .field("domain", domain)
                .finish(),
            AccountConfig::Userless { account_id } => {
                f.debug_struct("Userless").field("account_id", account_id).finish()
            }
        }
    }
}

fn require_non_empty(field: &str, value: &str) -> CallResult<()> {
    if value.trim().is_empty() {
        return Err(CallError::invalid_configuration(field, "must not be empty"));
    }
    Ok(())
}

/// Flat on-disk form of [`AccountConfig`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

impl TryFrom<AccountSettings> for AccountConfig {
    type Error = CallError;

    fn try_from(raw: AccountSettings) -> Result<Self, Self::Error> {
        let has_credentials =
            raw.username.is_some() || raw.password.is_some() || raw.domain.is_some();
        let account = match (has_credentials, raw.account_id) {
            (true, Some(_)) => {
                return Err(CallError::invalid_configuration(
                    "account",
                    "credentialed and userless modes are mutually exclusive",
                ))
            }
            (false, None) => {
                return Err(CallError::invalid_configuration(
                    "account",
                    "expected username/password/domain or account_id",
                ))
            }
            (false, Some(account_id)) => AccountConfig::Userless { account_id },
            (true, None) => AccountConfig::Credentialed {
                username: raw.username.unwrap_or_default(),
                password: raw.password.unwrap_or_default(),
                domain: raw.domain.unwrap_or_default(),
            },
        };
        account.validate()?;
        Ok(account)
    }
}

impl From<AccountConfig> for AccountSettings {
    fn from(account: AccountConfig) -> Self {
        match account {
            AccountConfig::Credentialed {
                username,
                password,
                domain,
            } => AccountSettings {
                username: Some(username),
                password: Some(password),
                domain: Some(domain),
                account_id: None,
            },
            AccountConfig::Userless { account_id } => AccountSettings {
                account_id: Some(account_id),
                ..Default::default()
            },
        }
    }
}

/// Configuration for a [`CallCore`](crate::CallCore)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallCoreConfig {
    /// Outbound proxy handed to the engine at start-up
    pub proxy_server: Option<String>,
    /// SIP domain used to qualify dialed numbers when the account has none
    pub domain: Option<String>,
    /// Capacity of the command queue behind [`CoreHandle`](crate::CoreHandle)
    pub command_queue_depth: usize,
    /// How many finished call ids to remember for late-event detection
    pub closed_session_memory: usize,
    /// Account used by [`CallCore::place_default_call`](crate::CallCore::place_default_call)
    pub account: Option<AccountConfig>,
}

impl CallCoreConfig {
    pub fn new() -> Self {
        Self {
            proxy_server: None,
            domain: None,
            command_queue_depth: DEFAULT_COMMAND_QUEUE_DEPTH,
            closed_session_memory: DEFAULT_CLOSED_SESSION_MEMORY,
            account: None,
        }
    }

    pub fn with_proxy_server(mut self, proxy: impl Into<String>) -> Self {
        self.proxy_server = Some(proxy.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_account(mut self, account: AccountConfig) -> Self {
        self.account = Some(account);
        self
    }

    pub fn with_command_queue_depth(mut self, depth: usize) -> Self {
        self.command_queue_depth = depth;
        self
    }

    pub fn with_closed_session_memory(mut self, capacity: usize) -> Self {
        self.closed_session_memory = capacity;
        self
    }

    /// Parse a TOML document
    pub fn from_toml_str(source: &str) -> CallResult<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| CallError::invalid_configuration("toml", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> CallResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            CallError::invalid_configuration(path.display().to_string(), e.to_string())
        })?;
        Self::from_toml_str(&source)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> CallResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CallError::invalid_configuration("toml", e.to_string()))
    }

    pub fn validate(&self) -> CallResult<()> {
        if let Some(proxy) = &self.proxy_server {
            require_non_empty("proxy_server", proxy)?;
        }
        if let Some(domain) = &self.domain {
            require_non_empty("domain", domain)?;
        }
        if let Some(account) = &self.account {
            account.validate()?;
        }
        if self.command_queue_depth == 0 {
            return Err(CallError::invalid_configuration(
                "command_queue_depth",
                "must be greater than zero",
            ));
        }
        if self.closed_session_memory == 0 {
            return Err(CallError::invalid_configuration(
                "closed_session_memory",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Domain used to qualify a dialed number on `account`
    pub fn domain_for<'a>(&'a self, account: &'a AccountConfig) -> Option<&'a str> {
        account.domain().or(self.domain.as_deref())
    }
}

impl Default for CallCoreConfig {
    fn default() -> Self {
        Self::new()
    }
}
