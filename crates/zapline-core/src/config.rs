//! Zapline configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, ZaplineError};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ZaplineConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub price_feed: PriceFeedConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl ZaplineConfig {
    /// Load config from the default path (~/.zapline/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ZaplineError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ZaplineError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ZaplineError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Zapline home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".zapline")
    }
}

fn bool_true() -> bool { true }

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 { 3002 }
fn default_host() -> String { "0.0.0.0".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// Run/Zap database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path; `~` is expanded by the binary.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.zapline/zapline.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// What the price detector does when it has no prior sample for a Zap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FirstObservation {
    /// Fire immediately if the first sample already satisfies the condition.
    #[default]
    Fire,
    /// Record the first sample as a baseline and only fire on a later crossing.
    Baseline,
}

/// How the scheduler reaches the execution engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HandoffMode {
    /// Call the engine in the same process.
    #[default]
    Local,
    /// POST to a remote `/execute/{zapId}` endpoint.
    Http,
}

/// Trigger monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval")]
    pub mailbox_interval_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub price_interval_secs: u64,
    #[serde(default = "default_startup_delay")]
    pub startup_delay_secs: u64,
    #[serde(default)]
    pub first_observation: FirstObservation,
    #[serde(default)]
    pub handoff: HandoffMode,
    #[serde(default = "default_execute_url")]
    pub execute_url: String,
    #[serde(default = "default_handoff_timeout")]
    pub handoff_timeout_secs: u64,
}

fn default_poll_interval() -> u64 { 60 }
fn default_startup_delay() -> u64 { 5 }
fn default_execute_url() -> String { "http://localhost:3002".into() }
fn default_handoff_timeout() -> u64 { 30 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mailbox_interval_secs: default_poll_interval(),
            price_interval_secs: default_poll_interval(),
            startup_delay_secs: default_startup_delay(),
            first_observation: FirstObservation::default(),
            handoff: HandoffMode::default(),
            execute_url: default_execute_url(),
            handoff_timeout_secs: default_handoff_timeout(),
        }
    }
}

/// Mailbox search adapter configuration (Gmail REST API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    #[serde(default = "default_gmail_api")]
    pub api_base: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "bool_true")]
    pub mark_as_read: bool,
    #[serde(default = "default_mailbox_timeout")]
    pub timeout_secs: u64,
}

fn default_gmail_api() -> String { "https://gmail.googleapis.com/gmail/v1".into() }
fn default_max_results() -> u32 { 10 }
fn default_mailbox_timeout() -> u64 { 15 }

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            api_base: default_gmail_api(),
            max_results: default_max_results(),
            mark_as_read: true,
            timeout_secs: default_mailbox_timeout(),
        }
    }
}

/// Price feed adapter configuration (CoinGecko simple price API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceFeedConfig {
    #[serde(default = "default_coingecko_api")]
    pub api_base: String,
    #[serde(default = "default_vs_currency")]
    pub vs_currency: String,
    #[serde(default = "default_price_timeout")]
    pub timeout_secs: u64,
}

fn default_coingecko_api() -> String { "https://api.coingecko.com/api/v3".into() }
fn default_vs_currency() -> String { "usd".into() }
fn default_price_timeout() -> u64 { 5 }

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            api_base: default_coingecko_api(),
            vs_currency: default_vs_currency(),
            timeout_secs: default_price_timeout(),
        }
    }
}

/// Whether recognized actions are described or actually performed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorMode {
    #[default]
    Simulated,
    Live,
}

/// Action executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub mode: ExecutorMode,
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

fn default_action_timeout() -> u64 { 30 }

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mode: ExecutorMode::default(),
            action_timeout_secs: default_action_timeout(),
            smtp: None,
        }
    }
}

/// SMTP relay used by live email actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

fn default_smtp_port() -> u16 { 587 }
