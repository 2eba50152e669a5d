//! Layered configuration for taskboard.
//!
//! Settings are read from `taskboard.toml` (or the file given with
//! `--config`), then overridden by environment variables, then by CLI flags.
//! Every field has a default, so a missing file is the same as an empty one.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 5000
//! db_path = ".taskboard/taskboard.db"
//! dev_mode = false
//! broadcast_capacity = 256
//!
//! [client]
//! server_url = "http://127.0.0.1:5000"
//! search_debounce_ms = 300
//!
//! [client.reconnect]
//! initial_backoff_ms = 500
//! max_backoff_ms = 30000
//! max_attempts = 10
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```
//!
//! # Environment overrides
//!
//! `PORT`, `TASKBOARD_HOST`, `TASKBOARD_DB_PATH`, `TASKBOARD_SERVER_URL`,
//! `TASKBOARD_LOG_LEVEL`, `TASKBOARD_LOG_FORMAT`. A `.env` file in the
//! working directory is loaded first.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "taskboard.toml";

/// Upper bound on the search debounce window.
const MAX_DEBOUNCE_MS: u64 = 10_000;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, coloured when attached to a terminal
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

/// Task service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Enables permissive CORS for a browser front end served elsewhere
    #[serde(default)]
    pub dev_mode: bool,
    /// Realtime messages buffered per subscriber before it lags
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".taskboard/taskboard.db")
}

fn default_broadcast_capacity() -> usize {
    256
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db_path: default_db_path(),
            dev_mode: false,
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

impl ServerSection {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Realtime reconnection policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconnectSection {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Consecutive failed attempts before the subscriber gives up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    10
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectSection {
    /// Delay before reconnect attempt `attempt` (1-based): doubles from the
    /// initial backoff and is capped at the maximum.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }
}

/// Board client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_search_debounce_ms")]
    pub search_debounce_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

fn default_server_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_search_debounce_ms() -> u64 {
    300
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            search_debounce_ms: default_search_debounce_ms(),
            reconnect: ReconnectSection::default(),
        }
    }
}

impl ClientSection {
    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Parsed taskboard.toml configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskboardConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl TaskboardConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse taskboard.toml")
    }

    /// Load from `path`, or return the defaults if the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// File → environment. `.env` is honoured; CLI flags are applied by the
    /// caller afterwards.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let path = path.unwrap_or_else(|| Path::new(CONFIG_FILE));
        let mut config = Self::load_or_default(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT '{}'", port))?;
        }
        if let Some(host) = lookup("TASKBOARD_HOST") {
            self.server.host = host;
        }
        if let Some(db_path) = lookup("TASKBOARD_DB_PATH") {
            self.server.db_path = PathBuf::from(db_path);
        }
        if let Some(url) = lookup("TASKBOARD_SERVER_URL") {
            self.client.server_url = url;
        }
        if let Some(level) = lookup("TASKBOARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("TASKBOARD_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        Ok(())
    }

    /// Serialize to pretty TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize taskboard.toml")
    }

    /// Write the default configuration to `path`. Refuses to overwrite.
    pub fn init_file(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("{} already exists; not overwriting", path.display());
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = Self::default().to_toml()?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Check the configuration and return every problem found.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.server.port == 0 {
            problems.push("server.port must be non-zero".to_string());
        }
        if self.server.broadcast_capacity == 0 {
            problems.push("server.broadcast_capacity must be greater than 0".to_string());
        }
        if self.client.search_debounce_ms > MAX_DEBOUNCE_MS {
            problems.push(format!(
                "client.search_debounce_ms is {} but may be at most {}",
                self.client.search_debounce_ms, MAX_DEBOUNCE_MS
            ));
        }
        let reconnect = &self.client.reconnect;
        if reconnect.initial_backoff_ms > reconnect.max_backoff_ms {
            problems.push(format!(
                "client.reconnect.initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                reconnect.initial_backoff_ms, reconnect.max_backoff_ms
            ));
        }
        if !self.client.server_url.starts_with("http://")
            && !self.client.server_url.starts_with("https://")
        {
            problems.push(format!(
                "client.server_url '{}' must start with http:// or https://",
                self.client.server_url
            ));
        }

        problems
    }

    /// Fail with every validation problem joined into one message.
    pub fn ensure_valid(&self) -> Result<()> {
        let problems = self.validate();
        if problems.is_empty() {
            return Ok(());
        }
        anyhow::bail!("Invalid configuration:\n  - {}", problems.join("\n  - "))
    }
}
