//! Chanwarden configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ChanwardenError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChanwardenConfig {
    #[serde(default)]
    pub telegram: TelegramSettings,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

impl ChanwardenConfig {
    /// Load config from the default path (~/.chanwarden/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        Ok(config.with_env_overrides())
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ChanwardenError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ChanwardenError::Config(format!("Failed to parse config: {e}")))?;
        tracing::debug!("📄 Config loaded from {}", path.display());
        Ok(config.with_env_overrides())
    }

    /// Save config to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ChanwardenError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Fill an empty bot token from `CHANWARDEN_BOT_TOKEN` or `BOT_TOKEN`.
    pub fn with_env_overrides(mut self) -> Self {
        if self.telegram.bot_token.is_empty() {
            let token = std::env::var("CHANWARDEN_BOT_TOKEN")
                .or_else(|_| std::env::var("BOT_TOKEN"))
                .unwrap_or_default();
            self.telegram.bot_token = token;
        }
        self
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.len() < 10 {
            return Err(ChanwardenError::Config(
                "telegram.bot_token is missing or malformed".into(),
            ));
        }
        if self.notifier.max_per_window == 0 {
            return Err(ChanwardenError::Config(
                "notifier.max_per_window must be at least 1".into(),
            ));
        }
        if self.notifier.window_secs == 0 {
            return Err(ChanwardenError::Config(
                "notifier.window_secs must be positive".into(),
            ));
        }
        let s = &self.scheduler;
        for (name, secs) in [
            ("expiry_sweep_secs", s.expiry_sweep_secs),
            ("post_publication_secs", s.post_publication_secs),
            ("metric_refresh_secs", s.metric_refresh_secs),
            ("housekeeping_secs", s.housekeeping_secs),
        ] {
            if secs == 0 {
                return Err(ChanwardenError::Config(format!(
                    "scheduler.{name} must be positive"
                )));
            }
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Chanwarden home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".chanwarden")
    }
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramSettings {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_base() -> String { "https://api.telegram.org".into() }
fn default_request_timeout() -> u64 { 30 }

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: default_api_base(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.chanwarden/chanwarden.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Job cadences and pacing delays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_minute")]
    pub expiry_sweep_secs: u64,
    #[serde(default = "default_minute")]
    pub post_publication_secs: u64,
    #[serde(default = "default_metric_refresh")]
    pub metric_refresh_secs: u64,
    #[serde(default = "default_housekeeping")]
    pub housekeeping_secs: u64,
    #[serde(default = "default_sweep_pacing")]
    pub sweep_pacing_ms: u64,
    #[serde(default = "default_publication_pacing")]
    pub publication_pacing_ms: u64,
    #[serde(default = "default_publication_pacing")]
    pub metric_refresh_pacing_ms: u64,
}

fn default_minute() -> u64 { 60 }
fn default_metric_refresh() -> u64 { 6 * 3600 }
fn default_housekeeping() -> u64 { 24 * 3600 }
fn default_sweep_pacing() -> u64 { 1000 }
fn default_publication_pacing() -> u64 { 2000 }

impl SchedulerConfig {
    pub fn sweep_pacing(&self) -> Duration {
        Duration::from_millis(self.sweep_pacing_ms)
    }

    pub fn publication_pacing(&self) -> Duration {
        Duration::from_millis(self.publication_pacing_ms)
    }

    pub fn metric_refresh_pacing(&self) -> Duration {
        Duration::from_millis(self.metric_refresh_pacing_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            expiry_sweep_secs: default_minute(),
            post_publication_secs: default_minute(),
            metric_refresh_secs: default_metric_refresh(),
            housekeeping_secs: default_housekeeping(),
            sweep_pacing_ms: default_sweep_pacing(),
            publication_pacing_ms: default_publication_pacing(),
            metric_refresh_pacing_ms: default_publication_pacing(),
        }
    }
}

/// Owner notification throttle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default = "default_max_per_window")]
    pub max_per_window: usize,
    #[serde(default = "default_minute")]
    pub window_secs: u64,
    #[serde(default = "default_min_spacing")]
    pub min_spacing_ms: u64,
}

fn default_max_per_window() -> usize { 25 }
fn default_min_spacing() -> u64 { 2000 }

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            max_per_window: default_max_per_window(),
            window_secs: default_minute(),
            min_spacing_ms: default_min_spacing(),
        }
    }
}
