//! Configuration loader and validator for the ingestion job.
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::token::RefreshPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub graph: Graph,
    #[serde(default)]
    pub sync: SyncLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Remote API endpoints and app credentials used for token exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Graph {
    pub api_base: String,
    pub oauth_base: String,
    pub app_id: String,
    pub app_secret: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Per-run limits and pacing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncLimits {
    pub request_budget: u32,
    pub page_size: u32,
    pub pacing_seconds: u64,
    /// Optional guard on pages fetched per account per run.
    pub max_pages: Option<u32>,
    pub nominal_token_lifetime_days: i64,
    pub refresh: Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum Refresh {
    /// Refresh once less than `fraction` of the token's lifetime is left.
    LifetimeFraction { fraction: f64 },
    /// Refresh once less than `threshold_days` are left.
    Absolute { threshold_days: i64 },
}

impl Default for SyncLimits {
    fn default() -> Self {
        Self {
            request_budget: crate::budget::DEFAULT_REQUEST_BUDGET,
            page_size: 50,
            pacing_seconds: 2,
            max_pages: None,
            nominal_token_lifetime_days: 60,
            refresh: Refresh::LifetimeFraction { fraction: 0.10 },
        }
    }
}

/// Upper bound for any day count taken from config; keeps the derived
/// durations well inside chrono's range.
const MAX_CONFIG_DAYS: i64 = 3650;

fn default_timeout_seconds() -> u64 {
    30
}

/// Runtime knobs for one batch run, derived from [`SyncLimits`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub request_budget: u32,
    pub page_size: u32,
    pub pacing: Duration,
    pub max_pages: Option<u32>,
    pub refresh_policy: RefreshPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncLimits::default().settings()
    }
}

impl SyncLimits {
    pub fn settings(&self) -> SyncSettings {
        let refresh_policy = match self.refresh {
            Refresh::LifetimeFraction { fraction } => RefreshPolicy::LifetimeFraction {
                fraction,
                nominal_lifetime: ChronoDuration::days(self.nominal_token_lifetime_days),
            },
            Refresh::Absolute { threshold_days } => RefreshPolicy::Absolute {
                threshold: ChronoDuration::days(threshold_days),
            },
        };
        SyncSettings {
            request_budget: self.request_budget,
            page_size: self.page_size,
            pacing: Duration::from_secs(self.pacing_seconds),
            max_pages: self.max_pages,
            refresh_policy,
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!(
                "sqlite://{}/ingest.db",
                self.app.data_dir.trim_end_matches('/')
            )
        })
    }

    pub fn sync_settings(&self) -> SyncSettings {
        self.sync.settings()
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.graph.api_base.trim().is_empty() {
        return Err(ConfigError::Invalid("graph.api_base must be non-empty"));
    }
    if cfg.graph.oauth_base.trim().is_empty() {
        return Err(ConfigError::Invalid("graph.oauth_base must be non-empty"));
    }
    if cfg.graph.app_id.trim().is_empty() {
        return Err(ConfigError::Invalid("graph.app_id must be non-empty"));
    }
    if cfg.graph.app_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("graph.app_secret must be non-empty"));
    }
    if cfg.graph.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("graph.timeout_seconds must be > 0"));
    }

    let sync = &cfg.sync;
    if sync.request_budget == 0 {
        return Err(ConfigError::Invalid("sync.request_budget must be > 0"));
    }
    // The media edge caps `limit` at 100.
    if sync.page_size == 0 || sync.page_size > 100 {
        return Err(ConfigError::Invalid("sync.page_size must be within 1..=100"));
    }
    if sync.max_pages == Some(0) {
        return Err(ConfigError::Invalid("sync.max_pages must be > 0 when set"));
    }
    if !(1..=MAX_CONFIG_DAYS).contains(&sync.nominal_token_lifetime_days) {
        return Err(ConfigError::Invalid(
            "sync.nominal_token_lifetime_days must be within 1..=3650",
        ));
    }
    match sync.refresh {
        Refresh::LifetimeFraction { fraction } if !(fraction > 0.0 && fraction < 1.0) => {
            return Err(ConfigError::Invalid(
                "sync.refresh.fraction must be within (0, 1)",
            ));
        }
        Refresh::Absolute { threshold_days }
            if !(1..=MAX_CONFIG_DAYS).contains(&threshold_days) =>
        {
            return Err(ConfigError::Invalid(
                "sync.refresh.threshold_days must be within 1..=3650",
            ));
        }
        _ => {}
    }

    Ok(())
}

/// Example configuration with every setting spelled out.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

graph:
  api_base: "https://graph.instagram.com/v24.0/"
  oauth_base: "https://graph.facebook.com/"
  app_id: "YOUR_APP_ID"
  app_secret: "YOUR_APP_SECRET"
  timeout_seconds: 30

sync:
  request_budget: 150
  page_size: 50
  pacing_seconds: 2
  max_pages: null
  nominal_token_lifetime_days: 60
  refresh:
    policy: lifetime_fraction
    fraction: 0.1
"#
}
