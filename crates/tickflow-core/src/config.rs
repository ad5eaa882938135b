//! Ingestion configuration.
//!
//! A JSON file (camelCase keys) is deserialized into raw structs, then
//! validated into [`IngestConfig`]. Secrets and the home directory come from
//! the environment:
//!
//! | Variable | Purpose |
//! |----------|---------|
//! | `TICKFLOW_CONFIG` | Config file path (default `tickflow.json`) |
//! | `TICKFLOW_TWELVEDATA_API_KEY` | API key, highest precedence |
//! | `TWELVEDATA_API_KEY` | API key fallback |
//! | `TICKFLOW_HOME` | Base directory of the default warehouse (default `~/.tickflow`) |
//!
//! ```json
//! {
//!   "provider": { "baseUrl": "https://api.twelvedata.com/", "apiVersion": "V1", "timeoutMinutes": 5 },
//!   "rateLimit": {
//!     "tokenLimit": 8, "tokensPerPeriod": 8, "replenishmentPeriodMinutes": 1,
//!     "queueLimit": 100, "queueProcessingOrder": "OldestFirst", "autoReplenishment": true
//!   },
//!   "jobs": {
//!     "delayMinutes": 5,
//!     "workItems": [ { "symbol": "AAPL", "interval": "1min", "outputSize": 390 } ]
//!   }
//! }
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tickflow_warehouse::WarehouseConfig;

use crate::provider::{ApiVersion, ProviderConfig, DEFAULT_BASE_URL};
use crate::throttling::{BucketConfigError, QueueOrder, TokenBucketConfig};
use crate::{Interval, OutputSize, Symbol, ValidationError, WorkItem};

pub const CONFIG_PATH_ENV: &str = "TICKFLOW_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "tickflow.json";
pub const API_KEY_ENVS: [&str; 2] = ["TICKFLOW_TWELVEDATA_API_KEY", "TWELVEDATA_API_KEY"];
pub const HOME_ENV: &str = "TICKFLOW_HOME";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no API key: set {} or provider.apiKey", API_KEY_ENVS.join(" / "))]
    MissingApiKey,

    #[error("unsupported API version '{value}', only V1 is supported")]
    UnsupportedApiVersion { value: String },

    #[error("'{field}' must be a finite number of minutes {constraint}, got {value}")]
    InvalidMinutes {
        field: &'static str,
        constraint: &'static str,
        value: f64,
    },

    #[error("jobs.workItems must contain at least one item")]
    NoWorkItems,

    #[error("jobs.workItems[{index}]: {source}")]
    InvalidWorkItem {
        index: usize,
        #[source]
        source: ValidationError,
    },

    #[error("jobs.workItems lists {symbol} ({interval}) more than once")]
    DuplicateWorkItem { symbol: Symbol, interval: Interval },

    #[error("rateLimit: {0}")]
    RateLimit(#[from] BucketConfigError),
}

/// Cadence and work list of the two jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobsConfig {
    /// Wait before the first incremental run.
    pub delay: Duration,
    /// Interval between incremental runs.
    pub period: Duration,
    pub work_items: Vec<WorkItem>,
}

/// Validated configuration of one worker process.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub provider: ProviderConfig,
    pub rate_limit: TokenBucketConfig,
    pub jobs: JobsConfig,
    pub warehouse: WarehouseConfig,
}

impl IngestConfig {
    /// Load from a file, reading secrets from the process environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw, |name| std::env::var(name).ok())
    }

    /// Parse and validate, resolving environment lookups through `env`.
    pub fn from_json(
        json: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(json)?;

        let provider = raw.provider.validate(&env)?;
        let rate_limit = raw.rate_limit.validate()?;
        let jobs = raw.jobs.validate()?;
        let warehouse = raw.warehouse.resolve(&env);

        Ok(Self {
            provider,
            rate_limit,
            jobs,
            warehouse,
        })
    }

    /// Normalized, secret-free view for operators.
    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            base_url: self.provider.base_url.clone(),
            api_version: self.provider.api_version.as_str(),
            timeout_seconds: self.provider.timeout.as_secs_f64(),
            api_key_configured: !self.provider.api_key.is_empty(),
            token_limit: self.rate_limit.capacity,
            tokens_per_period: self.rate_limit.tokens_per_period,
            replenishment_period_seconds: self.rate_limit.period.as_secs_f64(),
            queue_limit: self.rate_limit.queue_limit,
            queue_processing_order: self.rate_limit.queue_order,
            auto_replenishment: self.rate_limit.auto_replenish,
            delay_seconds: self.jobs.delay.as_secs_f64(),
            period_seconds: self.jobs.period.as_secs_f64(),
            warehouse_path: self.warehouse.db_path.display().to_string(),
            work_items: self.jobs.work_items.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSummary {
    pub base_url: String,
    pub api_version: &'static str,
    pub timeout_seconds: f64,
    pub api_key_configured: bool,
    pub token_limit: u32,
    pub tokens_per_period: u32,
    pub replenishment_period_seconds: f64,
    pub queue_limit: usize,
    pub queue_processing_order: QueueOrder,
    pub auto_replenishment: bool,
    pub delay_seconds: f64,
    pub period_seconds: f64,
    pub warehouse_path: String,
    pub work_items: Vec<WorkItem>,
}

/// Storage location only, for commands that never call the provider.
///
/// A missing config file falls back to the default warehouse path.
pub fn load_warehouse_config(path: &Path) -> Result<WarehouseConfig, ConfigError> {
    let env = |name: &str| std::env::var(name).ok();
    match fs::read_to_string(path) {
        Ok(raw) => warehouse_from_json(&raw, env),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            Ok(default_warehouse(&env))
        }
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub fn warehouse_from_json(
    json: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Result<WarehouseConfig, ConfigError> {
    #[derive(Deserialize)]
    struct StorageOnly {
        #[serde(default)]
        warehouse: RawWarehouse,
    }

    let raw: StorageOnly = serde_json::from_str(json)?;
    Ok(raw.warehouse.resolve(&env))
}

fn default_warehouse(env: &impl Fn(&str) -> Option<String>) -> WarehouseConfig {
    WarehouseConfig::at(tickflow_home(env).join("warehouse.duckdb"))
}

/// Explicit path, then `TICKFLOW_CONFIG`, then `tickflow.json`.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| {
            std::env::var_os(CONFIG_PATH_ENV)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

fn tickflow_home(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(home) = env(HOME_ENV).filter(|value| !value.is_empty()) {
        return PathBuf::from(home);
    }
    match env("HOME") {
        Some(home) => PathBuf::from(home).join(".tickflow"),
        None => PathBuf::from(".tickflow"),
    }
}

/// Minutes to a `Duration`. Values that round to zero count as zero, and
/// values too large for a `Duration` are rejected.
fn minutes(field: &'static str, value: f64, allow_zero: bool) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidMinutes {
        field,
        constraint: if allow_zero { ">= 0" } else { "> 0" },
        value,
    };

    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }
    let duration = Duration::try_from_secs_f64(value * 60.0).map_err(|_| invalid())?;
    if duration.is_zero() && !allow_zero {
        return Err(invalid());
    }
    Ok(duration)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    provider: RawProvider,
    #[serde(default)]
    rate_limit: RawRateLimit,
    jobs: RawJobs,
    #[serde(default)]
    warehouse: RawWarehouse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProvider {
    #[serde(default = "default_base_url")]
    base_url: String,
    #[serde(default = "default_api_version")]
    api_version: String,
    #[serde(default = "default_timeout_minutes")]
    timeout_minutes: f64,
    #[serde(default)]
    api_key: Option<String>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_owned()
}

fn default_api_version() -> String {
    ApiVersion::V1.as_str().to_owned()
}

fn default_timeout_minutes() -> f64 {
    5.0
}

impl RawProvider {
    fn validate(
        self,
        env: &impl Fn(&str) -> Option<String>,
    ) -> Result<ProviderConfig, ConfigError> {
        let api_version = self
            .api_version
            .parse::<ApiVersion>()
            .map_err(|value| ConfigError::UnsupportedApiVersion { value })?;
        let timeout = minutes("provider.timeoutMinutes", self.timeout_minutes, false)?;

        let api_key = API_KEY_ENVS
            .iter()
            .find_map(|name| env(name))
            .or(self.api_key)
            .map(|key| key.trim().to_owned())
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let mut provider = ProviderConfig::new(&self.base_url, api_key, timeout);
        provider.api_version = api_version;
        Ok(provider)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawRateLimit {
    token_limit: u32,
    tokens_per_period: u32,
    replenishment_period_minutes: f64,
    queue_limit: usize,
    queue_processing_order: QueueOrder,
    auto_replenishment: bool,
}

impl Default for RawRateLimit {
    fn default() -> Self {
        let defaults = TokenBucketConfig::default();
        Self {
            token_limit: defaults.capacity,
            tokens_per_period: defaults.tokens_per_period,
            replenishment_period_minutes: defaults.period.as_secs_f64() / 60.0,
            queue_limit: defaults.queue_limit,
            queue_processing_order: defaults.queue_order,
            auto_replenishment: defaults.auto_replenish,
        }
    }
}

impl RawRateLimit {
    fn validate(self) -> Result<TokenBucketConfig, ConfigError> {
        let config = TokenBucketConfig {
            capacity: self.token_limit,
            tokens_per_period: self.tokens_per_period,
            period: minutes(
                "rateLimit.replenishmentPeriodMinutes",
                self.replenishment_period_minutes,
                false,
            )?,
            queue_limit: self.queue_limit,
            queue_order: self.queue_processing_order,
            auto_replenish: self.auto_replenishment,
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawJobs {
    delay_minutes: f64,
    #[serde(default)]
    period_minutes: Option<f64>,
    #[serde(default)]
    work_items: Vec<RawWorkItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWorkItem {
    symbol: String,
    interval: String,
    output_size: u32,
}

impl RawJobs {
    fn validate(self) -> Result<JobsConfig, ConfigError> {
        let delay = minutes("jobs.delayMinutes", self.delay_minutes, true)?;
        let period = match self.period_minutes {
            Some(value) => minutes("jobs.periodMinutes", value, false)?,
            // The recurring job repeats at its start delay unless told otherwise.
            None => minutes("jobs.delayMinutes", self.delay_minutes, false)?,
        };

        if self.work_items.is_empty() {
            return Err(ConfigError::NoWorkItems);
        }

        let mut seen = HashSet::new();
        let mut work_items = Vec::with_capacity(self.work_items.len());
        for (index, raw) in self.work_items.into_iter().enumerate() {
            let invalid = |source| ConfigError::InvalidWorkItem { index, source };
            let item = WorkItem::new(
                Symbol::parse(&raw.symbol).map_err(invalid)?,
                raw.interval.parse::<Interval>().map_err(invalid)?,
                OutputSize::new(raw.output_size).map_err(invalid)?,
            );

            if !seen.insert((item.symbol.clone(), item.interval)) {
                return Err(ConfigError::DuplicateWorkItem {
                    symbol: item.symbol,
                    interval: item.interval,
                });
            }
            work_items.push(item);
        }

        Ok(JobsConfig {
            delay,
            period,
            work_items,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWarehouse {
    #[serde(default)]
    db_path: Option<PathBuf>,
}

impl RawWarehouse {
    fn resolve(self, env: &impl Fn(&str) -> Option<String>) -> WarehouseConfig {
        match self.db_path {
            Some(db_path) => WarehouseConfig::at(db_path),
            None => default_warehouse(env),
        }
    }
}
