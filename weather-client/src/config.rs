use anyhow::{Context, Result, anyhow, bail};
use directories::ProjectDirs;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, str::FromStr, time::Duration};

use crate::resilience::{BreakerSettings, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";

/// Retry budget for upstream 5xx responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Requests a generation must see before it may trip.
    pub min_requests: u32,
    pub failure_ratio: f64,
    pub max_half_open_requests: u32,
    pub open_timeout_ms: u64,
    /// 0 keeps counting forever while closed.
    pub closed_interval_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            min_requests: 3,
            failure_ratio: 0.6,
            max_half_open_requests: 3,
            open_timeout_ms: 60_000,
            closed_interval_ms: 10_000,
        }
    }
}

impl BreakerConfig {
    pub fn settings(&self) -> Result<BreakerSettings> {
        let settings = BreakerSettings::new(
            self.max_half_open_requests,
            Duration::from_millis(self.closed_interval_ms),
            Duration::from_millis(self.open_timeout_ms),
        )
        .with_failure_ratio(self.min_requests, self.failure_ratio)
        .context("Invalid circuit breaker configuration")?;

        settings.validate().context("Invalid circuit breaker configuration")?;
        Ok(settings)
    }
}

/// Everything needed to talk to the OpenWeather API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub api_key: String,
    pub base_url: String,
    pub http_timeout_ms: u64,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            http_timeout_ms: 10_000,
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl UpstreamConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Check the values a client cannot work without.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            bail!(
                "No OpenWeather API key configured.\n\
                 Hint: run `weather configure` or set OPENWEATHER_API_KEY."
            );
        }

        let url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid upstream base URL: {}", self.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("Upstream base URL must use http or https: {}", self.base_url);
        }

        if self.http_timeout_ms == 0 {
            bail!("http_timeout_ms must be > 0");
        }

        self.breaker.settings()?;
        Ok(())
    }
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// [upstream]
/// api_key = "..."
///
/// [upstream.retry]
/// max_attempts = 3
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub upstream: UpstreamConfig,
}

impl Config {
    /// Load config from disk (or defaults when absent), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        let mut cfg = Self::load_from(&path)?;
        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    /// Load config from `path`, or return defaults if it doesn't exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-client", "weather")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    pub fn set_api_key(&mut self, api_key: String) {
        self.upstream.api_key = api_key;
    }

    pub fn has_api_key(&self) -> bool {
        !self.upstream.api_key.trim().is_empty()
    }

    /// Override file values with `OPENWEATHER_*` variables resolved through `lookup`.
    ///
    /// Unparseable numbers are logged and ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let up = &mut self.upstream;

        if let Some(key) = lookup("OPENWEATHER_API_KEY").filter(|v| !v.is_empty()) {
            up.api_key = key;
        }
        if let Some(url) = lookup("OPENWEATHER_BASE_URL").filter(|v| !v.is_empty()) {
            up.base_url = url;
        }

        override_number(&lookup, "OPENWEATHER_HTTP_TIMEOUT_MS", &mut up.http_timeout_ms);
        override_number(&lookup, "OPENWEATHER_RETRY_MAX_ATTEMPTS", &mut up.retry.max_attempts);
        override_number(&lookup, "OPENWEATHER_RETRY_INITIAL_BACKOFF_MS", &mut up.retry.initial_backoff_ms);
        override_number(&lookup, "OPENWEATHER_RETRY_MAX_BACKOFF_MS", &mut up.retry.max_backoff_ms);
    }
}

fn override_number<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + std::fmt::Display,
{
    let Some(raw) = lookup(key).filter(|v| !v.is_empty()) else {
        return;
    };

    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, fallback = %target, "ignoring invalid numeric override"),
    }
}
