//! Dispatch configuration loading and representation.
//!
//! Every knob has a default; `FANOUT_*` environment variables override them.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Configuration error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

/// Adaptive rate limiter settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Starting spacing between sends.
    pub initial_delay: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Multiplier applied after a successful send (< 1.0).
    pub decay: f64,
    /// Multiplier applied on a rate limit without a server hint (> 1.0).
    pub growth: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            min_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            decay: 0.97,
            growth: 1.5,
        }
    }
}

/// Per-recipient retry settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt (total attempts = limit + 1).
    pub retry_limit: u32,
    /// Transient failures wait `base_backoff * attempt`.
    pub base_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_limit: 2,
            base_backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryConfig {
    pub fn max_attempts(&self) -> u32 {
        self.retry_limit.saturating_add(1)
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    pub worker_count: usize,
    pub page_size: usize,
    /// Force a checkpoint every N processed recipients.
    pub checkpoint_every: u64,
    /// Pause between worker iterations.
    pub worker_yield: Duration,
    pub monitor_period: Duration,
    /// Default save cadence for dirty state between checkpoints.
    pub save_interval: Duration,
    /// Retries for a failed page request before production halts.
    pub page_retry_limit: u32,
    pub page_retry_backoff: Duration,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            page_size: 1000,
            checkpoint_every: 25,
            worker_yield: Duration::from_millis(10),
            monitor_period: Duration::from_millis(3000),
            save_interval: Duration::from_millis(1000),
            page_retry_limit: 3,
            page_retry_backoff: Duration::from_millis(2000),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl DispatchConfig {
    pub fn with_workers(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry.retry_limit = limit;
        self
    }

    pub fn with_checkpoint_every(mut self, every: u64) -> Self {
        self.checkpoint_every = every;
        self
    }

    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from defaults plus whatever `lookup` returns for each `FANOUT_*` key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse(&lookup, "FANOUT_WORKERS")? {
            config.worker_count = v;
        }
        if let Some(v) = parse(&lookup, "FANOUT_PAGE_SIZE")? {
            config.page_size = v;
        }
        if let Some(v) = parse(&lookup, "FANOUT_CHECKPOINT_EVERY")? {
            config.checkpoint_every = v;
        }
        if let Some(v) = parse(&lookup, "FANOUT_RETRY_LIMIT")? {
            config.retry.retry_limit = v;
        }
        if let Some(v) = parse_millis(&lookup, "FANOUT_BASE_BACKOFF_MS")? {
            config.retry.base_backoff = v;
        }
        if let Some(v) = parse_millis(&lookup, "FANOUT_INITIAL_DELAY_MS")? {
            config.rate_limit.initial_delay = v;
        }
        if let Some(v) = parse_millis(&lookup, "FANOUT_MIN_DELAY_MS")? {
            config.rate_limit.min_delay = v;
        }
        if let Some(v) = parse_millis(&lookup, "FANOUT_MAX_DELAY_MS")? {
            config.rate_limit.max_delay = v;
        }
        if let Some(v) = parse_millis(&lookup, "FANOUT_MONITOR_PERIOD_MS")? {
            config.monitor_period = v;
        }
        if let Some(v) = parse_millis(&lookup, "FANOUT_SAVE_INTERVAL_MS")? {
            config.save_interval = v;
        }
        if let Some(v) = parse_millis(&lookup, "FANOUT_WORKER_YIELD_MS")? {
            config.worker_yield = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Inconsistent("worker_count must be at least 1".into()));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Inconsistent("page_size must be at least 1".into()));
        }
        if self.checkpoint_every == 0 {
            return Err(ConfigError::Inconsistent(
                "checkpoint_every must be at least 1".into(),
            ));
        }
        if self.monitor_period.is_zero() || self.save_interval.is_zero() {
            return Err(ConfigError::Inconsistent(
                "monitor_period and save_interval must be non-zero".into(),
            ));
        }
        let rl = &self.rate_limit;
        if rl.min_delay > rl.max_delay {
            return Err(ConfigError::Inconsistent(format!(
                "min_delay ({:?}) exceeds max_delay ({:?})",
                rl.min_delay, rl.max_delay
            )));
        }
        if !(rl.decay > 0.0 && rl.decay <= 1.0) || rl.growth < 1.0 {
            return Err(ConfigError::Inconsistent(
                "decay must be in (0, 1] and growth at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

fn parse_millis<F>(lookup: &F, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse::<u64, F>(lookup, key)?.map(Duration::from_millis))
}
