use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::checksum::ChecksumType;
use crate::downloader::{DownloadOptions, DEFAULT_CHUNK_SIZE, DEFAULT_RESUME_THRESHOLD};
use crate::pool::PoolConfig;
use crate::retry::{
    BackoffKind, BreakerConfig, ErrorHandler, RetryManager, RetryStrategy, DEFAULT_STRATEGY,
};

/// Seconds as a `Duration`; negative or non-finite values become zero.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::ZERO)
}

/// Retry shape (optional `[retry]` section). Replaces the `default`
/// strategy when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay in seconds (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
    pub multiplier: f64,
    pub jitter: bool,
    /// "exponential", "linear" or "fixed".
    pub backoff: BackoffKind,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let s = RetryStrategy::default();
        Self {
            max_retries: s.max_attempts,
            base_delay_secs: s.base_delay.as_secs_f64(),
            max_delay_secs: s.max_delay.as_secs_f64(),
            multiplier: s.multiplier,
            jitter: s.jitter,
            backoff: s.backoff,
        }
    }
}

impl RetryConfig {
    pub fn to_strategy(&self) -> RetryStrategy {
        RetryStrategy {
            max_attempts: self.max_retries,
            base_delay: secs(self.base_delay_secs),
            max_delay: secs(self.max_delay_secs),
            multiplier: self.multiplier,
            jitter: self.jitter,
            backoff: self.backoff,
        }
    }
}

/// `[download]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Bytes per ranged request.
    pub chunk_size: u64,
    pub enable_resume: bool,
    /// Partial files below this many bytes are refetched from scratch.
    pub resume_threshold: u64,
    pub verify_checksum: bool,
    pub checksum_type: ChecksumType,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            enable_resume: true,
            resume_threshold: DEFAULT_RESUME_THRESHOLD,
            verify_checksum: false,
            checksum_type: ChecksumType::Sha256,
        }
    }
}

impl DownloadConfig {
    /// Download options carrying these settings and defaults elsewhere.
    pub fn to_options(&self) -> DownloadOptions {
        DownloadOptions {
            chunk_size: self.chunk_size,
            enable_resume: self.enable_resume,
            resume_threshold: self.resume_threshold,
            verify_checksum: self.verify_checksum,
            checksum_type: self.checksum_type,
            ..DownloadOptions::default()
        }
    }
}

/// `[pool]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    pub max_idle_conns: usize,
    /// 0 = unlimited.
    pub max_conns_per_host: usize,
    pub idle_conn_timeout_secs: u64,
    /// 0 falls back to the built-in default.
    pub cleanup_interval_secs: u64,
    pub dial_timeout_secs: u64,
    /// 0 disables TCP keep-alive probes.
    pub keep_alive_secs: u64,
    /// 0 disables the per-request wall-clock limit.
    pub request_timeout_secs: u64,
    /// Transfers slower than this (bytes/s) for `low_speed_time_secs` fail.
    pub low_speed_limit: u32,
    pub low_speed_time_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    pub enable_stats: bool,
    pub enable_metrics: bool,
    pub metrics_interval_secs: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        let p = PoolConfig::default();
        Self {
            max_idle_conns: p.max_idle_conns,
            max_conns_per_host: p.max_conns_per_host,
            idle_conn_timeout_secs: p.idle_conn_timeout.as_secs(),
            cleanup_interval_secs: p.cleanup_interval.as_secs(),
            dial_timeout_secs: p.dial_timeout.as_secs(),
            keep_alive_secs: p.keep_alive.map_or(0, |d| d.as_secs()),
            request_timeout_secs: p.request_timeout.map_or(0, |d| d.as_secs()),
            low_speed_limit: p.low_speed_limit,
            low_speed_time_secs: p.low_speed_time.as_secs(),
            proxy: p.proxy,
            enable_stats: p.enable_stats,
            enable_metrics: p.enable_metrics,
            metrics_interval_secs: p.metrics_interval.as_secs(),
        }
    }
}

impl PoolSection {
    pub fn to_pool_config(&self) -> PoolConfig {
        let nonzero = |s: u64| (s > 0).then(|| Duration::from_secs(s));
        PoolConfig {
            max_idle_conns: self.max_idle_conns,
            max_conns_per_host: self.max_conns_per_host,
            idle_conn_timeout: Duration::from_secs(self.idle_conn_timeout_secs),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
            dial_timeout: Duration::from_secs(self.dial_timeout_secs),
            keep_alive: nonzero(self.keep_alive_secs),
            request_timeout: nonzero(self.request_timeout_secs),
            low_speed_limit: self.low_speed_limit,
            low_speed_time: Duration::from_secs(self.low_speed_time_secs),
            proxy: self.proxy.clone(),
            enable_stats: self.enable_stats,
            enable_metrics: self.enable_metrics,
            metrics_interval: Duration::from_secs(self.metrics_interval_secs),
        }
    }
}

/// `[breaker]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSection {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: f64,
}

impl Default for BreakerSection {
    fn default() -> Self {
        let b = BreakerConfig::default();
        Self {
            failure_threshold: b.failure_threshold,
            recovery_timeout_secs: b.recovery_timeout.as_secs_f64(),
        }
    }
}

impl BreakerSection {
    pub fn to_breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: secs(self.recovery_timeout_secs),
        }
    }
}

/// Global configuration loaded from `~/.config/tplfetch/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Optional retry shape; if missing, the built-in `default` strategy is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    pub download: DownloadConfig,
    pub pool: PoolSection,
    pub breaker: BreakerSection,
}

impl EngineConfig {
    /// Retry manager with this config's breaker, and its `[retry]` section
    /// registered as the `default` strategy.
    pub fn retry_manager(&self) -> RetryManager {
        let errors = ErrorHandler::new(self.breaker.to_breaker_config());
        let manager = RetryManager::new(Arc::new(errors));
        if let Some(retry) = &self.retry {
            manager.register_strategy(DEFAULT_STRATEGY, retry.to_strategy());
        }
        manager
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("tplfetch")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<EngineConfig> {
    load_or_init_at(&config_path()?)
}

/// Like `load_or_init` for an explicit path.
pub fn load_or_init_at(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let default_cfg = EngineConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml).with_context(|| format!("write {}", path.display()))?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}
