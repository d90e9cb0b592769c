use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Maximum relative perturbation applied when jitter is enabled.
pub const JITTER_FRACTION: f64 = 0.10;

/// Name of the strategy used when none (or an unknown one) is requested.
pub const DEFAULT_STRATEGY: &str = "default";

/// Shape of the backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// `base * (attempt + 1)`
    Linear,
    /// `base * 2^attempt * multiplier`
    #[default]
    Exponential,
    /// `base`
    Fixed,
}

/// Immutable retry strategy: attempt budget plus backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryStrategy {
    /// Highest attempt index; attempts run `0..=max_attempts`.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
    pub backoff: BackoffKind,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            backoff: BackoffKind::Exponential,
        }
    }
}

impl RetryStrategy {
    /// Few quick attempts for cheap, likely-transient failures.
    pub fn fast() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 1.5,
            jitter: true,
            backoff: BackoffKind::Exponential,
        }
    }

    /// Long waits for overloaded or rate-limiting origins.
    pub fn slow() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(120),
            multiplier: 3.0,
            jitter: true,
            backoff: BackoffKind::Exponential,
        }
    }

    pub fn linear() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 1.0,
            jitter: false,
            backoff: BackoffKind::Linear,
        }
    }

    /// Backoff for `attempt` (0-based) before jitter, clamped to `max_delay`.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let raw = match self.backoff {
            BackoffKind::Linear => base * (attempt as f64 + 1.0),
            BackoffKind::Exponential => {
                // 2^63 already overflows any sane max_delay.
                let exp = 2f64.powi(attempt.min(63) as i32);
                base * exp * self.multiplier.max(0.0)
            }
            BackoffKind::Fixed => base,
        };
        let max = self.max_delay.as_secs_f64();
        if !raw.is_finite() || raw >= max {
            return self.max_delay;
        }
        Duration::from_secs_f64(raw.max(0.0))
    }

    /// Backoff for `attempt` with jitter applied when enabled.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor: f64 = rand::rng().random_range(-JITTER_FRACTION..=JITTER_FRACTION);
        apply_jitter(delay, factor)
    }
}

/// Perturb `delay` by `factor` (expected in `[-JITTER_FRACTION, JITTER_FRACTION]`).
pub(crate) fn apply_jitter(delay: Duration, factor: f64) -> Duration {
    let factor = factor.clamp(-JITTER_FRACTION, JITTER_FRACTION);
    let secs = delay.as_secs_f64() * (1.0 + factor);
    Duration::from_secs_f64(secs.max(0.0))
}

/// Registry of named retry strategies, pre-seeded with `default`, `fast`,
/// `slow` and `linear`. Unknown names resolve to `default`.
#[derive(Debug)]
pub struct StrategyTable {
    strategies: RwLock<HashMap<String, RetryStrategy>>,
}

impl Default for StrategyTable {
    fn default() -> Self {
        let mut m = HashMap::new();
        m.insert(DEFAULT_STRATEGY.to_string(), RetryStrategy::default());
        m.insert("fast".to_string(), RetryStrategy::fast());
        m.insert("slow".to_string(), RetryStrategy::slow());
        m.insert("linear".to_string(), RetryStrategy::linear());
        Self {
            strategies: RwLock::new(m),
        }
    }
}

impl StrategyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a named strategy.
    pub fn register(&self, name: impl Into<String>, strategy: RetryStrategy) {
        self.strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), strategy);
    }

    /// Look up `name`, falling back to `default` (and to the built-in
    /// default if that entry was somehow replaced by nothing).
    pub fn get(&self, name: Option<&str>) -> RetryStrategy {
        let map = self
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        name.and_then(|n| map.get(n))
            .or_else(|| map.get(DEFAULT_STRATEGY))
            .copied()
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
