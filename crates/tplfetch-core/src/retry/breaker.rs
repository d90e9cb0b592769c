//! Circuit breaker guarding a failing origin.
//!
//! ```text
//! Closed   -> Open:     failure_count reaches failure_threshold
//! Open     -> HalfOpen: recovery_timeout elapsed since the last failure
//! HalfOpen -> Closed:   a success is recorded
//! HalfOpen -> Open:     any failure (recovery window restarts)
//! ```

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// Time the breaker stays open before allowing a probe.
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerState>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config: BreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                ..config
            },
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
            }),
        }
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a new attempt may be issued. An open breaker whose recovery
    /// window has elapsed moves to half-open and lets the probe through.
    pub fn allow_request(&self) -> bool {
        let mut s = self.lock();
        match s.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = s
                    .last_failure_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.recovery_timeout {
                    s.state = CircuitState::HalfOpen;
                    tracing::debug!("circuit breaker half-open, allowing probe");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut s = self.lock();
        s.failure_count = 0;
        if s.state == CircuitState::HalfOpen {
            s.state = CircuitState::Closed;
            tracing::info!("circuit breaker closed after successful probe");
        }
    }

    pub fn record_failure(&self) {
        let mut s = self.lock();
        s.failure_count = s.failure_count.saturating_add(1);
        s.last_failure_at = Some(Instant::now());
        match s.state {
            CircuitState::HalfOpen => {
                s.state = CircuitState::Open;
                tracing::warn!("circuit breaker re-opened: probe failed");
            }
            CircuitState::Closed if s.failure_count >= self.config.failure_threshold => {
                s.state = CircuitState::Open;
                tracing::warn!(
                    failures = s.failure_count,
                    "circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Force the breaker back to closed with a zero failure count.
    pub fn reset(&self) {
        let mut s = self.lock();
        s.state = CircuitState::Closed;
        s.failure_count = 0;
        s.last_failure_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, recovery_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_millis(recovery_ms),
        })
    }

    #[test]
    fn closed_allows_requests_below_threshold() {
        let b = breaker(3, 1000);
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.allow_request());
    }

    #[test]
    fn opens_at_threshold_and_blocks() {
        let b = breaker(3, 60_000);
        for _ in 0..3 {
            b.record_failure();
        }
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.allow_request());
        assert!(!b.allow_request());
    }

    #[test]
    fn recovers_through_half_open() {
        let b = breaker(2, 20);
        b.record_failure();
        b.record_failure();
        assert!(!b.allow_request());
        std::thread::sleep(Duration::from_millis(40));
        assert!(b.allow_request());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        b.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 0);
    }

    #[test]
    fn half_open_failure_reopens_with_fresh_window() {
        let b = breaker(1, 20);
        b.record_failure();
        std::thread::sleep(Duration::from_millis(40));
        assert!(b.allow_request());
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.allow_request());
    }

    #[test]
    fn success_resets_counter_in_closed_state() {
        let b = breaker(3, 1000);
        b.record_failure();
        b.record_failure();
        b.record_success();
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn zero_threshold_is_treated_as_one() {
        let b = breaker(0, 1000);
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
    }
}
