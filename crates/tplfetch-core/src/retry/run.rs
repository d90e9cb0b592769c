//! Retry loop: run an operation until success, exhaustion, a non-retryable
//! failure, or cancellation.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::control::CancelToken;

use super::classify::ErrorHandler;
use super::error::{NetworkError, RequestError};
use super::policy::{RetryStrategy, StrategyTable};
use super::stats::RetryStatistics;

pub type SuccessCallback = Arc<dyn Fn(u32) + Send + Sync>;
pub type FailureCallback = Arc<dyn Fn(&NetworkError) + Send + Sync>;
pub type RetryCallback = Arc<dyn Fn(u32, Duration) + Send + Sync>;

/// Per-call options for `RetryManager::execute_with_retry`.
///
/// Callbacks run synchronously on the thread that called
/// `execute_with_retry`, in attempt order.
#[derive(Clone, Default)]
pub struct RetryOptions {
    /// Strategy name; `None` or unknown names use `default`.
    pub strategy: Option<String>,
    /// Overrides the strategy's `max_attempts`.
    pub max_attempts: Option<u32>,
    /// Host label for statistics and error messages.
    pub host: String,
    /// Operation label for statistics and logs.
    pub operation: String,
    /// Called with the attempt count on success.
    pub on_success: Option<SuccessCallback>,
    /// Called once with the final error when the loop gives up.
    pub on_failure: Option<FailureCallback>,
    /// Called with (attempt number, delay) before each wait.
    pub on_retry: Option<RetryCallback>,
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("strategy", &self.strategy)
            .field("max_attempts", &self.max_attempts)
            .field("host", &self.host)
            .field("operation", &self.operation)
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryOptions {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Self::default()
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn strategy(mut self, name: impl Into<String>) -> Self {
        self.strategy = Some(name.into());
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = Some(n);
        self
    }

    pub fn on_success(mut self, f: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_failure(mut self, f: impl Fn(&NetworkError) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Arc::new(f));
        self
    }

    pub fn on_retry(mut self, f: impl Fn(u32, Duration) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(f));
        self
    }
}

/// Outcome of `execute_with_retry`.
#[derive(Debug, Clone)]
pub struct RetryResult {
    pub success: bool,
    /// Number of times the operation was invoked.
    pub attempt_count: u32,
    pub total_duration: Duration,
    /// Last classified error; `None` on success.
    pub last_error: Option<NetworkError>,
}

impl RetryResult {
    /// `Ok(())` on success, otherwise the last error.
    pub fn into_result(self) -> Result<(), NetworkError> {
        match self.last_error {
            Some(e) if !self.success => Err(e),
            _ => Ok(()),
        }
    }
}

/// Observable state of one in-flight retry loop.
#[derive(Debug, Clone, Serialize)]
pub struct RetryContext {
    pub id: u64,
    #[serde(skip)]
    pub started_at: Instant,
    #[serde(skip)]
    pub last_attempt_at: Option<Instant>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub strategy: String,
    pub last_error: Option<NetworkError>,
    pub host: String,
    pub operation: String,
}

/// Runs operations with classified, bounded retries.
///
/// Shares one `ErrorHandler` (and so one breaker per host) across every
/// operation it runs.
pub struct RetryManager {
    strategies: StrategyTable,
    errors: Arc<ErrorHandler>,
    stats: Mutex<RetryStatistics>,
    active: Mutex<HashMap<u64, RetryContext>>,
    next_id: AtomicU64,
}

impl fmt::Debug for RetryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryManager")
            .field("strategies", &self.strategies.names())
            .field("active", &self.active_retries().len())
            .finish()
    }
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new(Arc::new(ErrorHandler::default()))
    }
}

impl RetryManager {
    pub fn new(errors: Arc<ErrorHandler>) -> Self {
        Self {
            strategies: StrategyTable::new(),
            errors,
            stats: Mutex::new(RetryStatistics::default()),
            active: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn strategies(&self) -> &StrategyTable {
        &self.strategies
    }

    pub fn error_handler(&self) -> &Arc<ErrorHandler> {
        &self.errors
    }

    /// Register (or replace) a named strategy.
    pub fn register_strategy(&self, name: impl Into<String>, strategy: RetryStrategy) {
        self.strategies.register(name, strategy);
    }

    /// Run `op` (given the 0-based attempt index) until it succeeds, the
    /// attempt budget `0..=max_attempts` is spent, a failure is classified
    /// non-retryable, or `cancel` fires. Attempts are strictly sequential.
    pub fn execute_with_retry<F>(
        &self,
        cancel: &CancelToken,
        options: &RetryOptions,
        mut op: F,
    ) -> RetryResult
    where
        F: FnMut(u32) -> Result<(), RequestError>,
    {
        let strategy = self.strategies.get(options.strategy.as_deref());
        let max_attempts = options.max_attempts.unwrap_or(strategy.max_attempts);
        let started = Instant::now();
        let id = self.begin(options, &strategy, max_attempts, started);

        let mut attempt = 0u32;
        let mut invoked = 0u32;
        let outcome = loop {
            if cancel.is_cancelled() {
                break Err(NetworkError::cancelled(&options.host));
            }
            if !self.errors.allow_request(&options.host) {
                break Err(self.errors.circuit_open_error(&options.host));
            }

            invoked += 1;
            self.touch(id, invoked, None);
            let failure = match op(attempt) {
                Ok(()) => break Ok(()),
                Err(e) => e,
            };
            if cancel.is_cancelled() {
                break Err(NetworkError::cancelled(&options.host));
            }

            let err = self.errors.handle(&failure, &options.host);
            self.touch(id, invoked, Some(&err));
            if attempt >= max_attempts || !err.is_retryable() {
                break Err(err);
            }

            let delay = err.strategy().unwrap_or(&strategy).delay_for(attempt);
            tracing::warn!(
                operation = %options.operation,
                host = %options.host,
                kind = %err.kind(),
                "attempt {}/{} failed, retrying in {:?}: {}",
                attempt + 1,
                max_attempts + 1,
                delay,
                err.message()
            );
            if let Some(cb) = &options.on_retry {
                cb(attempt + 1, delay);
            }
            self.lock_stats().record_retry(err.kind());

            if cancel.wait_timeout(delay) {
                break Err(NetworkError::cancelled(&options.host));
            }
            attempt += 1;
        };

        self.end(id);
        let attempt_count = invoked;
        let total_duration = started.elapsed();
        match outcome {
            Ok(()) => {
                self.errors.record_success(&options.host);
                self.lock_stats().record_success();
                if let Some(cb) = &options.on_success {
                    cb(attempt_count);
                }
                RetryResult {
                    success: true,
                    attempt_count,
                    total_duration,
                    last_error: None,
                }
            }
            Err(err) => {
                self.lock_stats().record_failure(err.kind());
                if let Some(cb) = &options.on_failure {
                    cb(&err);
                }
                RetryResult {
                    success: false,
                    attempt_count,
                    total_duration,
                    last_error: Some(err),
                }
            }
        }
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, RetryStatistics> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(
        &self,
        options: &RetryOptions,
        strategy: &RetryStrategy,
        max_attempts: u32,
        started: Instant,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let strategy_name = match options.strategy.as_deref() {
            Some(name) if self.strategies.contains(name) => name.to_string(),
            _ => super::policy::DEFAULT_STRATEGY.to_string(),
        };
        tracing::trace!(id, ?strategy, "retry loop started");
        self.lock_stats()
            .record_start(&options.host, &options.operation);
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                RetryContext {
                    id,
                    started_at: started,
                    last_attempt_at: None,
                    attempt_count: 0,
                    max_attempts,
                    strategy: strategy_name,
                    last_error: None,
                    host: options.host.clone(),
                    operation: options.operation.clone(),
                },
            );
        id
    }

    fn touch(&self, id: u64, attempt_count: u32, err: Option<&NetworkError>) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ctx) = active.get_mut(&id) {
            ctx.attempt_count = attempt_count;
            match err {
                Some(e) => ctx.last_error = Some(e.clone()),
                None => ctx.last_attempt_at = Some(Instant::now()),
            }
        }
    }

    fn end(&self, id: u64) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Snapshot of retry loops currently running.
    pub fn active_retries(&self) -> Vec<RetryContext> {
        let mut v: Vec<RetryContext> = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        v.sort_by_key(|c| c.id);
        v
    }

    pub fn statistics(&self) -> RetryStatistics {
        self.lock_stats().clone()
    }

    pub fn reset_statistics(&self) {
        *self.lock_stats() = RetryStatistics::default();
    }
}
