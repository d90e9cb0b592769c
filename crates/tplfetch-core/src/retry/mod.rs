//! Retry, backoff and circuit-breaking policy.
//!
//! This module encapsulates error classification (timeouts, refused
//! connections, DNS, TLS, throttling and server errors), named backoff
//! strategies, the shared circuit breaker, and the retry loop itself, so the
//! downloader and probe share one consistent policy.

mod breaker;
mod classify;
mod error;
mod policy;
mod run;
mod stats;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use classify::{
    classify, classify_curl_error, classify_http_status, classify_message,
    default_kind_strategies, ErrorHandler,
};
pub use error::{ErrorKind, NetworkError, RequestError};
pub use policy::{BackoffKind, RetryStrategy, StrategyTable, DEFAULT_STRATEGY, JITTER_FRACTION};
pub use run::{
    FailureCallback, RetryCallback, RetryContext, RetryManager, RetryOptions, RetryResult,
    SuccessCallback,
};
pub use stats::{ErrorStatistics, RetryStatistics, MAX_ERROR_HISTORY};
