//! Raw request failures and the classified `NetworkError`.

use std::fmt;
use std::time::SystemTime;

use serde::Serialize;

use super::policy::RetryStrategy;

/// Failure returned by a single request attempt (curl failure, HTTP status,
/// short transfer, or storage failure). Classified by the error handler
/// before the retry manager decides what to do.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// libcurl reported a transport-level error (connect, DNS, TLS, timeout...).
    #[error("{0}")]
    Transport(#[from] curl::Error),
    /// Response carried a non-2xx status.
    #[error("HTTP {0}")]
    Http(u32),
    /// Transfer ended before the expected number of bytes arrived.
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },
    /// A ranged request was answered with a full (non-206) body.
    #[error("server ignored range request (HTTP {0})")]
    RangeNotHonored(u32),
    /// Disk/storage write failed. Not retried.
    #[error("storage: {0}")]
    Storage(#[from] std::io::Error),
    /// The operation's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
    /// Any other failure reported by a caller-supplied operation.
    #[error("{0}")]
    Other(String),
}

impl RequestError {
    /// Convenience for caller operations that fail with a plain message.
    pub fn other(msg: impl Into<String>) -> Self {
        RequestError::Other(msg.into())
    }
}

impl From<crate::control::Cancelled> for RequestError {
    fn from(_: crate::control::Cancelled) -> Self {
        RequestError::Cancelled
    }
}

/// Classification of a network failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ErrorKind {
    Timeout,
    ConnectionRefused,
    DnsResolution,
    Temporary,
    Certificate,
    Authentication,
    Permission,
    HttpServerError,
    CircuitOpen,
    Unknown,
}

impl ErrorKind {
    /// Stable label used in logs and statistics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::DnsResolution => "dns_resolution",
            ErrorKind::Temporary => "temporary",
            ErrorKind::Certificate => "certificate",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Permission => "permission",
            ErrorKind::HttpServerError => "http_server_error",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Intrinsic retryability of the kind, before the strategy table applies.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::ConnectionRefused
                | ErrorKind::DnsResolution
                | ErrorKind::Temporary
                | ErrorKind::HttpServerError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified network failure. Built only by the error handler; the
/// retryable flag and assigned strategy are derived during classification.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkError {
    kind: ErrorKind,
    message: String,
    host: String,
    occurred_at: SystemTime,
    retryable: bool,
    #[serde(skip)]
    strategy: Option<RetryStrategy>,
}

impl NetworkError {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            host: host.into(),
            occurred_at: SystemTime::now(),
            retryable: kind.is_transient(),
            strategy: None,
        }
    }

    pub(crate) fn with_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.strategy = Some(strategy);
        self.retryable = true;
        self
    }

    pub(crate) fn into_circuit_open(mut self) -> Self {
        self.kind = ErrorKind::CircuitOpen;
        self.retryable = false;
        self.strategy = None;
        self
    }

    pub(crate) fn cancelled(host: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, "operation cancelled", host).non_retryable()
    }

    fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn occurred_at(&self) -> SystemTime {
        self.occurred_at
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Strategy attached from the per-kind table, if any.
    pub fn strategy(&self) -> Option<&RetryStrategy> {
        self.strategy.as_ref()
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::CircuitOpen => write!(
                f,
                "circuit breaker open for {}: {}",
                self.host, self.message
            ),
            kind => write!(f, "{} error for {}: {}", kind, self.host, self.message),
        }
    }
}

impl std::error::Error for NetworkError {}
