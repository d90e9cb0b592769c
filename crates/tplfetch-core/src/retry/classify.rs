//! Classify raw request failures into `NetworkError`s.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::breaker::{BreakerConfig, CircuitBreaker, CircuitState};
use super::error::{ErrorKind, NetworkError, RequestError};
use super::policy::RetryStrategy;
use super::stats::ErrorStatistics;

/// Classify a curl error raised by the transport itself (connect, DNS, TLS,
/// socket I/O). Message substrings catch what the error codes miss.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_couldnt_resolve_host() || e.is_couldnt_resolve_proxy() {
        return ErrorKind::DnsResolution;
    }
    if e.is_couldnt_connect() {
        return ErrorKind::ConnectionRefused;
    }
    if e.is_ssl_connect_error()
        || e.is_peer_failed_verification()
        || e.is_ssl_certproblem()
        || e.is_ssl_cacert()
        || e.is_ssl_cacert_badfile()
        || e.is_ssl_issuer_error()
    {
        return ErrorKind::Certificate;
    }
    if e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
        || e.is_read_error()
        || e.is_http2_stream_error()
    {
        return ErrorKind::Temporary;
    }
    let mut msg = e.description().to_string();
    if let Some(extra) = e.extra_description() {
        msg.push(' ');
        msg.push_str(extra);
    }
    classify_message(&msg)
}

/// Classify a free-form failure message.
pub fn classify_message(msg: &str) -> ErrorKind {
    let m = msg.to_ascii_lowercase();
    if m.contains("timed out") || m.contains("timeout") || m.contains("deadline exceeded") {
        ErrorKind::Timeout
    } else if m.contains("connection refused") {
        ErrorKind::ConnectionRefused
    } else if m.contains("no such host") || m.contains("could not resolve") {
        ErrorKind::DnsResolution
    } else if m.contains("certificate") || m.contains("x509") || m.contains("ssl") {
        ErrorKind::Certificate
    } else if m.contains("temporary")
        || m.contains("connection reset")
        || m.contains("broken pipe")
        || m.contains("unexpected eof")
    {
        ErrorKind::Temporary
    } else {
        ErrorKind::Unknown
    }
}

/// Classify an HTTP status code.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        401 => ErrorKind::Authentication,
        403 => ErrorKind::Permission,
        408 | 429 => ErrorKind::Temporary,
        500..=599 => ErrorKind::HttpServerError,
        _ => ErrorKind::Unknown,
    }
}

/// Classify a raw failure into a kind (no strategy, breaker or statistics).
pub fn classify(e: &RequestError) -> ErrorKind {
    match e {
        RequestError::Transport(ce) => classify_curl_error(ce),
        RequestError::Http(code) => classify_http_status(*code),
        RequestError::PartialTransfer { .. } => ErrorKind::Temporary,
        RequestError::Cancelled => ErrorKind::Timeout,
        RequestError::RangeNotHonored(_) | RequestError::Storage(_) => ErrorKind::Unknown,
        RequestError::Other(msg) => classify_message(msg),
    }
}

/// Default per-kind strategies. Kinds without an entry keep their intrinsic
/// retryability and back off with the caller's strategy.
pub fn default_kind_strategies() -> HashMap<ErrorKind, RetryStrategy> {
    let mut m = HashMap::new();
    m.insert(ErrorKind::Timeout, RetryStrategy::default());
    m.insert(ErrorKind::ConnectionRefused, RetryStrategy::slow());
    m.insert(ErrorKind::DnsResolution, RetryStrategy::slow());
    m.insert(ErrorKind::Temporary, RetryStrategy::fast());
    m.insert(ErrorKind::HttpServerError, RetryStrategy::default());
    m
}

/// Turns raw failures into classified errors, attaches per-kind strategies,
/// consults the failing host's circuit breaker and records error statistics.
///
/// Each host gets its own breaker, created on first use from one shared
/// `BreakerConfig`, so a dead origin never blocks requests to other hosts.
#[derive(Debug)]
pub struct ErrorHandler {
    breaker_config: BreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    kind_strategies: RwLock<HashMap<ErrorKind, RetryStrategy>>,
    stats: Mutex<ErrorStatistics>,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl ErrorHandler {
    pub fn new(breaker: BreakerConfig) -> Self {
        Self::with_kind_strategies(breaker, default_kind_strategies())
    }

    pub fn with_kind_strategies(
        breaker: BreakerConfig,
        kind_strategies: HashMap<ErrorKind, RetryStrategy>,
    ) -> Self {
        Self {
            breaker_config: breaker,
            breakers: RwLock::new(HashMap::new()),
            kind_strategies: RwLock::new(kind_strategies),
            stats: Mutex::new(ErrorStatistics::default()),
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        self.breaker_config
    }

    /// Breaker for `host`, created closed on first use.
    pub fn breaker(&self, host: &str) -> Arc<CircuitBreaker> {
        if let Some(b) = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
        {
            return Arc::clone(b);
        }
        let mut map = self
            .breakers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            map.entry(host.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(self.breaker_config))),
        )
    }

    /// True if `host`'s breaker lets a request through.
    pub fn allow_request(&self, host: &str) -> bool {
        self.breaker(host).allow_request()
    }

    /// Current state of every breaker created so far, sorted by host.
    pub fn breaker_states(&self) -> Vec<(String, CircuitState)> {
        let mut states: Vec<_> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(host, b)| (host.clone(), b.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Set (or with `None`, clear) the strategy attached to errors of `kind`.
    pub fn set_kind_strategy(&self, kind: ErrorKind, strategy: Option<RetryStrategy>) {
        let mut map = self
            .kind_strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match strategy {
            Some(s) => {
                map.insert(kind, s);
            }
            None => {
                map.remove(&kind);
            }
        }
    }

    /// Classify `failure` against `host` and attach the per-kind strategy.
    /// Pure apart from reading the strategy table.
    pub fn classify(&self, failure: &RequestError, host: &str) -> NetworkError {
        let kind = classify(failure);
        let err = NetworkError::new(kind, failure.to_string(), host);
        let strategy = self
            .kind_strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .copied();
        match strategy {
            Some(s) => err.with_strategy(s),
            None => err,
        }
    }

    /// Full handling of one failed attempt: classify, record the failure
    /// on the breaker and in statistics, and override the kind to
    /// `CircuitOpen` when the breaker refuses further requests.
    pub fn handle(&self, failure: &RequestError, host: &str) -> NetworkError {
        if matches!(failure, RequestError::Cancelled) {
            return NetworkError::cancelled(host);
        }
        let mut err = self.classify(failure, host);
        let breaker = self.breaker(host);
        breaker.record_failure();
        if !breaker.allow_request() {
            err = err.into_circuit_open();
        }
        self.record(&err);
        tracing::debug!(
            host,
            kind = %err.kind(),
            retryable = err.is_retryable(),
            "classified request failure: {}",
            err.message()
        );
        err
    }

    /// Error returned without running the operation because the breaker is open.
    pub fn circuit_open_error(&self, host: &str) -> NetworkError {
        let err = NetworkError::new(
            ErrorKind::CircuitOpen,
            "too many recent failures, request not attempted",
            host,
        )
        .into_circuit_open();
        self.record(&err);
        err
    }

    pub fn record_success(&self, host: &str) {
        self.breaker(host).record_success();
    }

    fn record(&self, err: &NetworkError) {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(err);
    }

    pub fn statistics(&self) -> ErrorStatistics {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset_statistics(&self) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = ErrorStatistics::default();
    }
}
