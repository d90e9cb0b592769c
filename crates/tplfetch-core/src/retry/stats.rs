//! Cumulative error and retry counters.

use std::collections::{BTreeMap, VecDeque};
use std::time::SystemTime;

use serde::Serialize;

use super::error::{ErrorKind, NetworkError};

/// History length that triggers trimming.
pub const MAX_ERROR_HISTORY: usize = 1000;

/// Counters kept by the error handler for every classified failure.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorStatistics {
    pub total_errors: u64,
    pub by_kind: BTreeMap<ErrorKind, u64>,
    pub by_host: BTreeMap<String, u64>,
    pub last_error_at: Option<SystemTime>,
    /// Most recent errors, oldest first.
    pub history: VecDeque<NetworkError>,
}

impl ErrorStatistics {
    pub(crate) fn record(&mut self, err: &NetworkError) {
        self.total_errors += 1;
        *self.by_kind.entry(err.kind()).or_default() += 1;
        *self.by_host.entry(err.host().to_string()).or_default() += 1;
        self.last_error_at = Some(err.occurred_at());
        self.history.push_back(err.clone());
        if self.history.len() > MAX_ERROR_HISTORY {
            // Drop the oldest 10% in one go instead of one per insert.
            let trim = self.history.len() / 10;
            self.history.drain(..trim);
        }
    }
}

/// Counters kept by the retry manager.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryStatistics {
    /// Operations run through `execute_with_retry`.
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    /// Retry attempts scheduled (waits started), across all operations.
    pub total_retries: u64,
    /// Retries scheduled, by the kind of error that caused them.
    pub retries_by_kind: BTreeMap<ErrorKind, u64>,
    /// Operations that finally failed, by the kind of their last error.
    pub failures_by_kind: BTreeMap<ErrorKind, u64>,
    pub operations_by_host: BTreeMap<String, u64>,
    pub operations_by_name: BTreeMap<String, u64>,
    /// `successful / (successful + failed)`, 0 before any operation ends.
    pub success_rate: f64,
    pub last_success_at: Option<SystemTime>,
    pub last_failure_at: Option<SystemTime>,
}

impl RetryStatistics {
    pub(crate) fn record_start(&mut self, host: &str, operation: &str) {
        self.total_operations += 1;
        *self.operations_by_host.entry(host.to_string()).or_default() += 1;
        *self
            .operations_by_name
            .entry(operation.to_string())
            .or_default() += 1;
    }

    pub(crate) fn record_retry(&mut self, kind: ErrorKind) {
        self.total_retries += 1;
        *self.retries_by_kind.entry(kind).or_default() += 1;
    }

    pub(crate) fn record_success(&mut self) {
        self.successful_operations += 1;
        self.last_success_at = Some(SystemTime::now());
        self.update_rate();
    }

    pub(crate) fn record_failure(&mut self, kind: ErrorKind) {
        self.failed_operations += 1;
        *self.failures_by_kind.entry(kind).or_default() += 1;
        self.last_failure_at = Some(SystemTime::now());
        self.update_rate();
    }

    fn update_rate(&mut self) {
        let done = self.successful_operations + self.failed_operations;
        self.success_rate = if done == 0 {
            0.0
        } else {
            self.successful_operations as f64 / done as f64
        };
    }
}
