//! Pool counters.

use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use serde::Serialize;

/// Aggregate statistics of one connection pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Transports built by `get_transport`.
    pub transports_created: u64,
    /// `get_transport` calls served by an existing transport.
    pub transports_reused: u64,
    /// Connection handles opened.
    pub connections_created: u64,
    /// Checkouts served by an idle handle (keep-alive reuse).
    pub connections_reused: u64,
    /// Handles dropped (idle cleanup, expiry, overflow, close).
    pub connections_closed: u64,
    /// Handles currently idle (filled in by snapshots).
    pub idle: u64,
    /// Handles currently checked out (filled in by snapshots).
    pub active: u64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Counter {
    TransportCreated,
    TransportReused,
    ConnectionCreated,
    ConnectionReused,
    ConnectionClosed,
}

/// Counter sink shared by a pool and its transports. When disabled,
/// `bump` returns before touching the lock.
#[derive(Debug)]
pub(crate) struct StatsCollector {
    enabled: bool,
    inner: Mutex<PoolStats>,
}

impl StatsCollector {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            inner: Mutex::new(PoolStats::default()),
        }
    }

    pub(crate) fn bump(&self, counter: Counter, n: u64) {
        if !self.enabled || n == 0 {
            return;
        }
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let field = match counter {
            Counter::TransportCreated => &mut s.transports_created,
            Counter::TransportReused => &mut s.transports_reused,
            Counter::ConnectionCreated => &mut s.connections_created,
            Counter::ConnectionReused => &mut s.connections_reused,
            Counter::ConnectionClosed => &mut s.connections_closed,
        };
        *field = field.saturating_add(n);
    }

    pub(crate) fn snapshot(&self) -> PoolStats {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn reset(&self) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = PoolStats::default();
    }
}

/// Point-in-time sizes of every pool owned by a manager.
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetrics {
    pub collected_at: SystemTime,
    pub pools: Vec<PoolMetricsEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolMetricsEntry {
    pub name: String,
    pub transports: usize,
    pub stats: PoolStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_collector_ignores_bumps() {
        let c = StatsCollector::new(false);
        c.bump(Counter::ConnectionCreated, 3);
        assert_eq!(c.snapshot(), PoolStats::default());
    }

    #[test]
    fn enabled_collector_counts_and_resets() {
        let c = StatsCollector::new(true);
        c.bump(Counter::ConnectionCreated, 2);
        c.bump(Counter::ConnectionReused, 1);
        c.bump(Counter::ConnectionClosed, 4);
        let s = c.snapshot();
        assert_eq!(s.connections_created, 2);
        assert_eq!(s.connections_reused, 1);
        assert_eq!(s.connections_closed, 4);
        c.reset();
        assert_eq!(c.snapshot(), PoolStats::default());
    }
}
