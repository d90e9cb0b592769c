//! Connection pooling: named pools of per-origin transports, plus the
//! manager that owns them and runs periodic idle cleanup and metrics
//! snapshots on background threads.

mod connection_pool;
mod key;
mod stats;
mod transport;

pub use connection_pool::ConnectionPool;
pub use key::HostKey;
pub use stats::{PoolMetrics, PoolMetricsEntry, PoolStats};
pub use transport::{PooledHandle, TlsConfig, TlsVersion, Transport};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use crate::control::CancelToken;

/// Name of the pool used when callers do not pick one.
pub const DEFAULT_POOL: &str = "default";

/// Cleanup interval used when the configured one is zero.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Connection limits, timeouts and maintenance settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Idle handles kept per transport.
    pub max_idle_conns: usize,
    /// Concurrent checkouts per transport; 0 means unlimited.
    pub max_conns_per_host: usize,
    pub idle_conn_timeout: Duration,
    pub cleanup_interval: Duration,
    pub dial_timeout: Duration,
    pub keep_alive: Option<Duration>,
    /// Hard wall-clock limit per request.
    pub request_timeout: Option<Duration>,
    /// Bytes per second below which a transfer counts as stalled.
    pub low_speed_limit: u32,
    pub low_speed_time: Duration,
    pub proxy: Option<String>,
    pub enable_stats: bool,
    pub enable_metrics: bool,
    pub metrics_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_conns: 10,
            max_conns_per_host: 10,
            idle_conn_timeout: Duration::from_secs(90),
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            dial_timeout: Duration::from_secs(30),
            keep_alive: Some(Duration::from_secs(30)),
            request_timeout: Some(Duration::from_secs(3600)),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
            proxy: None,
            enable_stats: true,
            enable_metrics: false,
            metrics_interval: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    fn effective_cleanup_interval(&self) -> Duration {
        if self.cleanup_interval.is_zero() {
            DEFAULT_CLEANUP_INTERVAL
        } else {
            self.cleanup_interval
        }
    }
}

type PoolMap = Arc<RwLock<HashMap<String, Arc<ConnectionPool>>>>;

struct Maintenance {
    cancel: CancelToken,
    threads: Vec<JoinHandle<()>>,
}

/// Owns named connection pools and their background maintenance.
///
/// Maintenance threads only run between `start()` and `stop()`; dropping the
/// manager stops them.
pub struct PoolManager {
    config: PoolConfig,
    pools: PoolMap,
    maintenance: Mutex<Option<Maintenance>>,
    metrics: Arc<RwLock<Option<PoolMetrics>>>,
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("pools", &self.pool_names())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl PoolManager {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            pools: Arc::new(RwLock::new(HashMap::new())),
            maintenance: Mutex::new(None),
            metrics: Arc::new(RwLock::new(None)),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Pool `name`, created with the manager's config on first use.
    pub fn get_pool(&self, name: &str) -> Arc<ConnectionPool> {
        self.get_or_create_pool(name, || self.config.clone())
    }

    /// Pool `name`, created with `config` on first use. An existing pool
    /// keeps its original config.
    pub fn get_pool_with_config(&self, name: &str, config: PoolConfig) -> Arc<ConnectionPool> {
        self.get_or_create_pool(name, || config)
    }

    fn get_or_create_pool(
        &self,
        name: &str,
        config: impl FnOnce() -> PoolConfig,
    ) -> Arc<ConnectionPool> {
        if let Some(p) = self
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Arc::clone(p);
        }
        let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            pools
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(ConnectionPool::new(name, config()))),
        )
    }

    /// Transport for `key` from the default pool.
    pub fn get_transport(&self, key: &str, tls: &TlsConfig) -> Transport {
        self.get_pool(DEFAULT_POOL).get_transport(key, tls)
    }

    /// Close and forget pool `name`. Returns whether it existed.
    pub fn remove_pool(&self, name: &str) -> bool {
        let removed = self
            .pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        match removed {
            Some(p) => {
                p.close_all();
                true
            }
            None => false,
        }
    }

    pub fn pool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Start the cleanup thread, and the metrics thread when metrics are
    /// enabled. Calling `start` on a running manager does nothing.
    pub fn start(&self) {
        let mut slot = self
            .maintenance
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        let cancel = CancelToken::new();
        let mut threads = Vec::new();

        let interval = self.config.effective_cleanup_interval();
        let pools = Arc::clone(&self.pools);
        let c = cancel.clone();
        match spawn_named("tplfetch-pool-cleanup", move || {
            cleanup_loop(&pools, interval, &c)
        }) {
            Ok(h) => threads.push(h),
            Err(e) => tracing::warn!("failed to start pool cleanup thread: {e}"),
        }

        if self.config.enable_metrics {
            let interval = self.config.metrics_interval.max(Duration::from_millis(10));
            let pools = Arc::clone(&self.pools);
            let metrics = Arc::clone(&self.metrics);
            let c = cancel.clone();
            match spawn_named("tplfetch-pool-metrics", move || {
                while !c.wait_timeout(interval) {
                    let snapshot = collect_metrics(&pools);
                    match serde_json::to_string(&snapshot) {
                        Ok(json) => tracing::debug!(target: "tplfetch::pool::metrics", "{json}"),
                        Err(e) => tracing::warn!("failed to encode pool metrics: {e}"),
                    }
                    *metrics.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
                }
            }) {
                Ok(h) => threads.push(h),
                Err(e) => tracing::warn!("failed to start pool metrics thread: {e}"),
            }
        }

        tracing::debug!(threads = threads.len(), "pool maintenance started");
        *slot = Some(Maintenance { cancel, threads });
    }

    /// Stop maintenance threads and wait for them to exit.
    pub fn stop(&self) {
        let taken = self
            .maintenance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(m) = taken {
            m.cancel.cancel();
            for t in m.threads {
                let _ = t.join();
            }
            tracing::debug!("pool maintenance stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.maintenance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop maintenance, close every pool and clear counters and metrics.
    pub fn close_all(&self) {
        self.stop();
        let drained: Vec<Arc<ConnectionPool>> = self
            .pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, p)| p)
            .collect();
        for p in drained {
            p.close_all();
        }
        *self.metrics.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Last snapshot taken by the metrics thread.
    pub fn metrics(&self) -> Option<PoolMetrics> {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of every pool taken now.
    pub fn collect_metrics(&self) -> PoolMetrics {
        collect_metrics(&self.pools)
    }
}

impl Drop for PoolManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_named(
    name: &str,
    f: impl FnOnce() + Send + 'static,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new().name(name.to_string()).spawn(f)
}

fn pools_snapshot(pools: &PoolMap) -> Vec<Arc<ConnectionPool>> {
    pools
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .values()
        .cloned()
        .collect()
}

fn cleanup_loop(pools: &PoolMap, interval: Duration, cancel: &CancelToken) {
    while !cancel.wait_timeout(interval) {
        let closed: usize = pools_snapshot(pools)
            .iter()
            .map(|p| p.close_idle_connections())
            .sum();
        if closed > 0 {
            tracing::debug!(closed, "closed idle connections");
        }
    }
}

fn collect_metrics(pools: &PoolMap) -> PoolMetrics {
    let mut entries: Vec<PoolMetricsEntry> = pools_snapshot(pools)
        .iter()
        .map(|p| PoolMetricsEntry {
            name: p.name().to_string(),
            transports: p.len(),
            stats: p.stats(),
        })
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    PoolMetrics {
        collected_at: SystemTime::now(),
        pools: entries,
    }
}
