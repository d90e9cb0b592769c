use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::key::HostKey;
use super::stats::{Counter, PoolStats, StatsCollector};
use super::transport::{TlsConfig, Transport};
use super::PoolConfig;

/// Named collection of transports keyed by origin ("scheme:host:port").
#[derive(Debug)]
pub struct ConnectionPool {
    name: String,
    config: PoolConfig,
    transports: RwLock<HashMap<String, Transport>>,
    stats: Arc<StatsCollector>,
}

impl ConnectionPool {
    pub fn new(name: impl Into<String>, config: PoolConfig) -> Self {
        let stats = Arc::new(StatsCollector::new(config.enable_stats));
        Self {
            name: name.into(),
            config,
            transports: RwLock::new(HashMap::new()),
            stats,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Transport for `key`, built with `tls` on first use. Concurrent
    /// callers with the same key always get the same transport; `tls` is
    /// ignored once the transport exists.
    pub fn get_transport(&self, key: &str, tls: &TlsConfig) -> Transport {
        if let Some(t) = self
            .transports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            self.stats.bump(Counter::TransportReused, 1);
            return t.clone();
        }

        let mut map = self
            .transports
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // Another thread may have inserted while we waited for the write lock.
        if let Some(t) = map.get(key) {
            self.stats.bump(Counter::TransportReused, 1);
            return t.clone();
        }
        let t = Transport::new(
            key,
            self.config.clone(),
            tls.clone(),
            Arc::clone(&self.stats),
        );
        map.insert(key.to_string(), t.clone());
        self.stats.bump(Counter::TransportCreated, 1);
        tracing::debug!(pool = %self.name, key, "created transport");
        t
    }

    /// Transport for the origin of `url`.
    pub fn transport_for_url(&self, url: &str, tls: &TlsConfig) -> anyhow::Result<Transport> {
        let key = HostKey::from_url(url)?;
        Ok(self.get_transport(&key.to_string_key(), tls))
    }

    /// Remove and close the transport for `key`. Returns whether it existed.
    pub fn remove_transport(&self, key: &str) -> bool {
        let removed = self
            .transports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        match removed {
            Some(t) => {
                t.close();
                true
            }
            None => false,
        }
    }

    fn snapshot_transports(&self) -> Vec<Transport> {
        self.transports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Close every idle handle of every transport.
    pub fn close_idle_connections(&self) -> usize {
        self.snapshot_transports()
            .iter()
            .map(Transport::close_idle_connections)
            .sum()
    }

    /// Close idle handles past the idle timeout.
    pub fn evict_expired(&self) -> usize {
        self.snapshot_transports()
            .iter()
            .map(Transport::evict_expired)
            .sum()
    }

    /// Close and drop every transport and zero the counters.
    pub fn close_all(&self) {
        let drained: Vec<Transport> = self
            .transports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, t)| t)
            .collect();
        for t in &drained {
            t.close();
        }
        self.stats.reset();
    }

    pub fn len(&self) -> usize {
        self.transports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot plus current idle/active sizes.
    pub fn stats(&self) -> PoolStats {
        let mut s = self.stats.snapshot();
        for t in self.snapshot_transports() {
            s.idle += t.idle_count() as u64;
            s.active += t.active_count() as u64;
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::CancelToken;
    use std::sync::Barrier;

    #[test]
    fn same_key_returns_same_transport() {
        let pool = ConnectionPool::new("p", PoolConfig::default());
        let tls = TlsConfig::default();
        let a = pool.get_transport("https:example.com:443", &tls);
        let b = pool.get_transport("https:example.com:443", &tls);
        let c = pool.get_transport("https:other.example:443", &tls);
        assert!(Transport::same(&a, &b));
        assert!(!Transport::same(&a, &c));
        let s = pool.stats();
        assert_eq!(s.transports_created, 2);
        assert_eq!(s.transports_reused, 1);
    }

    #[test]
    fn concurrent_get_transport_yields_one_instance() {
        let pool = Arc::new(ConnectionPool::new("p", PoolConfig::default()));
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    pool.get_transport("http:127.0.0.1:8080", &TlsConfig::default())
                })
            })
            .collect();
        let got: Vec<Transport> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for t in &got[1..] {
            assert!(Transport::same(&got[0], t));
        }
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.stats().transports_created, 1);
    }

    #[test]
    fn transport_for_url_keys_by_origin() {
        let pool = ConnectionPool::new("p", PoolConfig::default());
        let tls = TlsConfig::default();
        let a = pool
            .transport_for_url("https://example.com/a.zip", &tls)
            .unwrap();
        let b = pool
            .transport_for_url("https://example.com:443/b.tar.gz", &tls)
            .unwrap();
        assert!(Transport::same(&a, &b));
        assert_eq!(a.key(), "https:example.com:443");
    }

    #[test]
    fn remove_transport_closes_it() {
        let pool = ConnectionPool::new("p", PoolConfig::default());
        let t = pool.get_transport("k", &TlsConfig::default());
        assert!(pool.remove_transport("k"));
        assert!(t.is_closed());
        assert!(!pool.remove_transport("k"));
        assert!(pool.is_empty());
    }

    #[test]
    fn close_idle_and_close_all() {
        let pool = ConnectionPool::new("p", PoolConfig::default());
        let t = pool.get_transport("k", &TlsConfig::default());
        drop(t.checkout(&CancelToken::new()).unwrap());
        assert_eq!(pool.stats().idle, 1);
        assert_eq!(pool.close_idle_connections(), 1);
        assert_eq!(pool.stats().idle, 0);

        pool.close_all();
        assert!(pool.is_empty());
        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[test]
    fn stats_disabled_stay_zero() {
        let pool = ConnectionPool::new(
            "p",
            PoolConfig {
                enable_stats: false,
                ..PoolConfig::default()
            },
        );
        pool.get_transport("k", &TlsConfig::default());
        pool.get_transport("k", &TlsConfig::default());
        let s = pool.stats();
        assert_eq!(s.transports_created, 0);
        assert_eq!(s.transports_reused, 0);
    }
}
