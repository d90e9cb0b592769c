//! Keyed transport: a bounded set of reusable curl handles for one origin.
//!
//! A curl `Easy` handle keeps its own connection cache, so returning a handle
//! to the idle list (after `reset`, which preserves that cache) is what gives
//! keep-alive reuse across requests to the same origin.

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use curl::easy::{Easy, SslVersion};
use serde::{Deserialize, Serialize};

use crate::control::CancelToken;
use crate::retry::RequestError;

use super::stats::{Counter, StatsCollector};
use super::PoolConfig;

/// Poll interval while waiting for a free connection slot.
const SLOT_POLL: Duration = Duration::from_millis(50);

/// Minimum TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "1.2")]
    Tls12,
    #[serde(rename = "1.3")]
    Tls13,
}

/// TLS settings applied to every handle of a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub verify_peer: bool,
    pub verify_host: bool,
    /// PEM bundle used instead of the system store.
    pub ca_bundle: Option<PathBuf>,
    pub min_version: Option<TlsVersion>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            verify_peer: true,
            verify_host: true,
            ca_bundle: None,
            min_version: Some(TlsVersion::Tls12),
        }
    }
}

struct IdleHandle {
    easy: Easy,
    returned_at: Instant,
}

struct TransportInner {
    key: String,
    config: PoolConfig,
    tls: TlsConfig,
    idle: Mutex<Vec<IdleHandle>>,
    active: Mutex<usize>,
    slot_freed: Condvar,
    closed: AtomicBool,
    stats: Arc<StatsCollector>,
}

/// Shared handle to one origin's transport. Clones refer to the same
/// transport.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("key", &self.inner.key)
            .field("idle", &self.idle_count())
            .field("active", &self.active_count())
            .finish()
    }
}

impl Transport {
    pub(crate) fn new(
        key: impl Into<String>,
        config: PoolConfig,
        tls: TlsConfig,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                key: key.into(),
                config,
                tls,
                idle: Mutex::new(Vec::new()),
                active: Mutex::new(0),
                slot_freed: Condvar::new(),
                closed: AtomicBool::new(false),
                stats,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn tls(&self) -> &TlsConfig {
        &self.inner.tls
    }

    /// True if both handles refer to the same transport.
    pub fn same(a: &Transport, b: &Transport) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Check out a configured handle, waiting for a slot while the
    /// per-host limit is reached. The handle returns itself on drop.
    pub fn checkout(&self, cancel: &CancelToken) -> Result<PooledHandle, RequestError> {
        self.acquire_slot(cancel)?;
        // From here on the slot is owned by the PooledHandle; dropping it
        // (including on a configuration error) releases the slot.
        let mut handle = PooledHandle {
            transport: self.clone(),
            easy: Some(self.take_idle().unwrap_or_else(|| {
                self.inner.stats.bump(Counter::ConnectionCreated, 1);
                Easy::new()
            })),
        };
        handle.reset();
        self.configure(&mut handle)?;
        Ok(handle)
    }

    fn acquire_slot(&self, cancel: &CancelToken) -> Result<(), RequestError> {
        let limit = self.inner.config.max_conns_per_host;
        let mut active = self
            .inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while limit > 0 && *active >= limit {
            if cancel.is_cancelled() {
                return Err(RequestError::Cancelled);
            }
            let (guard, _) = self
                .inner
                .slot_freed
                .wait_timeout(active, SLOT_POLL)
                .unwrap_or_else(PoisonError::into_inner);
            active = guard;
        }
        *active += 1;
        Ok(())
    }

    fn release_slot(&self) {
        let mut active = self
            .inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *active = active.saturating_sub(1);
        self.inner.slot_freed.notify_one();
    }

    /// Most recently returned idle handle that has not expired.
    fn take_idle(&self) -> Option<Easy> {
        let timeout = self.inner.config.idle_conn_timeout;
        let mut idle = self.lock_idle();
        let mut expired = 0;
        let mut found = None;
        while let Some(h) = idle.pop() {
            if h.returned_at.elapsed() > timeout {
                expired += 1;
                continue;
            }
            found = Some(h.easy);
            break;
        }
        drop(idle);
        self.inner.stats.bump(Counter::ConnectionClosed, expired);
        if found.is_some() {
            self.inner.stats.bump(Counter::ConnectionReused, 1);
        }
        found
    }

    fn configure(&self, easy: &mut Easy) -> Result<(), curl::Error> {
        let cfg = &self.inner.config;
        let tls = &self.inner.tls;
        // Covers TCP connect plus the TLS handshake.
        easy.connect_timeout(cfg.dial_timeout)?;
        if let Some(ka) = cfg.keep_alive {
            easy.tcp_keepalive(true)?;
            easy.tcp_keepidle(ka)?;
            easy.tcp_keepintvl(ka)?;
        }
        if let Some(t) = cfg.request_timeout {
            easy.timeout(t)?;
        }
        // Stall detection: abort if throughput stays below the limit.
        easy.low_speed_limit(cfg.low_speed_limit)?;
        easy.low_speed_time(cfg.low_speed_time)?;
        easy.follow_location(true)?;
        easy.max_redirections(10)?;
        if let Some(proxy) = &cfg.proxy {
            easy.proxy(proxy)?;
        }
        easy.ssl_verify_peer(tls.verify_peer)?;
        easy.ssl_verify_host(tls.verify_host)?;
        if let Some(ca) = &tls.ca_bundle {
            easy.cainfo(ca)?;
        }
        if let Some(v) = tls.min_version {
            let min = match v {
                TlsVersion::Tls12 => SslVersion::Tlsv12,
                TlsVersion::Tls13 => SslVersion::Tlsv13,
            };
            easy.ssl_min_max_version(min, SslVersion::Default)?;
        }
        Ok(())
    }

    fn checkin(&self, easy: Easy) {
        let keep = !self.inner.closed.load(Ordering::Acquire) && {
            let mut idle = self.lock_idle();
            if idle.len() < self.inner.config.max_idle_conns {
                idle.push(IdleHandle {
                    easy,
                    returned_at: Instant::now(),
                });
                true
            } else {
                false
            }
        };
        if !keep {
            self.inner.stats.bump(Counter::ConnectionClosed, 1);
        }
        self.release_slot();
    }

    /// Close every idle handle. Returns how many were closed.
    pub fn close_idle_connections(&self) -> usize {
        let drained: Vec<IdleHandle> = self.lock_idle().drain(..).collect();
        let n = drained.len();
        drop(drained);
        self.inner.stats.bump(Counter::ConnectionClosed, n as u64);
        n
    }

    /// Close idle handles older than the idle timeout.
    pub fn evict_expired(&self) -> usize {
        let timeout = self.inner.config.idle_conn_timeout;
        let mut idle = self.lock_idle();
        let before = idle.len();
        idle.retain(|h| h.returned_at.elapsed() <= timeout);
        let n = before - idle.len();
        drop(idle);
        self.inner.stats.bump(Counter::ConnectionClosed, n as u64);
        n
    }

    /// Stop pooling: idle handles are closed now, checked-out ones on return.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.close_idle_connections();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn idle_count(&self) -> usize {
        self.lock_idle().len()
    }

    pub fn active_count(&self) -> usize {
        *self
            .inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<IdleHandle>> {
        self.inner.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A checked-out curl handle. Dereferences to `Easy`; returned to its
/// transport when dropped.
pub struct PooledHandle {
    transport: Transport,
    easy: Option<Easy>,
}

impl PooledHandle {
    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

impl Deref for PooledHandle {
    type Target = Easy;

    fn deref(&self) -> &Easy {
        match &self.easy {
            Some(e) => e,
            None => unreachable!("pooled handle used after release"),
        }
    }
}

impl DerefMut for PooledHandle {
    fn deref_mut(&mut self) -> &mut Easy {
        match &mut self.easy {
            Some(e) => e,
            None => unreachable!("pooled handle used after release"),
        }
    }
}

impl Drop for PooledHandle {
    fn drop(&mut self) {
        if let Some(easy) = self.easy.take() {
            self.transport.checkin(easy);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(config: PoolConfig) -> (Transport, Arc<StatsCollector>) {
        let stats = Arc::new(StatsCollector::new(true));
        let t = Transport::new("http:127.0.0.1:1", config, TlsConfig::default(), Arc::clone(&stats));
        (t, stats)
    }

    #[test]
    fn returned_handle_is_reused() {
        let (t, stats) = transport(PoolConfig::default());
        let cancel = CancelToken::new();
        drop(t.checkout(&cancel).unwrap());
        assert_eq!(t.idle_count(), 1);
        assert_eq!(t.active_count(), 0);
        let h = t.checkout(&cancel).unwrap();
        assert_eq!(t.idle_count(), 0);
        assert_eq!(t.active_count(), 1);
        drop(h);
        let s = stats.snapshot();
        assert_eq!(s.connections_created, 1);
        assert_eq!(s.connections_reused, 1);
    }

    #[test]
    fn idle_list_is_capped() {
        let (t, stats) = transport(PoolConfig {
            max_idle_conns: 1,
            ..PoolConfig::default()
        });
        let cancel = CancelToken::new();
        let a = t.checkout(&cancel).unwrap();
        let b = t.checkout(&cancel).unwrap();
        drop(a);
        drop(b);
        assert_eq!(t.idle_count(), 1);
        assert_eq!(stats.snapshot().connections_closed, 1);
    }

    #[test]
    fn expired_idle_handles_are_not_reused() {
        let (t, stats) = transport(PoolConfig {
            idle_conn_timeout: Duration::from_millis(10),
            ..PoolConfig::default()
        });
        let cancel = CancelToken::new();
        drop(t.checkout(&cancel).unwrap());
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(t.evict_expired(), 1);
        drop(t.checkout(&cancel).unwrap());
        let s = stats.snapshot();
        assert_eq!(s.connections_created, 2);
        assert_eq!(s.connections_reused, 0);
    }

    #[test]
    fn per_host_limit_blocks_until_cancelled() {
        let (t, _) = transport(PoolConfig {
            max_conns_per_host: 1,
            ..PoolConfig::default()
        });
        let held = t.checkout(&CancelToken::new()).unwrap();
        let cancel = CancelToken::with_timeout(Duration::from_millis(100));
        assert!(matches!(t.checkout(&cancel), Err(RequestError::Cancelled)));
        drop(held);
        assert!(t.checkout(&CancelToken::new()).is_ok());
    }

    #[test]
    fn per_host_limit_hands_slot_to_waiter() {
        let (t, _) = transport(PoolConfig {
            max_conns_per_host: 1,
            ..PoolConfig::default()
        });
        let held = t.checkout(&CancelToken::new()).unwrap();
        let t2 = t.clone();
        let waiter = std::thread::spawn(move || t2.checkout(&CancelToken::new()).is_ok());
        std::thread::sleep(Duration::from_millis(50));
        drop(held);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn closed_transport_drops_returned_handles() {
        let (t, _) = transport(PoolConfig::default());
        let cancel = CancelToken::new();
        drop(t.checkout(&cancel).unwrap());
        let h = t.checkout(&cancel).unwrap();
        t.close();
        assert!(t.is_closed());
        drop(h);
        assert_eq!(t.idle_count(), 0);
        assert_eq!(t.active_count(), 0);
    }
}
