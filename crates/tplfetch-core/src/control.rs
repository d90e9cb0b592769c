//! Cancellation for in-flight operations.
//!
//! A `CancelToken` is shared between the caller and every suspension point of
//! a transfer (retry delay, HEAD probe, chunk read, pool maintenance loops).
//! Cancelling wakes any thread blocked in `wait_timeout` immediately; an
//! optional deadline makes the token report cancelled once it passes.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Error returned when an operation is stopped by its cancellation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

struct Inner {
    cancelled: Mutex<bool>,
    wake: Condvar,
    deadline: Option<Instant>,
}

/// Shared cancellation signal. Cloning yields a handle to the same token.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

impl CancelToken {
    /// Token that is only cancelled by an explicit `cancel()`.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Token that also reports cancelled once `timeout` has elapsed from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Instant::now().checked_add(timeout))
    }

    fn build(deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: Mutex::new(false),
                wake: Condvar::new(),
                deadline,
            }),
        }
    }

    /// Request cancellation and wake every waiter.
    pub fn cancel(&self) {
        let mut flag = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *flag = true;
        self.inner.wake.notify_all();
    }

    /// True once `cancel()` was called or the deadline passed.
    pub fn is_cancelled(&self) -> bool {
        if self.deadline_passed() {
            return true;
        }
        *self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Deadline of this token, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    fn deadline_passed(&self) -> bool {
        self.inner.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Block for up to `timeout`. Returns `true` if the token was cancelled
    /// (before or during the wait), `false` if the full timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        let until = match start.checked_add(timeout) {
            Some(t) => t,
            None => start + Duration::from_secs(u32::MAX as u64),
        };
        let mut flag = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if *flag || self.deadline_passed() {
                return true;
            }
            let now = Instant::now();
            if now >= until {
                return false;
            }
            let mut wait_for = until - now;
            if let Some(d) = self.inner.deadline {
                wait_for = wait_for.min(d.saturating_duration_since(now));
            }
            let (guard, _) = self
                .inner
                .wake
                .wait_timeout(flag, wait_for)
                .unwrap_or_else(PoisonError::into_inner);
            flag = guard;
        }
    }

    /// `Err(Cancelled)` if the token is cancelled.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_token_is_not_cancelled() {
        let t = CancelToken::new();
        assert!(!t.is_cancelled());
        assert!(t.check().is_ok());
    }

    #[test]
    fn cancel_is_visible_through_clones() {
        let t = CancelToken::new();
        let t2 = t.clone();
        t2.cancel();
        assert!(t.is_cancelled());
        assert_eq!(t.check(), Err(Cancelled));
    }

    #[test]
    fn wait_timeout_elapses_without_cancel() {
        let t = CancelToken::new();
        let start = Instant::now();
        assert!(!t.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn wait_timeout_wakes_on_cancel() {
        let t = CancelToken::new();
        let t2 = t.clone();
        let h = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            t2.cancel();
        });
        let start = Instant::now();
        assert!(t.wait_timeout(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        h.join().unwrap();
    }

    #[test]
    fn deadline_cancels_token() {
        let t = CancelToken::with_timeout(Duration::from_millis(20));
        assert!(!t.is_cancelled());
        assert!(t.wait_timeout(Duration::from_secs(10)));
        assert!(t.is_cancelled());
    }
}
