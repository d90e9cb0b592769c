//! Transfer progress: throttled percentage, speed and ETA, forwarded to a
//! display sink and an optional raw callback.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;

/// Minimum spacing between non-final updates.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// One progress snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressInfo {
    /// Bytes present in the destination, including any resumed prefix.
    pub downloaded_bytes: u64,
    /// Total size; 0 while unknown.
    pub total_bytes: u64,
    /// 0.0 to 100.0; 0.0 while the total is unknown.
    pub percentage: f64,
    /// Bytes transferred by this run divided by its elapsed time.
    pub speed_bytes_per_sec: f64,
    /// Remaining bytes divided by speed; `None` while speed or total is unknown.
    pub eta: Option<Duration>,
    pub start_time: SystemTime,
    pub last_update_time: SystemTime,
}

/// Display side of progress reporting (terminal bar, log line, ...).
pub trait ProgressSink: Send + Sync {
    fn start(&self, total: u64);
    fn update(&self, info: &ProgressInfo);
    fn finish(&self);
    fn set_message(&self, message: &str);
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressInfo) + Send + Sync>;

/// Tracks one transfer. Positions only move forward, so a transfer that
/// restarts from an earlier offset does not make reported progress go
/// backwards.
pub struct ProgressTracker {
    total: u64,
    downloaded: u64,
    initial: u64,
    started: Instant,
    start_time: SystemTime,
    last_emit: Option<Instant>,
    sink: Option<Arc<dyn ProgressSink>>,
    callback: Option<ProgressCallback>,
    finished: bool,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("total", &self.total)
            .field("downloaded", &self.downloaded)
            .field("initial", &self.initial)
            .finish()
    }
}

impl ProgressTracker {
    /// Start tracking at `initial` bytes out of `total` (0 if unknown).
    pub fn new(
        total: u64,
        initial: u64,
        sink: Option<Arc<dyn ProgressSink>>,
        callback: Option<ProgressCallback>,
    ) -> Self {
        if let Some(s) = &sink {
            s.start(total);
        }
        Self {
            total,
            downloaded: initial,
            initial,
            started: Instant::now(),
            start_time: SystemTime::now(),
            last_emit: None,
            sink,
            callback,
            finished: false,
        }
    }

    pub fn set_message(&self, message: &str) {
        if let Some(s) = &self.sink {
            s.set_message(message);
        }
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    /// Record that the destination now holds `pos` bytes. Emits at most
    /// once per `PROGRESS_INTERVAL`.
    pub fn advance_to(&mut self, pos: u64) {
        if pos <= self.downloaded {
            return;
        }
        self.downloaded = pos;
        let due = self
            .last_emit
            .map_or(true, |t| t.elapsed() >= PROGRESS_INTERVAL);
        if due {
            self.emit();
        }
    }

    /// Emit the final update (with `downloaded == total`) and close the
    /// sink. Later calls do nothing.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if self.total == 0 || self.downloaded > self.total {
            self.total = self.downloaded;
        }
        self.downloaded = self.total;
        self.emit();
        if let Some(s) = &self.sink {
            s.finish();
        }
    }

    /// Close the sink without claiming completion.
    pub fn abandon(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Some(s) = &self.sink {
            s.finish();
        }
    }

    pub fn info(&self) -> ProgressInfo {
        let elapsed = self.started.elapsed().as_secs_f64();
        let transferred = self.downloaded.saturating_sub(self.initial) as f64;
        let speed = if elapsed > 0.0 { transferred / elapsed } else { 0.0 };
        let percentage = if self.total > 0 {
            (self.downloaded as f64 / self.total as f64 * 100.0).min(100.0)
        } else {
            0.0
        };
        let eta = if self.total > 0 && speed > 0.0 {
            let remaining = self.total.saturating_sub(self.downloaded) as f64;
            Duration::try_from_secs_f64(remaining / speed).ok()
        } else {
            None
        };
        ProgressInfo {
            downloaded_bytes: self.downloaded,
            total_bytes: self.total,
            percentage,
            speed_bytes_per_sec: speed,
            eta,
            start_time: self.start_time,
            last_update_time: SystemTime::now(),
        }
    }

    fn emit(&mut self) {
        self.last_emit = Some(Instant::now());
        let info = self.info();
        if let Some(s) = &self.sink {
            s.update(&info);
        }
        if let Some(cb) = &self.callback {
            cb(&info);
        }
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.abandon();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        updates: Mutex<Vec<ProgressInfo>>,
    }

    impl ProgressSink for Recorder {
        fn start(&self, total: u64) {
            self.events.lock().unwrap().push(format!("start {total}"));
        }
        fn update(&self, info: &ProgressInfo) {
            self.updates.lock().unwrap().push(info.clone());
        }
        fn finish(&self) {
            self.events.lock().unwrap().push("finish".into());
        }
        fn set_message(&self, message: &str) {
            self.events.lock().unwrap().push(format!("msg {message}"));
        }
    }

    #[test]
    fn updates_are_throttled_and_final_is_forced() {
        let rec = Arc::new(Recorder::default());
        let mut t = ProgressTracker::new(1000, 0, Some(rec.clone()), None);
        for pos in (10..=990).step_by(10) {
            t.advance_to(pos);
        }
        t.finish();
        let updates = rec.updates.lock().unwrap();
        // First advance emits, the tight loop is throttled, finish forces one.
        assert!(updates.len() >= 2 && updates.len() < 10, "{}", updates.len());
        let last = updates.last().unwrap();
        assert_eq!(last.downloaded_bytes, 1000);
        assert_eq!(last.total_bytes, 1000);
        assert_eq!(last.percentage, 100.0);
        assert_eq!(
            *rec.events.lock().unwrap(),
            vec!["start 1000".to_string(), "finish".to_string()]
        );
    }

    #[test]
    fn positions_never_go_backwards() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let cb: ProgressCallback = Arc::new(move |i: &ProgressInfo| {
            s.lock().unwrap().push(i.downloaded_bytes)
        });
        let mut t = ProgressTracker::new(100, 0, None, Some(cb));
        t.advance_to(60);
        std::thread::sleep(PROGRESS_INTERVAL);
        t.advance_to(20);
        t.advance_to(80);
        t.finish();
        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert_eq!(*seen.last().unwrap(), 100);
    }

    #[test]
    fn resumed_prefix_counts_toward_percentage_not_speed() {
        let mut t = ProgressTracker::new(200, 100, None, None);
        let info = t.info();
        assert_eq!(info.percentage, 50.0);
        assert_eq!(info.speed_bytes_per_sec, 0.0);
        assert!(info.eta.is_none());
        std::thread::sleep(Duration::from_millis(20));
        t.advance_to(150);
        let info = t.info();
        assert!(info.speed_bytes_per_sec > 0.0);
        assert!(info.eta.is_some());
    }

    #[test]
    fn unknown_total_is_filled_on_finish() {
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        let cb: ProgressCallback = Arc::new(move |i: &ProgressInfo| {
            *s.lock().unwrap() = Some(i.clone())
        });
        let mut t = ProgressTracker::new(0, 0, None, Some(cb));
        t.advance_to(42);
        assert_eq!(seen.lock().unwrap().as_ref().unwrap().percentage, 0.0);
        t.finish();
        let last = seen.lock().unwrap().clone().unwrap();
        assert_eq!(last.total_bytes, 42);
        assert_eq!(last.downloaded_bytes, 42);
    }
}
