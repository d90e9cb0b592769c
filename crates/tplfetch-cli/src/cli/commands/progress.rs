//! Progress lines on stderr for `tplfetch get`.

use std::io::Write;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tplfetch_core::progress::{ProgressInfo, ProgressSink};

const PRINT_INTERVAL: Duration = Duration::from_millis(500);
const MIB: f64 = 1_048_576.0;

/// Prints one transfer's progress. With `inline` the line is redrawn in
/// place; concurrent transfers print plain lines so they do not overwrite
/// each other.
pub struct TermProgress {
    label: String,
    inline: bool,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    last_print: Option<Instant>,
    last_line: Option<String>,
    message: Option<String>,
}

impl TermProgress {
    pub fn new(label: impl Into<String>, inline: bool) -> Self {
        Self {
            label: label.into(),
            inline,
            state: Mutex::new(State::default()),
        }
    }
}

impl ProgressSink for TermProgress {
    fn start(&self, total: u64) {
        let size = if total > 0 {
            format!("{:.1} MiB", total as f64 / MIB)
        } else {
            "unknown size".to_string()
        };
        eprintln!("{}: {}", self.label, size);
    }

    fn update(&self, info: &ProgressInfo) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let done = info.total_bytes > 0 && info.downloaded_bytes >= info.total_bytes;
        if !done
            && state
                .last_print
                .is_some_and(|t| now.duration_since(t) < PRINT_INTERVAL)
        {
            return;
        }
        state.last_print = Some(now);
        let line = format_line(info);
        if self.inline {
            eprint!("\r  {}  ", line);
            let _ = std::io::stderr().flush();
        } else {
            eprintln!("  {}: {}", self.label, line);
        }
        state.last_line = Some(line);
    }

    fn finish(&self) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if self.inline && state.last_line.is_some() {
            eprintln!();
        }
        if let Some(msg) = &state.message {
            eprintln!("{}: {}", self.label, msg);
        }
    }

    fn set_message(&self, message: &str) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .message = Some(message.to_string());
    }
}

/// `12.0 / 48.0 MiB (25.0%)  3.10 MiB/s  ETA 12s`
fn format_line(info: &ProgressInfo) -> String {
    let done_mib = info.downloaded_bytes as f64 / MIB;
    let rate_mib = info.speed_bytes_per_sec / MIB;
    let eta = info
        .eta
        .map(|d| format!("{:.0}s", d.as_secs_f64()))
        .unwrap_or_else(|| "?".to_string());
    if info.total_bytes == 0 {
        return format!("{:.1} MiB  {:.2} MiB/s", done_mib, rate_mib);
    }
    format!(
        "{:.1} / {:.1} MiB ({:.1}%)  {:.2} MiB/s  ETA {}",
        done_mib,
        info.total_bytes as f64 / MIB,
        info.percentage,
        rate_mib,
        eta
    )
}
