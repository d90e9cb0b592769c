//! Shared curl request plumbing for the probe and the downloader.

use curl::easy::Easy;

use crate::control::CancelToken;
use crate::retry::RequestError;

/// Point `easy` at `url` with the given header lines. `extra` lines are
/// appended after the provider's.
pub(crate) fn prepare(
    easy: &mut Easy,
    url: &str,
    header_lines: &[String],
    extra: &[&str],
) -> Result<(), curl::Error> {
    easy.url(url)?;
    easy.http_headers(crate::headers::curl_list(header_lines, extra)?)?;
    // Lets the progress callback poll the cancel token.
    easy.progress(true)?;
    Ok(())
}

/// Map a failed `perform` to a `RequestError`, preferring the reason the
/// callbacks recorded for aborting over curl's generic write/abort error.
pub(crate) fn perform_error(
    e: curl::Error,
    cancel: &CancelToken,
    aborted: Option<RequestError>,
) -> RequestError {
    if e.is_write_error() || e.is_aborted_by_callback() {
        if let Some(reason) = aborted {
            return reason;
        }
        if cancel.is_cancelled() {
            return RequestError::Cancelled;
        }
    }
    RequestError::Transport(e)
}

/// Status code from a status line such as `HTTP/1.1 206 Partial Content`.
pub(crate) fn status_line_code(line: &str) -> Option<u32> {
    let mut parts = line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Collects the header lines of the final response in a redirect chain.
#[derive(Debug, Default)]
pub(crate) struct HeaderCollector {
    pub(crate) status: Option<u32>,
    pub(crate) lines: Vec<String>,
}

impl HeaderCollector {
    pub(crate) fn push(&mut self, data: &[u8]) {
        let line = String::from_utf8_lossy(data).trim_end().to_string();
        if let Some(code) = status_line_code(&line) {
            // New response (redirect hop or 100-continue): start over.
            self.status = Some(code);
            self.lines.clear();
        } else if !line.is_empty() {
            self.lines.push(line);
        }
    }
}
