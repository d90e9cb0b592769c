//! One ranged GET for a chunk, continuing from the first byte the
//! destination does not hold yet.

use std::cell::RefCell;
use std::io::Write;

use crate::control::CancelToken;
use crate::fetch_head::{content_range, ContentRange};
use crate::http::{self, HeaderCollector};
use crate::pool::Transport;
use crate::progress::ProgressTracker;
use crate::retry::RequestError;
use crate::segmenter::Chunk;

use super::sink::FanOutWriter;

enum BodyAction {
    Write,
    /// Error response body; read and drop it.
    Discard,
    Reject(RequestError),
}

fn body_action(headers: &HeaderCollector, want: Chunk) -> BodyAction {
    match headers.status {
        Some(206) => match content_range(&headers.lines) {
            Some(ContentRange {
                range: Some((start, _)),
                ..
            }) if start != want.start => BodyAction::Reject(RequestError::other(format!(
                "origin answered with range starting at {start}, requested {}",
                want.start
            ))),
            _ => BodyAction::Write,
        },
        Some(code @ 200..=299) => BodyAction::Reject(RequestError::RangeNotHonored(code)),
        _ => BodyAction::Discard,
    }
}

/// Fetch whatever part of `chunk` the sink does not hold yet. The sink's
/// position must lie within `chunk`.
pub(super) fn fetch_chunk(
    transport: &Transport,
    url: &str,
    lines: &[String],
    chunk: Chunk,
    sink: &mut FanOutWriter,
    progress: &mut ProgressTracker,
    cancel: &CancelToken,
) -> Result<(), RequestError> {
    let want = chunk.remainder(sink.position().saturating_sub(chunk.start));
    if want.is_empty() {
        return Ok(());
    }

    let mut easy = transport.checkout(cancel)?;
    http::prepare(&mut easy, url, lines, &[])?;
    easy.range(&want.curl_range())?;

    let headers = RefCell::new(HeaderCollector::default());
    let mut abort: Option<RequestError> = None;
    let mut accepted = false;
    let performed = {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            headers.borrow_mut().push(data);
            true
        })?;
        transfer.write_function(|data| {
            if !accepted {
                match body_action(&headers.borrow(), want) {
                    BodyAction::Write => accepted = true,
                    BodyAction::Discard => return Ok(data.len()),
                    BodyAction::Reject(e) => {
                        abort = Some(e);
                        return Ok(0);
                    }
                }
            }
            // Drop anything past the requested end.
            let room = want.end.saturating_sub(sink.position());
            let take = (data.len() as u64).min(room) as usize;
            if let Err(e) = sink.write_all(&data[..take]) {
                abort = Some(RequestError::Storage(e));
                return Ok(0);
            }
            progress.advance_to(sink.position());
            if cancel.is_cancelled() {
                abort = Some(RequestError::Cancelled);
                return Ok(0);
            }
            Ok(data.len())
        })?;
        transfer.progress_function(|_, _, _, _| !cancel.is_cancelled())?;
        transfer.perform()
    };
    if let Err(e) = performed {
        return Err(http::perform_error(e, cancel, abort));
    }

    let code = easy.response_code()?;
    if !(200..300).contains(&code) {
        return Err(RequestError::Http(code));
    }
    if code != 206 {
        return Err(RequestError::RangeNotHonored(code));
    }
    if sink.position() < want.end {
        return Err(RequestError::PartialTransfer {
            expected: chunk.len(),
            received: sink.position().saturating_sub(chunk.start),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector(status: u32, lines: &[&str]) -> HeaderCollector {
        HeaderCollector {
            status: Some(status),
            lines: lines.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn partial_content_at_requested_offset_is_written() {
        let want = Chunk { start: 10, end: 20 };
        let h = collector(206, &["Content-Range: bytes 10-19/100"]);
        assert!(matches!(body_action(&h, want), BodyAction::Write));
    }

    #[test]
    fn full_body_for_range_request_is_rejected() {
        let want = Chunk { start: 10, end: 20 };
        assert!(matches!(
            body_action(&collector(200, &[]), want),
            BodyAction::Reject(RequestError::RangeNotHonored(200))
        ));
    }

    #[test]
    fn misplaced_range_is_rejected() {
        let want = Chunk { start: 10, end: 20 };
        let h = collector(206, &["Content-Range: bytes 0-9/100"]);
        assert!(matches!(
            body_action(&h, want),
            BodyAction::Reject(RequestError::Other(_))
        ));
    }

    #[test]
    fn error_bodies_are_discarded() {
        let want = Chunk { start: 0, end: 1 };
        assert!(matches!(
            body_action(&collector(503, &[]), want),
            BodyAction::Discard
        ));
    }
}
