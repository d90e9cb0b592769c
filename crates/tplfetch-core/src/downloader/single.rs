//! Whole-body GET for origins without usable range support.

use std::cell::Cell;
use std::io::Write;

use crate::control::CancelToken;
use crate::http::{self, HeaderCollector};
use crate::pool::Transport;
use crate::progress::ProgressTracker;
use crate::retry::RequestError;

use super::sink::FanOutWriter;

/// Stream the full body into `sink`, starting over from byte zero. Fails
/// with `PartialTransfer` if `expected_len` is known and not met.
pub(super) fn fetch_whole(
    transport: &Transport,
    url: &str,
    lines: &[String],
    expected_len: Option<u64>,
    sink: &mut FanOutWriter,
    progress: &mut ProgressTracker,
    cancel: &CancelToken,
) -> Result<(), RequestError> {
    sink.restart()?;

    let mut easy = transport.checkout(cancel)?;
    http::prepare(&mut easy, url, lines, &[])?;

    let mut headers = HeaderCollector::default();
    let status_ok: Cell<Option<bool>> = Cell::new(None);
    let mut abort: Option<RequestError> = None;
    let performed = {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            headers.push(data);
            status_ok.set(headers.status.map(|c| (200..300).contains(&c)));
            true
        })?;
        transfer.write_function(|data| {
            if status_ok.get() != Some(true) {
                return Ok(data.len());
            }
            if let Err(e) = sink.write_all(data) {
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
    let received = sink.position();
    match expected_len {
        Some(expected) if received != expected => {
            Err(RequestError::PartialTransfer { expected, received })
        }
        _ => Ok(()),
    }
}
