//! Origin metadata probing.
//!
//! A HEAD request reports `Content-Length`, `Accept-Ranges`, ETag and
//! Last-Modified. Origins that reject HEAD are probed with a one-byte
//! `Range: bytes=0-0` GET instead, whose `Content-Range` carries the size.

mod parse;

pub use parse::{parse_content_range, ContentRange};
pub(crate) use parse::content_range;

use crate::control::CancelToken;
use crate::headers::{header_lines, HeaderProvider};
use crate::http::{self, HeaderCollector};
use crate::pool::Transport;
use crate::retry::RequestError;

/// How the metadata was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMethod {
    Head,
    RangeGet,
}

/// Metadata needed to plan a streaming download.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct HeadResult {
    /// Total size in bytes, if the origin reported one.
    pub content_length: Option<u64>,
    /// True if byte-range requests are accepted.
    pub accept_ranges: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub method: ProbeMethod,
}

/// Probe `url` once through `transport`. Auth failures on HEAD are
/// returned as-is; any other non-2xx HEAD answer triggers the range GET.
pub fn probe(
    transport: &Transport,
    url: &str,
    headers: Option<&dyn HeaderProvider>,
    cancel: &CancelToken,
) -> Result<HeadResult, RequestError> {
    let lines = header_lines(headers);
    let code = match head(transport, url, &lines, cancel)? {
        Ok(result) => return Ok(result),
        Err(code) => code,
    };
    tracing::debug!(url, code, "HEAD rejected, probing with a ranged GET");
    range_probe(transport, url, &lines, cancel)
}

/// `Ok(Ok(result))` on a 2xx answer, `Ok(Err(status))` when the origin
/// rejected HEAD with a status worth a ranged retry.
fn head(
    transport: &Transport,
    url: &str,
    lines: &[String],
    cancel: &CancelToken,
) -> Result<Result<HeadResult, u32>, RequestError> {
    let mut easy = transport.checkout(cancel)?;
    http::prepare(&mut easy, url, lines, &[])?;
    easy.nobody(true)?;

    let mut headers = HeaderCollector::default();
    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            headers.push(data);
            true
        })?;
        transfer.progress_function(|_, _, _, _| !cancel.is_cancelled())?;
        transfer
            .perform()
            .map_err(|e| http::perform_error(e, cancel, None))?;
    }

    let code = easy.response_code()?;
    match code {
        200..=299 => {
            let result = parse::parse_headers(&headers.lines, ProbeMethod::Head);
            tracing::debug!(url, ?result, "HEAD probe");
            Ok(Ok(result))
        }
        401 | 403 => Err(RequestError::Http(code)),
        _ => Ok(Err(code)),
    }
}

fn range_probe(
    transport: &Transport,
    url: &str,
    lines: &[String],
    cancel: &CancelToken,
) -> Result<HeadResult, RequestError> {
    let mut easy = transport.checkout(cancel)?;
    http::prepare(&mut easy, url, lines, &[])?;
    easy.range("0-0")?;

    let mut headers = HeaderCollector::default();
    let mut stopped = false;
    let performed = {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            headers.push(data);
            true
        })?;
        // Only the headers matter; stop at the first body bytes so an
        // origin that ignores Range does not stream the whole file.
        transfer.write_function(|_| {
            stopped = true;
            Ok(0)
        })?;
        transfer.progress_function(|_, _, _, _| !cancel.is_cancelled())?;
        transfer.perform()
    };
    match performed {
        Ok(()) => {}
        Err(e) if e.is_write_error() && stopped => {}
        Err(e) => return Err(http::perform_error(e, cancel, None)),
    }

    let code = easy.response_code()?;
    let mut result = parse::parse_headers(&headers.lines, ProbeMethod::RangeGet);
    match code {
        206 | 416 => {
            // Content-Length here is the partial body, not the file.
            result.content_length = parse::content_range_total(&headers.lines);
            result.accept_ranges = true;
        }
        200..=299 => result.accept_ranges = false,
        _ => return Err(RequestError::Http(code)),
    }
    tracing::debug!(url, code, ?result, "ranged GET probe");
    Ok(result)
}
