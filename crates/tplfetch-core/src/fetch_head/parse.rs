//! Parse HTTP response header lines into a HeadResult.

use super::{HeadResult, ProbeMethod};

/// Parsed `Content-Range` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// Inclusive first and last byte; `None` for `bytes */total`.
    pub range: Option<(u64, u64)>,
    /// Complete length; `None` for `bytes a-b/*`.
    pub total: Option<u64>,
}

/// Parse a `Content-Range` value such as `bytes 0-0/1234` or `bytes */1234`.
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    let range = match range.trim() {
        "*" => None,
        r => {
            let (a, b) = r.split_once('-')?;
            let (a, b): (u64, u64) = (a.trim().parse().ok()?, b.trim().parse().ok()?);
            if b < a {
                return None;
            }
            Some((a, b))
        }
    };
    if range.is_none() && total.is_none() {
        return None;
    }
    Some(ContentRange { range, total })
}

fn header_value<'a>(lines: &'a [String], name: &str) -> Option<&'a str> {
    lines.iter().rev().find_map(|line| {
        let (n, v) = line.split_once(':')?;
        n.trim().eq_ignore_ascii_case(name).then(|| v.trim())
    })
}

/// `Content-Range` of a response, if present and well formed.
pub(crate) fn content_range(lines: &[String]) -> Option<ContentRange> {
    header_value(lines, "content-range").and_then(parse_content_range)
}

/// Complete length from `Content-Range`.
pub(crate) fn content_range_total(lines: &[String]) -> Option<u64> {
    content_range(lines)?.total
}

/// Parse collected header lines.
pub(crate) fn parse_headers(lines: &[String], method: ProbeMethod) -> HeadResult {
    HeadResult {
        content_length: header_value(lines, "content-length").and_then(|v| v.parse().ok()),
        accept_ranges: header_value(lines, "accept-ranges")
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes")),
        etag: header_value(lines, "etag").map(|v| v.trim_matches('"').to_string()),
        last_modified: header_value(lines, "last-modified").map(str::to_string),
        method,
    }
}
