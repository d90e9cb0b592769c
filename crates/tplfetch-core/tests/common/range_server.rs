//! Minimal HTTP/1.1 server that supports HEAD and Range GET for integration tests.
//!
//! Serves a single static body. Responds to HEAD with Content-Length and
//! Accept-Ranges: bytes; responds to GET with Range with 206 Partial Content.
//! Can fail or cut short the first GETs, and records every request.
#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone, Copy)]
pub struct RangeServerOptions {
    /// If false, HEAD returns 405 (simulates servers that block HEAD).
    pub head_allowed: bool,
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// If false, omit `Accept-Ranges: bytes` header even if ranges work.
    pub advertise_ranges: bool,
    /// The first N GETs are answered with 503.
    pub fail_first_gets: usize,
    /// The next N GETs send half their body and then close the connection.
    pub truncate_first_gets: usize,
    /// Content-Length sent on HEAD instead of the real body length.
    pub advertised_len: Option<u64>,
    /// Ranges are advertised but every GET gets 200 with the full body.
    pub ignore_range_requests: bool,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            head_allowed: true,
            support_ranges: true,
            advertise_ranges: true,
            fail_first_gets: 0,
            truncate_first_gets: 0,
            advertised_len: None,
            ignore_range_requests: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    /// (start, end_inclusive) from `Range: bytes=X-Y`.
    pub range: Option<(u64, u64)>,
    pub authorization: Option<String>,
}

/// Running server. Lives until the process exits.
pub struct RangeServer {
    pub url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl RangeServer {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn gets(&self) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "GET")
            .collect()
    }
}

/// Starts a server in a background thread serving `body`.
pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

/// Like `start` but allows customizing server behavior (HEAD blocked, ranges missing, etc.).
pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let requests = Arc::new(Mutex::new(Vec::new()));
    let gets_seen = Arc::new(AtomicUsize::new(0));
    let recorded = Arc::clone(&requests);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let recorded = Arc::clone(&recorded);
            let gets_seen = Arc::clone(&gets_seen);
            thread::spawn(move || handle(stream, &body, opts, &recorded, &gets_seen));
        }
    });
    RangeServer {
        url: format!("http://127.0.0.1:{}/archive.tar.gz", port),
        requests,
    }
}

fn handle(
    mut stream: std::net::TcpStream,
    body: &[u8],
    opts: RangeServerOptions,
    recorded: &Mutex<Vec<RecordedRequest>>,
    gets_seen: &AtomicUsize,
) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) => return,
        Ok(n) => n,
        Err(_) => return,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let req = parse_request(request);
    recorded.lock().unwrap().push(req.clone());
    let total = body.len() as u64;
    let accept_ranges = if opts.advertise_ranges && opts.support_ranges {
        "Accept-Ranges: bytes\r\n"
    } else {
        ""
    };

    if req.method.eq_ignore_ascii_case("HEAD") {
        if !opts.head_allowed {
            let _ = stream.write_all(
                b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
            return;
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}ETag: \"v1\"\r\nConnection: close\r\n\r\n",
            opts.advertised_len.unwrap_or(total),
            accept_ranges
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }
    if !req.method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(
            b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        return;
    }

    let seen = gets_seen.fetch_add(1, Ordering::SeqCst);
    if seen < opts.fail_first_gets {
        let _ = stream.write_all(
            b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        return;
    }
    let truncate = seen < opts.fail_first_gets + opts.truncate_first_gets;

    let (status, range_header, slice) = match req
        .range
        .filter(|_| opts.support_ranges && !opts.ignore_range_requests)
    {
        Some((start, end_incl)) => {
            let end_incl = end_incl.min(total.saturating_sub(1));
            if start >= total || start > end_incl {
                ("416 Range Not Satisfiable", format!("bytes */{}", total), &body[0..0])
            } else {
                let slice = &body[start as usize..=end_incl as usize];
                (
                    "206 Partial Content",
                    format!("bytes {}-{}/{}", start, end_incl, total),
                    slice,
                )
            }
        }
        None => (
            "200 OK",
            format!("bytes 0-{}/{}", total.saturating_sub(1), total),
            body,
        ),
    };
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nContent-Range: {}\r\n{}Connection: close\r\n\r\n",
        status,
        slice.len(),
        range_header,
        accept_ranges
    );
    let _ = stream.write_all(response.as_bytes());
    if truncate {
        let _ = stream.write_all(&slice[..slice.len() / 2]);
        let _ = stream.flush();
        return;
    }
    let _ = stream.write_all(slice);
}

fn parse_request(request: &str) -> RecordedRequest {
    let mut method = String::new();
    let mut range = None;
    let mut authorization = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("").to_string();
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("authorization") {
                authorization = Some(value.to_string());
            }
            if name.eq_ignore_ascii_case("range") && value.to_lowercase().starts_with("bytes=") {
                if let Some((a, b)) = value[6..].trim().split_once('-') {
                    let start = a.trim().parse::<u64>().unwrap_or(0);
                    let end = b.trim();
                    let end_incl = if end.is_empty() {
                        u64::MAX
                    } else {
                        end.parse::<u64>().unwrap_or(0)
                    };
                    range = Some((start, end_incl));
                }
            }
        }
    }
    RecordedRequest {
        method,
        range,
        authorization,
    }
}
