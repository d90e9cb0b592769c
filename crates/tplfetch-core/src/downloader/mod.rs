//! Resumable, checksum-verified streaming downloads.
//!
//! A download probes the origin, decides whether to resume from the bytes
//! already on disk, then fetches the rest in fixed-size ranged chunks. Each
//! chunk runs inside the retry manager, so one failed chunk is retried on
//! its own instead of restarting the transfer. Origins without range
//! support, or that answer the first ranged GET with the full body, get a
//! single whole-body GET.

mod batch;
mod chunk;
mod resume;
mod single;
mod sink;

pub use batch::{download_batch, BatchItem};

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::checksum::{ChecksumParseError, ChecksumType, ExpectedChecksum, Hasher};
use crate::control::CancelToken;
use crate::fetch_head::{self, HeadResult};
use crate::headers::{header_lines, HeaderProvider};
use crate::pool::{HostKey, PoolManager, TlsConfig, Transport, DEFAULT_POOL};
use crate::progress::{ProgressCallback, ProgressSink, ProgressTracker};
use crate::retry::{ErrorKind, NetworkError, RequestError, RetryManager, RetryOptions};
use crate::segmenter::plan_chunks;
use crate::storage::{existing_len, StorageWriter};

use resume::{plan_start, StartPlan};
use sink::FanOutWriter;

/// Default chunk size for ranged requests (4 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Partial files smaller than this are refetched instead of resumed (1 MiB).
pub const DEFAULT_RESUME_THRESHOLD: u64 = 1024 * 1024;

/// Per-download settings.
#[derive(Clone)]
pub struct DownloadOptions {
    /// Bytes per ranged request.
    pub chunk_size: u64,
    pub enable_resume: bool,
    /// Minimum local size worth resuming from.
    pub resume_threshold: u64,
    /// Hash the stream even when no expected checksum is given; the digest
    /// is reported.
    pub verify_checksum: bool,
    /// Algorithm used for bare-hex expected checksums and for reporting.
    pub checksum_type: ChecksumType,
    /// `type:hex` or bare hex.
    pub expected_checksum: Option<String>,
    /// Retry strategy name; unknown names fall back to `default`.
    pub strategy: Option<String>,
    pub max_attempts: Option<u32>,
    pub tls: TlsConfig,
    pub progress_sink: Option<Arc<dyn ProgressSink>>,
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            enable_resume: true,
            resume_threshold: DEFAULT_RESUME_THRESHOLD,
            verify_checksum: false,
            checksum_type: ChecksumType::default(),
            expected_checksum: None,
            strategy: None,
            max_attempts: None,
            tls: TlsConfig::default(),
            progress_sink: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for DownloadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadOptions")
            .field("chunk_size", &self.chunk_size)
            .field("enable_resume", &self.enable_resume)
            .field("resume_threshold", &self.resume_threshold)
            .field("verify_checksum", &self.verify_checksum)
            .field("checksum_type", &self.checksum_type)
            .field("expected_checksum", &self.expected_checksum)
            .field("strategy", &self.strategy)
            .field("max_attempts", &self.max_attempts)
            .field("tls", &self.tls)
            .field("progress_sink", &self.progress_sink.is_some())
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

impl DownloadOptions {
    /// Parsed expected checksum. A bare hex value is read as
    /// `checksum_type`.
    pub fn expected(&self) -> Result<Option<ExpectedChecksum>, ChecksumParseError> {
        match self.expected_checksum.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) if s.contains(':') => ExpectedChecksum::parse(s).map(Some),
            Some(s) => ExpectedChecksum::parse(&format!("{}:{s}", self.checksum_type)).map(Some),
        }
    }

    fn retry_options(&self, operation: &str, host: &str) -> RetryOptions {
        let mut o = RetryOptions::new(operation).host(host);
        o.strategy = self.strategy.clone();
        o.max_attempts = self.max_attempts;
        o
    }
}

/// Terminal download failure.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid expected checksum: {0}")]
    InvalidChecksum(#[from] ChecksumParseError),
    /// Retries exhausted, non-retryable failure, open circuit or
    /// cancellation (a `Timeout` kind).
    #[error("{error} (after {attempts} attempt(s) in {elapsed:.1?})")]
    Network {
        error: NetworkError,
        attempts: u32,
        elapsed: Duration,
    },
    #[error("{kind} checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        kind: ChecksumType,
        expected: String,
        actual: String,
    },
    #[error("storage error: {0}")]
    Storage(#[from] io::Error),
    #[error("batch worker failed: {0}")]
    Worker(String),
}

impl DownloadError {
    /// Classified network error, if this is a network failure.
    pub fn network_error(&self) -> Option<&NetworkError> {
        match self {
            DownloadError::Network { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Summary of a finished download.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    pub url: String,
    pub path: PathBuf,
    /// Final file size.
    pub total_bytes: u64,
    /// Bytes fetched by this run.
    pub transferred_bytes: u64,
    /// Offset the transfer resumed from (0 for a fresh download).
    pub resumed_from: u64,
    /// True when the file was already complete and no data was requested.
    pub already_complete: bool,
    /// Hex digest of the file, when hashing was enabled.
    pub checksum: Option<String>,
    /// Operation invocations across probe and transfer, retries included.
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Streams remote files to disk through pooled transports with retries.
#[derive(Clone)]
pub struct Downloader {
    pools: Arc<PoolManager>,
    retry: Arc<RetryManager>,
    headers: Option<Arc<dyn HeaderProvider>>,
    pool_name: String,
}

impl fmt::Debug for Downloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Downloader")
            .field("pool_name", &self.pool_name)
            .field("headers", &self.headers.is_some())
            .finish()
    }
}

impl Downloader {
    pub fn new(pools: Arc<PoolManager>, retry: Arc<RetryManager>) -> Self {
        Self {
            pools,
            retry,
            headers: None,
            pool_name: DEFAULT_POOL.to_string(),
        }
    }

    /// Attach `provider`'s headers to every request.
    pub fn with_headers(mut self, provider: Arc<dyn HeaderProvider>) -> Self {
        self.headers = Some(provider);
        self
    }

    /// Use pool `name` instead of the default pool.
    pub fn with_pool(mut self, name: impl Into<String>) -> Self {
        self.pool_name = name.into();
        self
    }

    pub fn retry_manager(&self) -> &Arc<RetryManager> {
        &self.retry
    }

    pub fn pool_manager(&self) -> &Arc<PoolManager> {
        &self.pools
    }

    fn transport(&self, url: &str, tls: &TlsConfig) -> Result<(Transport, HostKey), DownloadError> {
        let key = HostKey::from_url(url).map_err(|e| DownloadError::InvalidUrl {
            url: url.to_string(),
            reason: format!("{e:#}"),
        })?;
        let transport = self
            .pools
            .get_pool(&self.pool_name)
            .get_transport(&key.to_string_key(), tls);
        Ok((transport, key))
    }

    /// Run `op` under the retry manager, adding its invocations to
    /// `attempts`.
    fn with_retry<T>(
        &self,
        cancel: &CancelToken,
        options: &RetryOptions,
        attempts: &mut u32,
        mut op: impl FnMut() -> Result<T, RequestError>,
    ) -> Result<T, DownloadError> {
        let mut value = None;
        let result = self.retry.execute_with_retry(cancel, options, |_| {
            value = Some(op()?);
            Ok(())
        });
        *attempts += result.attempt_count;
        if result.success {
            if let Some(v) = value {
                return Ok(v);
            }
        }
        let error = result.last_error.unwrap_or_else(|| {
            NetworkError::new(ErrorKind::Unknown, "operation failed", options.host.clone())
        });
        Err(DownloadError::Network {
            error,
            attempts: result.attempt_count,
            elapsed: result.total_duration,
        })
    }

    /// Probe `url` (HEAD, falling back to a one-byte ranged GET) with retries.
    pub fn probe(
        &self,
        url: &str,
        options: &DownloadOptions,
        cancel: &CancelToken,
    ) -> Result<HeadResult, DownloadError> {
        let (transport, key) = self.transport(url, &options.tls)?;
        let mut attempts = 0;
        self.probe_on(&transport, &key, url, options, cancel, &mut attempts)
    }

    fn probe_on(
        &self,
        transport: &Transport,
        key: &HostKey,
        url: &str,
        options: &DownloadOptions,
        cancel: &CancelToken,
        attempts: &mut u32,
    ) -> Result<HeadResult, DownloadError> {
        let retry = options.retry_options("probe", &key.host);
        let headers = self.headers.as_deref();
        self.with_retry(cancel, &retry, attempts, || {
            fetch_head::probe(transport, url, headers, cancel)
        })
    }

    /// Download `url` to `dest`, resuming a partial file when possible.
    ///
    /// A failed transfer leaves the partial file in place for a later
    /// resume; a checksum mismatch removes it.
    pub fn download_with_streaming(
        &self,
        url: &str,
        dest: &Path,
        options: &DownloadOptions,
        cancel: &CancelToken,
    ) -> Result<DownloadReport, DownloadError> {
        let started = Instant::now();
        let expected = options.expected()?;
        let (transport, key) = self.transport(url, &options.tls)?;
        let mut attempts = 0u32;

        let head = self.probe_on(&transport, &key, url, options, cancel, &mut attempts)?;
        let existing = existing_len(dest)?;
        let plan = plan_start(existing, &head, options);
        tracing::info!(
            url,
            dest = %dest.display(),
            size = ?head.content_length,
            ranges = head.accept_ranges,
            ?plan,
            "download started"
        );

        let hash_kind = expected
            .as_ref()
            .map(|e| e.kind)
            .or(options.verify_checksum.then_some(options.checksum_type));

        if let StartPlan::AlreadyComplete { total } = plan {
            let checksum = match hash_kind {
                Some(kind) => {
                    let mut h = Hasher::new(kind);
                    h.update_from_file(dest, existing)?;
                    Some(h.finalize_hex())
                }
                None => None,
            };
            if let (Some(exp), Some(actual)) = (&expected, &checksum) {
                verify(exp, actual, dest)?;
            }
            let mut progress = ProgressTracker::new(
                total,
                existing,
                options.progress_sink.clone(),
                options.progress_callback.clone(),
            );
            progress.set_message("already downloaded");
            progress.finish();
            tracing::info!(url, dest = %dest.display(), "already complete, skipping transfer");
            return Ok(DownloadReport {
                url: url.to_string(),
                path: dest.to_path_buf(),
                total_bytes: existing,
                transferred_bytes: 0,
                resumed_from: existing,
                already_complete: true,
                checksum,
                attempts,
                elapsed: started.elapsed(),
            });
        }

        let (storage, offset) = match plan {
            StartPlan::Resume { offset } => (StorageWriter::open_for_resume(dest)?, offset),
            _ => (StorageWriter::create(dest)?, 0),
        };
        let hasher = match hash_kind {
            Some(kind) => {
                let mut h = Hasher::new(kind);
                if offset > 0 {
                    h.update_from_file(dest, offset)?;
                }
                Some(h)
            }
            None => None,
        };
        if offset > 0 {
            tracing::info!(url, offset, "resuming partial download");
        }

        let mut sink = FanOutWriter::new(storage, offset, hasher);
        let mut progress = ProgressTracker::new(
            head.content_length.unwrap_or(0),
            offset,
            options.progress_sink.clone(),
            options.progress_callback.clone(),
        );
        let lines = header_lines(self.headers.as_deref());

        // Some origins advertise ranges and then answer a ranged GET with the
        // whole body. From offset 0 that body is usable as is.
        let mut whole_body = None;
        match head.content_length {
            Some(total) if head.accept_ranges => {
                let retry = options.retry_options("chunk", &key.host);
                for chunk in plan_chunks(offset, total, options.chunk_size) {
                    let ignored = self.with_retry(cancel, &retry, &mut attempts, || {
                        match chunk::fetch_chunk(
                            &transport,
                            url,
                            &lines,
                            chunk,
                            &mut sink,
                            &mut progress,
                            cancel,
                        ) {
                            Err(RequestError::RangeNotHonored(code)) if sink.position() == 0 => {
                                Ok(Some(code))
                            }
                            other => other.map(|()| None),
                        }
                    })?;
                    if let Some(code) = ignored {
                        tracing::warn!(url, code, "range request not honored, fetching whole body");
                        whole_body = Some(Some(total));
                        break;
                    }
                }
            }
            expected_len => whole_body = Some(expected_len),
        }
        if let Some(expected_len) = whole_body {
            let retry = options.retry_options("download", &key.host);
            self.with_retry(cancel, &retry, &mut attempts, || {
                single::fetch_whole(
                    &transport,
                    url,
                    &lines,
                    expected_len,
                    &mut sink,
                    &mut progress,
                    cancel,
                )
            })?;
        }

        let total_bytes = sink.position();
        let checksum = sink.finish()?;
        if let (Some(exp), Some(actual)) = (&expected, &checksum) {
            if let Err(e) = verify(exp, actual, dest) {
                progress.set_message("checksum mismatch");
                progress.abandon();
                return Err(e);
            }
        }
        progress.finish();

        let report = DownloadReport {
            url: url.to_string(),
            path: dest.to_path_buf(),
            total_bytes,
            transferred_bytes: total_bytes.saturating_sub(offset),
            resumed_from: offset,
            already_complete: false,
            checksum,
            attempts,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            url,
            bytes = report.transferred_bytes,
            attempts,
            elapsed = ?report.elapsed,
            "download complete"
        );
        Ok(report)
    }
}

/// Compare digests; on mismatch remove the file so it is never mistaken
/// for a good download.
fn verify(expected: &ExpectedChecksum, actual: &str, dest: &Path) -> Result<(), DownloadError> {
    if expected.matches(actual) {
        return Ok(());
    }
    tracing::warn!(
        dest = %dest.display(),
        expected = %expected.hex,
        actual,
        "checksum mismatch, removing file"
    );
    if let Err(e) = std::fs::remove_file(dest) {
        tracing::warn!(dest = %dest.display(), "failed to remove corrupt download: {e}");
    }
    Err(DownloadError::ChecksumMismatch {
        kind: expected.kind,
        expected: expected.hex.clone(),
        actual: actual.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_checksum_parsing() {
        let mut o = DownloadOptions::default();
        assert_eq!(o.expected().unwrap(), None);

        o.expected_checksum = Some("b1946ac92492d2347c6235b4d2611184".into());
        assert!(o.expected().is_err(), "bare md5 read as sha256");

        o.checksum_type = ChecksumType::Md5;
        assert_eq!(o.expected().unwrap().unwrap().kind, ChecksumType::Md5);

        o.checksum_type = ChecksumType::Sha256;
        o.expected_checksum = Some("md5:b1946ac92492d2347c6235b4d2611184".into());
        assert_eq!(o.expected().unwrap().unwrap().kind, ChecksumType::Md5);
    }

    #[test]
    fn invalid_url_is_reported_before_any_request() {
        let d = Downloader::new(
            Arc::new(PoolManager::default()),
            Arc::new(RetryManager::default()),
        );
        let dir = tempfile::tempdir().unwrap();
        let err = d
            .download_with_streaming(
                "not a url",
                &dir.path().join("out"),
                &DownloadOptions::default(),
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl { .. }));
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn verify_removes_mismatched_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"x").unwrap();
        let exp = ExpectedChecksum::new(ChecksumType::Sha256, "AB");
        assert!(verify(&exp, "ab", &path).is_ok());
        assert!(path.exists());
        let err = verify(&exp, "cd", &path).unwrap_err();
        assert!(matches!(err, DownloadError::ChecksumMismatch { .. }));
        assert!(!path.exists());
    }
}
