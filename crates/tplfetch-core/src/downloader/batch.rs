//! Several downloads at once, at most `max_concurrent` in flight.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::control::CancelToken;

use super::{DownloadError, DownloadOptions, DownloadReport, Downloader};

/// One entry of a batch.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub url: String,
    pub dest: PathBuf,
    pub options: DownloadOptions,
}

impl BatchItem {
    pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>, options: DownloadOptions) -> Self {
        Self {
            url: url.into(),
            dest: dest.into(),
            options,
        }
    }
}

/// Run every item on a blocking worker, gated by a semaphore of
/// `max_concurrent` permits (at least 1). Results come back in input
/// order. Cancelling `cancel` stops every transfer.
pub async fn download_batch(
    downloader: &Downloader,
    items: Vec<BatchItem>,
    max_concurrent: usize,
    cancel: &CancelToken,
) -> Vec<Result<DownloadReport, DownloadError>> {
    let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let handles: Vec<_> = items
        .into_iter()
        .map(|item| {
            let permits = Arc::clone(&permits);
            let downloader = downloader.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| DownloadError::Worker(e.to_string()))?;
                tokio::task::spawn_blocking(move || {
                    downloader.download_with_streaming(&item.url, &item.dest, &item.options, &cancel)
                })
                .await
                .map_err(|e| DownloadError::Worker(e.to_string()))?
            })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for h in handles {
        results.push(match h.await {
            Ok(r) => r,
            Err(e) => Err(DownloadError::Worker(e.to_string())),
        });
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolManager;
    use crate::retry::RetryManager;

    #[tokio::test]
    async fn empty_batch_returns_nothing() {
        let d = Downloader::new(
            Arc::new(PoolManager::default()),
            Arc::new(RetryManager::default()),
        );
        let out = download_batch(&d, Vec::new(), 4, &CancelToken::new()).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn results_keep_input_order() {
        let d = Downloader::new(
            Arc::new(PoolManager::default()),
            Arc::new(RetryManager::default()),
        );
        let dir = tempfile::tempdir().unwrap();
        let items = vec![
            BatchItem::new("not a url", dir.path().join("a"), DownloadOptions::default()),
            BatchItem::new(
                "http://127.0.0.1:1/x",
                dir.path().join("b"),
                DownloadOptions {
                    expected_checksum: Some("zz".into()),
                    ..DownloadOptions::default()
                },
            ),
        ];
        let out = download_batch(&d, items, 1, &CancelToken::new()).await;
        assert!(matches!(out[0], Err(DownloadError::InvalidUrl { .. })));
        assert!(matches!(out[1], Err(DownloadError::InvalidChecksum(_))));
    }
}
