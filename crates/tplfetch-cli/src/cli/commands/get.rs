//! `tplfetch get`: download archives through the pooled, retrying engine.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tplfetch_core::config::EngineConfig;
use tplfetch_core::control::CancelToken;
use tplfetch_core::downloader::{download_batch, BatchItem, DownloadReport, Downloader};
use tplfetch_core::pool::PoolManager;

use super::progress::TermProgress;
use crate::cli::GetArgs;

/// Local name used when the URL path has no usable last segment.
const FALLBACK_NAME: &str = "download.bin";

pub async fn run_get(cfg: &EngineConfig, args: GetArgs) -> Result<()> {
    if args.checksum.is_some() && args.urls.len() > 1 {
        bail!("--checksum applies to a single URL");
    }
    let cwd = std::env::current_dir().context("resolve current directory")?;
    let targets = destinations(&args.urls, args.output.as_deref(), &cwd)?;

    let mut options = cfg.download.to_options();
    if let Some(size) = args.chunk_size {
        options.chunk_size = size;
    }
    if args.no_resume {
        options.enable_resume = false;
    }
    options.strategy = args.strategy.clone();
    options.expected_checksum = args.checksum.clone();

    // The process-wide pool manager lives here, for the duration of the run.
    let pools = Arc::new(PoolManager::new(cfg.pool.to_pool_config()));
    pools.start();
    let downloader = Downloader::new(Arc::clone(&pools), Arc::new(cfg.retry_manager()));

    let cancel = match args.timeout {
        Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
        None => CancelToken::new(),
    };
    let inline = args.jobs <= 1 || targets.len() == 1;
    let items: Vec<BatchItem> = targets
        .into_iter()
        .map(|(url, dest)| {
            let mut opts = options.clone();
            let label = dest
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| url.clone());
            opts.progress_sink = Some(Arc::new(TermProgress::new(label, inline)));
            BatchItem::new(url, dest, opts)
        })
        .collect();
    let total = items.len();

    let results = download_batch(&downloader, items, args.jobs, &cancel).await;
    let mut reports = Vec::new();
    let mut failed = 0usize;
    for result in results {
        match result {
            Ok(report) => {
                print_report(&report);
                reports.push(report);
            }
            Err(e) => {
                failed += 1;
                tracing::error!("download failed: {e}");
                eprintln!("failed: {e}");
            }
        }
    }

    if args.stats {
        print_stats(&downloader, &pools, &reports)?;
    }
    pools.close_all();

    if failed > 0 {
        bail!("{failed} of {total} download(s) failed");
    }
    Ok(())
}

fn print_report(report: &DownloadReport) {
    let how = if report.already_complete {
        "already complete".to_string()
    } else if report.resumed_from > 0 {
        format!("resumed at {} bytes", report.resumed_from)
    } else {
        format!("{} bytes", report.transferred_bytes)
    };
    match &report.checksum {
        Some(digest) => println!("{}  {}  ({})", digest, report.path.display(), how),
        None => println!("{}  ({})", report.path.display(), how),
    }
}

fn print_stats(downloader: &Downloader, pools: &PoolManager, reports: &[DownloadReport]) -> Result<()> {
    let mut out = serde_json::Map::new();
    out.insert(
        "retry".into(),
        serde_json::to_value(downloader.retry_manager().statistics())?,
    );
    out.insert(
        "errors".into(),
        serde_json::to_value(downloader.retry_manager().error_handler().statistics())?,
    );
    out.insert("pools".into(), serde_json::to_value(pools.collect_metrics())?);
    out.insert("downloads".into(), serde_json::to_value(reports)?);
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// Pair each URL with its destination. One URL: `output` is the file, or a
/// directory to put it in. Several URLs: `output` is a directory (created
/// if missing). Without `output` everything lands in `cwd`.
fn destinations(
    urls: &[String],
    output: Option<&Path>,
    cwd: &Path,
) -> Result<Vec<(String, PathBuf)>> {
    if let [url] = urls {
        let dest = match output {
            Some(p) if p.is_dir() => p.join(archive_name(url)),
            Some(p) => p.to_path_buf(),
            None => cwd.join(archive_name(url)),
        };
        return Ok(vec![(url.clone(), dest)]);
    }

    let dir = output.unwrap_or(cwd);
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create output directory {}", dir.display()))?;
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(urls.len());
    for url in urls {
        let dest = dir.join(archive_name(url));
        if !seen.insert(dest.clone()) {
            bail!("two URLs would both be saved as {}", dest.display());
        }
        out.push((url.clone(), dest));
    }
    Ok(out)
}

/// Last non-empty path segment of `url`.
fn archive_name(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segs| segs.rfind(|s| !s.is_empty()).map(str::to_string))
        })
        .filter(|s| s != "." && s != "..")
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_names() {
        assert_eq!(
            archive_name("https://example.com/t/starter.tar.gz?ref=main"),
            "starter.tar.gz"
        );
        assert_eq!(archive_name("https://example.com/t/v1/"), "v1");
        assert_eq!(archive_name("https://example.com/"), FALLBACK_NAME);
        assert_eq!(archive_name("not a url"), FALLBACK_NAME);
    }

    #[test]
    fn single_url_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let urls = vec!["https://example.com/a.zip".to_string()];

        let d = destinations(&urls, None, dir.path()).unwrap();
        assert_eq!(d[0].1, dir.path().join("a.zip"));

        let d = destinations(&urls, Some(dir.path()), Path::new("/nowhere")).unwrap();
        assert_eq!(d[0].1, dir.path().join("a.zip"));

        let file = dir.path().join("renamed.zip");
        let d = destinations(&urls, Some(&file), Path::new("/nowhere")).unwrap();
        assert_eq!(d[0].1, file);
    }

    #[test]
    fn several_urls_go_into_created_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("archives");
        let urls = vec![
            "https://example.com/a.zip".to_string(),
            "https://example.com/b.zip".to_string(),
        ];
        let d = destinations(&urls, Some(&out), dir.path()).unwrap();
        assert!(out.is_dir());
        assert_eq!(d[1].1, out.join("b.zip"));
    }

    #[test]
    fn colliding_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let urls = vec![
            "https://a.example.com/x.zip".to_string(),
            "https://b.example.com/x.zip".to_string(),
        ];
        assert!(destinations(&urls, None, dir.path()).is_err());
    }
}
