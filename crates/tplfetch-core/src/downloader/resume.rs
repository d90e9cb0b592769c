//! Decide how a download starts given what is already on disk.

use crate::fetch_head::HeadResult;

use super::DownloadOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartPlan {
    /// Local file already holds the whole remote size; no data request.
    AlreadyComplete { total: u64 },
    /// Keep the first `offset` bytes and fetch the rest.
    Resume { offset: u64 },
    /// Truncate and fetch everything.
    Fresh,
}

/// Resume needs resume enabled, range support and a known size. A local
/// file smaller than `resume_threshold` is refetched from scratch.
pub(crate) fn plan_start(existing: u64, head: &HeadResult, options: &DownloadOptions) -> StartPlan {
    if !options.enable_resume || !head.accept_ranges {
        return StartPlan::Fresh;
    }
    let total = match head.content_length {
        Some(t) if t > 0 => t,
        _ => return StartPlan::Fresh,
    };
    if existing >= total {
        return StartPlan::AlreadyComplete { total };
    }
    if existing > 0 && existing >= options.resume_threshold {
        return StartPlan::Resume { offset: existing };
    }
    StartPlan::Fresh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch_head::ProbeMethod;

    fn head(len: Option<u64>, ranges: bool) -> HeadResult {
        HeadResult {
            content_length: len,
            accept_ranges: ranges,
            etag: None,
            last_modified: None,
            method: ProbeMethod::Head,
        }
    }

    fn opts(threshold: u64) -> DownloadOptions {
        DownloadOptions {
            resume_threshold: threshold,
            ..DownloadOptions::default()
        }
    }

    #[test]
    fn resumes_partial_file() {
        assert_eq!(
            plan_start(300, &head(Some(1000), true), &opts(0)),
            StartPlan::Resume { offset: 300 }
        );
    }

    #[test]
    fn complete_file_short_circuits() {
        assert_eq!(
            plan_start(1000, &head(Some(1000), true), &opts(0)),
            StartPlan::AlreadyComplete { total: 1000 }
        );
        assert_eq!(
            plan_start(1200, &head(Some(1000), true), &opts(0)),
            StartPlan::AlreadyComplete { total: 1000 }
        );
    }

    #[test]
    fn below_threshold_starts_fresh() {
        assert_eq!(
            plan_start(300, &head(Some(1000), true), &opts(512)),
            StartPlan::Fresh
        );
    }

    #[test]
    fn no_ranges_unknown_size_or_disabled_start_fresh() {
        assert_eq!(plan_start(300, &head(Some(1000), false), &opts(0)), StartPlan::Fresh);
        assert_eq!(plan_start(300, &head(None, true), &opts(0)), StartPlan::Fresh);
        assert_eq!(plan_start(0, &head(Some(1000), true), &opts(0)), StartPlan::Fresh);
        let disabled = DownloadOptions {
            enable_resume: false,
            ..opts(0)
        };
        assert_eq!(plan_start(1000, &head(Some(1000), true), &disabled), StartPlan::Fresh);
    }
}
