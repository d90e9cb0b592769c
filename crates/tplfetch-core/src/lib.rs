//! Network resilience and streaming transfer engine for fetching remote
//! template archives: classified retries with backoff, a circuit breaker,
//! pooled connections and resumable, checksum-verified downloads.

pub mod config;
pub mod logging;

pub mod checksum;
pub mod control;
pub mod downloader;
pub mod fetch_head;
pub mod headers;
mod http;
pub mod pool;
pub mod progress;
pub mod retry;
pub mod segmenter;
pub mod storage;
