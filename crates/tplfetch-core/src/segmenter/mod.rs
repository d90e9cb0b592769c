//! Chunk planning for streaming range downloads.
//!
//! A transfer from `offset` to `total` is split into consecutive half-open
//! chunks of at most `chunk_size` bytes, each fetched with its own
//! `Range` request.

mod range;

pub use range::{plan_chunks, Chunk, Chunks};
