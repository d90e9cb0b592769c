//! Destination file I/O.
//!
//! Downloads write straight into the destination path; the size already on
//! disk is what a later run resumes from. Writes are positioned (pwrite on
//! Unix) at the writer's current position, which only moves forward; a
//! retried chunk continues from the first byte it has not written yet.

mod writer;

pub use writer::{existing_len, PositionedWriter, StorageWriter};
