//! `tplfetch checksum`: digest of a file on disk.

use anyhow::Result;
use std::path::Path;
use tplfetch_core::checksum::{self, ChecksumType};

/// Compute and print the digest of the given file, `sha256sum` style.
pub fn run_checksum(path: &Path, kind: ChecksumType) -> Result<()> {
    let digest = checksum::hash_path(path, kind)?;
    println!("{}  {}", digest, path.display());
    Ok(())
}
