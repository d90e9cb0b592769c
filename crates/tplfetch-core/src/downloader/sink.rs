//! Fan-out writer: every byte goes to the destination file and, when a
//! checksum is wanted, to the hasher, in stream order.

use std::io::{self, Write};

use crate::checksum::Hasher;
use crate::storage::{PositionedWriter, StorageWriter};

#[derive(Debug)]
pub(crate) struct FanOutWriter {
    storage: StorageWriter,
    file: PositionedWriter,
    hasher: Option<Hasher>,
}

impl FanOutWriter {
    /// Writer appending at `offset`. A resumed transfer passes a hasher
    /// that has already seen the bytes before `offset`.
    pub(crate) fn new(storage: StorageWriter, offset: u64, hasher: Option<Hasher>) -> Self {
        let file = storage.writer_at(offset);
        Self {
            storage,
            file,
            hasher,
        }
    }

    /// Bytes the destination holds (next write offset).
    pub(crate) fn position(&self) -> u64 {
        self.file.position()
    }

    /// Discard everything written so far: truncate the file and reset the
    /// hasher.
    pub(crate) fn restart(&mut self) -> io::Result<()> {
        self.storage.truncate(0)?;
        self.file = self.storage.writer_at(0);
        if let Some(h) = &mut self.hasher {
            *h = Hasher::new(h.kind());
        }
        Ok(())
    }

    /// Sync the file and return the hex digest, if hashing.
    pub(crate) fn finish(self) -> io::Result<Option<String>> {
        self.storage.sync()?;
        Ok(self.hasher.map(Hasher::finalize_hex))
    }
}

impl Write for FanOutWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        if let Some(h) = &mut self.hasher {
            h.update(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
