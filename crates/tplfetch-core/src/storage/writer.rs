use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
#[cfg(unix)]
use std::os::unix::fs::FileExt;

/// Size of the file at `path`, or 0 if it does not exist.
pub fn existing_len(path: &Path) -> io::Result<u64> {
    match std::fs::metadata(path) {
        Ok(m) => Ok(m.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

/// Shared handle to a destination file. Clones write to the same file.
#[derive(Clone, Debug)]
pub struct StorageWriter {
    file: Arc<File>,
    path: PathBuf,
}

impl StorageWriter {
    /// Create (or truncate) `path`, creating missing parent directories.
    pub fn create(path: &Path) -> io::Result<Self> {
        Self::open(path, true)
    }

    /// Open `path` for writing without truncating, so bytes already on
    /// disk are kept. Creates the file if it is missing.
    pub fn open_for_resume(path: &Path) -> io::Result<Self> {
        Self::open(path, false)
    }

    fn open(path: &Path, truncate: bool) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(truncate)
            .open(path)?;
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write all of `data` at `offset`. Does not move any shared cursor.
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.write_all_at(data, offset)
    }

    /// Seek-and-write fallback; not safe for concurrent use on one file.
    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = (*self.file).try_clone()?;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)
    }

    /// Cut the file to `len` bytes.
    pub fn truncate(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Flush file data to disk.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    /// Sequential writer starting at `offset`.
    pub fn writer_at(&self, offset: u64) -> PositionedWriter {
        PositionedWriter {
            storage: self.clone(),
            pos: offset,
        }
    }
}

/// `io::Write` adapter that appends through `StorageWriter::write_at`.
#[derive(Debug)]
pub struct PositionedWriter {
    storage: StorageWriter,
    pos: u64,
}

impl PositionedWriter {
    /// Offset the next write lands at.
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl io::Write for PositionedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.storage.write_at(self.pos, buf)?;
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn create_write_at_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.bin");
        let w = StorageWriter::create(&path).unwrap();
        w.write_at(0, b"hello").unwrap();
        w.write_at(10, b"world").unwrap();
        w.sync().unwrap();
        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), 15);
        assert_eq!(&data[0..5], b"hello");
        assert_eq!(&data[10..15], b"world");
    }

    #[test]
    fn open_for_resume_keeps_existing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, b"abc").unwrap();
        let w = StorageWriter::open_for_resume(&path).unwrap();
        let mut pw = w.writer_at(3);
        pw.write_all(b"def").unwrap();
        assert_eq!(pw.position(), 6);
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }

    #[test]
    fn create_truncates_and_truncate_cuts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, b"stale data").unwrap();
        let w = StorageWriter::create(&path).unwrap();
        assert!(w.is_empty().unwrap());
        w.write_at(0, b"0123456789").unwrap();
        w.truncate(4).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"0123");
    }

    #[test]
    fn existing_len_of_missing_file_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(existing_len(&dir.path().join("nope")).unwrap(), 0);
        let p = dir.path().join("f");
        std::fs::write(&p, b"12345").unwrap();
        assert_eq!(existing_len(&p).unwrap(), 5);
    }
}
