//! Checksums for downloaded archives.
//!
//! `Hasher` is fed inline with the transfer (it implements `io::Write`, so
//! it sits next to the file writer), which means a streaming download never
//! has to re-read the file. `hash_path` covers files already on disk.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

const BUF_SIZE: usize = 64 * 1024;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    Md5,
    Sha1,
    #[default]
    Sha256,
}

impl ChecksumType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumType::Md5 => "md5",
            ChecksumType::Sha1 => "sha1",
            ChecksumType::Sha256 => "sha256",
        }
    }

    /// Length of the hex digest.
    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumType::Md5 => 32,
            ChecksumType::Sha1 => 40,
            ChecksumType::Sha256 => 64,
        }
    }

    fn from_hex_len(len: usize) -> Option<Self> {
        [ChecksumType::Md5, ChecksumType::Sha1, ChecksumType::Sha256]
            .into_iter()
            .find(|t| t.hex_len() == len)
    }
}

impl std::fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChecksumParseError {
    #[error("unknown checksum type: {0}")]
    UnknownType(String),
    #[error("checksum is not hex: {0}")]
    NotHex(String),
    #[error("{kind} checksum must be {expected} hex digits, got {got}")]
    WrongLength {
        kind: ChecksumType,
        expected: usize,
        got: usize,
    },
}

impl FromStr for ChecksumType {
    type Err = ChecksumParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "md5" => Ok(ChecksumType::Md5),
            "sha1" => Ok(ChecksumType::Sha1),
            "sha256" => Ok(ChecksumType::Sha256),
            other => Err(ChecksumParseError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Clone)]
enum State {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha256(Sha256),
}

/// Incremental digest of one of the supported types.
#[derive(Clone)]
pub struct Hasher {
    kind: ChecksumType,
    state: State,
}

impl std::fmt::Debug for Hasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hasher").field("kind", &self.kind).finish()
    }
}

impl Hasher {
    pub fn new(kind: ChecksumType) -> Self {
        let state = match kind {
            ChecksumType::Md5 => State::Md5(md5::Md5::new()),
            ChecksumType::Sha1 => State::Sha1(sha1::Sha1::new()),
            ChecksumType::Sha256 => State::Sha256(Sha256::new()),
        };
        Self { kind, state }
    }

    pub fn kind(&self) -> ChecksumType {
        self.kind
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            State::Md5(h) => h.update(data),
            State::Sha1(h) => h.update(data),
            State::Sha256(h) => h.update(data),
        }
    }

    /// Lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self.state {
            State::Md5(h) => hex::encode(h.finalize()),
            State::Sha1(h) => hex::encode(h.finalize()),
            State::Sha256(h) => hex::encode(h.finalize()),
        }
    }

    /// Feed the first `len` bytes of `path` into the hasher.
    pub fn update_from_file(&mut self, path: &Path, len: u64) -> io::Result<()> {
        let f = File::open(path)?;
        let copied = io::copy(&mut f.take(len), self)?;
        if copied != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} is shorter than {len} bytes", path.display()),
            ));
        }
        Ok(())
    }
}

impl io::Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Digest of a file as lowercase hex. Reads in fixed-size blocks.
pub fn hash_path(path: &Path, kind: ChecksumType) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Hasher::new(kind);
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = f
            .read(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize_hex())
}

/// SHA-256 of a file as lowercase hex.
pub fn sha256_path(path: &Path) -> Result<String> {
    hash_path(path, ChecksumType::Sha256)
}

/// Case-insensitive comparison of two hex digests.
pub fn digests_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

/// A checksum the caller expects the download to have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedChecksum {
    pub kind: ChecksumType,
    /// Hex digest as given (any case).
    pub hex: String,
}

impl ExpectedChecksum {
    pub fn new(kind: ChecksumType, hex: impl Into<String>) -> Self {
        Self {
            kind,
            hex: hex.into(),
        }
    }

    /// Parse `type:hex` (e.g. `sha256:ab12...`) or bare hex, whose type is
    /// inferred from its length.
    pub fn parse(s: &str) -> std::result::Result<Self, ChecksumParseError> {
        let s = s.trim();
        let (kind, hex) = match s.split_once(':') {
            Some((t, h)) => (Some(t.parse::<ChecksumType>()?), h.trim()),
            None => (None, s),
        };
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ChecksumParseError::NotHex(hex.to_string()));
        }
        let kind = match kind.or_else(|| ChecksumType::from_hex_len(hex.len())) {
            Some(k) => k,
            None => {
                return Err(ChecksumParseError::WrongLength {
                    kind: ChecksumType::Sha256,
                    expected: ChecksumType::Sha256.hex_len(),
                    got: hex.len(),
                })
            }
        };
        if hex.len() != kind.hex_len() {
            return Err(ChecksumParseError::WrongLength {
                kind,
                expected: kind.hex_len(),
                got: hex.len(),
            });
        }
        Ok(Self::new(kind, hex))
    }

    pub fn matches(&self, actual: &str) -> bool {
        digests_match(&self.hex, actual)
    }
}

impl std::fmt::Display for ExpectedChecksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HELLO_SHA256: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

    #[test]
    fn sha256_path_empty_file() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let path = f.path();
        let digest = sha256_path(path).unwrap();
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hash_path_all_kinds() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello\n").unwrap();
        f.flush().unwrap();
        assert_eq!(sha256_path(f.path()).unwrap(), HELLO_SHA256);
        assert_eq!(
            hash_path(f.path(), ChecksumType::Sha1).unwrap(),
            "f572d396fae9206628714fb2ce00f72e94f2258f"
        );
        assert_eq!(
            hash_path(f.path(), ChecksumType::Md5).unwrap(),
            "b1946ac92492d2347c6235b4d2611184"
        );
    }

    #[test]
    fn incremental_matches_whole() {
        let mut h = Hasher::new(ChecksumType::Sha256);
        h.write_all(b"hel").unwrap();
        h.write_all(b"lo\n").unwrap();
        assert_eq!(h.finalize_hex(), HELLO_SHA256);
    }

    #[test]
    fn update_from_file_hashes_prefix() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello\nTRAILING").unwrap();
        f.flush().unwrap();
        let mut h = Hasher::new(ChecksumType::Sha256);
        h.update_from_file(f.path(), 6).unwrap();
        assert_eq!(h.finalize_hex(), HELLO_SHA256);

        let mut h = Hasher::new(ChecksumType::Sha256);
        assert!(h.update_from_file(f.path(), 1000).is_err());
    }

    #[test]
    fn comparison_is_case_insensitive() {
        assert!(digests_match(&HELLO_SHA256.to_uppercase(), HELLO_SHA256));
        assert!(!digests_match("00", HELLO_SHA256));
    }

    #[test]
    fn parse_expected_checksums() {
        let e = ExpectedChecksum::parse(&format!("SHA-256:{HELLO_SHA256}")).unwrap();
        assert_eq!(e.kind, ChecksumType::Sha256);
        assert!(e.matches(HELLO_SHA256));

        let e = ExpectedChecksum::parse("b1946ac92492d2347c6235b4d2611184").unwrap();
        assert_eq!(e.kind, ChecksumType::Md5);

        assert!(matches!(
            ExpectedChecksum::parse("crc32:abcd"),
            Err(ChecksumParseError::UnknownType(_))
        ));
        assert!(matches!(
            ExpectedChecksum::parse("sha1:zz"),
            Err(ChecksumParseError::NotHex(_))
        ));
        assert!(matches!(
            ExpectedChecksum::parse("sha1:abcd"),
            Err(ChecksumParseError::WrongLength { got: 4, .. })
        ));
    }
}
