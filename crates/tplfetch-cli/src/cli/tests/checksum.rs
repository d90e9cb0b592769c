//! Tests for `checksum`.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;
use tplfetch_core::checksum::ChecksumType;

#[test]
fn cli_parse_checksum_defaults_to_sha256() {
    match parse(&["tplfetch", "checksum", "/path/to/file.bin"]) {
        CliCommand::Checksum { path, kind } => {
            assert_eq!(path, std::path::Path::new("/path/to/file.bin"));
            assert_eq!(kind, ChecksumType::Sha256);
        }
        _ => panic!("expected Checksum"),
    }
}

#[test]
fn cli_parse_checksum_type() {
    match parse(&["tplfetch", "checksum", "f", "--type", "SHA-1"]) {
        CliCommand::Checksum { kind, .. } => assert_eq!(kind, ChecksumType::Sha1),
        _ => panic!("expected Checksum"),
    }
}

#[test]
fn cli_parse_checksum_rejects_unknown_type() {
    assert!(Cli::try_parse_from(["tplfetch", "checksum", "f", "--type", "crc32"]).is_err());
}
