//! CLI for the tplfetch transfer engine.

mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tplfetch_core::checksum::ChecksumType;
use tplfetch_core::config;

use commands::{run_checksum, run_get};

/// Top-level CLI for tplfetch.
#[derive(Debug, Parser)]
#[command(name = "tplfetch")]
#[command(about = "tplfetch: resilient, resumable template archive fetcher", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download one or more archives, resuming partial files.
    Get(GetArgs),

    /// Compute the digest of a file (e.g. after download).
    Checksum {
        /// Path to the file.
        path: PathBuf,
        /// Digest algorithm: md5, sha1 or sha256.
        #[arg(long = "type", value_name = "TYPE", default_value = "sha256")]
        kind: ChecksumType,
    },
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Direct HTTP/HTTPS URLs to download.
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Output file for a single URL, or output directory for several.
    /// Defaults to the current directory.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Expected checksum as `type:hex` or bare hex (single URL only).
    #[arg(long, value_name = "CHECKSUM")]
    pub checksum: Option<String>,

    /// Retry strategy: default, fast, slow or linear.
    #[arg(long, value_name = "NAME")]
    pub strategy: Option<String>,

    /// Ignore partial files and download from the first byte.
    #[arg(long)]
    pub no_resume: bool,

    /// Bytes per ranged request (overrides the config file).
    #[arg(long, value_name = "BYTES")]
    pub chunk_size: Option<u64>,

    /// Download up to N URLs concurrently.
    #[arg(long, default_value = "1", value_name = "N")]
    pub jobs: usize,

    /// Give up on the whole run after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Print retry, error and pool statistics as JSON when done.
    #[arg(long)]
    pub stats: bool,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Get(args) => run_get(&cfg, args).await?,
            CliCommand::Checksum { path, kind } => run_checksum(&path, kind)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
