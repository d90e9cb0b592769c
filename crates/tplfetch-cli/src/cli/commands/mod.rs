//! CLI command handlers, one file per command.

mod checksum;
mod get;
mod progress;

pub use checksum::run_checksum;
pub use get::run_get;
