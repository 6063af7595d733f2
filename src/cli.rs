//! Command line interface for the `fileframe` binary.
//!
//! Shared with `build.rs`, which renders the man page from it, so this module
//! depends only on `clap` and the standard library.

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};

/// Command line arguments for the `fileframe` binary.
#[derive(Debug, Parser)]
#[command(
    name = "fileframe",
    version,
    about = "Manage files on a device over a fragmenting byte link"
)]
pub struct Cli {
    /// Address of the TCP bridge carrying the device link.
    #[arg(short, long, value_name = "ADDR")]
    pub connect: String,

    /// Size of the receive buffer advertised to the device, in bytes.
    #[arg(long, default_value_t = 1024, value_name = "BYTES")]
    pub receive_capacity: usize,

    /// Largest piece written to the link in one call, in bytes.
    #[arg(long, default_value_t = 512, value_name = "BYTES")]
    pub fragment_len: usize,

    /// Delay between outbound pieces, in milliseconds. Zero disables pacing.
    #[arg(long, default_value_t = 100, value_name = "MS")]
    pub pacing_ms: u64,

    /// Per-operation timeout, in seconds. Zero waits indefinitely.
    #[arg(long, default_value_t = 30, value_name = "SECS")]
    pub timeout_secs: u64,

    /// Operation to run.
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Pacing delay as a duration.
    #[must_use]
    pub fn pacing_delay(&self) -> Duration { Duration::from_millis(self.pacing_ms) }

    /// Operation timeout, or `None` when disabled.
    #[must_use]
    pub fn operation_timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Operations the binary can run against the device.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List a directory.
    Ls {
        /// Directory to list.
        #[arg(default_value = "/")]
        path: String,
    },
    /// Copy a file from the device.
    Get {
        /// File on the device.
        remote: String,
        /// Destination file. Standard output when omitted.
        local: Option<PathBuf>,
    },
    /// Copy a local file to the device.
    Put {
        /// Source file.
        local: PathBuf,
        /// Destination on the device.
        remote: String,
        /// Byte offset to start writing at.
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Create a directory.
    Mkdir {
        /// Directory to create.
        path: String,
    },
    /// Delete a file or directory.
    Rm {
        /// Path to delete.
        path: String,
    },
    /// Move or rename a file or directory.
    Mv {
        /// Current path.
        from: String,
        /// New path.
        to: String,
    },
}
