use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Mailbox migration driver.
///
/// Runs batches of mailbox copies through an external IMAP sync tool,
/// a bounded number at a time, and keeps per-mailbox state on disk.
#[derive(Parser, Debug)]
#[command(name = "mailshift", version, about)]
pub struct CliArgs {
    /// Config profile; every setting is first looked up as `{PROFILE}_{KEY}`.
    #[arg(long, global = true, env = "MAILSHIFT_PROFILE")]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a job from a TOML manifest and run every mailbox in it.
    Run {
        /// Manifest with `source`, `target`, `options` and `[[mailboxes]]`.
        manifest: PathBuf,

        /// Seconds between progress lines.
        #[arg(long, default_value_t = 5)]
        progress_interval: u64,
    },

    /// Show one job with its mailboxes, or every job.
    Status {
        /// Job id; omit to list all jobs.
        job_id: Option<String>,
    },

    /// Print a mailbox's sync log.
    Logs {
        item_id: u64,
    },

    /// Check that the sync tool is installed and the store opens.
    Check,
}
