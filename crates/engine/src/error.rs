//! Engine error taxonomy.
//!
//! Everything that can go wrong inside one item's run ends up as one of these
//! and is rendered into the item's status message via `Display`.

use std::io;

use mailshift_core::{SecretError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The sync executable could not be started at all.
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Non-zero exit that was not caused by a signal.
    #[error("exited with code {0}, check logs")]
    ProcessExit(i32),

    /// Killed by a signal nobody asked for (SIGSEGV, OOM killer, ...).
    #[error("terminated by signal {0}, check logs")]
    Signaled(i32),

    /// Termination or kill signal observed after a stop request.
    #[error("stopped by user")]
    Cancelled,

    #[error("timed out after {0} seconds")]
    TimedOut(u64),

    /// Log write or credential-file failure.
    #[error("I/O error: {0}")]
    TransientIo(#[from] io::Error),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
