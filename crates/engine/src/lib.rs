//! Mailbox migration engine.
//!
//! Items of a job are queued on a bounded [`WorkerPool`]; each is driven by an
//! [`ItemRunner`] that launches the external sync tool under a [`Supervisor`],
//! keeps it stoppable through the [`ProcessRegistry`], and finally hands the
//! job to the [`JobReconciler`]. [`MigrationEngine`] is the entry point.

pub mod command;
pub mod engine;
pub mod error;
pub mod pool;
pub mod reconciler;
pub mod recovery;
pub mod registry;
pub mod runner;
pub mod supervisor;
pub mod transfer;

pub use engine::{read_item_log, MigrationEngine, StopOutcome};
pub use error::{EngineError, Result};
pub use pool::WorkerPool;
pub use reconciler::JobReconciler;
pub use recovery::{recover, RecoveryReport};
pub use registry::ProcessRegistry;
pub use runner::ItemRunner;
pub use supervisor::{ExitOutcome, LogSink, ProcessHandle, ProcessReport, Supervisor};
pub use transfer::TransferTally;
