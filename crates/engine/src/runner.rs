//! Per-item state machine.
//!
//! One [`ItemRunner::run`] call drives a single item from `pending` to a
//! terminal status. Every failure inside the run is folded into the item's
//! status message; nothing propagates to the worker pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mailshift_core::{Item, ItemId, ItemStatus, Job, MigrationStore, SecretCipher};
use tracing::{debug, info, warn};

use crate::command::{CredentialFile, SyncCommand, SyncSide};
use crate::error::{EngineError, Result};
use crate::reconciler::JobReconciler;
use crate::registry::ProcessRegistry;
use crate::supervisor::{ExitOutcome, LogSink, ProcessReport, Supervisor};

pub const STARTING_MESSAGE: &str = "Starting sync...";
pub const SUCCESS_MESSAGE: &str = "completed successfully";
pub const STOPPED_MESSAGE: &str = "stopped by user";

/// Log artifact location for an item.
pub fn log_path(log_dir: &Path, item_id: ItemId) -> PathBuf {
    log_dir.join(format!("{item_id}.log"))
}

#[derive(Clone)]
pub struct ItemRunner {
    store: Arc<dyn MigrationStore>,
    cipher: Arc<dyn SecretCipher>,
    registry: ProcessRegistry,
    reconciler: JobReconciler,
    supervisor: Supervisor,
    sync_binary: String,
    log_dir: PathBuf,
}

impl ItemRunner {
    pub fn new(
        store: Arc<dyn MigrationStore>,
        cipher: Arc<dyn SecretCipher>,
        registry: ProcessRegistry,
        supervisor: Supervisor,
        sync_binary: impl Into<String>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            reconciler: JobReconciler::new(store.clone()),
            store,
            cipher,
            registry,
            supervisor,
            sync_binary: sync_binary.into(),
            log_dir: log_dir.into(),
        }
    }

    /// Run one item to completion, then reconcile its job.
    pub async fn run(&self, item_id: ItemId) {
        let Some((item, job)) = self.load(item_id).await else {
            return;
        };
        let job_id = job.id;

        self.execute(item, &job).await;

        match self.reconciler.reconcile(job_id).await {
            Ok(Some(job)) => debug!(
                job_id = %job_id,
                completed = job.completed,
                failed = job.failed,
                status = %job.status,
                "job progress"
            ),
            Ok(None) => {}
            Err(e) => warn!(job_id = %job_id, error = %e, "reconciliation failed"),
        }
    }

    /// Item and owning job, or `None` if either vanished.
    async fn load(&self, item_id: ItemId) -> Option<(Item, Job)> {
        let item = match self.store.get_item(item_id).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                debug!(item_id = %item_id, "item gone before start, skipping");
                return None;
            }
            Err(e) => {
                warn!(item_id = %item_id, error = %e, "failed to load item");
                return None;
            }
        };
        match self.store.get_job(item.job_id).await {
            Ok(Some(job)) => Some((item, job)),
            Ok(None) => {
                debug!(item_id = %item_id, job_id = %item.job_id, "job gone before start, skipping");
                None
            }
            Err(e) => {
                warn!(item_id = %item_id, error = %e, "failed to load job");
                None
            }
        }
    }

    async fn execute(&self, mut item: Item, job: &Job) {
        if item.status != ItemStatus::Pending {
            debug!(item_id = %item.id, status = %item.status, "item not pending, skipping");
            return;
        }

        item.transition(ItemStatus::Running, STARTING_MESSAGE);
        if let Err(e) = self.store.update_item(&item).await {
            warn!(item_id = %item.id, error = %e, "failed to mark item running");
            return;
        }
        info!(item_id = %item.id, job_id = %job.id, source_user = %item.source.user, "item started");

        let log_path = log_path(&self.log_dir, item.id);
        let (status, message) = match self.sync(&item, job, &log_path).await {
            Ok(report) => {
                if report.bytes_transferred > 0 {
                    item.bytes_transferred = report.bytes_transferred;
                    if let Err(e) = self.store.add_job_bytes(job.id, report.bytes_transferred).await {
                        debug!(job_id = %job.id, error = %e, "running byte total not updated");
                    }
                }
                self.classify(&report)
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(log_err) = LogSink::append_critical(&log_path, &message).await {
                    warn!(item_id = %item.id, error = %log_err, "failed to annotate log");
                }
                (ItemStatus::Failed, message)
            }
        };

        item.transition(status, message.clone());
        match self.store.update_item(&item).await {
            Ok(()) => info!(item_id = %item.id, status = %status, message = %message, "item finished"),
            Err(e) => warn!(item_id = %item.id, error = %e, "failed to persist item result"),
        }
    }

    /// Decrypt, materialise credentials, launch, supervise.
    async fn sync(&self, item: &Item, job: &Job, log_path: &Path) -> Result<ProcessReport> {
        let source_file = CredentialFile::write(&self.cipher.decrypt(&item.source.secret)?)?;
        let target_file = CredentialFile::write(&self.cipher.decrypt(&item.target.secret)?)?;

        let command = SyncCommand::build(
            &self.sync_binary,
            &SyncSide {
                endpoint: &job.source,
                user: &item.source.user,
                passfile: source_file.path(),
            },
            &SyncSide {
                endpoint: &job.target,
                user: &item.target.user,
                passfile: target_file.path(),
            },
            &job.options,
        );

        let log = LogSink::create(log_path).await?;
        let process = self.supervisor.launch(&command.program, &command.args, log)?;
        let handle = process.handle();
        let _registration = self.registry.register_scoped(item.id, handle.clone());
        info!(item_id = %item.id, pid = ?handle.pid(), "sync process running");

        // A stop that landed between `running` and registration found nothing to signal.
        if self.stopped_meanwhile(item.id).await {
            info!(item_id = %item.id, "stop requested before registration, terminating");
            handle.request_terminate();
        }

        process.wait().await
    }

    async fn stopped_meanwhile(&self, item_id: ItemId) -> bool {
        matches!(
            self.store.get_item(item_id).await,
            Ok(Some(item)) if item.status == ItemStatus::Failed
        )
    }

    fn classify(&self, report: &ProcessReport) -> (ItemStatus, String) {
        let failure = match report.outcome {
            ExitOutcome::Exited(0) => return (ItemStatus::Success, SUCCESS_MESSAGE.to_string()),
            _ if report.timed_out => EngineError::TimedOut(
                self.supervisor.max_runtime.map(|d| d.as_secs()).unwrap_or_default(),
            ),
            ExitOutcome::Terminated | ExitOutcome::Killed => EngineError::Cancelled,
            ExitOutcome::Exited(code) => EngineError::ProcessExit(code),
            ExitOutcome::Signaled(sig) => EngineError::Signaled(sig),
        };
        (ItemStatus::Failed, failure.to_string())
    }
}
