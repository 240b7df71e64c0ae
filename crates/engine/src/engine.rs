//! Orchestration facade tying store, cipher, pool and runner together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mailshift_core::config::{RecoveryPolicy, WorkerConfig};
use mailshift_core::{
    DashboardStats, ItemId, ItemStatus, ItemView, Job, JobConfig, JobDetail, JobId, JobView,
    MailboxCredentials, MigrationStore, SecretCipher, StoredCredentials,
};
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::pool::WorkerPool;
use crate::reconciler::JobReconciler;
use crate::recovery::{recover, RecoveryReport};
use crate::registry::ProcessRegistry;
use crate::runner::{log_path, ItemRunner, STOPPED_MESSAGE};
use crate::supervisor::Supervisor;

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// A live process was asked to terminate.
    Terminated,
    /// No process was registered: never started or already finished.
    NotRunning,
}

pub struct MigrationEngine {
    store: Arc<dyn MigrationStore>,
    cipher: Arc<dyn SecretCipher>,
    registry: ProcessRegistry,
    pool: WorkerPool,
    runner: ItemRunner,
    reconciler: JobReconciler,
    recovery_policy: RecoveryPolicy,
    log_dir: PathBuf,
}

impl MigrationEngine {
    /// Build an engine. Spawns the pool dispatcher, so a Tokio runtime must be running.
    pub fn new(
        store: Arc<dyn MigrationStore>,
        cipher: Arc<dyn SecretCipher>,
        worker: &WorkerConfig,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        let log_dir = log_dir.into();
        let registry = ProcessRegistry::new();
        let supervisor = Supervisor::new(worker.terminate_grace(), worker.max_runtime());
        let runner = ItemRunner::new(
            store.clone(),
            cipher.clone(),
            registry.clone(),
            supervisor,
            worker.sync_binary.clone(),
            log_dir.clone(),
        );
        Self {
            reconciler: JobReconciler::new(store.clone()),
            pool: WorkerPool::new(worker.max_workers),
            store,
            cipher,
            registry,
            runner,
            recovery_policy: worker.recovery_policy,
            log_dir,
        }
    }

    /// Settle orphaned items from a previous run and resubmit pending ones.
    /// Call once, before accepting new work.
    pub async fn start(&self) -> Result<RecoveryReport> {
        let report = recover(self.store.as_ref(), &self.reconciler, self.recovery_policy).await?;
        for item_id in &report.resubmit {
            self.submit(*item_id);
        }
        Ok(report)
    }

    pub async fn create_job(&self, config: JobConfig) -> Result<Job> {
        let job = self.store.create_job(config).await?;
        info!(job_id = %job.id, name = %job.name, source = %job.source.host, target = %job.target.host, "job created");
        Ok(job)
    }

    /// Add one mailbox pair to a job and queue it.
    pub async fn add_mailbox(&self, job_id: JobId, mailbox: MailboxCredentials) -> Result<ItemId> {
        let item_id = self.insert_item(job_id, mailbox).await?;
        self.submit(item_id);
        Ok(item_id)
    }

    /// Add a batch of mailbox pairs. Every item is recorded before any is queued.
    pub async fn add_mailboxes(
        &self,
        job_id: JobId,
        mailboxes: Vec<MailboxCredentials>,
    ) -> Result<Vec<ItemId>> {
        let mut ids = Vec::with_capacity(mailboxes.len());
        for mailbox in mailboxes {
            ids.push(self.insert_item(job_id, mailbox).await?);
        }
        for id in &ids {
            self.submit(*id);
        }
        info!(job_id = %job_id, count = ids.len(), "mailboxes queued");
        Ok(ids)
    }

    async fn insert_item(&self, job_id: JobId, mailbox: MailboxCredentials) -> Result<ItemId> {
        if self.store.get_job(job_id).await?.is_none() {
            return Err(EngineError::RecordNotFound(format!("job {job_id}")));
        }
        let source = StoredCredentials {
            user: mailbox.source_user,
            secret: self.cipher.encrypt(&mailbox.source_password)?,
        };
        let target = StoredCredentials {
            user: mailbox.target_user,
            secret: self.cipher.encrypt(&mailbox.target_password)?,
        };
        let item = self.store.add_item(job_id, source, target).await.map_err(|e| {
            if e.is_not_found() {
                EngineError::RecordNotFound(format!("job {job_id}"))
            } else {
                e.into()
            }
        })?;
        Ok(item.id)
    }

    fn submit(&self, item_id: ItemId) {
        let runner = self.runner.clone();
        self.pool.submit(move || async move { runner.run(item_id).await });
    }

    /// Stop an item: signal its process, and mark it failed right away if it is running.
    pub async fn stop_item(&self, item_id: ItemId) -> Result<StopOutcome> {
        let outcome = if self.registry.terminate(item_id) {
            StopOutcome::Terminated
        } else {
            StopOutcome::NotRunning
        };

        if let Some(mut item) = self.store.get_item(item_id).await? {
            if item.status == ItemStatus::Running {
                item.transition(ItemStatus::Failed, STOPPED_MESSAGE);
                // The runner may have finished meanwhile; its result stands.
                let written = self
                    .store
                    .compare_and_update_item(&item, ItemStatus::Running)
                    .await?;
                if written {
                    if let Err(e) = self.reconciler.reconcile(item.job_id).await {
                        warn!(job_id = %item.job_id, error = %e, "reconciliation after stop failed");
                    }
                }
            }
        }

        info!(item_id = %item_id, ?outcome, "stop requested");
        Ok(outcome)
    }

    /// Signal every live process. Their runners record them as stopped.
    pub fn stop_all(&self) -> usize {
        let n = self.registry.terminate_all();
        if n > 0 {
            info!(count = n, "stopping all running items");
        }
        n
    }

    /// Stop accepting work, drop queued items and signal running ones.
    /// Dropped items stay `pending` in the store and are resubmitted by the next [`start`](Self::start).
    pub fn shutdown(&self) -> usize {
        self.pool.close();
        self.stop_all()
    }

    /// Reconciled job with its items.
    pub async fn job_view(&self, job_id: JobId) -> Result<JobDetail> {
        let job = self
            .reconciler
            .reconcile(job_id)
            .await?
            .ok_or_else(|| EngineError::RecordNotFound(format!("job {job_id}")))?;
        let items = self.store.list_items(job_id).await?;
        Ok(JobDetail {
            job: JobView::from(&job),
            items: items.iter().map(ItemView::from).collect(),
        })
    }

    /// Every job, newest first, each reconciled before it is returned.
    pub async fn list_jobs(&self) -> Result<Vec<JobView>> {
        let mut views = Vec::new();
        for job in self.store.list_jobs().await? {
            if let Some(job) = self.reconciler.reconcile(job.id).await? {
                views.push(JobView::from(&job));
            }
        }
        Ok(views)
    }

    /// Log artifact contents, or a status placeholder when nothing was written yet.
    pub async fn item_log(&self, item_id: ItemId) -> Result<String> {
        read_item_log(self.store.as_ref(), &self.log_dir, item_id).await
    }

    pub async fn dashboard(&self) -> Result<DashboardStats> {
        Ok(DashboardStats::from_jobs(&self.list_jobs().await?))
    }

    /// Resolve once no item is queued or running.
    pub async fn wait_idle(&self) {
        self.pool.wait_idle().await;
    }

    pub fn store(&self) -> &Arc<dyn MigrationStore> {
        &self.store
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

/// Read an item's log without an engine, e.g. from a separate process.
pub async fn read_item_log(
    store: &dyn MigrationStore,
    log_dir: &Path,
    item_id: ItemId,
) -> Result<String> {
    let item = store
        .get_item(item_id)
        .await?
        .ok_or_else(|| EngineError::RecordNotFound(format!("item {item_id}")))?;

    match tokio::fs::read(log_path(log_dir, item_id)).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(format!(
            "Waiting for logs / Starting process...\nStatus: {}\nMessage: {}",
            item.status,
            item.message.as_deref().unwrap_or("")
        )),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use mailshift_core::{AesGcmCipher, Endpoint, MemoryStore};

    use super::*;

    fn engine(log_dir: &std::path::Path) -> MigrationEngine {
        let worker = WorkerConfig {
            sync_binary: "/nonexistent/imapsync".into(),
            ..WorkerConfig::default()
        };
        MigrationEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(AesGcmCipher::new(&[1u8; 32]).unwrap()),
            &worker,
            log_dir,
        )
    }

    #[tokio::test]
    async fn add_to_missing_job_is_record_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let err = engine
            .add_mailbox(JobId::new(), MailboxCredentials::new("a", "p", "b", "q"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RecordNotFound(_)));
    }

    #[tokio::test]
    async fn secrets_are_encrypted_at_rest() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let job = engine
            .create_job(JobConfig::new(Endpoint::new("a"), Endpoint::new("b")))
            .await
            .unwrap();
        let id = engine
            .add_mailbox(job.id, MailboxCredentials::new("alice", "hunter2", "alice2", "swordfish"))
            .await
            .unwrap();
        engine.wait_idle().await;

        let item = engine.store().get_item(id).await.unwrap().unwrap();
        assert_eq!(item.source.user, "alice");
        assert_ne!(item.source.secret, "hunter2");
        assert_ne!(item.target.secret, "swordfish");
        assert!(!item.source.secret.is_empty());
    }

    #[tokio::test]
    async fn stop_unknown_item_is_not_running() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        assert_eq!(engine.stop_item(ItemId(5)).await.unwrap(), StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn item_log_placeholder_before_any_output() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let job = engine
            .create_job(JobConfig::new(Endpoint::new("a"), Endpoint::new("b")))
            .await
            .unwrap();
        let creds = StoredCredentials {
            user: "u".into(),
            secret: String::new(),
        };
        // Stored directly so no runner touches it.
        let item = engine.store().add_item(job.id, creds.clone(), creds).await.unwrap();

        let log = engine.item_log(item.id).await.unwrap();
        assert!(log.starts_with("Waiting for logs / Starting process..."));
        assert!(log.contains("Status: pending"));
    }

    #[tokio::test]
    async fn dashboard_on_empty_store() {
        let tmp = tempfile::tempdir().unwrap();
        let stats = engine(tmp.path()).dashboard().await.unwrap();
        assert_eq!(stats.total_jobs, 0);
        assert_eq!(stats.active_jobs, 0);
        assert_eq!(stats.completed_items, 0);
        assert_eq!(stats.data_transferred, "0 B");
    }
}
