use std::sync::Arc;

use mailshift_core::{Item, ItemStatus, Job, JobId, JobProgress, JobStatus, MigrationStore};
use tracing::debug;

use crate::error::Result;

/// Rebuilds a job's aggregate counters from its item records.
///
/// Cached counters on the job are never read back as input, so any number of
/// concurrent reconciliations of the same job converge on the same values.
#[derive(Clone)]
pub struct JobReconciler {
    store: Arc<dyn MigrationStore>,
}

impl JobReconciler {
    pub fn new(store: Arc<dyn MigrationStore>) -> Self {
        Self { store }
    }

    /// Reconcile one job. Returns the up-to-date job, or `None` if it no longer exists.
    pub async fn reconcile(&self, job_id: JobId) -> Result<Option<Job>> {
        let Some(mut job) = self.store.get_job(job_id).await? else {
            return Ok(None);
        };
        let items = self.store.list_items(job_id).await?;

        let next = recompute(&job, &items);
        if next != job.progress() {
            self.store.update_job_progress(job_id, next).await?;
            debug!(
                job_id = %job_id,
                completed = next.completed,
                failed = next.failed,
                bytes = next.bytes_transferred,
                status = %next.status,
                "job reconciled"
            );
            job.apply_progress(next);
        }
        Ok(Some(job))
    }

    /// Reconciled view of a job without writing it back.
    pub async fn preview(&self, job_id: JobId) -> Result<Option<Job>> {
        let Some(mut job) = self.store.get_job(job_id).await? else {
            return Ok(None);
        };
        let items = self.store.list_items(job_id).await?;
        job.apply_progress(recompute(&job, &items));
        Ok(Some(job))
    }
}

/// Pure recomputation of the aggregate fields from `items`.
pub fn recompute(job: &Job, items: &[Item]) -> JobProgress {
    let mut completed = 0u32;
    let mut failed = 0u32;
    let mut bytes = 0u64;
    for item in items {
        match item.status {
            ItemStatus::Success => completed += 1,
            ItemStatus::Failed => failed += 1,
            ItemStatus::Pending | ItemStatus::Running => {}
        }
        bytes = bytes.saturating_add(item.bytes_transferred);
    }

    let done = completed + failed;
    let all_done = job.total_items > 0 && done >= job.total_items;
    let status = match job.status {
        JobStatus::Running if all_done => JobStatus::Completed,
        // Items were added after the job finished: it is running again.
        JobStatus::Completed if !all_done && job.total_items > 0 => JobStatus::Running,
        other => other,
    };

    JobProgress {
        completed,
        failed,
        bytes_transferred: bytes,
        status,
    }
}

#[cfg(test)]
mod tests {
    use mailshift_core::{Endpoint, ItemId, JobConfig, MemoryStore, StoredCredentials};

    use super::*;

    fn creds(user: &str) -> StoredCredentials {
        StoredCredentials {
            user: user.to_string(),
            secret: String::new(),
        }
    }

    async fn job_with_items(store: &MemoryStore, n: usize) -> (Job, Vec<Item>) {
        let job = store
            .create_job(JobConfig::new(Endpoint::new("src"), Endpoint::new("dst")))
            .await
            .unwrap();
        let mut items = Vec::new();
        for i in 0..n {
            let item = store
                .add_item(job.id, creds(&format!("s{i}")), creds(&format!("t{i}")))
                .await
                .unwrap();
            items.push(item);
        }
        (job, items)
    }

    async fn finish(store: &MemoryStore, id: ItemId, status: ItemStatus, bytes: u64) {
        let mut item = store.get_item(id).await.unwrap().unwrap();
        item.transition(ItemStatus::Running, "Starting sync...");
        item.transition(status, "done");
        item.bytes_transferred = bytes;
        store.update_item(&item).await.unwrap();
    }

    #[tokio::test]
    async fn counts_and_bytes_come_from_items() {
        let store = Arc::new(MemoryStore::new());
        let (job, items) = job_with_items(&store, 3).await;
        finish(&store, items[0].id, ItemStatus::Success, 900).await;
        finish(&store, items[1].id, ItemStatus::Failed, 100).await;

        // A stale incremental counter must not survive.
        store.add_job_bytes(job.id, 123_456).await.unwrap();

        let reconciler = JobReconciler::new(store.clone());
        let job = reconciler.reconcile(job.id).await.unwrap().unwrap();
        assert_eq!(job.completed, 1);
        assert_eq!(job.failed, 1);
        assert_eq!(job.bytes_transferred, 1000);
        assert_eq!(job.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn completes_only_when_every_item_is_terminal() {
        let store = Arc::new(MemoryStore::new());
        let (job, items) = job_with_items(&store, 2).await;
        let reconciler = JobReconciler::new(store.clone());

        finish(&store, items[0].id, ItemStatus::Success, 0).await;
        let j = reconciler.reconcile(job.id).await.unwrap().unwrap();
        assert_eq!(j.status, JobStatus::Running);

        finish(&store, items[1].id, ItemStatus::Failed, 0).await;
        let j = reconciler.reconcile(job.id).await.unwrap().unwrap();
        assert_eq!(j.status, JobStatus::Completed);
        assert_eq!(j.progress_percent(), 100);
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let (job, items) = job_with_items(&store, 3).await;
        finish(&store, items[2].id, ItemStatus::Success, 42).await;

        let reconciler = JobReconciler::new(store.clone());
        let first = reconciler.reconcile(job.id).await.unwrap().unwrap();
        let second = reconciler.reconcile(job.id).await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(store.get_job(job.id).await.unwrap().unwrap(), second);
    }

    #[tokio::test]
    async fn empty_job_never_completes() {
        let store = Arc::new(MemoryStore::new());
        let (job, _) = job_with_items(&store, 0).await;
        let j = JobReconciler::new(store.clone()).reconcile(job.id).await.unwrap().unwrap();
        assert_eq!(j.status, JobStatus::Running);
        assert_eq!(j.progress_percent(), 0);
    }

    #[tokio::test]
    async fn new_item_reopens_completed_job() {
        let store = Arc::new(MemoryStore::new());
        let (job, items) = job_with_items(&store, 1).await;
        let reconciler = JobReconciler::new(store.clone());
        finish(&store, items[0].id, ItemStatus::Success, 0).await;
        assert_eq!(
            reconciler.reconcile(job.id).await.unwrap().unwrap().status,
            JobStatus::Completed
        );

        store.add_item(job.id, creds("late"), creds("late")).await.unwrap();
        let j = reconciler.reconcile(job.id).await.unwrap().unwrap();
        assert_eq!(j.status, JobStatus::Running);
        assert_eq!(j.total_items, 2);
    }

    #[tokio::test]
    async fn preview_does_not_write() {
        let store = Arc::new(MemoryStore::new());
        let (job, items) = job_with_items(&store, 1).await;
        finish(&store, items[0].id, ItemStatus::Success, 7).await;

        let reconciler = JobReconciler::new(store.clone());
        let preview = reconciler.preview(job.id).await.unwrap().unwrap();
        assert_eq!(preview.status, JobStatus::Completed);
        assert_eq!(preview.bytes_transferred, 7);

        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.completed, 0);
    }

    #[tokio::test]
    async fn missing_job_is_none() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = JobReconciler::new(store);
        assert!(reconciler.reconcile(JobId::new()).await.unwrap().is_none());
    }
}
