//! Start-up recovery of items left behind by an unclean shutdown.

use std::collections::BTreeSet;

use mailshift_core::config::RecoveryPolicy;
use mailshift_core::{ItemId, ItemStatus, JobId, MigrationStore};
use tracing::{info, warn};

use crate::error::Result;
use crate::reconciler::JobReconciler;

pub const INTERRUPTED_MESSAGE: &str = "interrupted by restart";
pub const REQUEUED_MESSAGE: &str = "requeued after restart";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Orphaned `running` items marked failed.
    pub interrupted: Vec<ItemId>,
    /// Orphaned `running` items put back to `pending`.
    pub requeued: Vec<ItemId>,
    /// Every `pending` item, oldest first, including the requeued ones.
    pub resubmit: Vec<ItemId>,
}

/// Settle items no runner owns any more. Must run before any worker starts:
/// a `running` item is assumed orphaned.
pub async fn recover(
    store: &dyn MigrationStore,
    reconciler: &JobReconciler,
    policy: RecoveryPolicy,
) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();
    let mut touched: BTreeSet<JobId> = BTreeSet::new();

    for mut item in store.list_items_with_status(ItemStatus::Running).await? {
        match policy {
            RecoveryPolicy::Fail => {
                item.transition(ItemStatus::Failed, INTERRUPTED_MESSAGE);
                report.interrupted.push(item.id);
            }
            RecoveryPolicy::Requeue => {
                // The only way back to pending: no runner exists for this item.
                item.status = ItemStatus::Pending;
                item.message = Some(REQUEUED_MESSAGE.to_string());
                item.bytes_transferred = 0;
                report.requeued.push(item.id);
            }
        }
        store.update_item(&item).await?;
        touched.insert(item.job_id);
    }

    let mut pending = store.list_items_with_status(ItemStatus::Pending).await?;
    pending.sort_by_key(|item| item.id);
    for item in &pending {
        touched.insert(item.job_id);
    }
    report.resubmit = pending.into_iter().map(|item| item.id).collect();

    for job_id in touched {
        if let Err(e) = reconciler.reconcile(job_id).await {
            warn!(job_id = %job_id, error = %e, "reconciliation after recovery failed");
        }
    }

    if !report.interrupted.is_empty() || !report.requeued.is_empty() || !report.resubmit.is_empty() {
        info!(
            policy = policy.as_str(),
            interrupted = report.interrupted.len(),
            requeued = report.requeued.len(),
            resubmit = report.resubmit.len(),
            "recovered unfinished items"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mailshift_core::{Endpoint, Item, JobConfig, JobStatus, MemoryStore, StoredCredentials};

    use super::*;

    fn creds() -> StoredCredentials {
        StoredCredentials {
            user: "u".into(),
            secret: String::new(),
        }
    }

    /// One job with a success, a running and a pending item.
    async fn crashed_store() -> (Arc<MemoryStore>, JobId, Vec<Item>) {
        let store = Arc::new(MemoryStore::new());
        let job = store
            .create_job(JobConfig::new(Endpoint::new("a"), Endpoint::new("b")))
            .await
            .unwrap();
        let mut items = Vec::new();
        for _ in 0..3 {
            items.push(store.add_item(job.id, creds(), creds()).await.unwrap());
        }
        items[0].transition(ItemStatus::Running, "Starting sync...");
        items[0].transition(ItemStatus::Success, "completed successfully");
        items[1].transition(ItemStatus::Running, "Starting sync...");
        store.update_item(&items[0]).await.unwrap();
        store.update_item(&items[1]).await.unwrap();
        (store, job.id, items)
    }

    #[tokio::test]
    async fn fail_policy_marks_orphans_failed() {
        let (store, job_id, items) = crashed_store().await;
        let reconciler = JobReconciler::new(store.clone());

        let report = recover(store.as_ref(), &reconciler, RecoveryPolicy::Fail).await.unwrap();
        assert_eq!(report.interrupted, vec![items[1].id]);
        assert!(report.requeued.is_empty());
        assert_eq!(report.resubmit, vec![items[2].id]);

        let orphan = store.get_item(items[1].id).await.unwrap().unwrap();
        assert_eq!(orphan.status, ItemStatus::Failed);
        assert_eq!(orphan.message.as_deref(), Some(INTERRUPTED_MESSAGE));

        let job = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!((job.completed, job.failed), (1, 1));
        assert_eq!(job.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn requeue_policy_resubmits_orphans() {
        let (store, _, items) = crashed_store().await;
        let reconciler = JobReconciler::new(store.clone());

        let report = recover(store.as_ref(), &reconciler, RecoveryPolicy::Requeue).await.unwrap();
        assert_eq!(report.requeued, vec![items[1].id]);
        assert_eq!(report.resubmit, vec![items[1].id, items[2].id]);
        assert_eq!(
            store.get_item(items[1].id).await.unwrap().unwrap().status,
            ItemStatus::Pending
        );
    }

    #[tokio::test]
    async fn clean_store_is_untouched() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = JobReconciler::new(store.clone());
        let report = recover(store.as_ref(), &reconciler, RecoveryPolicy::Fail).await.unwrap();
        assert_eq!(report, RecoveryReport::default());
    }
}
