use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::state::{Snapshot, StoreState};
use super::MigrationStore;
use crate::error::StoreError;
use crate::model::{Item, ItemId, ItemStatus, Job, JobConfig, JobId, JobProgress, StoredCredentials};

/// JSON-file-backed store. The whole record set is rewritten after every
/// mutation (temp file + rename), while the write lock is held. Memory only
/// changes once the file write succeeded.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

impl JsonFileStore {
    /// Open `path`, loading existing records if the file is present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            let snapshot: Snapshot = serde_json::from_str(&data)?;
            info!("Loaded migration store from {}", path.display());
            StoreState::from_snapshot(snapshot)
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            StoreState::default()
        };
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&state.snapshot())?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(path = %self.path.display(), "store persisted");
        Ok(())
    }

    /// Run a mutation on a copy of the state under the write lock. The copy
    /// replaces the live state only after it was written to disk.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *state = next;
        Ok(out)
    }
}

#[async_trait]
impl MigrationStore for JsonFileStore {
    async fn create_job(&self, config: JobConfig) -> Result<Job, StoreError> {
        self.mutate(|s| Ok(s.create_job(config))).await
    }

    async fn add_item(
        &self,
        job_id: JobId,
        source: StoredCredentials,
        target: StoredCredentials,
    ) -> Result<Item, StoreError> {
        self.mutate(|s| s.add_item(job_id, source, target)).await
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.state.read().await.get_job(id))
    }

    async fn get_item(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
        Ok(self.state.read().await.get_item(id))
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.state.read().await.list_jobs())
    }

    async fn list_items(&self, job_id: JobId) -> Result<Vec<Item>, StoreError> {
        Ok(self.state.read().await.list_items(job_id))
    }

    async fn list_items_with_status(&self, status: ItemStatus) -> Result<Vec<Item>, StoreError> {
        Ok(self.state.read().await.list_items_with_status(status))
    }

    async fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        self.mutate(|s| s.update_job(job)).await
    }

    async fn update_job_progress(&self, id: JobId, progress: JobProgress) -> Result<(), StoreError> {
        self.mutate(|s| s.update_job_progress(id, progress)).await
    }

    async fn add_job_bytes(&self, id: JobId, bytes: u64) -> Result<(), StoreError> {
        self.mutate(|s| s.add_job_bytes(id, bytes)).await
    }

    async fn update_item(&self, item: &Item) -> Result<(), StoreError> {
        self.mutate(|s| s.update_item(item)).await
    }

    async fn compare_and_update_item(
        &self,
        item: &Item,
        expected: ItemStatus,
    ) -> Result<bool, StoreError> {
        self.mutate(|s| s.compare_and_update_item(item, expected)).await
    }

    async fn delete_job(&self, id: JobId) -> Result<(), StoreError> {
        self.mutate(|s| s.delete_job(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Endpoint;

    fn creds(user: &str) -> StoredCredentials {
        StoredCredentials { user: user.to_string(), secret: "token".to_string() }
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store").join("mailshift.json");

        let (job_id, item_id) = {
            let store = JsonFileStore::open(&path).unwrap();
            let job = store
                .create_job(JobConfig::new(Endpoint::new("src"), Endpoint::new("dst")))
                .await
                .unwrap();
            let mut item = store.add_item(job.id, creds("a"), creds("b")).await.unwrap();
            item.status = ItemStatus::Running;
            store.update_item(&item).await.unwrap();
            (job.id, item.id)
        };

        let reopened = JsonFileStore::open(&path).unwrap();
        let job = reopened.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.total_items, 1);
        let item = reopened.get_item(item_id).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Running);
        assert_eq!(item.target.user, "b");

        // Ids keep counting after a reopen.
        let next = reopened.add_item(job_id, creds("c"), creds("d")).await.unwrap();
        assert!(next.id > item_id);
    }

    #[tokio::test]
    async fn failed_mutation_does_not_persist() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mailshift.json");
        let store = JsonFileStore::open(&path).unwrap();

        assert!(store.add_item(JobId::new(), creds("a"), creds("b")).await.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn write_failure_leaves_memory_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mailshift.json");
        let store = JsonFileStore::open(&path).unwrap();
        let job = store
            .create_job(JobConfig::new(Endpoint::new("src"), Endpoint::new("dst")))
            .await
            .unwrap();

        // A non-empty directory in place of the snapshot makes the rename fail.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("blocker"), "x").unwrap();

        assert!(store.add_item(job.id, creds("a"), creds("b")).await.is_err());
        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.total_items, 0);
        assert!(store.list_items(job.id).await.unwrap().is_empty());
        assert!(!path.with_extension("json.tmp").exists());

        std::fs::remove_dir_all(&path).unwrap();
        let item = store.add_item(job.id, creds("a"), creds("b")).await.unwrap();
        assert_eq!(store.get_job(job.id).await.unwrap().unwrap().total_items, 1);

        let reopened = JsonFileStore::open(&path).unwrap();
        let ids: Vec<ItemId> = reopened.list_items(job.id).await.unwrap().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![item.id]);
    }
}
