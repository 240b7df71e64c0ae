use async_trait::async_trait;
use tokio::sync::RwLock;

use super::state::StoreState;
use super::MigrationStore;
use crate::error::StoreError;
use crate::model::{Item, ItemId, ItemStatus, Job, JobConfig, JobId, JobProgress, StoredCredentials};

/// Process-local store. Lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MigrationStore for MemoryStore {
    async fn create_job(&self, config: JobConfig) -> Result<Job, StoreError> {
        Ok(self.state.write().await.create_job(config))
    }

    async fn add_item(
        &self,
        job_id: JobId,
        source: StoredCredentials,
        target: StoredCredentials,
    ) -> Result<Item, StoreError> {
        self.state.write().await.add_item(job_id, source, target)
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
        self.state.write().await.update_job(job)
    }

    async fn update_job_progress(&self, id: JobId, progress: JobProgress) -> Result<(), StoreError> {
        self.state.write().await.update_job_progress(id, progress)
    }

    async fn add_job_bytes(&self, id: JobId, bytes: u64) -> Result<(), StoreError> {
        self.state.write().await.add_job_bytes(id, bytes)
    }

    async fn update_item(&self, item: &Item) -> Result<(), StoreError> {
        self.state.write().await.update_item(item)
    }

    async fn compare_and_update_item(
        &self,
        item: &Item,
        expected: ItemStatus,
    ) -> Result<bool, StoreError> {
        self.state.write().await.compare_and_update_item(item, expected)
    }

    async fn delete_job(&self, id: JobId) -> Result<(), StoreError> {
        self.state.write().await.delete_job(id)
    }
}
