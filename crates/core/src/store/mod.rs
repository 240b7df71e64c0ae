//! Durable record store capability.
//!
//! The engine never assumes a storage engine: it talks to [`MigrationStore`].
//! Two implementations ship here:
//! - [`MemoryStore`]: process-local maps, used by tests and one-shot runs
//! - [`JsonFileStore`]: the same maps snapshotted to a JSON file after every
//!   mutation, so a restarted process can recover in-flight items

mod json_file;
mod memory;
mod state;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{Item, ItemId, ItemStatus, Job, JobConfig, JobId, JobProgress, StoredCredentials};

#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Persist a new job built from `config`.
    async fn create_job(&self, config: JobConfig) -> Result<Job, StoreError>;

    /// Add a pending item to a job, bumping the job's `total_items` atomically.
    async fn add_item(
        &self,
        job_id: JobId,
        source: StoredCredentials,
        target: StoredCredentials,
    ) -> Result<Item, StoreError>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    async fn get_item(&self, id: ItemId) -> Result<Option<Item>, StoreError>;

    /// All jobs, newest first.
    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError>;

    /// Items of one job in creation order.
    async fn list_items(&self, job_id: JobId) -> Result<Vec<Item>, StoreError>;

    /// Items across all jobs currently in `status`.
    async fn list_items_with_status(&self, status: ItemStatus) -> Result<Vec<Item>, StoreError>;

    /// Overwrite a job record. `total_items` is store-owned and is kept as stored.
    async fn update_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Overwrite only the reconciled aggregate fields of a job.
    async fn update_job_progress(&self, id: JobId, progress: JobProgress) -> Result<(), StoreError>;

    /// Best-effort running byte total; reconciliation recomputes it anyway.
    async fn add_job_bytes(&self, id: JobId, bytes: u64) -> Result<(), StoreError>;

    /// Overwrite an item record.
    async fn update_item(&self, item: &Item) -> Result<(), StoreError>;

    /// Overwrite an item only if its stored status is still `expected`.
    /// Returns whether the write happened.
    async fn compare_and_update_item(
        &self,
        item: &Item,
        expected: ItemStatus,
    ) -> Result<bool, StoreError>;

    /// Remove a job and every item it owns.
    async fn delete_job(&self, id: JobId) -> Result<(), StoreError>;
}
