use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::{
    Item, ItemId, ItemStatus, Job, JobConfig, JobId, JobProgress, StoredCredentials,
};

/// Record maps shared by every store implementation. All methods run under
/// the owning store's write lock, which is what makes `add_item` atomic.
#[derive(Debug, Clone, Default)]
pub(super) struct StoreState {
    jobs: BTreeMap<JobId, Job>,
    items: BTreeMap<ItemId, Item>,
    next_item_id: u64,
}

/// On-disk form. Lists rather than maps so ids never have to be JSON keys.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(super) struct Snapshot {
    next_item_id: u64,
    jobs: Vec<Job>,
    items: Vec<Item>,
}

impl StoreState {
    pub(super) fn from_snapshot(snapshot: Snapshot) -> Self {
        let max_id = snapshot.items.iter().map(|i| i.id.0).max().unwrap_or(0);
        Self {
            jobs: snapshot.jobs.into_iter().map(|j| (j.id, j)).collect(),
            items: snapshot.items.into_iter().map(|i| (i.id, i)).collect(),
            next_item_id: snapshot.next_item_id.max(max_id),
        }
    }

    pub(super) fn snapshot(&self) -> Snapshot {
        Snapshot {
            next_item_id: self.next_item_id,
            jobs: self.jobs.values().cloned().collect(),
            items: self.items.values().cloned().collect(),
        }
    }

    pub(super) fn create_job(&mut self, config: JobConfig) -> Job {
        let job = Job::from_config(config);
        self.jobs.insert(job.id, job.clone());
        job
    }

    pub(super) fn add_item(
        &mut self,
        job_id: JobId,
        source: StoredCredentials,
        target: StoredCredentials,
    ) -> Result<Item, StoreError> {
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(StoreError::JobNotFound(job_id))?;
        job.total_items += 1;

        self.next_item_id += 1;
        let item = Item {
            id: ItemId(self.next_item_id),
            job_id,
            source,
            target,
            status: ItemStatus::Pending,
            message: None,
            bytes_transferred: 0,
        };
        self.items.insert(item.id, item.clone());
        Ok(item)
    }

    pub(super) fn get_job(&self, id: JobId) -> Option<Job> {
        self.jobs.get(&id).cloned()
    }

    pub(super) fn get_item(&self, id: ItemId) -> Option<Item> {
        self.items.get(&id).cloned()
    }

    pub(super) fn list_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub(super) fn list_items(&self, job_id: JobId) -> Vec<Item> {
        self.items
            .values()
            .filter(|i| i.job_id == job_id)
            .cloned()
            .collect()
    }

    pub(super) fn list_items_with_status(&self, status: ItemStatus) -> Vec<Item> {
        self.items
            .values()
            .filter(|i| i.status == status)
            .cloned()
            .collect()
    }

    pub(super) fn update_job(&mut self, job: &Job) -> Result<(), StoreError> {
        let stored = self
            .jobs
            .get_mut(&job.id)
            .ok_or(StoreError::JobNotFound(job.id))?;
        let total_items = stored.total_items;
        *stored = job.clone();
        stored.total_items = total_items;
        Ok(())
    }

    pub(super) fn update_job_progress(
        &mut self,
        id: JobId,
        progress: JobProgress,
    ) -> Result<(), StoreError> {
        self.jobs
            .get_mut(&id)
            .ok_or(StoreError::JobNotFound(id))?
            .apply_progress(progress);
        Ok(())
    }

    pub(super) fn add_job_bytes(&mut self, id: JobId, bytes: u64) -> Result<(), StoreError> {
        let job = self.jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
        job.bytes_transferred = job.bytes_transferred.saturating_add(bytes);
        Ok(())
    }

    pub(super) fn update_item(&mut self, item: &Item) -> Result<(), StoreError> {
        let stored = self
            .items
            .get_mut(&item.id)
            .ok_or(StoreError::ItemNotFound(item.id))?;
        *stored = item.clone();
        Ok(())
    }

    pub(super) fn compare_and_update_item(
        &mut self,
        item: &Item,
        expected: ItemStatus,
    ) -> Result<bool, StoreError> {
        let stored = self
            .items
            .get_mut(&item.id)
            .ok_or(StoreError::ItemNotFound(item.id))?;
        if stored.status != expected {
            return Ok(false);
        }
        *stored = item.clone();
        Ok(true)
    }

    pub(super) fn delete_job(&mut self, id: JobId) -> Result<(), StoreError> {
        self.jobs.remove(&id).ok_or(StoreError::JobNotFound(id))?;
        self.items.retain(|_, item| item.job_id != id);
        Ok(())
    }
}
