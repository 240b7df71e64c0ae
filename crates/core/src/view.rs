//! Read projections handed to callers. Never carry secrets.

use serde::Serialize;

use crate::model::{Item, ItemId, ItemStatus, Job, JobId, JobStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub progress: u32,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub bytes_transferred: u64,
    pub source: String,
    pub target: String,
    pub created_at: String,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            status: job.status,
            progress: job.progress_percent(),
            total: job.total_items,
            completed: job.completed,
            failed: job.failed,
            bytes_transferred: job.bytes_transferred,
            source: job.source.host.clone(),
            target: job.target.host.clone(),
            created_at: job.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemView {
    pub id: ItemId,
    pub source_user: String,
    pub target_user: String,
    pub status: ItemStatus,
    pub message: Option<String>,
}

impl From<&Item> for ItemView {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id,
            source_user: item.source.user.clone(),
            target_user: item.target.user.clone(),
            status: item.status,
            message: item.message.clone(),
        }
    }
}

/// A job together with its items.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: JobView,
    pub items: Vec<ItemView>,
}

/// Fleet-wide counters for a dashboard header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_jobs: usize,
    pub active_jobs: usize,
    pub completed_items: usize,
    pub bytes_transferred: u64,
    pub data_transferred: String,
}

impl DashboardStats {
    /// Totals over already-reconciled job views.
    pub fn from_jobs(jobs: &[JobView]) -> Self {
        let bytes: u64 = jobs.iter().map(|j| j.bytes_transferred).sum();
        Self {
            total_jobs: jobs.len(),
            active_jobs: jobs.iter().filter(|j| j.status == JobStatus::Running).count(),
            completed_items: jobs.iter().map(|j| j.completed as usize).sum(),
            bytes_transferred: bytes,
            data_transferred: format_bytes(bytes),
        }
    }
}

/// Human-readable byte count: `B`, then `KB`/`MB`/`GB` with two decimals.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    let b = bytes as f64;
    if bytes > GB {
        format!("{:.2} GB", b / GB as f64)
    } else if bytes > MB {
        format!("{:.2} MB", b / MB as f64)
    } else if bytes > KB {
        format!("{:.2} KB", b / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Endpoint, JobConfig, StoredCredentials};

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1024), "1024 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 + 1), "5.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024 + 1), "3.00 GB");
    }

    #[test]
    fn item_view_hides_secrets() {
        let item = Item {
            id: ItemId(7),
            job_id: JobId::new(),
            source: StoredCredentials { user: "a@src".into(), secret: "tok1".into() },
            target: StoredCredentials { user: "a@dst".into(), secret: "tok2".into() },
            status: ItemStatus::Pending,
            message: None,
            bytes_transferred: 0,
        };
        let json = serde_json::to_string(&ItemView::from(&item)).unwrap();
        assert!(!json.contains("tok1"));
        assert!(json.contains("a@dst"));
    }

    #[test]
    fn job_detail_flattens_job_fields() {
        let job = Job::from_config(JobConfig::new(
            Endpoint::new("imap.src"),
            Endpoint::new("imap.dst"),
        ));
        let detail = JobDetail { job: JobView::from(&job), items: Vec::new() };
        let value = serde_json::to_value(&detail).unwrap();
        assert_eq!(value["source"], "imap.src");
        assert_eq!(value["status"], "running");
        assert_eq!(value["progress"], 0);
        assert!(value["items"].as_array().unwrap().is_empty());
    }

    #[test]
    fn dashboard_totals_over_jobs() {
        let mut running = Job::from_config(JobConfig::new(Endpoint::new("a"), Endpoint::new("b")));
        running.completed = 2;
        running.bytes_transferred = 1000;
        let mut done = running.clone();
        done.status = JobStatus::Completed;
        done.completed = 3;
        done.bytes_transferred = 700;

        let stats = DashboardStats::from_jobs(&[JobView::from(&running), JobView::from(&done)]);
        assert_eq!(stats.total_jobs, 2);
        assert_eq!(stats.active_jobs, 1);
        assert_eq!(stats.completed_items, 5);
        assert_eq!(stats.bytes_transferred, 1700);
        assert_eq!(stats.data_transferred, "1.66 KB");
    }
}
