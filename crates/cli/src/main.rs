mod cli;
mod manifest;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::{info, warn};

use mailshift_core::{
    format_bytes, AesGcmCipher, Config, DashboardStats, ItemId, ItemView, JobDetail, JobId,
    JobView, JsonFileStore, MigrationStore,
};
use mailshift_engine::{read_item_log, JobReconciler, MigrationEngine};

use crate::cli::{CliArgs, Command};
use crate::manifest::Manifest;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    mailshift_core::config::load_dotenv();
    let args = CliArgs::parse();
    let config = Config::for_profile(args.profile.as_deref().unwrap_or(""));

    match args.command {
        Command::Run {
            manifest,
            progress_interval,
        } => {
            config.log_summary();
            run(&config, &manifest, progress_interval).await
        }
        Command::Status { job_id } => status(&config, job_id.as_deref()).await,
        Command::Logs { item_id } => logs(&config, ItemId(item_id)).await,
        Command::Check => check(&config),
    }
}

fn open_store(config: &Config) -> Result<Arc<dyn MigrationStore>> {
    let path = config.storage.store_path();
    let store = JsonFileStore::open(&path)
        .with_context(|| format!("failed to open store: {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn run(config: &Config, manifest_path: &Path, progress_interval: u64) -> Result<()> {
    let manifest = Manifest::load(manifest_path)?;
    let store = open_store(config)?;
    let cipher = AesGcmCipher::from_config(
        config.storage.encryption_key.as_deref(),
        &config.storage.data_dir,
    )
    .context("failed to load encryption key")?;
    let engine = MigrationEngine::new(store, Arc::new(cipher), &config.worker, &config.storage.log_dir);

    let recovered = engine.start().await.context("recovery failed")?;
    if !recovered.resubmit.is_empty() {
        info!(count = recovered.resubmit.len(), "resuming unfinished mailboxes from a previous run");
    }

    let (job_config, mailboxes) = manifest.into_parts();
    let job = engine.create_job(job_config).await?;
    let ids = engine.add_mailboxes(job.id, mailboxes).await?;
    info!(
        job_id = %job.id,
        mailboxes = ids.len(),
        workers = config.worker.max_workers,
        "Job started"
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(progress_interval.max(1)));
    ticker.tick().await;
    let idle = engine.wait_idle();
    tokio::pin!(idle);
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = &mut idle => break,
            _ = ticker.tick() => log_progress(&engine, job.id).await,
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal.context("failed to listen for ctrl_c")?;
                interrupted = true;
                let stopped = engine.shutdown();
                warn!(stopped, "Interrupted: stopping running mailboxes, queued ones stay pending");
            }
        }
    }

    let detail = engine.job_view(job.id).await?;
    println!("{}", serde_json::to_string_pretty(&detail)?);
    if interrupted {
        bail!("interrupted before job {} finished", job.id);
    }
    Ok(())
}

async fn log_progress(engine: &MigrationEngine, job_id: JobId) {
    match engine.job_view(job_id).await {
        Ok(detail) => info!(
            progress = detail.job.progress,
            completed = detail.job.completed,
            failed = detail.job.failed,
            total = detail.job.total,
            transferred = %format_bytes(detail.job.bytes_transferred),
            "Progress"
        ),
        Err(e) => warn!(error = %e, "Failed to read job progress"),
    }
}

/// Read-only: a `run` in another process may own the store file.
async fn status(config: &Config, job_id: Option<&str>) -> Result<()> {
    let store = open_store(config)?;
    let reconciler = JobReconciler::new(store.clone());

    let output = match job_id {
        Some(raw) => {
            let job_id: JobId = raw
                .parse()
                .with_context(|| format!("invalid job id: {raw}"))?;
            let job = reconciler
                .preview(job_id)
                .await?
                .with_context(|| format!("job not found: {job_id}"))?;
            let items = store.list_items(job_id).await?;
            serde_json::to_value(JobDetail {
                job: JobView::from(&job),
                items: items.iter().map(ItemView::from).collect(),
            })?
        }
        None => {
            let mut jobs = Vec::new();
            for job in store.list_jobs().await? {
                if let Some(job) = reconciler.preview(job.id).await? {
                    jobs.push(JobView::from(&job));
                }
            }
            let stats = DashboardStats::from_jobs(&jobs);
            json!({ "stats": stats, "jobs": jobs })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn logs(config: &Config, item_id: ItemId) -> Result<()> {
    let store = open_store(config)?;
    let text = read_item_log(store.as_ref(), &config.storage.log_dir, item_id).await?;
    print!("{text}");
    if !text.ends_with('\n') {
        println!();
    }
    Ok(())
}

fn check(config: &Config) -> Result<()> {
    let binary = &config.worker.sync_binary;
    let found = find_executable(binary);
    match &found {
        Some(path) => println!("sync tool:  {}", path.display()),
        None => println!("sync tool:  {binary} not found"),
    }

    let store_status = match JsonFileStore::open(config.storage.store_path()) {
        Ok(_) => format!("ok ({})", config.storage.store_path().display()),
        Err(e) => format!("error: {e}"),
    };
    println!("store:      {store_status}");

    let key_source = if config.storage.encryption_key.is_some() {
        "MAILSHIFT_ENCRYPTION_KEY".to_string()
    } else {
        let key_file = config.storage.data_dir.join(".mailshift_key");
        if key_file.exists() {
            key_file.display().to_string()
        } else {
            format!("{} (generated on first run)", key_file.display())
        }
    };
    println!("key:        {key_source}");
    println!("log dir:    {}", config.storage.log_dir.display());
    println!("workers:    {}", config.worker.max_workers);

    if found.is_none() {
        bail!("sync tool '{binary}' is not installed or not executable");
    }
    if store_status.starts_with("error") {
        bail!("store is not usable");
    }
    Ok(())
}

/// Resolve `program` the way a shell would: paths as-is, bare names via `PATH`.
fn find_executable(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|p| is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn finds_executables_by_path_only_when_executable() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let tool = tmp.path().join("tool");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert_eq!(find_executable(tool.to_str().unwrap()), None);

        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(find_executable(tool.to_str().unwrap()), Some(tool));
    }

    #[test]
    fn missing_bare_name_is_none() {
        assert_eq!(find_executable("definitely-not-a-real-sync-tool-xyz"), None);
    }
}
