use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub worker: WorkerConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `MAILSHIFT_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("MAILSHIFT_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            worker: WorkerConfig::from_env_profiled(p),
            storage: StorageConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  worker:   max_workers={}, binary={}, max_runtime={:?}, terminate_grace={:?}, recovery={}",
            self.worker.max_workers,
            self.worker.sync_binary,
            self.worker.max_runtime(),
            self.worker.terminate_grace(),
            self.worker.recovery_policy.as_str(),
        );
        tracing::info!(
            "  storage:  data_dir={}, log_dir={}, encryption_key={}",
            self.storage.data_dir.display(),
            self.storage.log_dir.display(),
            if self.storage.encryption_key.is_some() { "env" } else { "key file" },
        );
    }
}

// ── Worker ────────────────────────────────────────────────────

/// What to do with items found `running` when the process starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryPolicy {
    /// Mark them failed: nobody is supervising them any more.
    #[default]
    Fail,
    /// Put them back in the queue and run them again.
    Requeue,
}

impl RecoveryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryPolicy::Fail => "fail",
            RecoveryPolicy::Requeue => "requeue",
        }
    }

    fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "requeue" | "retry" => RecoveryPolicy::Requeue,
            _ => RecoveryPolicy::Fail,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Concurrent sync processes.
    pub max_workers: usize,
    /// External sync executable (name on PATH or absolute path).
    pub sync_binary: String,
    /// Hard per-item runtime limit in seconds. 0 disables it.
    pub max_runtime_secs: u64,
    /// Seconds to wait after a graceful termination request before killing. 0 never escalates.
    pub terminate_grace_secs: u64,
    pub recovery_policy: RecoveryPolicy,
}

impl WorkerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_workers: (profiled_env_u64(p, "MAX_WORKERS", 2) as usize).max(1),
            sync_binary: profiled_env_or(p, "SYNC_BINARY", "imapsync"),
            max_runtime_secs: profiled_env_u64(p, "ITEM_MAX_RUNTIME_SECS", 0),
            terminate_grace_secs: profiled_env_u64(p, "TERMINATE_GRACE_SECS", 30),
            recovery_policy: RecoveryPolicy::parse(&profiled_env_or(p, "RECOVERY_POLICY", "fail")),
        }
    }

    pub fn max_runtime(&self) -> Option<Duration> {
        (self.max_runtime_secs > 0).then(|| Duration::from_secs(self.max_runtime_secs))
    }

    pub fn terminate_grace(&self) -> Option<Duration> {
        (self.terminate_grace_secs > 0).then(|| Duration::from_secs(self.terminate_grace_secs))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: 2,
            sync_binary: "imapsync".to_string(),
            max_runtime_secs: 0,
            terminate_grace_secs: 30,
            recovery_policy: RecoveryPolicy::Fail,
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// One `<item-id>.log` per migrated mailbox.
    pub log_dir: PathBuf,
    /// Hex AES-256 key. Never serialized.
    #[serde(skip)]
    pub encryption_key: Option<String>,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            data_dir: PathBuf::from(profiled_env_or(p, "DATA_DIR", "data")),
            log_dir: PathBuf::from(profiled_env_or(p, "LOG_DIR", "logs")),
            encryption_key: profiled_env_opt(p, "MAILSHIFT_ENCRYPTION_KEY"),
        }
    }

    /// Location of the JSON record store.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("mailshift.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_policy_parsing() {
        assert_eq!(RecoveryPolicy::parse("requeue"), RecoveryPolicy::Requeue);
        assert_eq!(RecoveryPolicy::parse(" RETRY "), RecoveryPolicy::Requeue);
        assert_eq!(RecoveryPolicy::parse("fail"), RecoveryPolicy::Fail);
        assert_eq!(RecoveryPolicy::parse("garbage"), RecoveryPolicy::Fail);
    }

    #[test]
    fn zero_durations_disable_limits() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.max_runtime(), None);
        assert_eq!(cfg.terminate_grace(), Some(Duration::from_secs(30)));

        let cfg = WorkerConfig { max_runtime_secs: 60, terminate_grace_secs: 0, ..cfg };
        assert_eq!(cfg.max_runtime(), Some(Duration::from_secs(60)));
        assert_eq!(cfg.terminate_grace(), None);
    }

    #[test]
    fn store_path_lives_in_data_dir() {
        let cfg = StorageConfig {
            data_dir: PathBuf::from("/var/lib/mailshift"),
            log_dir: PathBuf::from("logs"),
            encryption_key: None,
        };
        assert_eq!(cfg.store_path(), PathBuf::from("/var/lib/mailshift/mailshift.json"));
    }
}
