//! Migration records: jobs, their mailbox items, and the inputs that create them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ── Identifiers ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Store-assigned sequential item identifier. Also names the item's log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ItemId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

// ── Endpoint ──────────────────────────────────────────────────

/// Transport security for one side of a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Security {
    /// TLS from the first byte (IMAPS, usually port 993).
    #[default]
    #[serde(rename = "SSL/TLS", alias = "ssl", alias = "tls")]
    ImplicitTls,
    #[serde(rename = "STARTTLS", alias = "starttls")]
    StartTls,
    #[serde(rename = "None", alias = "none")]
    None,
}

impl Security {
    pub fn as_str(&self) -> &'static str {
        match self {
            Security::ImplicitTls => "SSL/TLS",
            Security::StartTls => "STARTTLS",
            Security::None => "None",
        }
    }
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Security {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ssl/tls" | "ssl" | "tls" => Ok(Security::ImplicitTls),
            "starttls" => Ok(Security::StartTls),
            "none" | "" => Ok(Security::None),
            other => Err(format!("unknown security mode '{other}'")),
        }
    }
}

fn default_port() -> u16 {
    993
}

/// One mail server a job reads from or writes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub security: Security,
}

impl Endpoint {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            security: Security::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }
}

// ── Job options ───────────────────────────────────────────────

/// Free-form per-job feature flags, stored as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobOptions(pub Map<String, Value>);

impl JobOptions {
    /// Preserve original message timestamps on the target.
    pub const SYNC_INTERNAL_DATES: &'static str = "sync_internal_dates";
    /// Leave common trash folders behind.
    pub const SKIP_TRASH: &'static str = "skip_trash";
    /// Simulate without writing to the target.
    pub const DRY_RUN: &'static str = "dry_run";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flag(mut self, key: &str, enabled: bool) -> Self {
        self.0.insert(key.to_string(), Value::Bool(enabled));
        self
    }

    /// JSON truthiness of an option; missing keys are false.
    pub fn flag(&self, key: &str) -> bool {
        match self.0.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
        }
    }

    pub fn sync_internal_dates(&self) -> bool {
        self.flag(Self::SYNC_INTERNAL_DATES)
    }

    pub fn skip_trash(&self) -> bool {
        self.flag(Self::SKIP_TRASH)
    }

    pub fn dry_run(&self) -> bool {
        self.flag(Self::DRY_RUN)
    }
}

// ── Job ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_job_name() -> String {
    "Migration Job".to_string()
}

/// Everything needed to open a new migration batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default = "default_job_name")]
    pub name: String,
    pub source: Endpoint,
    pub target: Endpoint,
    #[serde(default)]
    pub options: JobOptions,
}

impl JobConfig {
    pub fn new(source: Endpoint, target: Endpoint) -> Self {
        Self {
            name: default_job_name(),
            source,
            target,
            options: JobOptions::default(),
        }
    }
}

/// A migration batch. Aggregate counters are a cache, rewritten by reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub source: Endpoint,
    pub target: Endpoint,
    pub options: JobOptions,
    pub total_items: u32,
    pub completed: u32,
    pub failed: u32,
    pub bytes_transferred: u64,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// New jobs start out `running`: items are executed as soon as they are added.
    pub fn from_config(config: JobConfig) -> Self {
        Self {
            id: JobId::new(),
            name: config.name,
            status: JobStatus::Running,
            source: config.source,
            target: config.target,
            options: config.options,
            total_items: 0,
            completed: 0,
            failed: 0,
            bytes_transferred: 0,
            created_at: Utc::now(),
        }
    }

    /// Items that reached a terminal state, per the cached counters.
    pub fn finished(&self) -> u32 {
        self.completed + self.failed
    }

    /// Rounded percentage of finished items; 0 for an empty job.
    pub fn progress_percent(&self) -> u32 {
        if self.total_items == 0 {
            return 0;
        }
        let done = u64::from(self.finished().min(self.total_items));
        let total = u64::from(self.total_items);
        ((done * 100 + total / 2) / total) as u32
    }
}

/// Aggregate fields rewritten by reconciliation; everything else on a job is left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub completed: u32,
    pub failed: u32,
    pub bytes_transferred: u64,
    pub status: JobStatus,
}

impl Job {
    pub fn progress(&self) -> JobProgress {
        JobProgress {
            completed: self.completed,
            failed: self.failed,
            bytes_transferred: self.bytes_transferred,
            status: self.status,
        }
    }

    pub fn apply_progress(&mut self, progress: JobProgress) {
        self.completed = progress.completed;
        self.failed = progress.failed;
        self.bytes_transferred = progress.bytes_transferred;
        self.status = progress.status;
    }
}

// ── Item ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Success | ItemStatus::Failed)
    }

    /// Allowed moves: `pending → running → {success | failed}`. A terminal item may
    /// be rewritten with another terminal status (the runner's final word after an
    /// optimistic stop) but never goes back to `pending` or `running`.
    pub fn can_move_to(&self, next: ItemStatus) -> bool {
        match (self, next) {
            (ItemStatus::Pending, ItemStatus::Running) => true,
            (ItemStatus::Running, n) => n.is_terminal(),
            (s, n) if s.is_terminal() => n.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Running => "running",
            ItemStatus::Success => "success",
            ItemStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A login whose secret is held only as an opaque encrypted token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub user: String,
    pub secret: String,
}

/// One source-mailbox-to-target-mailbox migration unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub job_id: JobId,
    pub source: StoredCredentials,
    pub target: StoredCredentials,
    pub status: ItemStatus,
    pub message: Option<String>,
    pub bytes_transferred: u64,
}

impl Item {
    /// Move to `next`, refusing any transition [`ItemStatus::can_move_to`] forbids.
    pub fn transition(&mut self, next: ItemStatus, message: impl Into<String>) -> bool {
        if !self.status.can_move_to(next) {
            return false;
        }
        self.status = next;
        self.message = Some(message.into());
        true
    }
}

// ── Plaintext input ───────────────────────────────────────────

/// Mailbox pair as submitted by a caller, secrets still in plaintext.
#[derive(Clone, Serialize, Deserialize)]
pub struct MailboxCredentials {
    pub source_user: String,
    pub source_password: String,
    pub target_user: String,
    pub target_password: String,
}

impl MailboxCredentials {
    pub fn new(
        source_user: impl Into<String>,
        source_password: impl Into<String>,
        target_user: impl Into<String>,
        target_password: impl Into<String>,
    ) -> Self {
        Self {
            source_user: source_user.into(),
            source_password: source_password.into(),
            target_user: target_user.into(),
            target_password: target_password.into(),
        }
    }
}

impl fmt::Debug for MailboxCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxCredentials")
            .field("source_user", &self.source_user)
            .field("source_password", &"***")
            .field("target_user", &self.target_user)
            .field("target_password", &"***")
            .finish()
    }
}
