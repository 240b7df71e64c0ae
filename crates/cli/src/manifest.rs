use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::debug;

use mailshift_core::{Endpoint, JobConfig, JobOptions, MailboxCredentials};

/// A batch described in TOML.
///
/// ```toml
/// name = "Acme cut-over"
///
/// [source]
/// host = "imap.old.example"
/// security = "SSL/TLS"
///
/// [target]
/// host = "imap.new.example"
/// port = 143
/// security = "STARTTLS"
///
/// [options]
/// sync_internal_dates = true
/// skip_trash = true
///
/// [[mailboxes]]
/// source_user = "alice@old.example"
/// source_password = "..."
/// target_user = "alice@new.example"
/// target_password = "..."
/// ```
#[derive(Debug, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: Option<String>,
    pub source: Endpoint,
    pub target: Endpoint,
    #[serde(default)]
    pub options: JobOptions,
    #[serde(default)]
    pub mailboxes: Vec<MailboxCredentials>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading manifest");
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid manifest: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let manifest: Self = toml::from_str(content)?;
        if manifest.mailboxes.is_empty() {
            bail!("no [[mailboxes]] entries");
        }
        if manifest.source.host.trim().is_empty() || manifest.target.host.trim().is_empty() {
            bail!("source and target host are required");
        }
        Ok(manifest)
    }

    /// Split into the job to create and the mailboxes to add to it.
    pub fn into_parts(self) -> (JobConfig, Vec<MailboxCredentials>) {
        let mut config = JobConfig::new(self.source, self.target);
        if let Some(name) = self.name {
            config.name = name;
        }
        config.options = self.options;
        (config, self.mailboxes)
    }
}
