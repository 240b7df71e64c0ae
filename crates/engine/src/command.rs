//! Sync tool command line and credential files.

use std::ffi::OsString;
use std::io::Write;
use std::path::Path;

use mailshift_core::{Endpoint, JobOptions, Security};
use tempfile::NamedTempFile;

/// Folders skipped when the `skip_trash` option is on.
pub const TRASH_FOLDERS: [&str; 3] = ["Trash", "Bin", "Deleted Items"];

/// One side of a migration as the sync tool sees it.
pub struct SyncSide<'a> {
    pub endpoint: &'a Endpoint,
    pub user: &'a str,
    pub passfile: &'a Path,
}

/// A ready-to-launch sync invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCommand {
    pub program: String,
    pub args: Vec<OsString>,
}

impl SyncCommand {
    pub fn build(program: &str, source: &SyncSide<'_>, target: &SyncSide<'_>, options: &JobOptions) -> Self {
        let mut args: Vec<OsString> = Vec::with_capacity(32);
        push_side(&mut args, "1", source);
        push_side(&mut args, "2", target);

        args.push("--automap".into());
        args.push("--nofoldersizes".into());

        push_security(&mut args, "1", source.endpoint.security);
        push_security(&mut args, "2", target.endpoint.security);

        if options.sync_internal_dates() {
            args.push("--syncinternaldates".into());
        }
        if options.skip_trash() {
            for folder in TRASH_FOLDERS {
                args.push("--exclude".into());
                args.push(folder.into());
            }
        }
        if options.dry_run() {
            args.push("--dry".into());
        }

        Self {
            program: program.to_string(),
            args,
        }
    }
}

fn push_side(args: &mut Vec<OsString>, n: &str, side: &SyncSide<'_>) {
    args.push(format!("--host{n}").into());
    args.push(side.endpoint.host.clone().into());
    args.push(format!("--port{n}").into());
    args.push(side.endpoint.port.to_string().into());
    args.push(format!("--user{n}").into());
    args.push(side.user.into());
    args.push(format!("--passfile{n}").into());
    args.push(side.passfile.as_os_str().to_owned());
}

fn push_security(args: &mut Vec<OsString>, n: &str, security: Security) {
    match security {
        Security::ImplicitTls => args.push(format!("--ssl{n}").into()),
        Security::StartTls => args.push(format!("--tls{n}").into()),
        Security::None => {}
    }
}

/// A plaintext secret on disk, readable only by the current user, removed on drop.
pub struct CredentialFile {
    file: NamedTempFile,
}

impl CredentialFile {
    pub fn write(secret: &str) -> std::io::Result<Self> {
        let mut file = tempfile::Builder::new().prefix("mailshift-pass-").tempfile()?;
        restrict(file.path())?;
        file.write_all(secret.as_bytes())?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[cfg(unix)]
fn restrict(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
