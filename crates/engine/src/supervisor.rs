//! External sync process supervision.
//!
//! [`Supervisor::launch`] starts one sync invocation with stdout and stderr
//! piped. Two reader tasks forward raw lines into a single writer task that
//! appends them to the item's log file and feeds a [`TransferTally`].
//! [`SupervisedProcess::wait`] owns the child until it exits, reacting to
//! termination requests arriving through cloned [`ProcessHandle`]s.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::transfer::TransferTally;

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited on its own with this code.
    Exited(i32),
    /// SIGTERM.
    Terminated,
    /// SIGKILL.
    Killed,
    /// Any other signal.
    Signaled(i32),
}

impl ExitOutcome {
    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            match status.signal() {
                Some(15) => return ExitOutcome::Terminated,
                Some(9) => return ExitOutcome::Killed,
                Some(sig) => return ExitOutcome::Signaled(sig),
                None => {}
            }
        }
        ExitOutcome::Exited(status.code().unwrap_or(-1))
    }
}

/// Everything known about a finished invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessReport {
    pub outcome: ExitOutcome,
    /// Extracted byte count, 0 if the tool never reported one.
    pub bytes_transferred: u64,
    /// The configured max runtime elapsed and the supervisor stopped the process.
    pub timed_out: bool,
}

/// Append-only text file receiving a process's interleaved output.
pub struct LogSink {
    path: PathBuf,
    file: File,
}

impl LogSink {
    /// Create (or truncate) the log file, creating parent directories.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(&path).await?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a `CRITICAL ERROR` annotation to an existing (or new) log file.
    pub async fn append_critical(path: &Path, message: &str) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
        file.write_all(format!("\nCRITICAL ERROR: {message}\n").as_bytes()).await?;
        file.flush().await
    }
}

/// Termination-only view of a running process. Cheap to clone, safe to hand
/// to the registry; it cannot wait on or otherwise touch the child.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    terminate_tx: mpsc::UnboundedSender<()>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the owner to terminate the process gracefully. Never blocks.
    /// Returns false once the owner has stopped supervising (process gone).
    pub fn request_terminate(&self) -> bool {
        self.terminate_tx.send(()).is_ok()
    }
}

/// Launch options shared by every invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Supervisor {
    /// Force-kill this long after a graceful termination request.
    pub terminate_grace: Option<Duration>,
    /// Hard limit on runtime; the process is terminated when it elapses.
    pub max_runtime: Option<Duration>,
}

impl Supervisor {
    pub fn new(terminate_grace: Option<Duration>, max_runtime: Option<Duration>) -> Self {
        Self { terminate_grace, max_runtime }
    }

    /// Start `program` with `args`, streaming combined output into `log`.
    pub fn launch(&self, program: &str, args: &[OsString], log: LogSink) -> Result<SupervisedProcess> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Launch {
                program: program.to_string(),
                source,
            })?;

        let pid = child.id();
        debug!(program, pid = ?pid, log = %log.path().display(), "sync process launched");

        let (line_tx, line_rx) = mpsc::channel::<Vec<u8>>(256);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(BufReader::new(stdout), line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(BufReader::new(stderr), line_tx.clone()));
        }
        drop(line_tx);
        let writer = tokio::spawn(write_log(line_rx, log));

        let (terminate_tx, terminate_rx) = mpsc::unbounded_channel();
        Ok(SupervisedProcess {
            child,
            handle: ProcessHandle { pid, terminate_tx },
            terminate_rx,
            writer,
            options: *self,
        })
    }
}

/// A live process owned by exactly one runner.
pub struct SupervisedProcess {
    child: Child,
    handle: ProcessHandle,
    terminate_rx: mpsc::UnboundedReceiver<()>,
    writer: JoinHandle<std::io::Result<TransferTally>>,
    options: Supervisor,
}

impl SupervisedProcess {
    pub fn handle(&self) -> ProcessHandle {
        self.handle.clone()
    }

    /// Block until the process exits and its output is fully drained.
    pub async fn wait(self) -> Result<ProcessReport> {
        let SupervisedProcess {
            mut child,
            handle,
            mut terminate_rx,
            writer,
            options,
        } = self;
        // Only the registry's clones should keep the channel open.
        drop(handle);

        let runtime_deadline = options.max_runtime.map(|d| Instant::now() + d);
        let mut kill_deadline: Option<Instant> = None;
        let mut terminating = false;
        let mut timed_out = false;

        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                Some(()) = terminate_rx.recv(), if !terminating => {
                    terminating = true;
                    kill_deadline = options.terminate_grace.map(|g| Instant::now() + g);
                    send_terminate(&mut child).await;
                }
                _ = sleep_until(runtime_deadline), if !terminating => {
                    warn!(pid = ?child.id(), "sync process exceeded max runtime");
                    timed_out = true;
                    terminating = true;
                    kill_deadline = options.terminate_grace.map(|g| Instant::now() + g);
                    send_terminate(&mut child).await;
                }
                _ = sleep_until(kill_deadline), if kill_deadline.is_some() => {
                    warn!(pid = ?child.id(), "sync process ignored termination, killing");
                    kill_deadline = None;
                    if let Err(e) = child.start_kill() {
                        warn!(error = %e, "failed to kill sync process");
                    }
                }
            }
        };

        let tally = match writer.await {
            Ok(result) => result?,
            Err(e) => return Err(std::io::Error::other(format!("log writer task failed: {e}")).into()),
        };

        let outcome = ExitOutcome::from_status(status);
        debug!(?outcome, bytes = tally.total(), "sync process exited");
        Ok(ProcessReport {
            outcome,
            bytes_transferred: tally.total(),
            timed_out,
        })
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Graceful stop: SIGTERM on Unix, hard kill elsewhere.
async fn send_terminate(child: &mut Child) {
    let Some(pid) = child.id() else {
        // Already reaped; nothing to signal.
        return;
    };

    #[cfg(unix)]
    {
        match Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) if status.success() => {
                info!(pid, "sent SIGTERM to sync process");
                return;
            }
            Ok(status) => warn!(pid, ?status, "kill -TERM failed, falling back to SIGKILL"),
            Err(e) => warn!(pid, error = %e, "kill -TERM failed, falling back to SIGKILL"),
        }
    }

    if let Err(e) = child.start_kill() {
        warn!(pid, error = %e, "failed to kill sync process");
    } else {
        info!(pid, "sent kill signal to sync process");
    }
}

/// Forward newline-terminated chunks; stops at EOF or on a read error.
async fn forward_lines<R>(mut reader: R, tx: mpsc::Sender<Vec<u8>>)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "sync output stream closed");
                break;
            }
        }
    }
}

/// Append each line to the log and scan it for byte counts. A write failure is
/// remembered but draining continues so the child never blocks on a full pipe.
async fn write_log(
    mut rx: mpsc::Receiver<Vec<u8>>,
    mut log: LogSink,
) -> std::io::Result<TransferTally> {
    let mut tally = TransferTally::new();
    let mut write_error: Option<std::io::Error> = None;

    while let Some(mut line) = rx.recv().await {
        tally.observe(String::from_utf8_lossy(&line).trim_end());

        if write_error.is_none() {
            if !line.ends_with(b"\n") {
                line.push(b'\n');
            }
            let written = async {
                log.file.write_all(&line).await?;
                log.file.flush().await
            }
            .await;
            if let Err(e) = written {
                warn!(log = %log.path.display(), error = %e, "failed to write sync log");
                write_error = Some(e);
            }
        }
    }

    match write_error {
        Some(e) => Err(e),
        None => Ok(tally),
    }
}
