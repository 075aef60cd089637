//! External process supervision.
//!
//! Downloaders, encoders and renderers are opaque commands: stdout and stderr
//! both go to a per-archive, per-stage log file, and the only failure signals
//! are a non-zero exit status and cancellation.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use process_utils::CommandExt;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::utils::fs::io_error;
use crate::{Error, Result};

/// A command plus where its output goes.
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    program: String,
    args: Vec<String>,
    log_path: PathBuf,
    detached: bool,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            log_path: log_path.into(),
            detached: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Start the child as leader of its own process group so the whole tree
    /// can be killed without signalling us.
    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub async fn spawn(&self) -> Result<RunningProcess> {
        if let Some(parent) = self.log_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("creating log directory", parent, e))?;
        }

        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| io_error("opening process log", &self.log_path, e))?;
        writeln!(log, "$ {} {}", self.program, self.args.join(" "))
            .map_err(|e| io_error("writing process log", &self.log_path, e))?;
        let stderr_log = log
            .try_clone()
            .map_err(|e| io_error("opening process log", &self.log_path, e))?;

        let mut cmd = process_utils::tokio_command(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr_log))
            .kill_on_drop(true);
        if self.detached {
            cmd.detached();
        }

        let child = cmd
            .spawn()
            .map_err(|e| Error::Other(format!("failed to spawn {}: {e}", self.program)))?;
        let pid = child.id();
        debug!(program = %self.program, pid = ?pid, log = %self.log_path.display(), "Spawned process");

        Ok(RunningProcess {
            child,
            pid,
            program: self.program.clone(),
            log_path: self.log_path.clone(),
            detached: self.detached,
        })
    }

    /// Spawn and wait, killing the process if `cancel` fires first.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        self.spawn().await?.wait(cancel).await
    }
}

/// A spawned child owned by exactly one waiter.
pub struct RunningProcess {
    child: Child,
    pid: Option<u32>,
    program: String,
    log_path: PathBuf,
    detached: bool,
}

impl RunningProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for exit, preferring cancellation when both are ready.
    ///
    /// On cancellation only the child (its process group when detached) is
    /// killed, and the child is reaped before returning [`Error::Cancelled`].
    pub async fn wait(mut self, cancel: &CancellationToken) -> Result<()> {
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.terminate().await;
                return Err(Error::Cancelled);
            }
            status = self.child.wait() => status,
        };

        let status = status.map_err(|e| io_error("waiting for", &self.log_path, e))?;
        if status.success() {
            info!(program = %self.program, "Process exited successfully");
            Ok(())
        } else {
            warn!(
                program = %self.program,
                code = ?status.code(),
                log = %self.log_path.display(),
                "Process exited with failure"
            );
            Err(Error::Process {
                program: self.program,
                exit_code: status.code(),
                log_path: self.log_path,
            })
        }
    }

    async fn terminate(&mut self) {
        match (self.detached, self.pid) {
            (true, Some(pid)) => {
                if let Err(e) = process_utils::kill_process_group(pid) {
                    warn!(program = %self.program, pid, error = %e, "Failed to kill process group");
                    let _ = self.child.start_kill();
                }
            }
            _ => {
                let _ = self.child.start_kill();
            }
        }
        // Drain so the child is reaped.
        if let Err(e) = self.child.wait().await {
            warn!(program = %self.program, error = %e, "Error reaping killed process");
        }
        info!(program = %self.program, "Process killed after cancellation");
    }
}

/// Run a probe command and return its stdout (JSON-emitting tools only).
pub async fn capture_stdout<I, S>(
    program: &str,
    args: I,
    cancel: &CancellationToken,
) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let child = process_utils::tokio_command(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Other(format!("failed to spawn {program}: {e}")))?;

    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        output = child.wait_with_output() => output?,
    };

    if output.status.success() {
        Ok(output.stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Error::CommandFailed {
            program: program.to_string(),
            exit_code: output.status.code(),
            stderr: stderr.trim().chars().take(2000).collect(),
        })
    }
}
