use std::{
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::{Duration, Instant},
};
use tempfile::TempDir;
use tokio::{fs, io::AsyncWriteExt, process::Command, sync::Notify, task::JoinHandle, time};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::Error,
    limits::ResourceLimits,
    watchdog::{kill_group, read_capped, terminate_tree, CappedOutput, OutputBuffer, Termination},
    Result,
};

const MINIMAL_PATH: &str = "/usr/bin:/bin";

/// Why the supervisor stopped waiting on the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// The unit exited on its own
    Exited,
    /// The wall-clock timeout elapsed
    Deadline,
    /// A stream went past the output cap
    OutputOverflow,
}

/// Everything observed about one run of a unit.
#[derive(Debug)]
pub struct RunOutcome {
    pub status: ExitStatus,
    pub stdout: CappedOutput,
    pub stderr: CappedOutput,
    pub stop: StopCause,
    /// Set when the watchdog had to stop the unit
    pub termination: Option<Termination>,
    pub elapsed: Duration,
}

impl RunOutcome {
    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }

    pub fn signal(&self) -> Option<i32> {
        self.status.signal()
    }

    pub fn output_truncated(&self) -> bool {
        self.stdout.truncated || self.stderr.truncated
    }
}

/// A single-use isolated execution unit.
///
/// Owns a private scratch directory that is removed when the sandbox is
/// dropped. Every [`Sandbox::run`] spawns a fresh process in its own process
/// group with the sandbox's [`ResourceLimits`] applied before exec.
pub struct Sandbox {
    workdir: TempDir,
    limits: ResourceLimits,
    id: Uuid,
}

impl Sandbox {
    pub fn new(limits: ResourceLimits) -> Result<Self> {
        let id = Uuid::new_v4();
        let workdir = tempfile::Builder::new()
            .prefix(&format!("sandbox-{}-", id))
            .tempdir()
            .map_err(|e| Error::Sandbox(format!("Failed to create sandbox directory: {}", e)))?;

        debug!("Created sandbox {} at {}", id, workdir.path().display());
        Ok(Self {
            workdir,
            limits,
            id,
        })
    }

    pub fn root_dir(&self) -> &Path {
        self.workdir.path()
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Write a guest file into the scratch directory.
    pub async fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.root_dir().join(name);
        fs::write(&path, contents)
            .await
            .map_err(|e| Error::Sandbox(format!("Failed to write {}: {}", name, e)))?;
        Ok(path)
    }

    /// Run `program` inside the unit, feeding `input` on stdin.
    ///
    /// Never returns while the unit is still alive. An `Err` means the unit
    /// could not be started or supervised; guest failures are reported in the
    /// [`RunOutcome`].
    pub async fn run(&self, program: &Path, args: &[String], input: &str) -> Result<RunOutcome> {
        let mut command = Command::new(program);
        command
            .args(args)
            .env_clear()
            .env("PATH", MINIMAL_PATH)
            .env("LANG", "C.UTF-8")
            .current_dir(self.root_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        self.limits.apply_to(&mut command);

        let started = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|e| Error::Sandbox(format!("Failed to spawn process: {}", e)))?;
        let pid = child.id();
        debug!("Sandbox {} running pid {:?}", self.id, pid);

        let overflow = Arc::new(Notify::new());
        let cap = self.limits.output_bytes;
        let stdout = OutputBuffer::new();
        let stderr = OutputBuffer::new();
        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(read_capped(out, cap, stdout.clone(), overflow.clone())));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(read_capped(err, cap, stderr.clone(), overflow.clone())));

        if let Some(mut stdin) = child.stdin.take() {
            let input = input.to_owned();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    // The guest may exit without reading its input.
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        debug!("Failed to write guest input: {}", e);
                    }
                }
            });
        }

        let (waited, stop) = tokio::select! {
            status = child.wait() => (Some(status), StopCause::Exited),
            _ = overflow.notified() => (None, StopCause::OutputOverflow),
            _ = time::sleep(self.limits.timeout) => (None, StopCause::Deadline),
        };

        let (status, termination) = match waited {
            Some(Ok(status)) => (status, None),
            Some(Err(e)) => {
                terminate_tree(&mut child, self.limits.grace_period).await?;
                if let Some(pid) = pid {
                    kill_group(pid)?;
                }
                return Err(Error::Sandbox(format!("Failed to wait for process: {}", e)));
            }
            None => {
                debug!("Sandbox {} stopping unit: {:?}", self.id, stop);
                let (status, termination) =
                    terminate_tree(&mut child, self.limits.grace_period).await?;
                (status, Some(termination))
            }
        };
        let elapsed = started.elapsed();

        // The leader is reaped; nothing else from the unit may keep running.
        if let Some(pid) = pid {
            kill_group(pid)?;
        }

        let stdout = self.collect(stdout_task, &stdout).await;
        let stderr = self.collect(stderr_task, &stderr).await;

        Ok(RunOutcome {
            status,
            stdout,
            stderr,
            stop,
            termination,
            elapsed,
        })
    }

    /// Joins a reader task, waiting at most one grace period for the pipe to
    /// close, and returns whatever the reader captured.
    async fn collect(&self, task: Option<JoinHandle<()>>, buffer: &OutputBuffer) -> CappedOutput {
        if let Some(task) = task {
            let abort = task.abort_handle();
            match time::timeout(self.limits.grace_period, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Output reader for sandbox {} failed: {}", self.id, e),
                Err(_) => {
                    warn!("Output pipe of sandbox {} stayed open after exit", self.id);
                    abort.abort();
                }
            }
        }
        buffer.take().await
    }
}
