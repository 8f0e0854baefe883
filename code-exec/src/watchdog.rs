//! Supervision of a running unit: capped output capture and escalating termination.

use nix::{
    errno::Errno,
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use std::{process::ExitStatus, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Child,
    sync::{Mutex, Notify},
    time,
};
use tracing::{debug, warn};

use crate::{error::Error, Result};

const READ_CHUNK: usize = 8 * 1024;

/// Bytes captured from one stream.
#[derive(Debug, Default, Clone)]
pub struct CappedOutput {
    pub bytes: Vec<u8>,
    /// The stream produced more than the cap
    pub truncated: bool,
}

impl CappedOutput {
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Shared sink for one captured stream.
///
/// The reader task fills it while the supervisor keeps a handle, so bytes
/// read before a reader is abandoned are still returned.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer(Arc<Mutex<CappedOutput>>);

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything captured so far, leaving the buffer empty.
    pub async fn take(&self) -> CappedOutput {
        std::mem::take(&mut *self.0.lock().await)
    }
}

/// Reads `reader` to EOF into `sink`, keeping at most `cap` bytes.
///
/// The first byte past the cap fires `overflow` once. Reading continues
/// after that so the writer never blocks on a full pipe.
pub async fn read_capped<R>(mut reader: R, cap: usize, sink: OutputBuffer, overflow: Arc<Notify>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Output stream closed with error: {}", e);
                break;
            }
        };
        let mut output = sink.0.lock().await;
        let room = cap.saturating_sub(output.bytes.len());
        output.bytes.extend_from_slice(&chunk[..n.min(room)]);
        if n > room && !output.truncated {
            output.truncated = true;
            overflow.notify_one();
        }
    }
}

/// How a unit was brought down by the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited within the grace period after SIGTERM
    Graceful,
    /// Needed SIGKILL
    Forced,
}

/// Stops the unit's whole process group: SIGTERM, wait up to `grace`, then SIGKILL.
///
/// Returns only after the leader has been reaped.
pub async fn terminate_tree(child: &mut Child, grace: Duration) -> Result<(ExitStatus, Termination)> {
    let Some(pid) = child.id() else {
        // Already reaped.
        let status = child.wait().await?;
        return Ok((status, Termination::Graceful));
    };
    let group = Pid::from_raw(pid as i32);

    signal_group(group, Signal::SIGTERM)?;
    if let Ok(status) = time::timeout(grace, child.wait()).await {
        debug!("Process group {} exited after SIGTERM", pid);
        return Ok((status?, Termination::Graceful));
    }

    warn!(
        "Process group {} ignored SIGTERM for {}ms, sending SIGKILL",
        pid,
        grace.as_millis()
    );
    signal_group(group, Signal::SIGKILL)?;
    let status = child.wait().await?;
    Ok((status, Termination::Forced))
}

/// SIGKILLs whatever is left in the group led by `pid`.
///
/// Background children outlive their leader unless the group is reaped
/// explicitly.
pub fn kill_group(pid: u32) -> Result<()> {
    signal_group(Pid::from_raw(pid as i32), Signal::SIGKILL)
}

fn signal_group(group: Pid, signal: Signal) -> Result<()> {
    match killpg(group, signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(Error::Sandbox(format!(
            "Failed to send {} to process group {}: {}",
            signal, group, e
        ))),
    }
}
