//! Shell command execution with captured output and a hard deadline.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bridge_guard::AccessError;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// How long output readers may keep going once the child is gone. Background
/// grandchildren can hold a pipe open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed, by us or by a signal.
    #[serde(rename = "returncode")]
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub truncated: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
    max_output_bytes: usize,
}

#[derive(Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

impl CommandRunner {
    pub fn new(timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            timeout,
            max_output_bytes,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `command` through the platform shell in `cwd`.
    ///
    /// The child never outlives this call: on timeout its process group is
    /// killed and reaped, and whatever output arrived before that is returned
    /// with `timed_out` set.
    pub async fn run(&self, command: &str, cwd: &Path) -> Result<RunOutcome, AccessError> {
        let started = Instant::now();
        let mut child = shell_command(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| AccessError::internal(format!("failed to spawn command: {error}")))?;

        let stdout = Arc::new(Mutex::new(Captured::default()));
        let stderr = Arc::new(Mutex::new(Captured::default()));
        let mut readers = Vec::with_capacity(2);
        if let Some(pipe) = child.stdout.take() {
            readers.push(spawn_drain(pipe, stdout.clone(), self.max_output_bytes));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(spawn_drain(pipe, stderr.clone(), self.max_output_bytes));
        }

        let (exit_code, timed_out) = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => (status.code(), false),
            Ok(Err(error)) => {
                terminate(&mut child).await;
                return Err(AccessError::internal(format!(
                    "failed to wait for command: {error}"
                )));
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "command timed out, killing process group"
                );
                terminate(&mut child).await;
                (None, true)
            }
        };

        for mut reader in readers {
            if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
                reader.abort();
            }
        }

        let stdout = std::mem::take(&mut *stdout.lock().await);
        let stderr = std::mem::take(&mut *stderr.lock().await);
        Ok(RunOutcome {
            stdout: String::from_utf8_lossy(&stdout.bytes).into_owned(),
            stderr: String::from_utf8_lossy(&stderr.bytes).into_owned(),
            exit_code,
            timed_out,
            truncated: stdout.truncated || stderr.truncated,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    // Own process group, so a timeout can take down everything it started.
    cmd.process_group(0);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

async fn terminate(child: &mut Child) {
    kill_process_group(child);
    // Kills the direct child if still alive and reaps it.
    let _ = child.kill().await;
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
    }
}

#[cfg(windows)]
fn kill_process_group(_child: &Child) {}

fn spawn_drain<R>(pipe: R, sink: Arc<Mutex<Captured>>, limit: usize) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(drain(pipe, sink, limit))
}

/// Keeps reading past `limit` so the child never blocks on a full pipe.
async fn drain<R: AsyncRead + Unpin>(mut pipe: R, sink: Arc<Mutex<Captured>>, limit: usize) {
    let mut chunk = [0_u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(read) => {
                let mut captured = sink.lock().await;
                let room = limit.saturating_sub(captured.bytes.len());
                if read > room {
                    captured.truncated = true;
                }
                captured.bytes.extend_from_slice(&chunk[..read.min(room)]);
            }
        }
    }
}
