//! Deadline-bounded child process runner shared by the local and docker
//! backends.

use super::ExecuteResult;
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long output collection may continue after a kill
const OUTPUT_GRACE: Duration = Duration::from_secs(2);

/// What to signal when the deadline expires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KillScope {
    /// The child's whole process group (child was spawned as group leader)
    ProcessGroup,
    /// Only the direct child
    Process,
}

#[derive(Debug, Default)]
struct Capture {
    buf: Vec<u8>,
    truncated: bool,
}

fn spawn_reader<R>(mut reader: R, limit: usize) -> (Arc<Mutex<Capture>>, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let capture = Arc::new(Mutex::new(Capture::default()));
    let sink = Arc::clone(&capture);
    let handle = tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    // Keep draining past the cap so the child never blocks on a full pipe
                    let mut cap = sink.lock();
                    let room = limit.saturating_sub(cap.buf.len());
                    if n <= room {
                        cap.buf.extend_from_slice(&chunk[..n]);
                    } else {
                        cap.buf.extend_from_slice(&chunk[..room]);
                        cap.truncated = true;
                    }
                }
            }
        }
    });
    (capture, handle)
}

fn take_capture(capture: Option<Arc<Mutex<Capture>>>) -> (String, bool) {
    match capture {
        Some(capture) => {
            let cap = capture.lock();
            (String::from_utf8_lossy(&cap.buf).into_owned(), cap.truncated)
        }
        None => (String::new(), false),
    }
}

/// Kill the child according to `scope`.
///
/// `pid` is captured at spawn time because `Child::id` is gone once the
/// child has been reaped, while its group may still have members.
pub(crate) fn kill_tree(child: &mut Child, pid: Option<u32>, scope: KillScope) {
    if scope == KillScope::ProcessGroup {
        if let Some(pid) = pid {
            kill_process_group(pid);
        }
    }
    if let Err(e) = child.start_kill() {
        debug!("start_kill after deadline: {}", e);
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: signalling a process group has no memory-safety preconditions;
    // the group was created for this child by `process_group(0)`.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!("killpg({}) failed: {}", pgid, std::io::Error::last_os_error());
    }
}

#[cfg(windows)]
fn kill_process_group(pid: u32) {
    let status = std::process::Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = status {
        debug!("taskkill /T {} failed: {}", pid, e);
    }
}

#[cfg(not(any(unix, windows)))]
fn kill_process_group(_pid: u32) {}

/// Spawn `cmd`, feed `stdin`, and wait for it under `timeout`.
///
/// A spawn failure is returned as `Err`; anything that happens after the
/// process started is reported inside the result.
pub(crate) async fn run(
    mut cmd: Command,
    stdin: Option<&str>,
    timeout: Duration,
    max_output: usize,
    scope: KillScope,
) -> std::io::Result<ExecuteResult> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    let start = Instant::now();
    let deadline = start + timeout;
    let mut child = cmd.spawn()?;
    let pid = child.id();

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let input = input.as_bytes().to_vec();
        tokio::spawn(async move {
            // The script may exit without reading; a broken pipe is not an error here
            let _ = pipe.write_all(&input).await;
            let _ = pipe.shutdown().await;
        });
    }

    let (stdout_cap, stdout_task) = match child.stdout.take() {
        Some(pipe) => {
            let (cap, task) = spawn_reader(pipe, max_output);
            (Some(cap), Some(task))
        }
        None => (None, None),
    };
    let (stderr_cap, stderr_task) = match child.stderr.take() {
        Some(pipe) => {
            let (cap, task) = spawn_reader(pipe, max_output);
            (Some(cap), Some(task))
        }
        None => (None, None),
    };

    let mut result = ExecuteResult::default();
    let drain_budget = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            match status.code() {
                Some(code) => result.exit_code = code,
                None => {
                    result.exit_code = -1;
                    result.error = Some(format!("process terminated by signal ({})", status));
                }
            }
            deadline.saturating_duration_since(Instant::now()) + OUTPUT_GRACE
        }
        Ok(Err(e)) => {
            kill_tree(&mut child, pid, scope);
            result.exit_code = -1;
            result.error = Some(format!("failed to wait for process: {}", e));
            OUTPUT_GRACE
        }
        Err(_) => {
            warn!("Sandboxed script timed out after {}s, killing", timeout.as_secs_f64());
            kill_tree(&mut child, pid, scope);
            let _ = child.wait().await;
            result.killed = true;
            result.exit_code = -1;
            result.error = Some(format!(
                "execution timed out after {}s",
                timeout.as_secs_f64()
            ));
            OUTPUT_GRACE
        }
    };

    let mut tasks: Vec<JoinHandle<()>> = stdout_task.into_iter().chain(stderr_task).collect();
    let all_done = tokio::time::timeout(drain_budget, async {
        for task in tasks.iter_mut() {
            let _ = task.await;
        }
    })
    .await;
    if all_done.is_err() {
        // Something outside the wait still holds the pipes open
        warn!("Output pipes still open after exit, killing stragglers");
        kill_tree(&mut child, pid, scope);
    }
    for task in &tasks {
        task.abort();
    }

    let (stdout, out_truncated) = take_capture(stdout_cap);
    let (stderr, err_truncated) = take_capture(stderr_cap);
    result.stdout = stdout;
    result.stderr = stderr;
    result.truncated = out_truncated || err_truncated;
    result.duration_ms = start.elapsed().as_millis() as u64;

    Ok(result)
}
