//! Runs external tools under a hard wall-clock budget.
//!
//! Every child is started as the leader of its own process group so that a
//! timeout can take down the helpers it spawned (yt-dlp forks ffmpeg, for
//! instance). Elsewhere than Unix only the direct child is killed.

use crate::error::{TubeError, TubeResult};
use parking_lot::Mutex;
use std::ffi::OsStr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Time between SIGTERM and SIGKILL
const TERM_GRACE: Duration = Duration::from_millis(500);
/// Upper bound for collecting buffered output after a kill
const DRAIN_LIMIT: Duration = Duration::from_secs(2);

const STDERR_TAIL_LINES: usize = 15;
const STDOUT_TAIL_LINES: usize = 10;

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Tail of stderr followed by the tail of stdout
    pub fn diagnostics(&self) -> String {
        let mut lines = tail(&self.stderr, STDERR_TAIL_LINES);
        lines.extend(tail(&self.stdout, STDOUT_TAIL_LINES));
        lines.join("\n")
    }

    /// Turn a timeout or a non-zero exit into the matching error
    pub fn check(self, tool: &str) -> TubeResult<ProcessOutput> {
        if self.timed_out {
            return Err(TubeError::Timeout {
                tool: tool.to_string(),
                seconds: self.elapsed.as_secs(),
            });
        }
        if self.exit_code == Some(0) {
            return Ok(self);
        }
        Err(TubeError::ToolFailed {
            tool: tool.to_string(),
            code: self.exit_code,
            diagnostics: self.diagnostics(),
        })
    }
}

fn tail(text: &str, n: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].iter().map(|l| l.to_string()).collect()
}

/// Run `program` with `args`, killing its process group once `timeout`
/// elapses.
///
/// A timeout is not an error here: the output comes back with
/// `timed_out` set and whatever was buffered. A binary that cannot be
/// found is reported as [`TubeError::ToolMissing`].
pub async fn run<S: AsRef<OsStr>>(
    program: impl AsRef<OsStr>,
    args: &[S],
    timeout: Duration,
) -> TubeResult<ProcessOutput> {
    let program = program.as_ref();
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    command.process_group(0);

    let started = Instant::now();
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TubeError::ToolMissing {
                tool: program.to_string_lossy().into_owned(),
            });
        }
        Err(e) => return Err(e.into()),
    };
    let pid = child.id();
    debug!(program = %program.to_string_lossy(), ?pid, ?timeout, "Spawned process");

    let stdout_buf = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let mut pumps = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(out, stdout_buf.clone())));
    }
    if let Some(err) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(err, stderr_buf.clone())));
    }

    let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => (status?.code(), false),
        Err(_) => {
            warn!(
                program = %program.to_string_lossy(),
                ?pid,
                "Hard timeout after {:.1}s, killing process group",
                started.elapsed().as_secs_f64()
            );
            terminate(&mut child, pid).await;
            (None, true)
        }
    };

    let drain = futures::future::join_all(pumps.iter_mut());
    if tokio::time::timeout(DRAIN_LIMIT, drain).await.is_err() {
        debug!(?pid, "Output drain did not finish, keeping partial output");
        for pump in &pumps {
            pump.abort();
        }
    }

    let stdout = String::from_utf8_lossy(&stdout_buf.lock()).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_buf.lock()).into_owned();

    Ok(ProcessOutput {
        pid,
        exit_code,
        stdout,
        stderr,
        timed_out,
        elapsed: started.elapsed(),
    })
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, sink: Arc<Mutex<Vec<u8>>>) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink.lock().extend_from_slice(&buf[..n]),
        }
    }
}

#[cfg(unix)]
async fn terminate(child: &mut Child, pid: Option<u32>) {
    let Some(pid) = pid else {
        let _ = child.start_kill();
        let _ = tokio::time::timeout(DRAIN_LIMIT, child.wait()).await;
        return;
    };
    let group = pid as libc::pid_t;

    // SAFETY: killpg only sends a signal; the group id is the child's pid
    // because it was spawned with process_group(0).
    unsafe {
        libc::killpg(group, libc::SIGTERM);
    }
    let _ = tokio::time::timeout(TERM_GRACE, child.wait()).await;
    // stragglers in the group may outlive the leader
    unsafe {
        libc::killpg(group, libc::SIGKILL);
    }
    let _ = tokio::time::timeout(DRAIN_LIMIT, child.wait()).await;
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child, _pid: Option<u32>) {
    // no process groups here: grandchildren may survive
    let _ = child.start_kill();
    let _ = tokio::time::timeout(DRAIN_LIMIT, child.wait()).await;
}
