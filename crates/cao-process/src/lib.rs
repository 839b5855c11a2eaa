//! Child-process execution: spawning, prefixed tee streaming, output
//! capture, and timeout enforcement.
//!
//! Each assistant child gets its own stdout/stderr drain; every complete
//! line goes to the terminal through a shared serialised sink (one line =
//! one atomic write) so concurrent children never interleave mid-line.

mod sink;

pub use sink::TermSink;

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Sentinel exit code for a child terminated by the timeout path.
pub const EXIT_TIMEOUT: i32 = 124;
/// Sentinel exit code for a child terminated by task-level cancellation.
pub const EXIT_CANCELLED: i32 = 130;
/// Fallback exit code when the child died from an unexpected signal.
pub const EXIT_SIGNALLED: i32 = 1;

const GRACE_PERIOD: Duration = Duration::from_secs(1);
const READ_BUF_SIZE: usize = 4096;

/// Controls whether captured lines are also mirrored to the terminal sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// Only buffer output; do not mirror.
    BufferOnly,
    /// Buffer output AND mirror each line with a `[label] ` prefix (default).
    #[default]
    TeePrefixed,
}

/// One child-process invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Prefix label, normally the assistant short name.
    pub label: String,
    /// Full argv; `argv[0]` is the program. Passed to the OS directly,
    /// never through a shell.
    pub argv: Vec<String>,
    pub work_dir: PathBuf,
    /// Extra environment on top of the inherited one.
    pub env_overrides: HashMap<String, String>,
    /// Variables removed from the inherited environment.
    pub env_remove: Vec<String>,
    /// Absolute wall-clock timeout for this child.
    pub timeout: Duration,
    /// Capture cap per stream, in bytes. Streaming is unaffected.
    pub output_cap: usize,
    /// Optional crash-safe spool file receiving raw stdout chunks.
    pub spool: Option<PathBuf>,
    pub stream_mode: StreamMode,
    /// Task-level cancellation; flipping to `true` soft-terminates the child.
    pub cancel: Option<tokio::sync::watch::Receiver<bool>>,
}

impl ExecRequest {
    pub fn new(label: impl Into<String>, argv: Vec<String>, work_dir: PathBuf) -> Self {
        Self {
            label: label.into(),
            argv,
            work_dir,
            env_overrides: HashMap::new(),
            env_remove: Vec::new(),
            timeout: Duration::from_secs(600),
            output_cap: 4 * 1024 * 1024,
            spool: None,
            stream_mode: StreamMode::default(),
            cancel: None,
        }
    }
}

/// Result of executing a child process.
#[derive(Debug, Clone, Serialize)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub cancelled: bool,
    /// True when either capture buffer hit the cap.
    pub truncated: bool,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && !self.cancelled
    }

    /// Last non-empty stdout line, truncated for one-line reports.
    pub fn summary(&self) -> String {
        let line = self
            .stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("");
        truncate_line(line, 200)
    }
}

/// Capture buffer with a byte cap. Streaming continues past the cap.
struct Capture {
    text: String,
    cap: usize,
    truncated: bool,
}

impl Capture {
    fn new(cap: usize) -> Self {
        Self {
            text: String::new(),
            cap,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &str) {
        if self.truncated {
            return;
        }
        let room = self.cap.saturating_sub(self.text.len());
        if chunk.len() <= room {
            self.text.push_str(chunk);
        } else {
            let keep = floor_char_boundary(chunk, room);
            self.text.push_str(&chunk[..keep]);
            self.text.push_str("\n[output capture truncated]\n");
            self.truncated = true;
        }
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Execute one child to completion.
///
/// - argv is passed directly to the OS (no shell); stdin is closed
/// - stdout/stderr are captured AND mirrored line-by-line through `sink`
///   with `[label] ` / `[label!] ` prefixes
/// - on timeout: SIGTERM to the child's process group, then SIGKILL after
///   a one-second grace period; exit code becomes [`EXIT_TIMEOUT`]
/// - cancellation follows the same soft-then-hard path with
///   [`EXIT_CANCELLED`]
pub async fn execute(req: ExecRequest, sink: &TermSink) -> Result<ExecOutcome> {
    let started = std::time::Instant::now();
    let mut child = spawn(&req)?;

    let stdout = child
        .stdout
        .take()
        .context("child stdout was not piped")?;
    let stderr = child
        .stderr
        .take()
        .context("child stderr was not piped")?;

    let mut spool_file = req.spool.as_ref().and_then(|path| {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => Some(f),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open output spool file");
                None
            }
        }
    });

    let out_prefix = format!("[{}] ", req.label);
    let err_prefix = format!("[{}!] ", req.label);

    let mut stdout_reader = BufReader::new(stdout);
    let mut stderr_reader = BufReader::new(stderr);
    let mut stdout_buf = [0u8; READ_BUF_SIZE];
    let mut stderr_buf = [0u8; READ_BUF_SIZE];
    let mut stdout_line = String::new();
    let mut stderr_line = String::new();
    let mut stdout_capture = Capture::new(req.output_cap);
    let mut stderr_capture = Capture::new(req.output_cap);
    let mut stdout_done = false;
    let mut stderr_done = false;
    let mut timed_out = false;
    let mut cancelled = false;

    let deadline = tokio::time::Instant::now() + req.timeout;
    let mut cancel = req.cancel.clone();

    while !stdout_done || !stderr_done {
        tokio::select! {
            result = stdout_reader.read(&mut stdout_buf), if !stdout_done => {
                match result {
                    Ok(0) | Err(_) => {
                        flush_partial(
                            &mut stdout_line,
                            &mut stdout_capture,
                            sink,
                            &out_prefix,
                            req.stream_mode,
                        );
                        stdout_done = true;
                    }
                    Ok(n) => {
                        spool_chunk(&mut spool_file, &stdout_buf[..n]);
                        let chunk = String::from_utf8_lossy(&stdout_buf[..n]);
                        accumulate_lines(
                            &chunk,
                            &mut stdout_line,
                            &mut stdout_capture,
                            sink,
                            &out_prefix,
                            req.stream_mode,
                        );
                    }
                }
            }
            result = stderr_reader.read(&mut stderr_buf), if !stderr_done => {
                match result {
                    Ok(0) | Err(_) => {
                        flush_partial(
                            &mut stderr_line,
                            &mut stderr_capture,
                            sink,
                            &err_prefix,
                            req.stream_mode,
                        );
                        stderr_done = true;
                    }
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&stderr_buf[..n]);
                        accumulate_lines(
                            &chunk,
                            &mut stderr_line,
                            &mut stderr_capture,
                            sink,
                            &err_prefix,
                            req.stream_mode,
                        );
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                timed_out = true;
                warn!(
                    label = %req.label,
                    timeout_ms = req.timeout.as_millis() as u64,
                    "child exceeded timeout; terminating"
                );
                terminate(&mut child).await;
                break;
            }
            changed = wait_cancelled(&mut cancel) => {
                if changed {
                    cancelled = true;
                    debug!(label = %req.label, "child cancelled; terminating");
                    terminate(&mut child).await;
                    break;
                }
            }
        }
    }

    let status = child.wait().await.context("failed to wait for child")?;

    let mut exit_code = status.code().unwrap_or_else(|| {
        warn!(label = %req.label, "child terminated by signal");
        EXIT_SIGNALLED
    });
    if timed_out {
        exit_code = EXIT_TIMEOUT;
    } else if cancelled {
        exit_code = EXIT_CANCELLED;
    }

    Ok(ExecOutcome {
        exit_code,
        stdout: stdout_capture.text,
        stderr: stderr_capture.text,
        duration_ms: started.elapsed().as_millis() as u64,
        timed_out,
        cancelled,
        truncated: stdout_capture.truncated || stderr_capture.truncated,
    })
}

fn spawn(req: &ExecRequest) -> Result<tokio::process::Child> {
    let Some((program, rest)) = req.argv.split_first() else {
        anyhow::bail!("empty argv for '{}'", req.label);
    };

    let mut cmd = Command::new(program);
    cmd.args(rest);
    cmd.current_dir(&req.work_dir);
    for var in &req.env_remove {
        cmd.env_remove(var);
    }
    for (key, value) in &req.env_overrides {
        cmd.env(key, value);
    }
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    // Isolate the child in its own process group so soft/hard termination
    // reaches its descendants too.
    // SAFETY: setsid() is async-signal-safe and runs before exec.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    cmd.spawn()
        .with_context(|| format!("failed to spawn '{}' for '{}'", program, req.label))
}

/// SIGTERM the child's process group; escalate to SIGKILL after the grace
/// period if it is still alive.
async fn terminate(child: &mut tokio::process::Child) {
    signal_group(child, libc::SIGTERM);

    if tokio::time::timeout(GRACE_PERIOD, child.wait()).await.is_ok() {
        return;
    }

    signal_group(child, libc::SIGKILL);
}

fn signal_group(child: &mut tokio::process::Child, signal: i32) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: kill() is async-signal-safe; the negative PID targets
            // the process group created by setsid in pre_exec.
            unsafe {
                libc::kill(-(pid as i32), signal);
            }
            return;
        }
    }
    let _ = child.start_kill();
}

async fn wait_cancelled(cancel: &mut Option<tokio::sync::watch::Receiver<bool>>) -> bool {
    match cancel {
        Some(rx) => {
            if *rx.borrow() {
                return true;
            }
            match rx.changed().await {
                Ok(()) => *rx.borrow(),
                // Sender dropped; no cancellation will ever arrive.
                Err(_) => std::future::pending().await,
            }
        }
        None => std::future::pending().await,
    }
}

/// Accumulate a chunk into the line buffer, flushing complete lines to the
/// capture buffer and (in tee mode) to the terminal sink.
fn accumulate_lines(
    chunk: &str,
    line_buf: &mut String,
    capture: &mut Capture,
    sink: &TermSink,
    prefix: &str,
    mode: StreamMode,
) {
    line_buf.push_str(chunk);
    while let Some(newline_pos) = line_buf.find('\n') {
        let line: String = line_buf.drain(..=newline_pos).collect();
        if mode == StreamMode::TeePrefixed {
            sink.write_line(prefix, line.trim_end_matches('\n'));
        }
        capture.push(&line);
    }
}

/// Flush a remaining partial line at EOF.
fn flush_partial(
    line_buf: &mut String,
    capture: &mut Capture,
    sink: &TermSink,
    prefix: &str,
    mode: StreamMode,
) {
    if line_buf.is_empty() {
        return;
    }
    if mode == StreamMode::TeePrefixed {
        sink.write_line(prefix, line_buf);
    }
    capture.push(line_buf);
    line_buf.clear();
}

/// Best-effort write of a raw chunk to the spool file.
fn spool_chunk(spool: &mut Option<std::fs::File>, bytes: &[u8]) {
    if let Some(f) = spool {
        use std::io::Write;
        let _ = f.write_all(bytes);
        let _ = f.flush();
    }
}

fn truncate_line(line: &str, max_chars: usize) -> String {
    if line.chars().nth(max_chars).is_none() {
        line.to_string()
    } else {
        let truncated: String = line.chars().take(max_chars - 3).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
