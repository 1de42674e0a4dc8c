//! Bounded execution of external packet-filter tools.
//!
//! Every probe (`iptables --version`, `iptables-legacy-save`, ...) goes through
//! [`ToolRunner`], which provides:
//!
//! - Per-command timeout with SIGTERM → SIGKILL escalation
//! - Output size caps so a huge rule set cannot exhaust memory
//! - Rejection of program names carrying shell metacharacters
//! - A minimal environment with the `C` locale so banners parse predictably
//!
//! # Example
//!
//! ```ignore
//! use xt_core::collect::tool_runner::{ToolConfig, ToolRunner};
//! use std::time::Duration;
//!
//! let runner = ToolRunner::new(ToolConfig {
//!     timeout: Duration::from_secs(2),
//!     ..ToolConfig::default()
//! });
//! let output = runner.run_tool("iptables", &["--version"])?;
//! println!("{}", String::from_utf8_lossy(&output.stdout));
//! ```

use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, instrument, trace, warn};

/// Default timeout per command in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default maximum output size per stream in bytes (1MB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Grace period between SIGTERM and SIGKILL in milliseconds.
const SIGTERM_GRACE_MS: u64 = 500;

const CHUNK_SIZE: usize = 8192;

/// Errors that can occur during tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("command failed to spawn: {0}")]
    SpawnFailed(String),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("command exited with status {code:?} and produced no output")]
    NoOutput { code: Option<i32> },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid command path: {0}")]
    InvalidPath(String),
}

/// Output from a tool execution.
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutput {
    pub command: String,
    pub args: Vec<String>,
    /// Standard output (may be truncated).
    pub stdout: Vec<u8>,
    /// Standard error (may be truncated).
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    /// Whether either stream hit the output cap.
    pub truncated: bool,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ToolOutput {
    /// Get stderr as string (lossy UTF-8 conversion).
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Configuration for the tool runner.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub timeout: Duration,
    /// Maximum bytes kept per stream.
    pub max_output_bytes: usize,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// Runs external tools with a timeout and output cap.
#[derive(Debug, Clone, Default)]
pub struct ToolRunner {
    config: ToolConfig,
}

impl ToolRunner {
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Run a single tool with the given command and arguments.
    ///
    /// A non-zero exit status is not an error here; callers decide what an
    /// exit code means. A timeout is reported through `timed_out`.
    #[instrument(skip(self), fields(cmd = %cmd))]
    pub fn run_tool(&self, cmd: &str, args: &[&str]) -> Result<ToolOutput, ToolError> {
        validate_command(cmd)?;

        let timeout = self.config.timeout;
        let max_output = self.config.max_output_bytes;
        debug!(
            command = %cmd,
            args = ?args,
            timeout_ms = timeout.as_millis() as u64,
            max_output,
            "running tool"
        );

        let start = Instant::now();
        let mut command = build_command(cmd, args);
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ToolError::CommandNotFound(cmd.to_string())
                } else {
                    error!(command = %cmd, error = %e, "failed to spawn");
                    ToolError::SpawnFailed(e.to_string())
                }
            })?;

        let captured = execute_with_timeout(&mut child, timeout, max_output)?;
        let duration = start.elapsed();

        debug!(
            command = %cmd,
            duration_ms = duration.as_millis() as u64,
            exit_code = ?captured.exit_code,
            timed_out = captured.timed_out,
            "tool execution complete"
        );

        Ok(ToolOutput {
            command: cmd.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            stdout: captured.stdout,
            stderr: captured.stderr,
            exit_code: captured.exit_code,
            truncated: captured.truncated,
            duration,
            timed_out: captured.timed_out,
        })
    }
}

/// Reject program names that could smuggle shell syntax.
fn validate_command(cmd: &str) -> Result<(), ToolError> {
    if cmd.is_empty() {
        return Err(ToolError::InvalidPath("empty command".to_string()));
    }

    if cmd.contains(['|', '&', ';', '$', '`', '\n', '\r']) {
        return Err(ToolError::InvalidPath(format!(
            "command contains shell metacharacters: {}",
            cmd
        )));
    }

    if cmd.starts_with('/') && !Path::new(cmd).exists() {
        return Err(ToolError::CommandNotFound(cmd.to_string()));
    }

    Ok(())
}

fn build_command(cmd: &str, args: &[&str]) -> Command {
    let mut command = Command::new(cmd);
    command.args(args);

    command.env_clear();
    if let Ok(path) = std::env::var("PATH") {
        command.env("PATH", path);
    }
    command.env("LC_ALL", "C");
    command.env("LANG", "C");

    command
}

struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<i32>,
    truncated: bool,
    timed_out: bool,
}

/// Append `chunk` to `buf` without exceeding `max`.
fn push_capped(buf: &mut Vec<u8>, chunk: &[u8], max: usize, truncated: &mut bool) {
    let space = max.saturating_sub(buf.len());
    let to_copy = chunk.len().min(space);
    buf.extend_from_slice(&chunk[..to_copy]);
    if chunk.len() > space {
        *truncated = true;
    }
}

fn execute_with_timeout(
    child: &mut Child,
    timeout: Duration,
    max_output: usize,
) -> Result<Captured, ToolError> {
    let deadline = Instant::now() + timeout;
    let mut stdout_buf = Vec::with_capacity(max_output.min(65536));
    let mut stderr_buf = Vec::with_capacity(max_output.min(65536));
    let mut stdout_truncated = false;
    let mut stderr_truncated = false;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut chunk = vec![0u8; CHUNK_SIZE];

    loop {
        if Instant::now() >= deadline {
            warn!(pid = child.id(), "command timed out, sending SIGTERM");
            kill_with_grace(child);
            let exit_code = child.wait().ok().and_then(|s| s.code());
            return Ok(Captured {
                stdout: stdout_buf,
                stderr: stderr_buf,
                exit_code,
                truncated: stdout_truncated || stderr_truncated,
                timed_out: true,
            });
        }

        let mut did_read = false;

        if let Some(ref mut out) = stdout {
            if let Ok(n) = try_read_nonblocking(out, &mut chunk) {
                if n > 0 {
                    did_read = true;
                    push_capped(&mut stdout_buf, &chunk[..n], max_output, &mut stdout_truncated);
                }
            }
        }

        if let Some(ref mut err) = stderr {
            if let Ok(n) = try_read_nonblocking(err, &mut chunk) {
                if n > 0 {
                    did_read = true;
                    push_capped(&mut stderr_buf, &chunk[..n], max_output, &mut stderr_truncated);
                }
            }
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                if let Some(ref mut out) = stdout {
                    let _ = drain_to_limit(out, &mut stdout_buf, max_output, &mut stdout_truncated);
                }
                if let Some(ref mut err) = stderr {
                    let _ = drain_to_limit(err, &mut stderr_buf, max_output, &mut stderr_truncated);
                }
                let exit_code = status.code();
                trace!(exit_code = ?exit_code, "process exited");
                return Ok(Captured {
                    stdout: stdout_buf,
                    stderr: stderr_buf,
                    exit_code,
                    truncated: stdout_truncated || stderr_truncated,
                    timed_out: false,
                });
            }
            Ok(None) => {
                if !did_read {
                    thread::sleep(Duration::from_millis(10));
                }
            }
            Err(e) => {
                error!(error = %e, "failed to wait for child");
                return Err(ToolError::Io(e));
            }
        }
    }
}

/// Drain what is immediately available from a stream, up to the limit.
///
/// Non-blocking so a grandchild still holding the pipe cannot hang us.
#[cfg(unix)]
fn drain_to_limit<R: Read + std::os::unix::io::AsRawFd>(
    stream: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
    truncated: &mut bool,
) -> std::io::Result<()> {
    let mut chunk = vec![0u8; CHUNK_SIZE];
    while !*truncated {
        match try_read_nonblocking(stream, &mut chunk) {
            Ok(0) => break,
            Ok(n) => push_capped(buf, &chunk[..n], max, truncated),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn drain_to_limit(
    stream: &mut impl Read,
    buf: &mut Vec<u8>,
    max: usize,
    truncated: &mut bool,
) -> std::io::Result<()> {
    let mut chunk = vec![0u8; CHUNK_SIZE];
    while !*truncated {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        push_capped(buf, &chunk[..n], max, truncated);
    }
    Ok(())
}

/// Kill a process with SIGTERM, then SIGKILL after the grace period.
#[cfg(unix)]
fn kill_with_grace(child: &mut Child) {
    let pid = child.id() as i32;

    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    debug!(pid, "sent SIGTERM");

    thread::sleep(Duration::from_millis(SIGTERM_GRACE_MS));

    match child.try_wait() {
        Ok(Some(_)) => trace!(pid, "process exited after SIGTERM"),
        Ok(None) => {
            warn!(pid, "process did not exit after SIGTERM, sending SIGKILL");
            unsafe {
                libc::kill(pid, libc::SIGKILL);
            }
            let _ = child.wait();
        }
        Err(e) => error!(pid, error = %e, "failed to check process status"),
    }
}

#[cfg(not(unix))]
fn kill_with_grace(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Read without blocking; `Ok(0)` means nothing is available yet.
///
/// Temporarily sets `O_NONBLOCK` on the descriptor and restores the original
/// flags afterwards.
#[cfg(unix)]
fn try_read_nonblocking<R: Read + std::os::unix::io::AsRawFd>(
    stream: &mut R,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let fd = stream.as_raw_fd();

    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let was_nonblocking = (flags & libc::O_NONBLOCK) != 0;
    if !was_nonblocking {
        let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if result < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    let result = stream.read(buf);

    if !was_nonblocking {
        unsafe {
            libc::fcntl(fd, libc::F_SETFL, flags);
        }
    }

    match result {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn try_read_nonblocking<R: Read>(stream: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    stream.read(buf)
}
