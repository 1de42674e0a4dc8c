//! Host collaborators used by detection.
//!
//! Detection never touches the host directly. It goes through three small
//! traits so tests can substitute canned doubles:
//!
//! - [`CommandRunner`]: run a program and collect its stdout
//! - [`VersionSource`]: open the kernel version text
//! - [`NameResolver`]: check whether a binary is on `PATH`
//!
//! Closures implement all three, which keeps test doubles short.

use crate::collect::tool_runner::{ToolConfig, ToolError, ToolRunner};
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{trace, warn};
use xt_config::ProbeConfig;

/// Runs a named program with arguments and returns its stdout.
///
/// A non-zero exit that still produced output counts as success; the caller
/// only cares about the text.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<Vec<u8>, ToolError>;
}

impl<F> CommandRunner for F
where
    F: Fn(&str, &[&str]) -> Result<Vec<u8>, ToolError>,
{
    fn run(&self, program: &str, args: &[&str]) -> Result<Vec<u8>, ToolError> {
        self(program, args)
    }
}

/// Supplies the text the kernel version is parsed from.
pub trait VersionSource {
    fn open(&self) -> io::Result<Box<dyn Read + '_>>;
}

impl<F, R> VersionSource for F
where
    F: Fn() -> io::Result<R>,
    R: Read + 'static,
{
    fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(self()?))
    }
}

/// Errors from binary name resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{name} not found on PATH")]
    NotFound { name: String },

    #[error("failed to resolve {name}: {reason}")]
    Lookup { name: String, reason: String },
}

/// Checks whether a binary name resolves on the search path.
pub trait NameResolver {
    fn resolve(&self, name: &str) -> Result<PathBuf, ResolveError>;
}

impl<F> NameResolver for F
where
    F: Fn(&str) -> Result<PathBuf, ResolveError>,
{
    fn resolve(&self, name: &str) -> Result<PathBuf, ResolveError> {
        self(name)
    }
}

/// Production [`CommandRunner`] backed by the bounded [`ToolRunner`].
#[derive(Debug, Clone, Default)]
pub struct ToolCommandRunner {
    runner: ToolRunner,
}

impl ToolCommandRunner {
    pub fn new(runner: ToolRunner) -> Self {
        Self { runner }
    }

    /// Build a runner honouring the `[probe]` timeout and output cap.
    pub fn from_probe_config(probe: &ProbeConfig) -> Self {
        Self::new(ToolRunner::new(ToolConfig {
            timeout: Duration::from_millis(probe.timeout_ms),
            max_output_bytes: probe.max_output_bytes,
        }))
    }
}

impl CommandRunner for ToolCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<Vec<u8>, ToolError> {
        let output = self.runner.run_tool(program, args)?;
        if output.timed_out {
            return Err(ToolError::Timeout(self.runner.config().timeout));
        }
        if output.truncated {
            warn!(
                program,
                max_output_bytes = self.runner.config().max_output_bytes,
                "output hit the size cap and was cut short"
            );
        }
        if !output.success() && output.stdout.is_empty() {
            trace!(
                program,
                stderr = %output.stderr_str().trim(),
                "command failed without output"
            );
            return Err(ToolError::NoOutput {
                code: output.exit_code,
            });
        }
        Ok(output.stdout)
    }
}

/// Production [`VersionSource`] reading a file such as `/proc/version`.
#[derive(Debug, Clone)]
pub struct ProcVersionSource {
    path: PathBuf,
}

impl ProcVersionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcVersionSource {
    fn default() -> Self {
        Self::new(xt_config::config::DEFAULT_KERNEL_VERSION_PATH)
    }
}

impl VersionSource for ProcVersionSource {
    fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(File::open(&self.path)?))
    }
}

/// Production [`NameResolver`] searching `PATH` with the `which` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathResolver;

impl NameResolver for PathResolver {
    fn resolve(&self, name: &str) -> Result<PathBuf, ResolveError> {
        which::which(name).map_err(|e| match e {
            which::Error::CannotFindBinaryPath => ResolveError::NotFound {
                name: name.to_string(),
            },
            other => ResolveError::Lookup {
                name: name.to_string(),
                reason: other.to_string(),
            },
        })
    }
}
