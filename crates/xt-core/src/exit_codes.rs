//! Exit codes for the xtprobe CLI.
//!
//! Exit code ranges:
//! - 0: success
//! - 10-19: user/environment errors (recoverable by user action)
//! - 20-29: internal errors (bugs, should be reported)

use xt_common::{Error, ErrorCategory};

/// Exit codes for xtprobe operations.
///
/// These codes are a stable contract for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Clean = 0,

    /// Invalid arguments or override syntax
    ArgsError = 10,

    /// Required iptables binary missing
    CapabilityError = 11,

    /// Configuration file missing, unparsable or invalid
    ConfigError = 12,

    /// Internal error (bug - please report)
    InternalError = 20,

    /// I/O error
    IoError = 21,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Internal error (codes 20-29).
    pub fn is_internal_error(self) -> bool {
        (self as i32) >= 20
    }

    /// Stable name for JSON output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::CapabilityError => "ERR_CAPABILITY",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
        }
    }

    /// Map a library error to the exit code the CLI terminates with.
    pub fn for_error(error: &Error) -> Self {
        match error {
            Error::InvalidOverride { .. } | Error::UnknownBackend(_) => ExitCode::ArgsError,
            Error::BinaryNotFound { .. } => ExitCode::CapabilityError,
            Error::Config(_) => ExitCode::ConfigError,
            _ => match error.category() {
                ErrorCategory::Io => ExitCode::IoError,
                _ => ExitCode::InternalError,
            },
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
