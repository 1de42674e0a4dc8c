//! Error types for xtprobe.
//!
//! Feature detection itself never fails (every probe failure degrades to a
//! conservative default), so this type covers the surfaces around it:
//! configuration, backend binary resolution, and I/O.
//!
//! Each variant carries:
//! - a stable numeric code for machine parsing
//! - a category for grouping
//! - a recoverability hint
//! - a remediation sentence for humans

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for xtprobe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration file and override errors.
    Config,
    /// Backend binary resolution errors.
    Backend,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Backend => write!(f, "backend"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified error type for xtprobe.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid feature override {entry:?}: {reason}")]
    InvalidOverride { entry: String, reason: String },

    #[error("unknown backend {0:?} (expected auto, legacy or nft)")]
    UnknownBackend(String),

    // Backend errors (30-39)
    #[error("no {kind} binary found, tried {candidates:?}")]
    BinaryNotFound {
        kind: String,
        candidates: Vec<String>,
    },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the stable error code for this error.
    ///
    /// - 10-19: configuration
    /// - 30-39: backend resolution
    /// - 60-69: I/O
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidOverride { .. } => 11,
            Error::UnknownBackend(_) => 12,
            Error::BinaryNotFound { .. } => 30,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidOverride { .. } | Error::UnknownBackend(_) => {
                ErrorCategory::Config
            }
            Error::BinaryNotFound { .. } => ErrorCategory::Backend,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether this error is potentially recoverable without operator action.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) => false,
            Error::InvalidOverride { .. } => true, // override is skipped
            Error::UnknownBackend(_) => false,
            Error::BinaryNotFound { .. } => false, // host is unusable for detection
            Error::Io(_) => true,
            Error::Json(_) => false,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) => "Run 'xtprobe check' to validate the configuration file.",
            Error::InvalidOverride { .. } => {
                "Use Name=value pairs with a known flag name and a value such as true or false."
            }
            Error::UnknownBackend(_) => "Set the preferred backend to auto, legacy or nft.",
            Error::BinaryNotFound { .. } => {
                "Install iptables (legacy or nft variant) so that iptables-save and ip6tables-save are on PATH."
            }
            Error::Io(_) => "Check file permissions and that the path exists.",
            Error::Json(_) => "Report this as a bug with the failing command line.",
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::InvalidOverride { .. } => "Invalid Feature Override",
            Error::UnknownBackend(_) => "Unknown Backend",
            Error::BinaryNotFound { .. } => "iptables Binary Not Found",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "Serialization Error",
        }
    }

    /// Format for a terminal: headline, reason, fix.
    pub fn format_human(&self) -> String {
        format!(
            "✗ {}\n  Reason: {}\n  Fix: {}",
            self.headline(),
            self,
            self.remediation()
        )
    }

    /// Structured form for JSON output.
    pub fn to_structured(&self) -> StructuredError {
        StructuredError {
            code: self.code(),
            category: self.category(),
            message: self.to_string(),
            recoverable: self.is_recoverable(),
            remediation: self.remediation().to_string(),
        }
    }
}

/// Serializable view of an [`Error`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: u32,
    pub category: ErrorCategory,
    pub message: String,
    pub recoverable: bool,
    pub remediation: String,
}
