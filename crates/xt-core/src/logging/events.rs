//! Structured event vocabulary.
//!
//! Event names double as tracing targets, so a JSONL consumer can filter on
//! the `event` key without parsing messages.

use serde::{Deserialize, Serialize};

/// Log levels for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Phases of an xtprobe run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup and configuration.
    Init,
    /// Tool and kernel version probing.
    Probe,
    /// Backend selection.
    Backend,
    /// Payload rendering.
    Report,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Probe => "probe",
            Stage::Backend => "backend",
            Stage::Report => "report",
        };
        write!(f, "{}", s)
    }
}

/// Standard event names used in logging.
pub mod event_names {
    // Run lifecycle
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    // Config
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_ERROR: &str = "config.error";

    // Feature detection
    pub const FEATURES_REFRESH: &str = "features.refresh";
    pub const FEATURES_UPDATED: &str = "features.updated";
    pub const PROBE_RESULT: &str = "probe.result";
    pub const PROBE_FALLBACK: &str = "probe.fallback";
    pub const OVERRIDE_APPLIED: &str = "override.applied";
    pub const OVERRIDE_INVALID: &str = "override.invalid";
    pub const OVERRIDE_UNKNOWN: &str = "override.unknown";

    // Backend selection
    pub const BINARY_RESOLVED: &str = "binary.resolved";
    pub const BINARY_NOT_FOUND: &str = "binary.not_found";
    pub const BACKEND_SAVE_OUTPUT: &str = "backend.save_output";
    pub const BACKEND_DETECTED: &str = "backend.detected";
    pub const BACKEND_MISMATCH: &str = "backend.mismatch";

    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// Correlation IDs attached to every event emitted through [`log_event!`](crate::log_event).
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Unique ID for this invocation.
    pub run_id: String,
    pub host_id: String,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>, host_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
            host_id: host_id.into(),
        }
    }
}
