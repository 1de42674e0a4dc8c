//! Structured logging for xtprobe.
//!
//! Provides dual-mode logging:
//! - Human-readable console output for interactive use
//! - Machine-parseable JSONL for agents and CI
//!
//! # Usage
//!
//! ```ignore
//! use xt_core::logging::{init_logging, LogConfig, LogContext, Stage, event_names};
//!
//! let config = LogConfig::from_env(None, None);
//! init_logging(&config);
//!
//! let ctx = LogContext::new(generate_run_id(), get_host_id());
//! xt_core::log_event!(ctx, INFO, event_names::RUN_STARTED, Stage::Init, "starting");
//! ```
//!
//! stdout is reserved for command payloads; all log output goes to stderr.

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use events::{event_names, Level, LogContext, Stage};
pub use layer::{JsonlLayer, MemoryWriter};

use std::io::IsTerminal;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Build the event filter for `config`.
///
/// Raw `RUST_LOG` directives are used only when `RUST_LOG` chose the level;
/// `XTPROBE_LOG` and the CLI flags always reduce to a single level.
pub fn build_filter(config: &LogConfig) -> EnvFilter {
    let level_only =
        || EnvFilter::default().add_directive(LevelFilter::from(config.level).into());
    match config.directives.as_deref() {
        Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|_| level_only()),
        None => level_only(),
    }
}

/// Initialize the logging subsystem.
///
/// Must be called once at startup before any logging occurs.
pub fn init_logging(config: &LogConfig) {
    let filter = build_filter(config);

    // try_init: a second call (tests, embedding) keeps the first subscriber.
    let _ = match config.format {
        LogFormat::Human => {
            let use_ansi = std::io::stderr().is_terminal();
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(use_ansi);

            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .try_init()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.without_time())
                    .try_init()
            }
        }
        LogFormat::Jsonl => tracing_subscriber::registry()
            .with(filter)
            .with(JsonlLayer::stderr())
            .try_init(),
    };
}

/// Generate a unique run ID for this invocation.
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    format!("run-{}", &uuid.simple().to_string()[..12])
}

/// Get the host ID for logging.
///
/// Uses machine-id when readable, otherwise a random ID.
pub fn get_host_id() -> String {
    if let Ok(id) = std::fs::read_to_string("/etc/machine-id") {
        let id = id.trim();
        if id.len() >= 8 && id.is_ascii() {
            return format!("host-{}", &id[..8]);
        }
    }
    format!("host-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

/// Structured event logging with run correlation.
///
/// Usage:
/// ```ignore
/// log_event!(ctx, INFO, event_names::RUN_STARTED, Stage::Init, "starting run");
/// log_event!(ctx, WARN, event_names::CONFIG_ERROR, Stage::Init, "bad override",
///     entry = "SNATFullyRandom", error = %err);
/// ```
#[macro_export]
macro_rules! log_event {
    ($ctx:expr, INFO, $event:expr, $stage:expr, $msg:expr $(, $($field:tt)+)?) => {
        tracing::info!(
            target: $event,
            run_id = %$ctx.run_id,
            host_id = %$ctx.host_id,
            stage = %$stage,
            $($($field)+,)?
            "{}", $msg
        )
    };
    ($ctx:expr, DEBUG, $event:expr, $stage:expr, $msg:expr $(, $($field:tt)+)?) => {
        tracing::debug!(
            target: $event,
            run_id = %$ctx.run_id,
            host_id = %$ctx.host_id,
            stage = %$stage,
            $($($field)+,)?
            "{}", $msg
        )
    };
    ($ctx:expr, WARN, $event:expr, $stage:expr, $msg:expr $(, $($field:tt)+)?) => {
        tracing::warn!(
            target: $event,
            run_id = %$ctx.run_id,
            host_id = %$ctx.host_id,
            stage = %$stage,
            $($($field)+,)?
            "{}", $msg
        )
    };
    ($ctx:expr, ERROR, $event:expr, $stage:expr, $msg:expr $(, $($field:tt)+)?) => {
        tracing::error!(
            target: $event,
            run_id = %$ctx.run_id,
            host_id = %$ctx.host_id,
            stage = %$stage,
            $($($field)+,)?
            "{}", $msg
        )
    };
}
