//! xtprobe core library
//!
//! This library provides the detection logic behind the `xtprobe` binary:
//! - Cached iptables feature detection from tool and kernel versions
//! - Legacy vs nft backend selection from save-command output
//! - Bounded external tool execution
//! - Structured logging and stable exit codes
//!
//! The binary entry point is in `main.rs`.

pub mod backend;
pub mod collect;
pub mod exit_codes;
pub mod features;
pub mod logging;
pub mod probe;
pub mod report;
pub mod schema;

pub use backend::{detect_backend, find_best_binary, BackendDecision, BackendError};
pub use features::{FeatureDetector, ProbedVersions};
