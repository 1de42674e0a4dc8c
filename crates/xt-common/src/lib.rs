//! xtprobe common types and errors.
//!
//! This crate provides the foundational types shared by the other xtprobe crates:
//! - iptables backend identifiers
//! - Dotted-triplet versions and their parsers
//! - Packet-filter capability flags and their version thresholds
//! - Common error types
//! - Output format specifications

pub mod backend;
pub mod error;
pub mod features;
pub mod output;
pub mod version;

pub use backend::{Backend, BackendPreference};
pub use error::{Error, ErrorCategory, Result, StructuredError};
pub use features::{parse_bool, FeatureFlag, Features, ParseBoolError};
pub use output::OutputFormat;
pub use version::{Version, VersionParseError};

/// Schema version for JSON payloads emitted by xtprobe.
pub const SCHEMA_VERSION: &str = "1.0.0";
