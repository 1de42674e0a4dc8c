//! JSON Schema generation for xtprobe payloads.
//!
//! ```bash
//! xtprobe schema              # FeaturesReport
//! xtprobe schema --list
//! xtprobe schema BackendReport
//! ```

use schemars::schema_for;
use serde_json::Value;

pub use crate::backend::BackendDecision;
pub use crate::features::ProbedVersions;
pub use crate::report::{BackendReport, BinariesReport, FeaturesReport};
pub use xt_common::Features;

/// Schema emitted when no type is named.
pub const DEFAULT_SCHEMA: &str = "FeaturesReport";

/// Available schema types with their descriptions.
pub fn available_schemas() -> Vec<(&'static str, &'static str)> {
    vec![
        ("FeaturesReport", "Output of `xtprobe features`"),
        ("BackendReport", "Output of `xtprobe backend`"),
        ("BinariesReport", "Output of `xtprobe binaries`"),
        ("Features", "Packet-filter capability flags"),
        ("ProbedVersions", "Tool and kernel versions behind a detection"),
        ("BackendDecision", "Backend selection outcome"),
    ]
}

/// Generate the JSON Schema for a type by name; `None` if unknown.
pub fn generate_schema(type_name: &str) -> Option<Value> {
    let schema = match type_name {
        "FeaturesReport" => schema_for!(FeaturesReport),
        "BackendReport" => schema_for!(BackendReport),
        "BinariesReport" => schema_for!(BinariesReport),
        "Features" => schema_for!(Features),
        "ProbedVersions" => schema_for!(ProbedVersions),
        "BackendDecision" => schema_for!(BackendDecision),
        _ => return None,
    };
    serde_json::to_value(schema).ok()
}
