//! Configuration validation.
//!
//! Bad override entries never stop detection (the detector skips them with a
//! warning), so they are reported as warnings here too. Only probe settings
//! that would make every probe fail are errors.

use crate::config::XtConfig;
use serde::Serialize;
use thiserror::Error;
use xt_common::{parse_bool, FeatureFlag};

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// A non-fatal finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

/// Outcome of validating a configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate a configuration semantically.
pub fn validate_config(config: &XtConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    for (name, value) in &config.features.overrides {
        let field = format!("features.overrides.{name}");
        if parse_bool(value).is_err() {
            report.warnings.push(ValidationIssue {
                field,
                message: format!("value {value:?} is not a boolean; override will be ignored"),
            });
        } else if FeatureFlag::from_name(name).is_none() {
            let known: Vec<&str> = FeatureFlag::ALL.iter().map(|f| f.name()).collect();
            report.warnings.push(ValidationIssue {
                field,
                message: format!(
                    "unknown feature flag; override will be ignored (known: {})",
                    known.join(", ")
                ),
            });
        }
    }

    if config.probe.iptables_command.trim().is_empty() {
        report.errors.push(ValidationError::InvalidValue {
            field: "probe.iptables_command".to_string(),
            message: "must not be empty".to_string(),
        });
    }
    if config.probe.timeout_ms == 0 {
        report.errors.push(ValidationError::InvalidValue {
            field: "probe.timeout_ms".to_string(),
            message: "must be greater than 0".to_string(),
        });
    }
    if config.probe.max_output_bytes == 0 {
        report.errors.push(ValidationError::InvalidValue {
            field: "probe.max_output_bytes".to_string(),
            message: "must be greater than 0".to_string(),
        });
    }

    report
}
