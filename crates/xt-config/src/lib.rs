//! xtprobe configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for `xtprobe.toml`
//! - Config resolution (CLI → env → XDG → /etc → defaults)
//! - `Name=value` feature override parsing
//! - Semantic validation

pub mod config;
pub mod overrides;
pub mod resolve;
pub mod validate;

pub use config::{
    load_config, load_config_with_env, BackendConfig, ConfigError, ConfigOptions, FeatureConfig,
    ProbeConfig, ResolvedConfig, XtConfig, ENV_FEATURE_OVERRIDE,
};
pub use overrides::{parse_override_list, parse_override_pair, OverrideMap};
pub use resolve::{resolve_config_path, ConfigSource, CONFIG_FILENAME};
pub use validate::{validate_config, ValidationError, ValidationIssue, ValidationReport};
