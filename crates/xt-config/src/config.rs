//! Typed configuration file and loading.

use crate::overrides::{parse_override_list, parse_override_pair, OverrideMap};
use crate::resolve::{resolve_config_path, ConfigSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use xt_common::BackendPreference;

/// Environment variable carrying a comma-separated override list.
pub const ENV_FEATURE_OVERRIDE: &str = "XTPROBE_FEATURE_OVERRIDE";

/// Default tool probed for its version.
pub const DEFAULT_IPTABLES_COMMAND: &str = "iptables";
/// Default kernel version text source.
pub const DEFAULT_KERNEL_VERSION_PATH: &str = "/proc/version";
/// Default per-probe timeout.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5000;
/// Default per-probe output cap (1 MiB; save output of large rule sets fits).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid feature override from {origin}: {source}")]
    Override {
        origin: &'static str,
        #[source]
        source: xt_common::Error,
    },
}

impl From<ConfigError> for xt_common::Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Override { source, .. } => source,
            other => xt_common::Error::Config(other.to_string()),
        }
    }
}

/// Top-level configuration file (`xtprobe.toml`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct XtConfig {
    pub features: FeatureConfig,
    pub backend: BackendConfig,
    pub probe: ProbeConfig,
}

/// `[features]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureConfig {
    /// Flag name → boolean-ish string. Applied after detection on every refresh.
    pub overrides: OverrideMap,
}

/// `[backend]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    pub preferred: BackendPreference,
}

/// `[probe]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    /// Program run with `--version` to learn the tool version.
    pub iptables_command: String,
    /// File holding kernel version text.
    pub kernel_version_path: PathBuf,
    /// Per-probe timeout in milliseconds.
    pub timeout_ms: u64,
    /// Per-probe stdout/stderr cap in bytes.
    pub max_output_bytes: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            iptables_command: DEFAULT_IPTABLES_COMMAND.to_string(),
            kernel_version_path: PathBuf::from(DEFAULT_KERNEL_VERSION_PATH),
            timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

impl XtConfig {
    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read and parse a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }
}

/// Configuration resolution options.
#[derive(Debug, Default, Clone)]
pub struct ConfigOptions {
    /// Explicit config file path (highest priority for the file itself).
    pub config_path: Option<PathBuf>,
    /// `Name=value` overrides from the command line; applied last.
    pub cli_overrides: Vec<String>,
    /// Preferred backend from the command line; replaces the file's value.
    pub cli_backend: Option<BackendPreference>,
}

/// Resolved configuration with provenance.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: XtConfig,
    /// Config file used (None when running on built-in defaults).
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
}

/// Load configuration with the standard resolution order, then layer
/// `XTPROBE_FEATURE_OVERRIDE` and CLI overrides on top (later wins per key).
pub fn load_config(options: &ConfigOptions) -> Result<ResolvedConfig, ConfigError> {
    let env_overrides = std::env::var(ENV_FEATURE_OVERRIDE).ok();
    load_config_with_env(options, env_overrides.as_deref())
}

/// [`load_config`] with the override environment value supplied by the caller.
pub fn load_config_with_env(
    options: &ConfigOptions,
    env_overrides: Option<&str>,
) -> Result<ResolvedConfig, ConfigError> {
    let (path, source) = resolve_config_path(options.config_path.as_deref());

    let mut config = match &path {
        Some(p) => {
            let cfg = XtConfig::from_file(p)?;
            info!(path = %p.display(), source = %source, "loaded config file");
            cfg
        }
        None => {
            debug!("no config file found, using built-in defaults");
            XtConfig::default()
        }
    };

    if let Some(list) = env_overrides {
        let parsed = parse_override_list(list).map_err(|source| ConfigError::Override {
            origin: ENV_FEATURE_OVERRIDE,
            source,
        })?;
        config.features.overrides.extend(parsed);
    }

    for entry in &options.cli_overrides {
        let (name, value) =
            parse_override_pair(entry).map_err(|source| ConfigError::Override {
                origin: "--override",
                source,
            })?;
        config.features.overrides.insert(name, value);
    }

    if let Some(preferred) = options.cli_backend {
        config.backend.preferred = preferred;
    }

    Ok(ResolvedConfig {
        config,
        path,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use xt_common::Backend;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults() {
        let cfg = XtConfig::default();
        assert!(cfg.features.overrides.is_empty());
        assert_eq!(cfg.backend.preferred, BackendPreference::Auto);
        assert_eq!(cfg.probe.iptables_command, "iptables");
        assert_eq!(cfg.probe.kernel_version_path, PathBuf::from("/proc/version"));
        assert_eq!(cfg.probe.timeout_ms, 5000);
    }

    #[test]
    fn parses_full_file() {
        let text = r#"
            [features]
            overrides = { SNATFullyRandom = "false" }

            [backend]
            preferred = "NFT"

            [probe]
            iptables_command = "/usr/sbin/iptables"
            timeout_ms = 250
        "#;
        let cfg = XtConfig::from_toml_str(text, Path::new("test.toml")).unwrap();
        assert_eq!(cfg.features.overrides["SNATFullyRandom"], "false");
        assert_eq!(cfg.backend.preferred, BackendPreference::Explicit(Backend::Nft));
        assert_eq!(cfg.probe.iptables_command, "/usr/sbin/iptables");
        assert_eq!(cfg.probe.timeout_ms, 250);
        assert_eq!(cfg.probe.max_output_bytes, DEFAULT_MAX_OUTPUT_BYTES);
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = XtConfig::from_toml_str("[probe]\ntimeout = 5", Path::new("x.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn rejects_unknown_backend() {
        let err =
            XtConfig::from_toml_str("[backend]\npreferred = \"bpf\"", Path::new("x.toml"))
                .unwrap_err();
        assert!(err.to_string().contains("x.toml"));
    }

    #[test]
    fn missing_explicit_file_is_error() {
        let options = ConfigOptions {
            config_path: Some(PathBuf::from("/nonexistent/xtprobe.toml")),
            ..ConfigOptions::default()
        };
        let err = load_config_with_env(&options, None).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn overrides_layer_file_env_cli() {
        let file = write_config(
            "[features.overrides]\nSNATFullyRandom = \"true\"\nMASQFullyRandom = \"true\"\n",
        );
        let options = ConfigOptions {
            config_path: Some(file.path().to_path_buf()),
            cli_overrides: vec!["MASQFullyRandom=false".to_string()],
            cli_backend: Some(BackendPreference::Explicit(Backend::Legacy)),
        };
        let resolved = load_config_with_env(
            &options,
            Some("SNATFullyRandom=0,RestoreSupportsLock=maybe"),
        )
        .unwrap();

        let overrides = &resolved.config.features.overrides;
        assert_eq!(overrides["SNATFullyRandom"], "0");
        assert_eq!(overrides["MASQFullyRandom"], "false");
        assert_eq!(overrides["RestoreSupportsLock"], "maybe");
        assert_eq!(
            resolved.config.backend.preferred,
            BackendPreference::Explicit(Backend::Legacy)
        );
        assert_eq!(resolved.source, ConfigSource::CliArgument);
    }

    #[test]
    fn malformed_env_override_is_error() {
        let file = write_config("");
        let options = ConfigOptions {
            config_path: Some(file.path().to_path_buf()),
            ..ConfigOptions::default()
        };
        let err = load_config_with_env(&options, Some("SNATFullyRandom")).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Override {
                origin: ENV_FEATURE_OVERRIDE,
                ..
            }
        ));
    }
}
