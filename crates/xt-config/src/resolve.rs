//! Configuration path discovery.
//!
//! Resolution order: CLI argument → environment variables → XDG path → /etc → defaults.

use std::path::{Path, PathBuf};

/// Where the configuration file was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// Found in the XDG config directory.
    XdgConfig,

    /// Found in /etc/xtprobe/.
    SystemConfig,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::SystemConfig => write!(f, "system config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Environment variable naming the config file directly.
pub const ENV_CONFIG_PATH: &str = "XTPROBE_CONFIG";
/// Environment variable naming a directory containing the config file.
pub const ENV_CONFIG_DIR: &str = "XTPROBE_CONFIG_DIR";

/// Standard config file name.
pub const CONFIG_FILENAME: &str = "xtprobe.toml";

/// Application name for XDG and /etc directories.
const APP_NAME: &str = "xtprobe";

/// Resolve the configuration file path.
///
/// 1. Explicit CLI path (returned even if missing, so the caller reports it)
/// 2. `XTPROBE_CONFIG`
/// 3. `XTPROBE_CONFIG_DIR` + `xtprobe.toml`
/// 4. XDG config directory (`~/.config/xtprobe/xtprobe.toml`)
/// 5. `/etc/xtprobe/xtprobe.toml`
/// 6. Built-in defaults (`None`)
pub fn resolve_config_path(cli_path: Option<&Path>) -> (Option<PathBuf>, ConfigSource) {
    resolve_with(
        cli_path,
        std::env::var(ENV_CONFIG_PATH).ok().map(PathBuf::from),
        std::env::var(ENV_CONFIG_DIR).ok().map(PathBuf::from),
        dirs::config_dir(),
        Path::new("/etc"),
    )
}

fn resolve_with(
    cli_path: Option<&Path>,
    env_path: Option<PathBuf>,
    env_dir: Option<PathBuf>,
    xdg_dir: Option<PathBuf>,
    etc_dir: &Path,
) -> (Option<PathBuf>, ConfigSource) {
    if let Some(path) = cli_path {
        return (Some(path.to_path_buf()), ConfigSource::CliArgument);
    }

    if let Some(path) = env_path {
        if path.exists() {
            return (Some(path), ConfigSource::Environment);
        }
    }

    if let Some(dir) = env_dir {
        let path = dir.join(CONFIG_FILENAME);
        if path.exists() {
            return (Some(path), ConfigSource::Environment);
        }
    }

    if let Some(dir) = xdg_dir {
        let path = dir.join(APP_NAME).join(CONFIG_FILENAME);
        if path.exists() {
            return (Some(path), ConfigSource::XdgConfig);
        }
    }

    let system_path = etc_dir.join(APP_NAME).join(CONFIG_FILENAME);
    if system_path.exists() {
        return (Some(system_path), ConfigSource::SystemConfig);
    }

    (None, ConfigSource::BuiltinDefault)
}
