//! Dotted-triplet versions for tools and kernels.
//!
//! Versions are compared purely on `(major, minor, patch)`. Parsing comes in
//! three flavours:
//! - [`Version::from_str`] for a bare `X.Y.Z` literal
//! - [`Version::extract`] for the first `vX.Y.Z` token inside a `--version` banner
//! - [`Version::from_kernel_banner`] for `/proc/version` style text

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

static RE_TOOL_VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"v(\d+\.\d+\.\d+)").unwrap());

static RE_KERNEL_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Linux version (\d+)\.(\d+)(?:\.(\d+))?").unwrap());

/// Errors produced while parsing version text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    #[error("empty version text")]
    Empty,

    #[error("no version found in {0:?}")]
    NoMatch(String),

    #[error("invalid version {text:?}: {reason}")]
    Invalid { text: String, reason: String },
}

/// An immutable `major.minor.patch` version.
///
/// Field order matters: the derived `Ord` is lexicographic over
/// `(major, minor, patch)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Extract the first `vX.Y.Z` occurrence from arbitrary text.
    ///
    /// The leading `v` is required and case-sensitive, so
    /// `iptables v1.8.7 (nf_tables)` yields `1.8.7` while `V1.8.7` yields nothing.
    pub fn extract(text: &str) -> Result<Self, VersionParseError> {
        if text.trim().is_empty() {
            return Err(VersionParseError::Empty);
        }
        let caps = RE_TOOL_VERSION
            .captures(text)
            .ok_or_else(|| VersionParseError::NoMatch(text.trim().to_string()))?;
        caps[1].parse()
    }

    /// Parse kernel version text such as the contents of `/proc/version`.
    ///
    /// A missing patch component (`Linux version 6.1-rc2 ...`) is read as 0.
    pub fn from_kernel_banner(text: &str) -> Result<Self, VersionParseError> {
        if text.trim().is_empty() {
            return Err(VersionParseError::Empty);
        }
        let caps = RE_KERNEL_VERSION
            .captures(text)
            .ok_or_else(|| VersionParseError::NoMatch(text.trim().to_string()))?;

        let major = parse_component(text, &caps[1])?;
        let minor = parse_component(text, &caps[2])?;
        let patch = match caps.get(3) {
            Some(m) => parse_component(text, m.as_str())?,
            None => 0,
        };
        Ok(Self::new(major, minor, patch))
    }
}

fn parse_component(text: &str, component: &str) -> Result<u32, VersionParseError> {
    component
        .parse::<u32>()
        .map_err(|e| VersionParseError::Invalid {
            text: text.trim().to_string(),
            reason: format!("component {component:?}: {e}"),
        })
}

impl FromStr for Version {
    type Err = VersionParseError;

    /// Parse a strict `X.Y.Z` literal with no surrounding text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VersionParseError::Empty);
        }

        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(VersionParseError::Invalid {
                text: s.to_string(),
                reason: format!("expected 3 components, got {}", parts.len()),
            });
        }
        if parts
            .iter()
            .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
        {
            return Err(VersionParseError::Invalid {
                text: s.to_string(),
                reason: "components must be non-negative integers".to_string(),
            });
        }

        Ok(Self::new(
            parse_component(s, parts[0])?,
            parse_component(s, parts[1])?,
            parse_component(s, parts[2])?,
        ))
    }
}

impl TryFrom<String> for Version {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
