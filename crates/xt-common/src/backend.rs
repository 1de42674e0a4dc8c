//! iptables backend identifiers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// One of the two mutually incompatible iptables implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// The original xtables kernel interface (`iptables-legacy`).
    Legacy,
    /// The nf_tables-backed compatibility layer (`iptables-nft`).
    Nft,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Legacy => "legacy",
            Backend::Nft => "nft",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "legacy" => Ok(Backend::Legacy),
            "nft" => Ok(Backend::Nft),
            _ => Err(Error::UnknownBackend(s.to_string())),
        }
    }
}

/// What the operator asked for: detect automatically or force a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackendPreference {
    #[default]
    Auto,
    Explicit(Backend),
}

impl FromStr for BackendPreference {
    type Err = Error;

    /// Case-insensitive: `auto`, `legacy` or `nft`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            return Ok(BackendPreference::Auto);
        }
        s.parse().map(BackendPreference::Explicit)
    }
}

impl TryFrom<String> for BackendPreference {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackendPreference> for String {
    fn from(p: BackendPreference) -> Self {
        p.to_string()
    }
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendPreference::Auto => f.write_str("auto"),
            BackendPreference::Explicit(b) => b.fmt(f),
        }
    }
}
