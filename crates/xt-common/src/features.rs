//! Packet-filter capability flags and the version thresholds behind them.

use crate::version::Version;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Oldest iptables release ever supported; assumed when the tool version is unknown.
pub const IPTABLES_OLDEST: Version = Version::new(1, 4, 7);
/// iptables added `--random-fully` to the SNAT target.
pub const IPTABLES_SNAT_RANDOM_FULLY: Version = Version::new(1, 6, 0);
/// iptables added `--random-fully` to MASQUERADE and the xtables lock to iptables-restore.
pub const IPTABLES_MASQ_RANDOM_FULLY_AND_LOCK: Version = Version::new(1, 6, 2);

/// Oldest kernel supported; assumed when the kernel version is unknown.
pub const KERNEL_OLDEST: Version = Version::new(3, 10, 0);
/// Kernel support for random-fully on the iptables interface.
pub const KERNEL_RANDOM_FULLY: Version = Version::new(3, 14, 0);
/// First kernel with the checksum offload fix for SNATted source ports.
pub const KERNEL_CHECKSUM_OFFLOAD_FIXED: Version = Version::new(5, 15, 0);

/// Detected packet-filter capabilities.
///
/// Field names serialize in the same CamelCase form operators use for overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct Features {
    /// `--random-fully` is supported by the SNAT action.
    #[serde(rename = "SNATFullyRandom")]
    pub snat_fully_random: bool,

    /// `--random-fully` is supported by the MASQUERADE action.
    #[serde(rename = "MASQFullyRandom")]
    pub masq_fully_random: bool,

    /// iptables-restore can take the xtables lock (`-w` / `-W`).
    pub restore_supports_lock: bool,

    /// The kernel mangles checksums for packets with SNATted source ports when
    /// checksum offload is enabled; callers disable offload on their tunnel devices.
    pub checksum_offload_broken: bool,
}

impl Features {
    /// Derive the flags from the tool and kernel versions.
    ///
    /// Every flag needs all of its thresholds met (inclusive), except
    /// `checksum_offload_broken`, which holds while the kernel is strictly older
    /// than the fix.
    pub fn from_versions(iptables: Version, kernel: Version) -> Self {
        Self {
            snat_fully_random: iptables >= IPTABLES_SNAT_RANDOM_FULLY
                && kernel >= KERNEL_RANDOM_FULLY,
            masq_fully_random: iptables >= IPTABLES_MASQ_RANDOM_FULLY_AND_LOCK
                && kernel >= KERNEL_RANDOM_FULLY,
            restore_supports_lock: iptables >= IPTABLES_MASQ_RANDOM_FULLY_AND_LOCK,
            checksum_offload_broken: kernel < KERNEL_CHECKSUM_OFFLOAD_FIXED,
        }
    }

    /// Read a single flag.
    pub fn get(&self, flag: FeatureFlag) -> bool {
        match flag {
            FeatureFlag::SnatFullyRandom => self.snat_fully_random,
            FeatureFlag::MasqFullyRandom => self.masq_fully_random,
            FeatureFlag::RestoreSupportsLock => self.restore_supports_lock,
            FeatureFlag::ChecksumOffloadBroken => self.checksum_offload_broken,
        }
    }

    /// Overwrite a single flag.
    pub fn set(&mut self, flag: FeatureFlag, value: bool) {
        let slot = match flag {
            FeatureFlag::SnatFullyRandom => &mut self.snat_fully_random,
            FeatureFlag::MasqFullyRandom => &mut self.masq_fully_random,
            FeatureFlag::RestoreSupportsLock => &mut self.restore_supports_lock,
            FeatureFlag::ChecksumOffloadBroken => &mut self.checksum_offload_broken,
        };
        *slot = value;
    }

    /// Flags that are currently set, in declaration order.
    pub fn enabled(&self) -> Vec<FeatureFlag> {
        FeatureFlag::ALL
            .iter()
            .copied()
            .filter(|f| self.get(*f))
            .collect()
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for flag in FeatureFlag::ALL {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            write!(f, "{}={}", flag, self.get(flag))?;
        }
        Ok(())
    }
}

/// The closed set of flags an operator may override by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureFlag {
    SnatFullyRandom,
    MasqFullyRandom,
    RestoreSupportsLock,
    ChecksumOffloadBroken,
}

impl FeatureFlag {
    pub const ALL: [FeatureFlag; 4] = [
        FeatureFlag::SnatFullyRandom,
        FeatureFlag::MasqFullyRandom,
        FeatureFlag::RestoreSupportsLock,
        FeatureFlag::ChecksumOffloadBroken,
    ];

    /// Override name, matching the serialized field name.
    pub fn name(self) -> &'static str {
        match self {
            FeatureFlag::SnatFullyRandom => "SNATFullyRandom",
            FeatureFlag::MasqFullyRandom => "MASQFullyRandom",
            FeatureFlag::RestoreSupportsLock => "RestoreSupportsLock",
            FeatureFlag::ChecksumOffloadBroken => "ChecksumOffloadBroken",
        }
    }

    /// Look a flag up by its exact (case-sensitive) override name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }
}

impl fmt::Display for FeatureFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid boolean {0:?}")]
pub struct ParseBoolError(pub String);

/// Parse an operator-supplied boolean.
///
/// Accepts `1 t T TRUE true True` and `0 f F FALSE false False`; nothing else,
/// not even surrounding whitespace.
pub fn parse_bool(value: &str) -> Result<bool, ParseBoolError> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        other => Err(ParseBoolError(other.to_string())),
    }
}
