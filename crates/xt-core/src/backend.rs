//! iptables backend selection (legacy vs nft).
//!
//! The heuristic mirrors the one used by the upstream `iptables-wrapper`: run
//! the save commands for both modes and pick the one that already holds more
//! configuration. A host with at least [`LEGACY_SHORT_CIRCUIT`] legacy rules
//! is legacy without ever touching the nft tools.

use crate::logging::event_names;
use crate::probe::{CommandRunner, NameResolver};
use schemars::JsonSchema;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};
use xt_common::{Backend, BackendPreference};

/// Legacy rule count at which detection stops looking at nft.
pub const LEGACY_SHORT_CIRCUIT: usize = 10;

/// IP protocol family of an iptables binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, JsonSchema)]
pub enum IpVersion {
    #[serde(rename = "4")]
    V4,
    #[serde(rename = "6")]
    V6,
}

impl IpVersion {
    /// Infix used in binary names: `iptables` vs `ip6tables`.
    fn infix(self) -> &'static str {
        match self {
            IpVersion::V4 => "",
            IpVersion::V6 => "6",
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "4"),
            IpVersion::V6 => write!(f, "6"),
        }
    }
}

/// Which companion tool to locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BinaryKind {
    Save,
    Restore,
}

impl BinaryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryKind::Save => "save",
            BinaryKind::Restore => "restore",
        }
    }
}

impl fmt::Display for BinaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend selection errors.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no iptables {kind} binary found for IPv{ip_version} ({backend} mode), tried {candidates:?}")]
    BinaryNotFound {
        ip_version: IpVersion,
        backend: Backend,
        kind: BinaryKind,
        candidates: Vec<String>,
    },
}

impl From<BackendError> for xt_common::Error {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::BinaryNotFound {
                kind, candidates, ..
            } => xt_common::Error::BinaryNotFound {
                kind: kind.to_string(),
                candidates,
            },
        }
    }
}

/// Candidate names for a binary, most specific first.
pub fn binary_candidates(ip_version: IpVersion, backend: Backend, kind: BinaryKind) -> [String; 2] {
    let infix = ip_version.infix();
    [
        format!("ip{infix}tables-{backend}-{kind}"),
        format!("ip{infix}tables-{kind}"),
    ]
}

/// Find the best iptables binary for a mode.
///
/// Prefers the mode-specific name (`iptables-legacy-save`) and falls back to
/// the generic one (`iptables-save`). Returns the name, not the full path,
/// so it is run through the normal `PATH` lookup.
pub fn find_best_binary<N: NameResolver + ?Sized>(
    resolver: &N,
    ip_version: IpVersion,
    backend: Backend,
    kind: BinaryKind,
) -> Result<String, BackendError> {
    let candidates = binary_candidates(ip_version, backend, kind);

    for candidate in &candidates {
        if resolver.resolve(candidate).is_ok() {
            info!(
                target: event_names::BINARY_RESOLVED,
                ip_version = %ip_version,
                backend = %backend,
                kind = %kind,
                command = %candidate,
                "looked up iptables command"
            );
            return Ok(candidate.clone());
        }
    }

    let candidates = candidates.to_vec();
    warn!(
        target: event_names::BINARY_NOT_FOUND,
        ip_version = %ip_version,
        backend = %backend,
        kind = %kind,
        candidates = ?candidates,
        "failed to find iptables command"
    );
    Err(BackendError::BinaryNotFound {
        ip_version,
        backend,
        kind,
        candidates,
    })
}

/// Count configuration lines (those starting with `-`) in save output.
pub fn count_rules(output: &[u8]) -> usize {
    output
        .split(|&b| b == b'\n')
        .filter(|line| line.first() == Some(&b'-'))
        .count()
}

/// Outcome of backend detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct BackendDecision {
    /// Backend callers should use.
    pub selected: Backend,
    /// Backend the host evidence points to.
    pub detected: Backend,
    pub preference: String,
    /// Rule lines across ip6tables and iptables in legacy mode.
    pub legacy_rules: usize,
    /// Rule lines in nft mode; `None` when the legacy count short-circuited.
    pub nft_rules: Option<usize>,
    /// Set when an explicit preference disagrees with the detected backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Run the save binaries for both IP versions in `backend` mode and total
/// their rule lines. A failed run counts as empty output.
fn count_backend_rules<N, C>(
    resolver: &N,
    runner: &C,
    backend: Backend,
) -> Result<usize, BackendError>
where
    N: NameResolver + ?Sized,
    C: CommandRunner + ?Sized,
{
    let ip6 = find_best_binary(resolver, IpVersion::V6, backend, BinaryKind::Save)?;
    let ip4 = find_best_binary(resolver, IpVersion::V4, backend, BinaryKind::Save)?;

    let mut total = 0;
    for command in [ip6, ip4] {
        let output = match runner.run(&command, &[]) {
            Ok(out) => out,
            Err(e) => {
                debug!(
                    target: event_names::BACKEND_SAVE_OUTPUT,
                    command = %command,
                    error = %e,
                    "save command failed, counting as empty"
                );
                Vec::new()
            }
        };
        let rules = count_rules(&output);
        debug!(
            target: event_names::BACKEND_SAVE_OUTPUT,
            command = %command,
            rules,
            output = %String::from_utf8_lossy(&output),
            "iptables save output"
        );
        total += rules;
    }
    Ok(total)
}

/// Detect which iptables backend is in use.
///
/// An explicit preference always wins; when it disagrees with the evidence
/// the decision carries a warning (and a warning event is emitted). Ties
/// favour legacy.
pub fn detect_backend<N, C>(
    resolver: &N,
    runner: &C,
    preference: BackendPreference,
) -> Result<BackendDecision, BackendError>
where
    N: NameResolver + ?Sized,
    C: CommandRunner + ?Sized,
{
    let legacy_rules = count_backend_rules(resolver, runner, Backend::Legacy)?;

    let (detected, nft_rules) = if legacy_rules >= LEGACY_SHORT_CIRCUIT {
        (Backend::Legacy, None)
    } else {
        let nft_rules = count_backend_rules(resolver, runner, Backend::Nft)?;
        let detected = if legacy_rules >= nft_rules {
            Backend::Legacy
        } else {
            Backend::Nft
        };
        (detected, Some(nft_rules))
    };

    debug!(
        target: event_names::BACKEND_DETECTED,
        detected = %detected,
        legacy_rules,
        nft_rules = ?nft_rules,
        "detected iptables backend"
    );

    let (selected, warning) = match preference {
        BackendPreference::Auto => (detected, None),
        BackendPreference::Explicit(specified) => {
            let warning = (specified != detected).then(|| {
                warn!(
                    target: event_names::BACKEND_MISMATCH,
                    detected = %detected,
                    specified = %specified,
                    "iptables backend specified does not match the detected backend, using specified backend"
                );
                format!(
                    "specified backend {specified} does not match detected backend {detected}"
                )
            });
            (specified, warning)
        }
    };

    Ok(BackendDecision {
        selected,
        detected,
        preference: preference.to_string(),
        legacy_rules,
        nft_rules,
        warning,
    })
}
