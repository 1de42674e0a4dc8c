//! Command payloads printed on stdout.
//!
//! Every report carries the schema version, the run id and a generation
//! timestamp so agents can correlate stdout with the JSONL log on stderr.

use crate::backend::{BackendDecision, BinaryKind, IpVersion};
use crate::features::ProbedVersions;
use schemars::JsonSchema;
use serde::Serialize;
use std::fmt::Write as _;
use xt_common::{Backend, Features, SCHEMA_VERSION};
use xt_config::OverrideMap;

/// Fields shared by every report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct ReportHeader {
    pub schema_version: String,
    pub run_id: String,
    /// RFC 3339 timestamp.
    pub generated_at: String,
}

impl ReportHeader {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            run_id: run_id.into(),
            generated_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Output of `xtprobe features`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct FeaturesReport {
    #[serde(flatten)]
    pub header: ReportHeader,
    pub features: Features,
    /// Names of the flags that are on, in declaration order.
    pub enabled: Vec<String>,
    /// Versions behind the features; absent only if detection never ran.
    pub versions: Option<ProbedVersions>,
    /// Overrides as configured, including ones that were ignored.
    pub overrides: OverrideMap,
    /// True when the cache was explicitly refreshed.
    pub refreshed: bool,
}

impl FeaturesReport {
    pub fn new(
        header: ReportHeader,
        features: Features,
        versions: Option<ProbedVersions>,
        overrides: OverrideMap,
        refreshed: bool,
    ) -> Self {
        let enabled = features
            .enabled()
            .into_iter()
            .map(|flag| flag.name().to_string())
            .collect();
        Self {
            header,
            features,
            enabled,
            versions,
            overrides,
            refreshed,
        }
    }

    pub fn summary(&self) -> String {
        let enabled = if self.enabled.is_empty() {
            "none".to_string()
        } else {
            self.enabled.join(",")
        };
        match &self.versions {
            Some(v) => format!(
                "iptables {} kernel {}: {}",
                v.iptables, v.kernel, enabled
            ),
            None => format!("features: {enabled}"),
        }
    }

    pub fn markdown(&self) -> String {
        let mut md = String::from("# iptables features\n\n");
        if let Some(v) = &self.versions {
            let _ = writeln!(md, "- iptables: {}{}", v.iptables, assumed(v.iptables_assumed));
            let _ = writeln!(md, "- kernel: {}{}", v.kernel, assumed(v.kernel_assumed));
            md.push('\n');
        }
        md.push_str("| Flag | Value |\n|------|-------|\n");
        for flag in xt_common::FeatureFlag::ALL {
            let _ = writeln!(md, "| {} | {} |", flag, self.features.get(flag));
        }
        if !self.overrides.is_empty() {
            md.push_str("\n## Overrides\n\n");
            for (name, value) in &self.overrides {
                let _ = writeln!(md, "- `{name}={value}`");
            }
        }
        md
    }
}

fn assumed(flag: bool) -> &'static str {
    if flag {
        " (assumed)"
    } else {
        ""
    }
}

/// Output of `xtprobe backend`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct BackendReport {
    #[serde(flatten)]
    pub header: ReportHeader,
    #[serde(flatten)]
    pub decision: BackendDecision,
}

impl BackendReport {
    pub fn summary(&self) -> String {
        let mut line = format!(
            "backend {} (detected {}, legacy rules {}",
            self.decision.selected, self.decision.detected, self.decision.legacy_rules
        );
        match self.decision.nft_rules {
            Some(n) => {
                let _ = write!(line, ", nft rules {n})");
            }
            None => line.push_str(", nft not checked)"),
        }
        line
    }

    pub fn markdown(&self) -> String {
        let d = &self.decision;
        let mut md = String::from("# iptables backend\n\n");
        let _ = writeln!(md, "- selected: **{}**", d.selected);
        let _ = writeln!(md, "- detected: {}", d.detected);
        let _ = writeln!(md, "- preference: {}", d.preference);
        let _ = writeln!(md, "- legacy rules: {}", d.legacy_rules);
        match d.nft_rules {
            Some(n) => {
                let _ = writeln!(md, "- nft rules: {n}");
            }
            None => md.push_str("- nft rules: not checked\n"),
        }
        if let Some(w) = &d.warning {
            let _ = writeln!(md, "\n> warning: {w}");
        }
        md
    }
}

/// One resolved companion binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct BinaryEntry {
    pub ip_version: IpVersion,
    pub kind: BinaryKind,
    pub command: String,
}

/// Output of `xtprobe binaries`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct BinariesReport {
    #[serde(flatten)]
    pub header: ReportHeader,
    pub backend: Backend,
    pub binaries: Vec<BinaryEntry>,
}

impl BinariesReport {
    pub fn summary(&self) -> String {
        let names: Vec<&str> = self.binaries.iter().map(|b| b.command.as_str()).collect();
        format!("{}: {}", self.backend, names.join(" "))
    }

    pub fn markdown(&self) -> String {
        let mut md = format!("# iptables binaries ({})\n\n", self.backend);
        md.push_str("| IP | Kind | Command |\n|----|------|---------|\n");
        for b in &self.binaries {
            let _ = writeln!(md, "| v{} | {} | `{}` |", b.ip_version, b.kind, b.command);
        }
        md
    }
}
