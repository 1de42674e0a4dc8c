//! Cached iptables feature detection.
//!
//! [`FeatureDetector`] probes the iptables tool version and the kernel version,
//! derives [`Features`] from version thresholds, applies operator overrides and
//! caches the result. Detection never fails: an unreadable or unparsable
//! version degrades to the oldest supported release and a warning.
//!
//! The cache, the most recent probed versions and the "overrides logged" flag
//! all sit behind one mutex, so a `get_features` racing a `refresh_features`
//! waits and then sees the fresh value.

use crate::collect::tool_runner::ToolRunner;
use crate::logging::event_names;
use crate::probe::{CommandRunner, ProcVersionSource, ToolCommandRunner, VersionSource};
use schemars::JsonSchema;
use serde::Serialize;
use std::io::Read;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use xt_common::features::{IPTABLES_OLDEST, KERNEL_OLDEST};
use xt_common::{parse_bool, FeatureFlag, Features, Version};
use xt_config::{OverrideMap, XtConfig};

/// Versions used by a detection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
pub struct ProbedVersions {
    #[schemars(with = "String")]
    pub iptables: Version,
    /// True when the iptables probe failed and the oldest release was assumed.
    pub iptables_assumed: bool,
    #[schemars(with = "String")]
    pub kernel: Version,
    /// True when the kernel probe failed and the oldest release was assumed.
    pub kernel_assumed: bool,
}

#[derive(Debug, Default)]
struct DetectorState {
    cache: Option<Features>,
    versions: Option<ProbedVersions>,
    logged_overrides: bool,
}

/// Detects and caches packet-filter features.
#[derive(Debug)]
pub struct FeatureDetector<R = ToolCommandRunner, K = ProcVersionSource> {
    state: Mutex<DetectorState>,
    overrides: OverrideMap,
    runner: R,
    kernel_source: K,
    iptables_command: String,
}

impl FeatureDetector {
    /// Detector with production collaborators: `iptables` on `PATH` through
    /// the bounded tool runner, and `/proc/version`.
    pub fn new(overrides: OverrideMap) -> Self {
        Self::with_collaborators(
            overrides,
            ToolCommandRunner::new(ToolRunner::default()),
            ProcVersionSource::default(),
        )
    }

    /// Detector configured from an `xtprobe.toml`.
    pub fn from_config(config: &XtConfig) -> Self {
        Self::with_collaborators(
            config.features.overrides.clone(),
            ToolCommandRunner::from_probe_config(&config.probe),
            ProcVersionSource::new(config.probe.kernel_version_path.clone()),
        )
        .with_iptables_command(config.probe.iptables_command.clone())
    }
}

impl<R: CommandRunner, K: VersionSource> FeatureDetector<R, K> {
    pub fn with_collaborators(overrides: OverrideMap, runner: R, kernel_source: K) -> Self {
        Self {
            state: Mutex::new(DetectorState::default()),
            overrides,
            runner,
            kernel_source,
            iptables_command: xt_config::config::DEFAULT_IPTABLES_COMMAND.to_string(),
        }
    }

    /// Probe a different program instead of `iptables`.
    pub fn with_iptables_command(mut self, command: impl Into<String>) -> Self {
        self.iptables_command = command.into();
        self
    }

    /// The cached features, detecting them first if nothing is cached yet.
    pub fn get_features(&self) -> Features {
        let mut state = self.lock_state();
        match state.cache {
            Some(features) => features,
            None => self.refresh_locked(&mut state),
        }
    }

    /// Re-probe both versions and republish the features.
    pub fn refresh_features(&self) {
        let mut state = self.lock_state();
        self.refresh_locked(&mut state);
    }

    /// Versions seen by the most recent detection, if any ran.
    pub fn probed_versions(&self) -> Option<ProbedVersions> {
        self.lock_state().versions
    }

    fn lock_state(&self) -> MutexGuard<'_, DetectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh_locked(&self, state: &mut DetectorState) -> Features {
        debug!(target: event_names::FEATURES_REFRESH, "refreshing detected iptables features");

        let (iptables, iptables_assumed) = match self.iptables_version() {
            Some(v) => (v, false),
            None => (IPTABLES_OLDEST, true),
        };
        let (kernel, kernel_assumed) = match self.kernel_version() {
            Some(v) => (v, false),
            None => (KERNEL_OLDEST, true),
        };

        let mut features = Features::from_versions(iptables, kernel);
        self.apply_overrides(&mut features, !state.logged_overrides);
        state.logged_overrides = true;

        state.versions = Some(ProbedVersions {
            iptables,
            iptables_assumed,
            kernel,
            kernel_assumed,
        });

        if state.cache != Some(features) {
            info!(
                target: event_names::FEATURES_UPDATED,
                features = %features,
                iptables_version = %iptables,
                kernel_version = %kernel,
                "updating detected iptables features"
            );
            state.cache = Some(features);
        }
        features
    }

    /// Overrides run in name order so their log lines are stable.
    fn apply_overrides(&self, features: &mut Features, log: bool) {
        for (name, value) in &self.overrides {
            let parsed = match parse_bool(value) {
                Ok(b) => b,
                Err(_) => {
                    if log {
                        warn!(
                            target: event_names::OVERRIDE_INVALID,
                            flag = %name,
                            value = %value,
                            "failed to parse value for feature detection override; ignoring"
                        );
                    }
                    continue;
                }
            };

            let Some(flag) = FeatureFlag::from_name(name) else {
                if log {
                    warn!(
                        target: event_names::OVERRIDE_UNKNOWN,
                        flag = %name,
                        value = %value,
                        "unknown feature detection flag; ignoring"
                    );
                }
                continue;
            };

            features.set(flag, parsed);
            if log {
                info!(
                    target: event_names::OVERRIDE_APPLIED,
                    flag = %name,
                    value = %value,
                    "overriding feature detection flag"
                );
            }
        }
    }

    fn iptables_version(&self) -> Option<Version> {
        let out = match self.runner.run(&self.iptables_command, &["--version"]) {
            Ok(out) => out,
            Err(e) => {
                warn!(
                    target: event_names::PROBE_FALLBACK,
                    probe = "iptables",
                    error = %e,
                    assumed = %IPTABLES_OLDEST,
                    "failed to get iptables version, assuming old version with no optional features"
                );
                return None;
            }
        };

        let raw = String::from_utf8_lossy(&out);
        debug!(target: event_names::PROBE_RESULT, raw_version = %raw.trim(), "ran iptables --version");

        match Version::extract(&raw) {
            Ok(v) => {
                debug!(target: event_names::PROBE_RESULT, version = %v, "parsed iptables version");
                Some(v)
            }
            Err(e) => {
                warn!(
                    target: event_names::PROBE_FALLBACK,
                    probe = "iptables",
                    raw_version = %raw.trim(),
                    error = %e,
                    assumed = %IPTABLES_OLDEST,
                    "failed to parse iptables version, assuming old version with no optional features"
                );
                None
            }
        }
    }

    fn kernel_version(&self) -> Option<Version> {
        // Build hosts can leave non-UTF-8 bytes in the banner.
        let text = self.kernel_source.open().and_then(|mut reader| {
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        });
        let text = match text {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    target: event_names::PROBE_FALLBACK,
                    probe = "kernel",
                    error = %e,
                    assumed = %KERNEL_OLDEST,
                    "failed to read the kernel version, assuming old version with no optional features"
                );
                return None;
            }
        };

        match Version::from_kernel_banner(&text) {
            Ok(v) => {
                debug!(target: event_names::PROBE_RESULT, version = %v, "parsed kernel version");
                Some(v)
            }
            Err(e) => {
                warn!(
                    target: event_names::PROBE_FALLBACK,
                    probe = "kernel",
                    error = %e,
                    assumed = %KERNEL_OLDEST,
                    "failed to get kernel version, assuming old version with no optional features"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::tool_runner::ToolError;
    use crate::logging::{JsonlLayer, MemoryWriter};
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    type Runner = Box<dyn Fn(&str, &[&str]) -> Result<Vec<u8>, ToolError> + Send + Sync>;
    type Kernel = Box<dyn Fn() -> io::Result<io::Cursor<Vec<u8>>> + Send + Sync>;

    struct Probes {
        runner_calls: Arc<AtomicUsize>,
        kernel_calls: Arc<AtomicUsize>,
    }

    fn detector(
        iptables: &'static str,
        kernel: &'static str,
        overrides: &[(&str, &str)],
    ) -> (FeatureDetector<Runner, Kernel>, Probes) {
        let runner_calls = Arc::new(AtomicUsize::new(0));
        let kernel_calls = Arc::new(AtomicUsize::new(0));

        let rc = runner_calls.clone();
        let runner: Runner = Box::new(move |program: &str, args: &[&str]| {
            rc.fetch_add(1, Ordering::SeqCst);
            assert_eq!(program, "iptables");
            assert_eq!(args, ["--version"]);
            Ok(iptables.as_bytes().to_vec())
        });
        let kc = kernel_calls.clone();
        let kernel: Kernel = Box::new(move || {
            kc.fetch_add(1, Ordering::SeqCst);
            Ok(io::Cursor::new(kernel.as_bytes().to_vec()))
        });

        let overrides = overrides
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        (
            FeatureDetector::with_collaborators(overrides, runner, kernel),
            Probes {
                runner_calls,
                kernel_calls,
            },
        )
    }

    fn capture<T>(f: impl FnOnce() -> T) -> (T, Vec<serde_json::Value>) {
        let sink = MemoryWriter::new();
        let subscriber = tracing_subscriber::registry().with(JsonlLayer::new(sink.clone()));
        let out = tracing::subscriber::with_default(subscriber, f);
        (out, sink.events())
    }

    fn count(events: &[serde_json::Value], level: &str, event: &str) -> usize {
        events
            .iter()
            .filter(|e| e["level"] == level && e["event"] == event)
            .count()
    }

    #[test]
    fn thresholds_met() {
        let (d, _) = detector("iptables v1.6.2", "Linux version 5.15.0", &[]);
        let f = d.get_features();
        assert!(f.snat_fully_random);
        assert!(f.masq_fully_random);
        assert!(f.restore_supports_lock);
        assert!(!f.checksum_offload_broken);
    }

    #[test]
    fn oldest_versions() {
        let (d, _) = detector("iptables v1.4.7", "Linux version 3.10.0", &[]);
        let f = d.get_features();
        assert_eq!(
            f,
            Features {
                checksum_offload_broken: true,
                ..Features::default()
            }
        );
    }

    #[test]
    fn snat_only_between_thresholds() {
        let (d, _) = detector("iptables v1.6.1 (legacy)", "Linux version 4.19.0-21-amd64", &[]);
        let f = d.get_features();
        assert!(f.snat_fully_random);
        assert!(!f.masq_fully_random);
        assert!(!f.restore_supports_lock);
        assert!(f.checksum_offload_broken);
    }

    #[test]
    fn kernel_banner_with_invalid_utf8_still_parses() {
        let runner: Runner =
            Box::new(|_program: &str, _args: &[&str]| Ok(b"iptables v1.6.2\n".to_vec()));
        let kernel: Kernel = Box::new(|| {
            Ok(io::Cursor::new(
                b"Linux version 5.15.0-91-generic (b\xffuild\xfe@host) #101 SMP\n".to_vec(),
            ))
        });
        let d = FeatureDetector::with_collaborators(Default::default(), runner, kernel);

        let (f, events) = capture(|| d.get_features());
        assert!(f.masq_fully_random);
        assert!(!f.checksum_offload_broken);
        assert!(events.iter().all(|e| e["level"] != "warn"), "{events:?}");

        let versions = d.probed_versions().unwrap();
        assert_eq!(versions.kernel.to_string(), "5.15.0");
        assert!(!versions.kernel_assumed);
    }

    #[test]
    fn get_features_probes_once() {
        let (d, probes) = detector("iptables v1.8.7 (nf_tables)", "Linux version 6.1.0", &[]);
        let first = d.get_features();
        let second = d.get_features();
        assert_eq!(first, second);
        assert_eq!(probes.runner_calls.load(Ordering::SeqCst), 1);
        assert_eq!(probes.kernel_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn refresh_always_reprobes() {
        let (d, probes) = detector("iptables v1.8.7", "Linux version 6.1.0", &[]);
        d.get_features();
        d.refresh_features();
        d.refresh_features();
        assert_eq!(probes.runner_calls.load(Ordering::SeqCst), 3);
        assert_eq!(probes.kernel_calls.load(Ordering::SeqCst), 3);
        d.get_features();
        assert_eq!(probes.runner_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn refresh_before_get_populates_cache() {
        let (d, probes) = detector("iptables v1.8.7", "Linux version 6.1.0", &[]);
        d.refresh_features();
        assert!(d.get_features().restore_supports_lock);
        assert_eq!(probes.runner_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn runner_failure_assumes_oldest_tool() {
        let runner: Runner =
            Box::new(|_: &str, _: &[&str]| Err(ToolError::CommandNotFound("iptables".to_string())));
        let kernel: Kernel =
            Box::new(|| Ok(io::Cursor::new(b"Linux version 5.15.0".to_vec())));
        let d = FeatureDetector::with_collaborators(OverrideMap::new(), runner, kernel);

        let (f, events) = capture(|| d.get_features());
        assert!(!f.snat_fully_random);
        assert!(!f.restore_supports_lock);
        assert!(!f.checksum_offload_broken);
        assert_eq!(count(&events, "warn", event_names::PROBE_FALLBACK), 1);

        let versions = d.probed_versions().unwrap();
        assert_eq!(versions.iptables, IPTABLES_OLDEST);
        assert!(versions.iptables_assumed);
        assert!(!versions.kernel_assumed);
    }

    #[test]
    fn unparsable_outputs_assume_oldest() {
        let (d, _) = detector("iptables V1.8.7", "Linux ver 6.1", &[]);
        let (f, events) = capture(|| d.get_features());
        assert_eq!(
            f,
            Features::from_versions(IPTABLES_OLDEST, KERNEL_OLDEST)
        );
        assert_eq!(count(&events, "warn", event_names::PROBE_FALLBACK), 2);
    }

    #[test]
    fn kernel_source_error_assumes_oldest_kernel() {
        let runner: Runner = Box::new(|_: &str, _: &[&str]| Ok(b"iptables v1.8.7".to_vec()));
        let kernel: Kernel = Box::new(|| Err(io::Error::from(io::ErrorKind::NotFound)));
        let d = FeatureDetector::with_collaborators(OverrideMap::new(), runner, kernel);

        let f = d.get_features();
        assert!(!f.snat_fully_random);
        assert!(f.restore_supports_lock);
        assert!(f.checksum_offload_broken);
        assert_eq!(d.probed_versions().unwrap().kernel, KERNEL_OLDEST);
    }

    #[test]
    fn override_forces_flag_on_every_refresh() {
        let (d, _) = detector(
            "iptables v1.8.7",
            "Linux version 6.1.0",
            &[("SNATFullyRandom", "false")],
        );
        assert!(!d.get_features().snat_fully_random);
        d.refresh_features();
        assert!(!d.get_features().snat_fully_random);
        assert!(d.get_features().masq_fully_random);
    }

    #[test]
    fn override_can_enable_flag() {
        let (d, _) = detector(
            "iptables v1.4.7",
            "Linux version 3.10.0",
            &[("RestoreSupportsLock", "T"), ("ChecksumOffloadBroken", "0")],
        );
        let f = d.get_features();
        assert!(f.restore_supports_lock);
        assert!(!f.checksum_offload_broken);
    }

    #[test]
    fn bad_overrides_are_ignored() {
        let (d, _) = detector(
            "iptables v1.8.7",
            "Linux version 6.1.0",
            &[("SNATFullyRandom", "maybe"), ("NoSuchFlag", "false")],
        );
        let (reference, _) = detector("iptables v1.8.7", "Linux version 6.1.0", &[]);
        assert_eq!(d.get_features(), reference.get_features());
    }

    #[test]
    fn override_logging_happens_once() {
        let (d, _) = detector(
            "iptables v1.8.7",
            "Linux version 6.1.0",
            &[
                ("MASQFullyRandom", "false"),
                ("NoSuchFlag", "true"),
                ("SNATFullyRandom", "maybe"),
            ],
        );

        let (_, first) = capture(|| d.get_features());
        assert_eq!(count(&first, "warn", event_names::OVERRIDE_INVALID), 1);
        assert_eq!(count(&first, "warn", event_names::OVERRIDE_UNKNOWN), 1);
        assert_eq!(count(&first, "info", event_names::OVERRIDE_APPLIED), 1);

        let (_, second) = capture(|| d.refresh_features());
        assert_eq!(count(&second, "warn", event_names::OVERRIDE_INVALID), 0);
        assert_eq!(count(&second, "warn", event_names::OVERRIDE_UNKNOWN), 0);
        assert_eq!(count(&second, "info", event_names::OVERRIDE_APPLIED), 0);
        assert!(!d.get_features().masq_fully_random);
    }

    #[test]
    fn update_notice_only_on_change() {
        let (d, _) = detector("iptables v1.8.7", "Linux version 6.1.0", &[]);
        let (_, first) = capture(|| d.get_features());
        assert_eq!(count(&first, "info", event_names::FEATURES_UPDATED), 1);
        let notice = first
            .iter()
            .find(|e| e["event"] == event_names::FEATURES_UPDATED)
            .unwrap();
        assert_eq!(notice["fields"]["iptables_version"], "1.8.7");
        assert_eq!(notice["fields"]["kernel_version"], "6.1.0");

        let (_, second) = capture(|| d.refresh_features());
        assert_eq!(count(&second, "info", event_names::FEATURES_UPDATED), 0);
    }

    #[test]
    fn changed_versions_replace_cache() {
        let banner = Arc::new(Mutex::new("iptables v1.4.7"));
        let b = banner.clone();
        let runner: Runner = Box::new(move |_: &str, _: &[&str]| Ok(b.lock().unwrap().as_bytes().to_vec()));
        let kernel: Kernel =
            Box::new(|| Ok(io::Cursor::new(b"Linux version 5.4.0".to_vec())));
        let d = FeatureDetector::with_collaborators(OverrideMap::new(), runner, kernel);

        assert!(!d.get_features().restore_supports_lock);
        *banner.lock().unwrap() = "iptables v1.8.4";
        assert!(!d.get_features().restore_supports_lock);

        let (_, events) = capture(|| d.refresh_features());
        assert!(d.get_features().restore_supports_lock);
        assert_eq!(count(&events, "info", event_names::FEATURES_UPDATED), 1);
        assert_eq!(d.probed_versions().unwrap().iptables, Version::new(1, 8, 4));
    }

    #[test]
    fn custom_iptables_command() {
        let runner = |program: &str, _args: &[&str]| -> Result<Vec<u8>, ToolError> {
            if program == "/usr/sbin/iptables-nft" {
                Ok(b"iptables v1.8.9 (nf_tables)".to_vec())
            } else {
                Err(ToolError::CommandNotFound(program.to_string()))
            }
        };
        let kernel = || Ok::<_, io::Error>(io::Cursor::new(b"Linux version 6.6.0".to_vec()));
        let d = FeatureDetector::with_collaborators(OverrideMap::new(), runner, kernel)
            .with_iptables_command("/usr/sbin/iptables-nft");
        assert_eq!(
            d.get_features(),
            Features::from_versions(Version::new(1, 8, 9), Version::new(6, 6, 0))
        );
    }

    #[test]
    fn concurrent_callers_share_one_probe() {
        let (d, probes) = detector("iptables v1.8.7", "Linux version 6.1.0", &[]);
        let d = Arc::new(d);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let d = d.clone();
                std::thread::spawn(move || d.get_features())
            })
            .collect();
        let results: Vec<Features> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(probes.runner_calls.load(Ordering::SeqCst), 1);
    }
}
