//! Feature detection against real files and real child processes.
//!
//! The iptables tool is stood in for by small shell scripts so the bounded
//! runner, the /proc/version reader and the config wiring all run for real.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempDir;
use xt_config::XtConfig;
use xt_core::collect::{ToolConfig, ToolRunner};
use xt_core::features::FeatureDetector;
use xt_core::probe::{ProcVersionSource, ToolCommandRunner};

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    {
        let mut file = fs::File::create(&path).expect("create script");
        writeln!(file, "#!/bin/sh").unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file.sync_all().unwrap();
    }
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn kernel_file(dir: &Path, banner: &str) -> PathBuf {
    let path = dir.join("version");
    fs::write(&path, banner).unwrap();
    path
}

fn config(iptables: &Path, kernel: &Path) -> XtConfig {
    let mut config = XtConfig::default();
    config.probe.iptables_command = iptables.display().to_string();
    config.probe.kernel_version_path = kernel.to_path_buf();
    config
}

#[test]
fn modern_tool_and_kernel_enable_random_fully() {
    let dir = TempDir::new().unwrap();
    let iptables = script(dir.path(), "iptables", "printf 'iptables v1.6.2\\n'\n");
    let kernel = kernel_file(
        dir.path(),
        "Linux version 5.15.0-91-generic (buildd@lcy02-amd64-045) (gcc 11.4.0) #101-Ubuntu SMP\n",
    );

    let detector = FeatureDetector::from_config(&config(&iptables, &kernel));
    let features = detector.get_features();

    assert!(features.snat_fully_random);
    assert!(features.masq_fully_random);
    assert!(features.restore_supports_lock);
    assert!(!features.checksum_offload_broken);

    let versions = detector.probed_versions().unwrap();
    assert_eq!(versions.iptables.to_string(), "1.6.2");
    assert_eq!(versions.kernel.to_string(), "5.15.0");
    assert!(!versions.iptables_assumed);
    assert!(!versions.kernel_assumed);
}

#[test]
fn old_tool_and_kernel_only_flag_checksum_bug() {
    let dir = TempDir::new().unwrap();
    let iptables = script(dir.path(), "iptables", "printf 'iptables v1.4.7\\n'\n");
    let kernel = kernel_file(dir.path(), "Linux version 3.10.0-1160.el7.x86_64\n");

    let features = FeatureDetector::from_config(&config(&iptables, &kernel)).get_features();

    assert!(!features.snat_fully_random);
    assert!(!features.masq_fully_random);
    assert!(!features.restore_supports_lock);
    assert!(features.checksum_offload_broken);
}

#[test]
fn version_banner_on_nonzero_exit_is_still_used() {
    let dir = TempDir::new().unwrap();
    let iptables = script(
        dir.path(),
        "iptables",
        "printf 'iptables v1.8.7 (nf_tables)\\n'\nexit 1\n",
    );
    let kernel = kernel_file(dir.path(), "Linux version 6.1.0\n");

    let detector = FeatureDetector::from_config(&config(&iptables, &kernel));
    detector.get_features();

    let versions = detector.probed_versions().unwrap();
    assert_eq!(versions.iptables.to_string(), "1.8.7");
    assert!(!versions.iptables_assumed);
}

#[test]
fn silent_failure_and_missing_kernel_file_fall_back() {
    let dir = TempDir::new().unwrap();
    let iptables = script(dir.path(), "iptables", "exit 2\n");
    let kernel = dir.path().join("no-such-version-file");

    let detector = FeatureDetector::from_config(&config(&iptables, &kernel));
    let features = detector.get_features();

    let versions = detector.probed_versions().unwrap();
    assert!(versions.iptables_assumed);
    assert!(versions.kernel_assumed);
    assert_eq!(versions.iptables.to_string(), "1.4.7");
    assert_eq!(versions.kernel.to_string(), "3.10.0");
    assert!(features.checksum_offload_broken);
    assert!(!features.restore_supports_lock);
}

#[test]
fn hung_tool_times_out_and_falls_back() {
    let dir = TempDir::new().unwrap();
    let iptables = script(dir.path(), "iptables", "exec sleep 10\n");
    let kernel = kernel_file(dir.path(), "Linux version 5.15.0\n");

    let runner = ToolRunner::new(ToolConfig {
        timeout: std::time::Duration::from_millis(200),
        ..ToolConfig::default()
    });
    let detector = FeatureDetector::with_collaborators(
        Default::default(),
        ToolCommandRunner::new(runner),
        ProcVersionSource::new(&kernel),
    )
    .with_iptables_command(iptables.display().to_string());

    let start = Instant::now();
    let features = detector.get_features();
    assert!(start.elapsed().as_secs() < 8);

    assert!(detector.probed_versions().unwrap().iptables_assumed);
    assert!(!features.snat_fully_random);
    assert!(!features.checksum_offload_broken);
}

#[test]
fn config_overrides_survive_refresh() {
    let dir = TempDir::new().unwrap();
    let iptables = script(dir.path(), "iptables", "printf 'iptables v1.8.7\\n'\n");
    let kernel = kernel_file(dir.path(), "Linux version 5.15.0\n");

    let mut cfg = config(&iptables, &kernel);
    cfg.features
        .overrides
        .insert("SNATFullyRandom".into(), "false".into());
    cfg.features
        .overrides
        .insert("MASQFullyRandom".into(), "maybe".into());

    let detector = FeatureDetector::from_config(&cfg);
    assert!(!detector.get_features().snat_fully_random);
    assert!(detector.get_features().masq_fully_random);

    detector.refresh_features();
    assert!(!detector.get_features().snat_fully_random);
    assert!(detector.get_features().masq_fully_random);
}
