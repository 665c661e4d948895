use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn relayctl() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("relayctl"))
}

fn write_settings(dir: &std::path::Path) -> std::path::PathBuf {
    let settings = dir.join("relayctl.yaml");
    fs::write(
        &settings,
        format!(
            r#"service_name: "relayctl-it-absent"
launchd_label: "org.example.relayctl-it-absent"
descriptor_dir: "{}"
log_path: "{}"
"#,
            dir.join("descriptors").display(),
            dir.join("relay.log").display()
        ),
    )
    .expect("write settings");
    settings
}

#[test]
fn help_lists_lifecycle_commands() {
    relayctl()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("install"))
        .stdout(predicate::str::contains("uninstall"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("logs"));
}

#[test]
fn invalid_log_level_is_rejected() {
    relayctl()
        .args(["status", "--log-level", "loud"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid log level"));
}

#[test]
fn malformed_settings_file_fails_cleanly() {
    let temp = tempdir().expect("create tempdir");
    let settings = temp.path().join("relayctl.yaml");
    fs::write(&settings, "services: [\n").expect("write settings");

    relayctl()
        .arg("status")
        .arg("--settings")
        .arg(&settings)
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("relayctl: "));
}

#[cfg(unix)]
#[test]
fn status_reports_missing_service() {
    let temp = tempdir().expect("create tempdir");
    let settings = write_settings(temp.path());

    relayctl()
        .arg("status")
        .arg("--settings")
        .arg(&settings)
        .assert()
        .success()
        .stdout(predicate::str::contains("Not installed"))
        .stdout(predicate::str::contains("relayctl install"));
}

#[cfg(target_os = "linux")]
#[test]
fn logs_for_missing_service_fail() {
    let temp = tempdir().expect("create tempdir");
    let settings = write_settings(temp.path());

    relayctl()
        .arg("logs")
        .arg("--settings")
        .arg(&settings)
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not installed"));
}

#[cfg(target_os = "linux")]
#[test]
fn install_without_root_is_refused() {
    if nix::unistd::getuid().is_root() {
        eprintln!("Skipping install_without_root_is_refused: running as root");
        return;
    }

    let temp = tempdir().expect("create tempdir");
    let settings = write_settings(temp.path());

    relayctl()
        .arg("install")
        .arg("--settings")
        .arg(&settings)
        .assert()
        .failure()
        .stderr(predicate::str::contains("requires elevated privileges"));
    assert!(!temp.path().join("descriptors").exists());
}
