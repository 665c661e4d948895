#![cfg(unix)]

#[path = "common/mod.rs"]
mod common;

use std::fs;

use common::{FAKE_PID, FakeHost, Sandbox};
use relayctl::{
    config::Scope,
    error::ServiceError,
    service::{
        ServiceManager, ServiceState, launchd::LaunchdManager, systemd::SystemdManager,
    },
};
use tempfile::tempdir;

fn systemd(sandbox: &Sandbox, host: &FakeHost) -> SystemdManager<FakeHost> {
    SystemdManager::new(sandbox.config.clone(), host.clone())
}

fn launchd(sandbox: &Sandbox, host: &FakeHost) -> LaunchdManager<FakeHost> {
    LaunchdManager::new(sandbox.config.clone(), host.clone())
}

#[test]
fn systemd_install_leaves_service_stopped() {
    let temp = tempdir().expect("create tempdir");
    let sandbox = Sandbox::new(temp.path(), Scope::System);
    let host = FakeHost::new(true);
    let manager = systemd(&sandbox, &host);

    manager.install(&sandbox.spec()).expect("install");

    let unit = fs::read_to_string(manager.unit_path()).expect("unit file written");
    assert!(unit.contains("--max-clients 50 --bandwidth 10.0"));
    assert!(sandbox.config.data_dir.is_dir());
    assert_eq!(host.count_calls("systemctl daemon-reload"), 1);
    assert_eq!(host.count_calls("systemctl enable conduit"), 1);
    assert_eq!(host.count_calls("systemctl start"), 0);

    let status = manager.status().expect("status");
    assert_eq!(status.state, ServiceState::Stopped);
    assert_eq!(status.pid, None);
}

#[test]
fn systemd_second_install_is_rejected() {
    let temp = tempdir().expect("create tempdir");
    let sandbox = Sandbox::new(temp.path(), Scope::System);
    let host = FakeHost::new(true);
    let manager = systemd(&sandbox, &host);

    manager.install(&sandbox.spec()).expect("first install");
    let err = manager.install(&sandbox.spec()).unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyInstalled(name) if name == "conduit"));
}

#[test]
fn systemd_uninstall_returns_to_not_installed() {
    let temp = tempdir().expect("create tempdir");
    let sandbox = Sandbox::new(temp.path(), Scope::System);
    let host = FakeHost::new(true);
    let manager = systemd(&sandbox, &host);

    manager.install(&sandbox.spec()).expect("install");
    manager.start().expect("start");
    manager.uninstall().expect("uninstall");

    assert!(!manager.unit_path().exists());
    assert_eq!(host.count_calls("systemctl stop conduit"), 1);
    assert_eq!(host.count_calls("systemctl disable conduit"), 1);
    assert_eq!(manager.status().expect("status").state, ServiceState::NotInstalled);
    assert!(matches!(manager.uninstall(), Err(ServiceError::NotInstalled(_))));
}

#[test]
fn systemd_start_and_stop_settle() {
    let temp = tempdir().expect("create tempdir");
    let sandbox = Sandbox::new(temp.path(), Scope::System);
    let host = FakeHost::new(true);
    let manager = systemd(&sandbox, &host);
    manager.install(&sandbox.spec()).expect("install");

    manager.start().expect("start");
    let status = manager.status().expect("status");
    assert_eq!(status.state, ServiceState::Running);
    assert_eq!(status.pid, Some(FAKE_PID));

    // Already running: no second transition.
    manager.start().expect("start again");
    assert_eq!(host.count_calls("systemctl start"), 1);

    manager.stop().expect("stop");
    assert_eq!(manager.status().expect("status").state, ServiceState::Stopped);
    manager.stop().expect("stop again");
    assert_eq!(host.count_calls("systemctl stop"), 1);
}

#[test]
fn systemd_start_that_never_settles_times_out() {
    let temp = tempdir().expect("create tempdir");
    let sandbox = Sandbox::new(temp.path(), Scope::System);
    let host = FakeHost::new(true);
    let manager = systemd(&sandbox, &host);
    manager.install(&sandbox.spec()).expect("install");
    host.never_settle();

    let err = manager.start().unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Timeout {
            target: ServiceState::Running,
            ..
        }
    ));
    assert_eq!(manager.status().expect("status").state, ServiceState::StartPending);
    assert_eq!(host.count_calls("systemctl show"), 1 + 5 + 1);
}

#[test]
fn systemd_install_requires_privileges_before_side_effects() {
    let temp = tempdir().expect("create tempdir");
    let sandbox = Sandbox::new(temp.path(), Scope::System);
    let host = FakeHost::new(false);
    let manager = systemd(&sandbox, &host);

    let err = manager.install(&sandbox.spec()).unwrap_err();
    assert!(matches!(err, ServiceError::PermissionDenied { operation: "install", .. }));
    assert!(!manager.unit_path().exists());
    assert!(!sandbox.config.data_dir.exists());
    assert!(host.calls().is_empty());
}

#[test]
fn systemd_enable_failure_removes_unit_file() {
    let temp = tempdir().expect("create tempdir");
    let sandbox = Sandbox::new(temp.path(), Scope::System);
    let host = FakeHost::new(true);
    host.fail("systemctl", "enable");
    let manager = systemd(&sandbox, &host);

    let err = manager.install(&sandbox.spec()).unwrap_err();
    assert!(matches!(err, ServiceError::BackendFailure { .. }));
    assert!(!manager.unit_path().exists());
    assert_eq!(manager.status().expect("status").state, ServiceState::NotInstalled);
}

#[test]
fn systemd_without_systemctl_is_unavailable() {
    let temp = tempdir().expect("create tempdir");
    let sandbox = Sandbox::new(temp.path(), Scope::System);
    let host = FakeHost::new(true);
    let manager = systemd(&sandbox, &host);
    manager.install(&sandbox.spec()).expect("install");
    host.remove_program("systemctl");

    assert!(matches!(manager.status(), Err(ServiceError::BackendUnavailable(_))));
}

#[test]
fn systemd_advisory_disable_failure_still_uninstalls() {
    let temp = tempdir().expect("create tempdir");
    let sandbox = Sandbox::new(temp.path(), Scope::System);
    let host = FakeHost::new(true);
    let manager = systemd(&sandbox, &host);
    manager.install(&sandbox.spec()).expect("install");
    host.fail("systemctl", "disable");

    manager.uninstall().expect("uninstall despite disable failure");
    assert!(!manager.unit_path().exists());
}

#[test]
fn systemd_start_requires_installation() {
    let temp = tempdir().expect("create tempdir");
    let sandbox = Sandbox::new(temp.path(), Scope::System);
    let host = FakeHost::new(true);
    let manager = systemd(&sandbox, &host);

    assert!(matches!(manager.start(), Err(ServiceError::NotInstalled(_))));
    assert!(matches!(manager.stop(), Err(ServiceError::NotInstalled(_))));
}

#[test]
fn systemd_rejects_out_of_range_limits() {
    let temp = tempdir().expect("create tempdir");
    let sandbox = Sandbox::new(temp.path(), Scope::System);
    let host = FakeHost::new(true);
    let manager = systemd(&sandbox, &host);

    let mut spec = sandbox.spec();
    spec.max_clients = 1001;
    assert!(matches!(manager.install(&spec), Err(ServiceError::InvalidSpec(_))));
    assert!(!manager.unit_path().exists());
}

#[test]
fn launchd_user_agent_lifecycle() {
    let temp = tempdir().expect("create tempdir");
    let sandbox = Sandbox::new(temp.path(), Scope::User);
    let host = FakeHost::new(false);
    let manager = launchd(&sandbox, &host);

    manager.install(&sandbox.spec()).expect("install without root");
    assert!(manager.plist_path().ends_with("org.example.conduit.plist"));
    assert_eq!(manager.status().expect("status").state, ServiceState::Stopped);

    manager.start().expect("start");
    let status = manager.status().expect("status");
    assert_eq!(status.state, ServiceState::Running);
    assert_eq!(status.pid, Some(FAKE_PID));

    manager.stop().expect("stop");
    assert_eq!(manager.status().expect("status").state, ServiceState::Stopped);

    manager.uninstall().expect("uninstall");
    assert!(!manager.plist_path().exists());
    assert_eq!(manager.status().expect("status").state, ServiceState::NotInstalled);
}

#[test]
fn launchd_second_install_is_rejected() {
    let temp = tempdir().expect("create tempdir");
    let sandbox = Sandbox::new(temp.path(), Scope::User);
    let host = FakeHost::new(false);
    let manager = launchd(&sandbox, &host);

    manager.install(&sandbox.spec()).expect("first install");
    let before = fs::read_to_string(manager.plist_path()).expect("plist written");

    let mut spec = sandbox.spec();
    spec.max_clients = 999;
    let err = manager.install(&spec).unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyInstalled(label) if label == "org.example.conduit"));
    assert_eq!(fs::read_to_string(manager.plist_path()).expect("plist kept"), before);
}

#[test]
fn launchd_system_daemon_requires_root() {
    let temp = tempdir().expect("create tempdir");
    let sandbox = Sandbox::new(temp.path(), Scope::System);
    let host = FakeHost::new(false);
    let manager = launchd(&sandbox, &host);

    assert!(matches!(
        manager.install(&sandbox.spec()),
        Err(ServiceError::PermissionDenied { .. })
    ));
    assert!(!manager.plist_path().exists());
}

#[test]
fn launchd_loaded_without_pid_is_starting() {
    let temp = tempdir().expect("create tempdir");
    let sandbox = Sandbox::new(temp.path(), Scope::User);
    let host = FakeHost::new(false);
    let manager = launchd(&sandbox, &host);
    manager.install(&sandbox.spec()).expect("install");
    host.never_settle();

    assert!(matches!(manager.start(), Err(ServiceError::Timeout { .. })));
    assert_eq!(manager.status().expect("status").state, ServiceState::StartPending);
}
