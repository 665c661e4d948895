#[path = "common/mod.rs"]
mod common;

use std::io::Cursor;

use relayctl::{host::LogStream, logs::pump};

#[test]
fn pump_copies_stream_verbatim() {
    let stream = LogStream::from_reader(Cursor::new(
        "[OK] Connected to Psiphon network\n[STATS] Clients: 1 | Up: 0 B | Down: 0 B | Uptime: 1s\n",
    ));
    let mut out = Vec::new();

    assert_eq!(pump(stream, &mut out).expect("pump"), 2);
    let text = String::from_utf8(out).expect("utf8 output");
    assert!(text.starts_with("[OK] Connected"));
    assert!(text.ends_with("Uptime: 1s\n"));
}

#[cfg(unix)]
#[test]
fn pump_reads_spawned_follower_until_exit() {
    let stream =
        LogStream::spawn("sh", &["-c", "echo first; echo second"]).expect("spawn follower");
    let mut out = Vec::new();

    assert_eq!(pump(stream, &mut out).expect("pump"), 2);
    assert_eq!(String::from_utf8(out).expect("utf8 output"), "first\nsecond\n");
}

#[cfg(unix)]
mod managed {
    use std::fs;

    use crate::common::{FakeHost, Sandbox};
    use relayctl::{
        config::Scope,
        error::ServiceError,
        service::{ServiceManager, launchd::LaunchdManager, systemd::SystemdManager},
    };
    use tempfile::tempdir;

    #[test]
    fn systemd_logs_follow_the_journal() {
        let temp = tempdir().expect("create tempdir");
        let sandbox = Sandbox::new(temp.path(), Scope::System);
        let host = FakeHost::new(true).with_log("journal line\n");
        let manager = SystemdManager::new(sandbox.config.clone(), host.clone());

        let mut out = Vec::new();
        assert!(matches!(manager.logs(&mut out), Err(ServiceError::NotInstalled(_))));

        manager.install(&sandbox.spec()).expect("install");
        manager.logs(&mut out).expect("logs");
        assert_eq!(out, b"journal line\n");
        assert_eq!(host.streams(), vec!["journalctl -u conduit -f --no-pager".to_string()]);
    }

    #[test]
    fn launchd_logs_need_a_log_file() {
        let temp = tempdir().expect("create tempdir");
        let sandbox = Sandbox::new(temp.path(), Scope::User);
        let host = FakeHost::new(false).with_log("relay output\n");
        let manager = LaunchdManager::new(sandbox.config.clone(), host.clone());
        manager.install(&sandbox.spec()).expect("install");

        let mut out = Vec::new();
        assert!(matches!(manager.logs(&mut out), Err(ServiceError::StreamUnavailable(_))));

        fs::write(&sandbox.config.log_path, "relay output\n").expect("write log file");
        manager.logs(&mut out).expect("logs");
        assert_eq!(out, b"relay output\n");

        let expected = format!("tail -n 100 -F {}", sandbox.config.log_path.display());
        assert_eq!(host.streams(), vec![expected]);
    }
}
