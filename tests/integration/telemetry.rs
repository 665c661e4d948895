#[path = "common/mod.rs"]
mod common;

use std::{io::BufReader, thread, time::Duration};

use common::ChannelReader;
use relayctl::telemetry::{Renderer, TelemetrySession, parse_uptime};

const CONNECTED: &str = "2026/01/23 15:30:40 [OK] Connected to Psiphon network\n";

fn stats(clients: u32, uptime: &str) -> String {
    format!(
        "2026/01/23 15:30:45 [STATS] Clients: {clients} | Up: 3.4 MB | Down: 1.2 MB | Uptime: {uptime}\n"
    )
}

fn run_session(chunks: Vec<String>, pause: Duration) -> Vec<String> {
    let (tx, reader) = ChannelReader::new();
    let feeder = thread::spawn(move || {
        for chunk in chunks {
            thread::sleep(pause);
            tx.send(chunk.into_bytes()).expect("session still reading");
        }
    });

    let mut out = Vec::new();
    let mut renderer = Renderer::new(&mut out, false);
    TelemetrySession::new(BufReader::new(reader), None)
        .with_tick(Duration::from_millis(10))
        .run(&mut renderer)
        .expect("session runs to end of stream");
    feeder.join().expect("feeder finished");

    String::from_utf8(out)
        .expect("utf8 output")
        .lines()
        .map(str::to_string)
        .collect()
}

fn field<'a>(line: &'a str, name: &str) -> &'a str {
    line.split(" | ")
        .find_map(|part| part.strip_prefix(name))
        .unwrap_or_else(|| panic!("no {name} in {line:?}"))
}

#[test]
fn plain_session_renders_latest_sample_on_close() {
    let lines = run_session(
        vec![CONNECTED.to_string(), stats(12, "1h2m3s")],
        Duration::from_millis(5),
    );

    let last = lines.last().expect("at least one frame");
    assert!(last.starts_with("Status: Connected | Clients: 12 | Up: 3.4 MB | Down: 1.2 MB"));
    assert!(lines.iter().all(|line| !line.contains('\x1b')));
}

#[test]
fn plain_session_uptime_never_decreases() {
    let chunks = vec![
        stats(1, "10s"),
        "noise that is not a stats line\n".to_string(),
        stats(2, "11s"),
        stats(3, "5s"),
        stats(4, "12s"),
    ];
    let lines = run_session(chunks, Duration::from_millis(25));
    assert!(lines.len() > 2, "expected several ticks, got {lines:?}");

    let uptimes: Vec<Duration> = lines
        .iter()
        .map(|line| field(line, "Uptime: "))
        .filter(|uptime| *uptime != "...")
        .map(|uptime| parse_uptime(uptime).expect("formatted uptime parses"))
        .collect();
    assert!(!uptimes.is_empty());
    assert!(uptimes.windows(2).all(|pair| pair[0] <= pair[1]), "{uptimes:?}");
    assert!(uptimes[0] >= Duration::from_secs(10));
}

#[test]
fn connected_status_is_sticky() {
    let chunks = vec![
        stats(0, "1s"),
        CONNECTED.to_string(),
        stats(1, "2s"),
        "[ERROR] lost upstream connection\n".to_string(),
        stats(2, "3s"),
    ];
    let lines = run_session(chunks, Duration::from_millis(25));

    let statuses: Vec<&str> = lines.iter().map(|line| field(line, "Status: ")).collect();
    let first_connected = statuses
        .iter()
        .position(|status| *status == "Connected")
        .expect("connected at some point");
    assert!(statuses[..first_connected].iter().all(|status| *status == "Waiting"));
    assert!(statuses[first_connected..].iter().all(|status| *status == "Connected"));
}

#[test]
fn oversized_uptime_does_not_end_the_session() {
    let chunks = vec![
        stats(3, "5124095576030431h0m99s"),
        CONNECTED.to_string(),
        stats(7, "5s"),
    ];
    let lines = run_session(chunks, Duration::from_millis(15));

    let last = lines.last().expect("at least one frame");
    assert!(last.starts_with("Status: Connected | Clients: 7 |"), "{last}");
    assert_ne!(field(last, "Uptime: "), "...");
}

#[test]
fn empty_stream_renders_placeholders_once() {
    let lines = run_session(Vec::new(), Duration::ZERO);
    assert_eq!(
        lines.last().map(String::as_str),
        Some("Status: Waiting | Clients: 0 | Up: 0 B | Down: 0 B | Uptime: ...")
    );
}

#[cfg(unix)]
mod follow {
    use super::*;
    use crate::common::{FAKE_PID, FakeHost, HangUpOnFrame, Sandbox};
    use relayctl::{
        config::Scope,
        error::ServiceError,
        service::{ServiceManager, launchd::LaunchdManager, systemd::SystemdManager},
    };
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn follow_requires_a_running_service() {
        let temp = tempdir().expect("create tempdir");
        let sandbox = Sandbox::new(temp.path(), Scope::System);
        let host = FakeHost::new(true);
        let manager = SystemdManager::new(sandbox.config.clone(), host.clone());

        let mut out = Vec::new();
        assert!(matches!(
            manager.status_follow(&mut out, false),
            Err(ServiceError::NotInstalled(_))
        ));

        manager.install(&sandbox.spec()).expect("install");
        assert!(matches!(
            manager.status_follow(&mut out, false),
            Err(ServiceError::StreamUnavailable(_))
        ));
        assert!(host.streams().is_empty());
    }

    #[test]
    fn follow_prints_limits_and_platform_uptime() {
        let temp = tempdir().expect("create tempdir");
        let sandbox = Sandbox::new(temp.path(), Scope::System);
        let host = FakeHost::new(true).with_log(&format!("{CONNECTED}{}", stats(4, "9s")));
        let manager = SystemdManager::new(sandbox.config.clone(), host.clone());
        manager.install(&sandbox.spec()).expect("install");
        manager.start().expect("start");

        let mut out = Vec::new();
        manager.status_follow(&mut out, false).expect("follow until stream ends");
        let text = String::from_utf8(out).expect("utf8 output");

        assert!(text.contains("  Max Clients:  50\n"));
        assert!(text.contains("  Bandwidth:    10.0 Mbps\n"));
        assert_eq!(
            host.streams(),
            vec!["journalctl -u conduit -f --no-pager -o cat".to_string()]
        );

        let last = text.lines().last().expect("a frame");
        assert!(last.starts_with("Status: Connected | Clients: 4 |"));
        // Uptime comes from the process start time, not the 9s in the log.
        let uptime = parse_uptime(field(last, "Uptime: ")).expect("uptime shown");
        assert!(uptime >= Duration::from_secs(125), "{last}");
    }

    #[test]
    fn follow_ends_quietly_when_output_closes() {
        let temp = tempdir().expect("create tempdir");
        let sandbox = Sandbox::new(temp.path(), Scope::System);
        let host = FakeHost::new(true).with_log(&stats(4, "9s"));
        let manager = SystemdManager::new(sandbox.config.clone(), host.clone());
        manager.install(&sandbox.spec()).expect("install");
        manager.start().expect("start");

        let mut out = HangUpOnFrame::default();
        manager
            .status_follow(&mut out, false)
            .expect("closed output is not an error");
        let header = String::from_utf8(out.accepted).expect("utf8 output");
        assert!(header.contains("  Max Clients:  50\n"));
    }

    #[test]
    fn launchd_follow_requires_a_log_file() {
        let temp = tempdir().expect("create tempdir");
        let sandbox = Sandbox::new(temp.path(), Scope::User);
        let host = FakeHost::new(false);
        let manager = LaunchdManager::new(sandbox.config.clone(), host.clone());

        let mut out = Vec::new();
        assert!(matches!(
            manager.status_follow(&mut out, false),
            Err(ServiceError::NotInstalled(_))
        ));

        manager.install(&sandbox.spec()).expect("install");
        manager.start().expect("start");
        assert!(matches!(
            manager.status_follow(&mut out, false),
            Err(ServiceError::StreamUnavailable(_))
        ));
        assert!(host.streams().is_empty());
    }

    #[test]
    fn launchd_follow_tails_log_and_falls_back_to_ps() {
        let temp = tempdir().expect("create tempdir");
        let sandbox = Sandbox::new(temp.path(), Scope::User);
        let host = FakeHost::new(false)
            .without_native_start_times()
            .with_log(&format!("{CONNECTED}{}", stats(6, "3s")));
        let manager = LaunchdManager::new(sandbox.config.clone(), host.clone());
        manager.install(&sandbox.spec()).expect("install");
        manager.start().expect("start");
        fs::write(&sandbox.config.log_path, CONNECTED).expect("write log file");

        let mut out = Vec::new();
        manager.status_follow(&mut out, false).expect("follow until stream ends");
        let text = String::from_utf8(out).expect("utf8 output");

        assert!(text.contains("  Max Clients:  50\n"));
        assert!(text.contains("  Bandwidth:    10.0 Mbps\n"));
        assert_eq!(
            host.streams(),
            vec![format!("tail -F {}", sandbox.config.log_path.display())]
        );
        assert_eq!(host.count_calls(&format!("ps -p {FAKE_PID} -o lstart=")), 1);

        let last = text.lines().last().expect("a frame");
        assert!(last.starts_with("Status: Connected | Clients: 6 |"), "{last}");
        // Anchored on the `ps` start time rather than the 3s in the log.
        let uptime = parse_uptime(field(last, "Uptime: ")).expect("uptime shown");
        assert!(uptime >= Duration::from_secs(125), "{last}");
    }
}

#[cfg(target_os = "linux")]
#[test]
fn closed_output_kills_the_follower() {
    use common::HangUpOnFrame;
    use relayctl::{
        host::LogStream,
        install::InstalledLimits,
        service::{FollowSource, follow},
    };

    let stream = LogStream::spawn("sh", &["-c", "echo started; exec sleep 30"])
        .expect("spawn follower");
    let pid = stream.terminator().expect("spawned follower").id();
    let source = FollowSource {
        stream,
        started_at: None,
        limits: InstalledLimits::default(),
    };

    let mut out = HangUpOnFrame::default();
    follow(source, &mut out, false).expect("closed output is not an error");
    assert!(!std::path::Path::new(&format!("/proc/{pid}")).exists());
}
