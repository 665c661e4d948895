//! Service lifecycle management across native supervisors.
//!
//! [`ServiceManager`] is the one contract every backend implements. Exactly one
//! backend is selected per target platform through [`NativeManager`].
use std::{
    fmt::Write as _,
    io::{ErrorKind, Write},
    path::PathBuf,
    thread,
};

use chrono::{DateTime, Utc};
use strum_macros::Display;
use tracing::{debug, info};

use crate::{
    config::{ManagerConfig, PollPolicy},
    constants::RENDER_TICK,
    error::ServiceError,
    host::{LogStream, SystemHost},
    install::{InstallSpec, InstalledLimits},
    logs,
    telemetry::{Renderer, TelemetrySession, write_follow_header},
};

#[cfg(unix)]
pub mod launchd;
#[cfg(unix)]
pub mod systemd;
#[cfg(windows)]
pub mod windows;

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
compile_error!("relayctl supports Linux (systemd), macOS (launchd), and Windows");

/// Backend compiled in for this platform.
#[cfg(target_os = "linux")]
pub type NativeManager = systemd::SystemdManager<crate::host::NativeHost>;

/// Backend compiled in for this platform.
#[cfg(target_os = "macos")]
pub type NativeManager = launchd::LaunchdManager<crate::host::NativeHost>;

/// Backend compiled in for this platform.
#[cfg(windows)]
pub type NativeManager = windows::ScmManager<crate::host::NativeHost>;

/// Builds the backend for this platform.
pub fn native_manager(config: ManagerConfig) -> NativeManager {
    NativeManager::new(config, crate::host::NativeHost::new())
}

const GREEN_BOLD: &str = "\x1b[1;32m";
const RED_BOLD: &str = "\x1b[1;31m";
const MAGENTA_BOLD: &str = "\x1b[1;35m";
const YELLOW_BOLD: &str = "\x1b[1;33m";
const RESET: &str = "\x1b[0m";

/// Service state as reported by the platform supervisor. Never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ServiceState {
    /// No native descriptor exists.
    #[strum(to_string = "Not installed")]
    NotInstalled,
    /// Installed but not running.
    Stopped,
    /// Start requested, not yet running.
    #[strum(to_string = "Starting")]
    StartPending,
    /// Running.
    Running,
    /// Stop requested, not yet stopped.
    #[strum(to_string = "Stopping")]
    StopPending,
    /// The supervisor could not answer.
    Unknown,
}

impl ServiceState {
    fn color(&self) -> &'static str {
        match self {
            ServiceState::Running => GREEN_BOLD,
            ServiceState::StartPending | ServiceState::StopPending => YELLOW_BOLD,
            ServiceState::NotInstalled => MAGENTA_BOLD,
            ServiceState::Stopped | ServiceState::Unknown => RED_BOLD,
        }
    }
}

/// Where the relay's output can be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLocation {
    /// systemd journal for the named unit.
    Journal(String),
    /// Plain log file.
    File(PathBuf),
}

impl std::fmt::Display for LogLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLocation::Journal(unit) => write!(f, "journalctl -u {unit}"),
            LogLocation::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Point-in-time view of the service, recomputed on every query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatusSnapshot {
    /// Service name.
    pub service: String,
    /// Current state.
    pub state: ServiceState,
    /// Main process id while running.
    pub pid: Option<u32>,
    /// Where the relay logs.
    pub log: LogLocation,
    /// Native descriptor location, for file-based descriptors.
    pub descriptor: Option<PathBuf>,
}

impl ServiceStatusSnapshot {
    /// Human-readable status report with a next-step hint for `program`.
    pub fn report(&self, program: &str, color: bool) -> String {
        let state = if color {
            format!("{}{}{}", self.state.color(), self.state, RESET)
        } else {
            self.state.to_string()
        };

        let mut out = String::new();
        out.push_str("┌─────────────────────────────────────────────────┐\n");
        out.push_str("│                 SERVICE STATUS                  │\n");
        out.push_str("└─────────────────────────────────────────────────┘\n\n");
        let _ = writeln!(out, "  Service: {}", self.service);
        let _ = writeln!(out, "  Status:  {state}");
        if let Some(pid) = self.pid {
            let _ = writeln!(out, "  PID:     {pid}");
        }
        if self.state != ServiceState::NotInstalled {
            if let Some(descriptor) = &self.descriptor {
                let _ = writeln!(out, "  Unit:    {}", descriptor.display());
            }
            let _ = writeln!(out, "  Log:     {}", self.log);
        }
        out.push('\n');

        let hint = match self.state {
            ServiceState::NotInstalled => format!("Use '{program} install' to install the service"),
            ServiceState::Running | ServiceState::StartPending => {
                format!("Use '{program} status --follow' for live statistics")
            }
            ServiceState::Stopped | ServiceState::StopPending | ServiceState::Unknown => {
                format!("Use '{program} start' to start the service")
            }
        };
        let _ = writeln!(out, "  {hint}");
        out
    }
}

/// What a backend hands to the telemetry monitor for `status --follow`.
#[derive(Debug)]
pub struct FollowSource {
    /// Live log stream of the relay.
    pub stream: LogStream,
    /// Process start time reported by the platform, if any.
    pub started_at: Option<DateTime<Utc>>,
    /// Limits recorded in the installed descriptor.
    pub limits: InstalledLimits,
}

/// Lifecycle contract shared by every platform backend.
pub trait ServiceManager {
    /// Settings this manager was built with.
    fn config(&self) -> &ManagerConfig;

    /// Writes and registers the native descriptor, leaving the service stopped.
    fn install(&self, spec: &InstallSpec) -> Result<(), ServiceError>;

    /// Stops the service if needed and removes every registration.
    fn uninstall(&self) -> Result<(), ServiceError>;

    /// Starts the service and waits for it to run.
    fn start(&self) -> Result<(), ServiceError>;

    /// Stops the service and waits for it to stop.
    fn stop(&self) -> Result<(), ServiceError>;

    /// Queries the supervisor once.
    fn status(&self) -> Result<ServiceStatusSnapshot, ServiceError>;

    /// Opens the live log source of a running service.
    fn open_follow(&self) -> Result<FollowSource, ServiceError>;

    /// Opens an unbounded stream of raw log lines.
    fn open_logs(&self) -> Result<LogStream, ServiceError>;

    /// Renders live statistics until the log stream closes.
    fn status_follow(&self, out: &mut dyn Write, interactive: bool) -> Result<(), ServiceError> {
        follow(self.open_follow()?, out, interactive)
    }

    /// Copies raw log lines to `out` until the stream closes.
    fn logs(&self, out: &mut dyn Write) -> Result<(), ServiceError> {
        let stream = self.open_logs()?;
        logs::pump(stream, out)?;
        Ok(())
    }
}

/// Prints the live statistics header, then renders `source` until it ends.
///
/// A closed output (for example `relayctl status --follow | head`) ends the
/// view quietly. On any early exit the follower process is killed.
pub fn follow(
    source: FollowSource,
    out: &mut dyn Write,
    interactive: bool,
) -> Result<(), ServiceError> {
    let FollowSource {
        stream,
        started_at,
        limits,
    } = source;
    let terminator = stream.terminator();

    let result = write_follow_header(&mut *out, &limits)
        .map_err(ServiceError::from)
        .and_then(|()| {
            let mut renderer = Renderer::new(&mut *out, interactive);
            TelemetrySession::new(stream, started_at)
                .with_tick(RENDER_TICK)
                .run(&mut renderer)
        });

    if result.is_err() {
        if let Some(terminator) = terminator {
            terminator.terminate();
        }
    }
    match result {
        Err(ServiceError::Io(err)) if err.kind() == ErrorKind::BrokenPipe => {
            debug!("output closed, ending live statistics");
            Ok(())
        }
        other => other,
    }
}

/// Fails with `PermissionDenied` unless the host is elevated.
pub(crate) fn require_elevated<H: SystemHost>(
    host: &H,
    operation: &'static str,
) -> Result<(), ServiceError> {
    if host.is_elevated() {
        return Ok(());
    }

    let hint = if cfg!(windows) {
        "run from an Administrator prompt"
    } else {
        "run with sudo"
    };
    Err(ServiceError::PermissionDenied { operation, hint })
}

/// Polls `query` until it reports `target`, bounded by `poll`.
pub(crate) fn wait_for_state<F>(
    service: &str,
    target: ServiceState,
    poll: PollPolicy,
    mut query: F,
) -> Result<(), ServiceError>
where
    F: FnMut() -> Result<ServiceState, ServiceError>,
{
    for attempt in 1..=poll.attempts {
        let state = query()?;
        debug!("'{service}' is {state} (waiting for {target}, attempt {attempt})");
        if state == target {
            info!("'{service}' is {target}");
            return Ok(());
        }
        if state == ServiceState::NotInstalled {
            return Err(ServiceError::NotInstalled(service.to_string()));
        }
        if attempt < poll.attempts {
            thread::sleep(poll.interval);
        }
    }

    Err(ServiceError::Timeout {
        service: service.to_string(),
        target,
        waited: poll.timeout(),
    })
}
