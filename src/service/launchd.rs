//! launchd backend: a property list in `LaunchDaemons` (system scope) or
//! `LaunchAgents` (user scope), controlled with `launchctl`.
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::{
    fs,
    io::ErrorKind,
    path::PathBuf,
    sync::OnceLock,
};
use tracing::{debug, info, warn};

use super::{
    FollowSource, LogLocation, ServiceManager, ServiceState, ServiceStatusSnapshot,
    require_elevated, wait_for_state,
};
use crate::{
    config::{ManagerConfig, Scope},
    constants::LOG_BACKLOG_LINES,
    descriptor::{LaunchdPlist, launchd_program_arguments},
    error::ServiceError,
    host::{CommandOutput, LogStream, NativeHost, SystemHost},
    install::{InstallSpec, InstalledLimits, resolve_relay_program},
};

const LAUNCHCTL: &str = "launchctl";

fn pid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#""PID"\s*=\s*(\d+);"#).expect("valid PID pattern"))
}

/// Manages the relay as a launchd job.
#[derive(Debug)]
pub struct LaunchdManager<H: SystemHost = NativeHost> {
    config: ManagerConfig,
    host: H,
}

impl<H: SystemHost> LaunchdManager<H> {
    /// Creates a manager for the job labelled by `config`.
    pub fn new(config: ManagerConfig, host: H) -> Self {
        Self { config, host }
    }

    /// Path of the property list.
    pub fn plist_path(&self) -> PathBuf {
        self.config
            .descriptor_dir
            .join(format!("{}.plist", self.config.launchd_label))
    }

    /// Only system-wide daemons need root; user agents live in the home directory.
    fn require_scope_privileges(&self, operation: &'static str) -> Result<(), ServiceError> {
        match self.config.scope {
            Scope::System => require_elevated(&self.host, operation),
            Scope::User => Ok(()),
        }
    }

    fn launchctl(&self, args: &[&str]) -> Result<CommandOutput, ServiceError> {
        self.host
            .run(LAUNCHCTL, args)
            .map_err(|err| ServiceError::BackendUnavailable(format!("{LAUNCHCTL}: {err}")))
    }

    fn plist_command(&self, verb: &str) -> Result<(), ServiceError> {
        let plist = self.plist_path();
        let plist = plist.display().to_string();
        let output = self.launchctl(&[verb, &plist])?;
        if output.success {
            Ok(())
        } else {
            Err(ServiceError::backend(
                format!("{verb} {}", self.config.launchd_label),
                output.failure_detail(),
            ))
        }
    }

    fn query(&self) -> Result<(ServiceState, Option<u32>), ServiceError> {
        if !self.plist_path().exists() {
            return Ok((ServiceState::NotInstalled, None));
        }

        let output = self.launchctl(&["list", &self.config.launchd_label])?;
        if !output.success {
            return Ok((ServiceState::Stopped, None));
        }

        match parse_list_pid(&output.stdout) {
            Some(pid) => Ok((ServiceState::Running, Some(pid))),
            None => Ok((ServiceState::StartPending, None)),
        }
    }

    fn query_state(&self) -> Result<ServiceState, ServiceError> {
        Ok(self.query()?.0)
    }

    fn process_started_at(&self, pid: u32) -> Option<DateTime<Utc>> {
        if let Some(started) = self.host.process_started_at(pid) {
            return Some(started);
        }

        let pid = pid.to_string();
        let output = self.host.run("ps", &["-p", &pid, "-o", "lstart="]).ok()?;
        if !output.success {
            return None;
        }
        parse_lstart(&output.stdout)
    }

    fn installed_limits(&self) -> InstalledLimits {
        fs::read_to_string(self.plist_path())
            .ok()
            .and_then(|plist| launchd_program_arguments(&plist))
            .map(|args| InstalledLimits::from_args(&args))
            .unwrap_or_default()
    }

    fn require_log_file(&self) -> Result<String, ServiceError> {
        let log_path = &self.config.log_path;
        if !log_path.exists() {
            return Err(ServiceError::StreamUnavailable(format!(
                "log file {} not found; is the service running?",
                log_path.display()
            )));
        }
        Ok(log_path.display().to_string())
    }
}

impl<H: SystemHost> ServiceManager for LaunchdManager<H> {
    fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn install(&self, spec: &InstallSpec) -> Result<(), ServiceError> {
        self.require_scope_privileges("install")?;
        let spec = spec.prepared()?;
        let program = resolve_relay_program(&self.config.relay_program)?;

        let plist_path = self.plist_path();
        if plist_path.exists() {
            return Err(ServiceError::AlreadyInstalled(self.config.launchd_label.clone()));
        }

        let plist = LaunchdPlist::new(&self.config, &program, &spec).render()?;
        fs::create_dir_all(&spec.data_dir)?;
        if let Some(log_dir) = self.config.log_path.parent() {
            fs::create_dir_all(log_dir)?;
        }
        fs::create_dir_all(&self.config.descriptor_dir)?;
        fs::write(&plist_path, plist)?;

        info!(
            "Installed '{}' at {} ({} max clients, {:.1} Mbps)",
            self.config.launchd_label,
            plist_path.display(),
            spec.max_clients,
            spec.bandwidth_mbps
        );
        Ok(())
    }

    fn uninstall(&self) -> Result<(), ServiceError> {
        self.require_scope_privileges("uninstall")?;
        let label = &self.config.launchd_label;
        let plist_path = self.plist_path();
        if !plist_path.exists() {
            return Err(ServiceError::NotInstalled(label.clone()));
        }

        match self.query_state() {
            Ok(ServiceState::Stopped) => {}
            Ok(_) => {
                if let Err(err) = self.plist_command("unload") {
                    warn!("Failed to unload '{label}' before uninstalling: {err}");
                }
            }
            Err(err) => warn!("Unable to query '{label}' before uninstalling: {err}"),
        }

        match fs::remove_file(&plist_path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        info!("Uninstalled '{label}'");
        Ok(())
    }

    fn start(&self) -> Result<(), ServiceError> {
        self.require_scope_privileges("start")?;
        let label = &self.config.launchd_label;
        match self.query_state()? {
            ServiceState::NotInstalled => return Err(ServiceError::NotInstalled(label.clone())),
            ServiceState::Running => {
                info!("'{label}' is already running");
                return Ok(());
            }
            _ => {}
        }

        self.plist_command("load")?;
        wait_for_state(label, ServiceState::Running, self.config.poll, || {
            self.query_state()
        })
    }

    fn stop(&self) -> Result<(), ServiceError> {
        self.require_scope_privileges("stop")?;
        let label = &self.config.launchd_label;
        match self.query_state()? {
            ServiceState::NotInstalled => return Err(ServiceError::NotInstalled(label.clone())),
            ServiceState::Stopped => {
                info!("'{label}' is already stopped");
                return Ok(());
            }
            _ => {}
        }

        self.plist_command("unload")?;
        wait_for_state(label, ServiceState::Stopped, self.config.poll, || {
            self.query_state()
        })
    }

    fn status(&self) -> Result<ServiceStatusSnapshot, ServiceError> {
        let (state, pid) = self.query()?;
        Ok(ServiceStatusSnapshot {
            service: self.config.launchd_label.clone(),
            state,
            pid,
            log: LogLocation::File(self.config.log_path.clone()),
            descriptor: Some(self.plist_path()),
        })
    }

    fn open_follow(&self) -> Result<FollowSource, ServiceError> {
        let (state, pid) = self.query()?;
        if state == ServiceState::NotInstalled {
            return Err(ServiceError::NotInstalled(self.config.launchd_label.clone()));
        }
        let log_path = self.require_log_file()?;

        let started_at = pid.and_then(|pid| self.process_started_at(pid));
        debug!("'{}' started at {started_at:?}", self.config.launchd_label);

        let stream = self
            .host
            .stream("tail", &["-F", &log_path])
            .map_err(|err| ServiceError::StreamUnavailable(format!("tail: {err}")))?;

        Ok(FollowSource {
            stream,
            started_at,
            limits: self.installed_limits(),
        })
    }

    fn open_logs(&self) -> Result<LogStream, ServiceError> {
        let log_path = self.require_log_file()?;
        let backlog = LOG_BACKLOG_LINES.to_string();
        self.host
            .stream("tail", &["-n", &backlog, "-F", &log_path])
            .map_err(|err| ServiceError::StreamUnavailable(format!("tail: {err}")))
    }
}

/// Extracts the running PID from `launchctl list <label>` output.
fn parse_list_pid(output: &str) -> Option<u32> {
    pid_pattern()
        .captures(output)
        .and_then(|caps| caps[1].parse::<u32>().ok())
        .filter(|pid| *pid > 0)
}

/// Parses `ps -o lstart=` output such as `Fri Jan 23 15:30:45 2026` (local time).
fn parse_lstart(value: &str) -> Option<DateTime<Utc>> {
    let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
    let naive = NaiveDateTime::parse_from_str(&normalized, "%a %b %d %H:%M:%S %Y").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}
