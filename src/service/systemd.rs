//! systemd backend: a unit file under the descriptor directory, controlled with
//! `systemctl` and read back through the journal.
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::{
    collections::HashMap,
    fs,
    io::ErrorKind,
    path::PathBuf,
};
use tracing::{debug, info, warn};

use super::{
    FollowSource, LogLocation, ServiceManager, ServiceState, ServiceStatusSnapshot,
    require_elevated, wait_for_state,
};
use crate::{
    config::ManagerConfig,
    descriptor::{SystemdUnit, systemd_exec_args},
    error::ServiceError,
    host::{CommandOutput, LogStream, NativeHost, SystemHost},
    install::{InstallSpec, InstalledLimits, resolve_relay_program},
};

const SYSTEMCTL: &str = "systemctl";
const JOURNALCTL: &str = "journalctl";
const SHOW_PROPERTIES: &str = "--property=LoadState,ActiveState,MainPID,ExecMainStartTimestamp";

/// Manages the relay as a systemd unit.
#[derive(Debug)]
pub struct SystemdManager<H: SystemHost = NativeHost> {
    config: ManagerConfig,
    host: H,
}

/// Live state reported by `systemctl show`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct UnitStatus {
    state: ServiceState,
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
}

impl<H: SystemHost> SystemdManager<H> {
    /// Creates a manager for the unit named by `config`.
    pub fn new(config: ManagerConfig, host: H) -> Self {
        Self { config, host }
    }

    /// Path of the unit file.
    pub fn unit_path(&self) -> PathBuf {
        self.config
            .descriptor_dir
            .join(format!("{}.service", self.config.service_name))
    }

    fn systemctl(&self, args: &[&str]) -> Result<CommandOutput, ServiceError> {
        self.host
            .run(SYSTEMCTL, args)
            .map_err(|err| ServiceError::BackendUnavailable(format!("{SYSTEMCTL}: {err}")))
    }

    /// Runs a `systemctl` verb against the unit, failing on a non-zero exit.
    fn unit_command(&self, verb: &str) -> Result<(), ServiceError> {
        let output = self.systemctl(&[verb, &self.config.service_name])?;
        if output.success {
            Ok(())
        } else {
            Err(ServiceError::backend(
                format!("{verb} {}", self.config.service_name),
                output.failure_detail(),
            ))
        }
    }

    fn daemon_reload(&self) -> Result<(), ServiceError> {
        let output = self.systemctl(&["daemon-reload"])?;
        if output.success {
            Ok(())
        } else {
            Err(ServiceError::backend("reload systemd", output.failure_detail()))
        }
    }

    fn query(&self) -> Result<UnitStatus, ServiceError> {
        if !self.unit_path().exists() {
            return Ok(UnitStatus {
                state: ServiceState::NotInstalled,
                pid: None,
                started_at: None,
            });
        }

        let output = self.systemctl(&["show", &self.config.service_name, SHOW_PROPERTIES])?;
        if !output.success {
            debug!("systemctl show failed: {}", output.failure_detail());
            return Ok(UnitStatus {
                state: ServiceState::Unknown,
                pid: None,
                started_at: None,
            });
        }

        let props = parse_properties(&output.stdout);
        let state = map_state(
            props.get("LoadState").map(String::as_str),
            props.get("ActiveState").map(String::as_str),
        );
        let pid = props
            .get("MainPID")
            .and_then(|pid| pid.parse::<u32>().ok())
            .filter(|pid| *pid > 0);
        let started_at = props
            .get("ExecMainStartTimestamp")
            .and_then(|stamp| parse_start_timestamp(stamp));

        Ok(UnitStatus {
            state,
            pid,
            started_at,
        })
    }

    fn query_state(&self) -> Result<ServiceState, ServiceError> {
        Ok(self.query()?.state)
    }

    fn installed_limits(&self) -> InstalledLimits {
        fs::read_to_string(self.unit_path())
            .ok()
            .and_then(|unit| systemd_exec_args(&unit))
            .map(|args| InstalledLimits::from_args(&args))
            .unwrap_or_default()
    }
}

impl<H: SystemHost> ServiceManager for SystemdManager<H> {
    fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn install(&self, spec: &InstallSpec) -> Result<(), ServiceError> {
        require_elevated(&self.host, "install")?;
        let spec = spec.prepared()?;
        let program = resolve_relay_program(&self.config.relay_program)?;

        let unit_path = self.unit_path();
        if unit_path.exists() {
            return Err(ServiceError::AlreadyInstalled(self.config.service_name.clone()));
        }

        fs::create_dir_all(&spec.data_dir)?;
        fs::create_dir_all(&self.config.descriptor_dir)?;
        let unit = SystemdUnit::new(&self.config, &program, &spec);
        fs::write(&unit_path, unit.render())?;
        debug!("wrote unit file {}", unit_path.display());

        let registered = self
            .daemon_reload()
            .and_then(|_| self.unit_command("enable"));
        if let Err(err) = registered {
            if let Err(cleanup) = fs::remove_file(&unit_path) {
                warn!("Failed to remove {}: {cleanup}", unit_path.display());
            }
            return Err(err);
        }

        info!(
            "Installed '{}' ({} max clients, {:.1} Mbps)",
            self.config.service_name, spec.max_clients, spec.bandwidth_mbps
        );
        Ok(())
    }

    fn uninstall(&self) -> Result<(), ServiceError> {
        require_elevated(&self.host, "uninstall")?;
        let name = &self.config.service_name;
        let unit_path = self.unit_path();
        if !unit_path.exists() {
            return Err(ServiceError::NotInstalled(name.clone()));
        }

        match self.query_state() {
            Ok(ServiceState::Stopped) => {}
            Ok(_) => {
                if let Err(err) = self.unit_command("stop") {
                    warn!("Failed to stop '{name}' before uninstalling: {err}");
                }
            }
            Err(err) => warn!("Unable to query '{name}' before uninstalling: {err}"),
        }

        if let Err(err) = self.unit_command("disable") {
            warn!("Failed to disable '{name}': {err}");
        }

        match fs::remove_file(&unit_path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        if let Err(err) = self.daemon_reload() {
            warn!("{err}");
        }

        info!("Uninstalled '{name}'");
        Ok(())
    }

    fn start(&self) -> Result<(), ServiceError> {
        require_elevated(&self.host, "start")?;
        let name = &self.config.service_name;
        match self.query_state()? {
            ServiceState::NotInstalled => return Err(ServiceError::NotInstalled(name.clone())),
            ServiceState::Running => {
                info!("'{name}' is already running");
                return Ok(());
            }
            _ => {}
        }

        self.unit_command("start")?;
        wait_for_state(name, ServiceState::Running, self.config.poll, || {
            self.query_state()
        })
    }

    fn stop(&self) -> Result<(), ServiceError> {
        require_elevated(&self.host, "stop")?;
        let name = &self.config.service_name;
        match self.query_state()? {
            ServiceState::NotInstalled => return Err(ServiceError::NotInstalled(name.clone())),
            ServiceState::Stopped => {
                info!("'{name}' is already stopped");
                return Ok(());
            }
            _ => {}
        }

        self.unit_command("stop")?;
        wait_for_state(name, ServiceState::Stopped, self.config.poll, || {
            self.query_state()
        })
    }

    fn status(&self) -> Result<ServiceStatusSnapshot, ServiceError> {
        let status = self.query()?;
        Ok(ServiceStatusSnapshot {
            service: self.config.service_name.clone(),
            state: status.state,
            pid: status.pid,
            log: LogLocation::Journal(self.config.service_name.clone()),
            descriptor: Some(self.unit_path()),
        })
    }

    fn open_follow(&self) -> Result<FollowSource, ServiceError> {
        let name = &self.config.service_name;
        let status = self.query()?;
        match status.state {
            ServiceState::NotInstalled => return Err(ServiceError::NotInstalled(name.clone())),
            ServiceState::Running => {}
            state => {
                return Err(ServiceError::StreamUnavailable(format!(
                    "'{name}' is {state}, start it first"
                )));
            }
        }

        let started_at = status
            .pid
            .and_then(|pid| self.host.process_started_at(pid))
            .or(status.started_at);

        let stream = self
            .host
            .stream(JOURNALCTL, &["-u", name, "-f", "--no-pager", "-o", "cat"])
            .map_err(|err| ServiceError::StreamUnavailable(format!("{JOURNALCTL}: {err}")))?;

        Ok(FollowSource {
            stream,
            started_at,
            limits: self.installed_limits(),
        })
    }

    fn open_logs(&self) -> Result<LogStream, ServiceError> {
        let name = &self.config.service_name;
        if !self.unit_path().exists() {
            return Err(ServiceError::NotInstalled(name.clone()));
        }

        self.host
            .stream(JOURNALCTL, &["-u", name, "-f", "--no-pager"])
            .map_err(|err| ServiceError::StreamUnavailable(format!("{JOURNALCTL}: {err}")))
    }
}

/// Parses `Key=Value` lines printed by `systemctl show`.
fn parse_properties(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

fn map_state(load_state: Option<&str>, active_state: Option<&str>) -> ServiceState {
    if load_state == Some("not-found") {
        return ServiceState::NotInstalled;
    }

    match active_state {
        Some("active") | Some("reloading") => ServiceState::Running,
        Some("activating") => ServiceState::StartPending,
        Some("deactivating") => ServiceState::StopPending,
        Some("inactive") | Some("failed") => ServiceState::Stopped,
        _ => ServiceState::Unknown,
    }
}

/// Parses `ExecMainStartTimestamp`, either `@<unix seconds>` or the default
/// `Thu 2026-01-23 15:30:45 PST` form in local time.
fn parse_start_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() || value == "n/a" {
        return None;
    }

    if let Some(secs) = value.strip_prefix('@') {
        let secs = secs.split('.').next()?.parse::<i64>().ok()?;
        return DateTime::from_timestamp(secs, 0);
    }

    let mut fields = value.split_whitespace();
    let first = fields.next()?;
    let date = if first.contains('-') {
        first
    } else {
        fields.next()?
    };
    let time = fields.next()?;

    let naive =
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}
