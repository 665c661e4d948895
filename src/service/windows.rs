//! Windows backend: a service registered with the service control manager,
//! with escalating recovery actions and an Application event-log source.
use chrono::{DateTime, Utc};
use std::ffi::{OsStr, OsString};
use tracing::{debug, info, warn};
use windows_service::{
    Error as WinServiceError,
    service::{
        Service, ServiceAccess, ServiceAction, ServiceActionType, ServiceErrorControl,
        ServiceFailureActions, ServiceFailureResetPeriod, ServiceInfo, ServiceStartType,
        ServiceState as ScmState, ServiceType,
    },
    service_manager::{ServiceManager as Scm, ServiceManagerAccess},
};

use super::{
    FollowSource, LogLocation, ServiceManager, ServiceState, ServiceStatusSnapshot,
    require_elevated, wait_for_state,
};
use crate::{
    config::ManagerConfig,
    constants::{EVENT_LOG_BACKLOG, LOG_BACKLOG_LINES},
    descriptor::ScmRegistration,
    error::ServiceError,
    host::{LogStream, NativeHost, SystemHost},
    install::{InstallSpec, InstalledLimits, resolve_relay_program},
};

const ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;
const ERROR_SERVICE_NOT_ACTIVE: i32 = 1062;
const EVENT_LOG_KEY: &str = r"HKLM\SYSTEM\CurrentControlSet\Services\EventLog\Application";

/// Manages the relay as a Windows service.
#[derive(Debug)]
pub struct ScmManager<H: SystemHost = NativeHost> {
    config: ManagerConfig,
    host: H,
}

fn os_error_code(err: &WinServiceError) -> Option<i32> {
    match err {
        WinServiceError::Winapi(io) => io.raw_os_error(),
        _ => None,
    }
}

fn map_state(state: ScmState) -> ServiceState {
    match state {
        ScmState::Running => ServiceState::Running,
        ScmState::Stopped | ScmState::Paused => ServiceState::Stopped,
        ScmState::StartPending | ScmState::ContinuePending => ServiceState::StartPending,
        ScmState::StopPending | ScmState::PausePending => ServiceState::StopPending,
    }
}

impl<H: SystemHost> ScmManager<H> {
    /// Creates a manager for the service named by `config`.
    pub fn new(config: ManagerConfig, host: H) -> Self {
        Self { config, host }
    }

    fn connect(&self, access: ServiceManagerAccess) -> Result<Scm, ServiceError> {
        Scm::local_computer(None::<&str>, access).map_err(|err| {
            ServiceError::BackendUnavailable(format!("service control manager: {err}"))
        })
    }

    /// Opens the service, mapping "does not exist" to `None`.
    fn open(&self, access: ServiceAccess) -> Result<Option<Service>, ServiceError> {
        let scm = self.connect(ServiceManagerAccess::CONNECT)?;
        match scm.open_service(&self.config.service_name, access) {
            Ok(service) => Ok(Some(service)),
            Err(err) if os_error_code(&err) == Some(ERROR_SERVICE_DOES_NOT_EXIST) => Ok(None),
            Err(err) => Err(ServiceError::backend(
                format!("open service '{}'", self.config.service_name),
                err,
            )),
        }
    }

    fn open_installed(&self, access: ServiceAccess) -> Result<Service, ServiceError> {
        self.open(access)?
            .ok_or_else(|| ServiceError::NotInstalled(self.config.service_name.clone()))
    }

    fn query(&self) -> Result<(ServiceState, Option<u32>), ServiceError> {
        let Some(service) = self.open(ServiceAccess::QUERY_STATUS)? else {
            return Ok((ServiceState::NotInstalled, None));
        };

        match service.query_status() {
            Ok(status) => {
                let state = map_state(status.current_state);
                let pid = status.process_id.filter(|pid| *pid > 0);
                Ok((state, pid))
            }
            Err(err) => {
                debug!("query_status failed: {err}");
                Ok((ServiceState::Unknown, None))
            }
        }
    }

    fn query_state(&self) -> Result<ServiceState, ServiceError> {
        Ok(self.query()?.0)
    }

    fn powershell(&self, script: &str) -> Result<LogStream, ServiceError> {
        self.host
            .stream("powershell", &["-NoProfile", "-Command", script])
            .map_err(|err| ServiceError::StreamUnavailable(format!("powershell: {err}")))
    }

    fn tail_log_file(&self) -> Result<LogStream, ServiceError> {
        let script = format!(
            "Get-Content -Path '{}' -Wait -Tail {LOG_BACKLOG_LINES}",
            self.config.log_path.display()
        );
        self.powershell(&script)
    }

    fn process_started_at(&self, pid: u32) -> Option<DateTime<Utc>> {
        if let Some(started) = self.host.process_started_at(pid) {
            return Some(started);
        }

        let script = format!("(Get-Process -Id {pid}).StartTime.ToString('o')");
        let output = self
            .host
            .run("powershell", &["-NoProfile", "-Command", &script])
            .ok()?;
        if !output.success {
            return None;
        }
        DateTime::parse_from_rfc3339(output.stdout.trim())
            .ok()
            .map(|started| started.with_timezone(&Utc))
    }

    fn installed_limits(&self) -> InstalledLimits {
        let Ok(Some(service)) = self.open(ServiceAccess::QUERY_CONFIG) else {
            return InstalledLimits::default();
        };
        match service.query_config() {
            Ok(config) => {
                let command_line = config.executable_path.to_string_lossy().into_owned();
                let args: Vec<&str> = command_line.split_whitespace().collect();
                InstalledLimits::from_args(&args)
            }
            Err(err) => {
                debug!("query_config failed: {err}");
                InstalledLimits::default()
            }
        }
    }

    fn register_event_source(&self) {
        let key = format!(r"{EVENT_LOG_KEY}\{}", self.config.service_name);
        let entries: [(&str, &str, &str); 3] = [
            (
                "EventMessageFile",
                "REG_EXPAND_SZ",
                r"%SystemRoot%\System32\EventCreate.exe",
            ),
            ("TypesSupported", "REG_DWORD", "7"),
            ("CustomSource", "REG_DWORD", "1"),
        ];

        for (value, kind, data) in entries {
            let result = self
                .host
                .run("reg", &["add", &key, "/v", value, "/t", kind, "/d", data, "/f"]);
            match result {
                Ok(output) if output.success => {}
                Ok(output) => {
                    warn!("Failed to register event log source: {}", output.failure_detail());
                    return;
                }
                Err(err) => {
                    warn!("Failed to register event log source: {err}");
                    return;
                }
            }
        }
    }

    fn remove_event_source(&self) {
        let key = format!(r"{EVENT_LOG_KEY}\{}", self.config.service_name);
        match self.host.run("reg", &["delete", &key, "/f"]) {
            Ok(output) if output.success => {}
            Ok(output) => warn!("Failed to remove event log source: {}", output.failure_detail()),
            Err(err) => warn!("Failed to remove event log source: {err}"),
        }
    }
}

impl<H: SystemHost> ServiceManager for ScmManager<H> {
    fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn install(&self, spec: &InstallSpec) -> Result<(), ServiceError> {
        require_elevated(&self.host, "install")?;
        let spec = spec.prepared()?;
        let program = resolve_relay_program(&self.config.relay_program)?;
        let name = &self.config.service_name;

        if self.open(ServiceAccess::QUERY_STATUS)?.is_some() {
            return Err(ServiceError::AlreadyInstalled(name.clone()));
        }

        std::fs::create_dir_all(&spec.data_dir)?;
        if let Some(log_dir) = self.config.log_path.parent() {
            std::fs::create_dir_all(log_dir)?;
        }

        let registration = ScmRegistration::new(&self.config, &program, &spec);
        let info = ServiceInfo {
            name: OsString::from(&registration.name),
            display_name: OsString::from(&registration.display_name),
            service_type: ServiceType::OWN_PROCESS,
            start_type: ServiceStartType::AutoStart,
            error_control: ServiceErrorControl::Normal,
            executable_path: registration.executable.clone(),
            launch_arguments: registration.arguments.iter().map(OsString::from).collect(),
            dependencies: vec![],
            account_name: None,
            account_password: None,
        };

        let scm =
            self.connect(ServiceManagerAccess::CONNECT | ServiceManagerAccess::CREATE_SERVICE)?;
        let service = scm
            .create_service(&info, ServiceAccess::CHANGE_CONFIG | ServiceAccess::QUERY_STATUS)
            .map_err(|err| ServiceError::backend(format!("create service '{name}'"), err))?;

        if let Err(err) = service.set_description(&registration.description) {
            warn!("Failed to set service description: {err}");
        }

        let actions = registration
            .recovery_delays
            .iter()
            .map(|delay| ServiceAction {
                action_type: ServiceActionType::Restart,
                delay: *delay,
            })
            .collect();
        let failure_actions = ServiceFailureActions {
            reset_period: ServiceFailureResetPeriod::After(registration.reset_period),
            reboot_msg: None,
            command: None,
            actions: Some(actions),
        };
        if let Err(err) = service.update_failure_actions(failure_actions) {
            warn!("Failed to set recovery actions: {err}");
        }

        self.register_event_source();

        info!(
            "Installed '{name}' ({} max clients, {:.1} Mbps)",
            spec.max_clients, spec.bandwidth_mbps
        );
        Ok(())
    }

    fn uninstall(&self) -> Result<(), ServiceError> {
        require_elevated(&self.host, "uninstall")?;
        let name = &self.config.service_name;
        let service = self.open_installed(
            ServiceAccess::QUERY_STATUS | ServiceAccess::STOP | ServiceAccess::DELETE,
        )?;

        let running = service
            .query_status()
            .map(|status| status.current_state != ScmState::Stopped)
            .unwrap_or(false);
        if running {
            match service.stop() {
                Ok(_) => {
                    let stopped = wait_for_state(name, ServiceState::Stopped, self.config.poll, || {
                        self.query_state()
                    });
                    if let Err(err) = stopped {
                        warn!("'{name}' did not stop cleanly before uninstalling: {err}");
                    }
                }
                Err(err) if os_error_code(&err) == Some(ERROR_SERVICE_NOT_ACTIVE) => {}
                Err(err) => warn!("Failed to stop '{name}' before uninstalling: {err}"),
            }
        }

        service
            .delete()
            .map_err(|err| ServiceError::backend(format!("delete service '{name}'"), err))?;
        drop(service);

        self.remove_event_source();
        info!("Uninstalled '{name}'");
        Ok(())
    }

    fn start(&self) -> Result<(), ServiceError> {
        require_elevated(&self.host, "start")?;
        let name = &self.config.service_name;
        let service = self.open_installed(ServiceAccess::QUERY_STATUS | ServiceAccess::START)?;
        if self.query_state()? == ServiceState::Running {
            info!("'{name}' is already running");
            return Ok(());
        }

        service
            .start(&[] as &[&OsStr])
            .map_err(|err| ServiceError::backend(format!("start service '{name}'"), err))?;
        wait_for_state(name, ServiceState::Running, self.config.poll, || {
            self.query_state()
        })
    }

    fn stop(&self) -> Result<(), ServiceError> {
        require_elevated(&self.host, "stop")?;
        let name = &self.config.service_name;
        let service = self.open_installed(ServiceAccess::QUERY_STATUS | ServiceAccess::STOP)?;
        if self.query_state()? == ServiceState::Stopped {
            info!("'{name}' is already stopped");
            return Ok(());
        }

        match service.stop() {
            Ok(_) => {}
            Err(err) if os_error_code(&err) == Some(ERROR_SERVICE_NOT_ACTIVE) => {}
            Err(err) => {
                return Err(ServiceError::backend(format!("stop service '{name}'"), err));
            }
        }
        wait_for_state(name, ServiceState::Stopped, self.config.poll, || {
            self.query_state()
        })
    }

    fn status(&self) -> Result<ServiceStatusSnapshot, ServiceError> {
        let (state, pid) = self.query()?;
        Ok(ServiceStatusSnapshot {
            service: self.config.service_name.clone(),
            state,
            pid,
            log: LogLocation::File(self.config.log_path.clone()),
            descriptor: None,
        })
    }

    fn open_follow(&self) -> Result<FollowSource, ServiceError> {
        let (state, pid) = self.query()?;
        if state == ServiceState::NotInstalled {
            return Err(ServiceError::NotInstalled(self.config.service_name.clone()));
        }
        if !self.config.log_path.exists() {
            return Err(ServiceError::StreamUnavailable(format!(
                "log file {} not found; is the service running?",
                self.config.log_path.display()
            )));
        }

        let started_at = pid.and_then(|pid| self.process_started_at(pid));
        Ok(FollowSource {
            stream: self.tail_log_file()?,
            started_at,
            limits: self.installed_limits(),
        })
    }

    fn open_logs(&self) -> Result<LogStream, ServiceError> {
        if self.config.log_path.exists() {
            return self.tail_log_file();
        }

        warn!(
            "Log file {} not found; showing recent event log entries",
            self.config.log_path.display()
        );
        let script = format!(
            "Get-EventLog -LogName Application -Source '{}' -Newest {EVENT_LOG_BACKLOG} | Format-Table -AutoSize",
            self.config.service_name
        );
        self.powershell(&script)
    }
}
