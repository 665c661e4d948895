//! Manager settings for relayctl.
//!
//! A [`ManagerConfig`] is built once per invocation from platform defaults, an
//! optional YAML settings file, and command-line overrides, then handed to the
//! service backend. Nothing here is global or mutable after construction.
use regex::Regex;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    constants::{
        DEFAULT_DESCRIPTION, DEFAULT_DISPLAY_NAME, DEFAULT_LAUNCHD_LABEL,
        DEFAULT_RELAY_PROGRAM, DEFAULT_SERVICE_NAME, STATE_POLL_ATTEMPTS,
        STATE_POLL_INTERVAL,
    },
    error::ConfigError,
};

/// Where the service descriptor, data, and logs live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Machine-wide service, requires root or Administrator.
    System,
    /// Per-user agent (launchd `LaunchAgents`).
    User,
}

impl Scope {
    /// Picks the scope for this platform. Only launchd distinguishes per-user
    /// agents; every other supervisor is system-wide.
    pub fn for_platform(elevated: bool) -> Self {
        if cfg!(target_os = "macos") && !elevated {
            Scope::User
        } else {
            Scope::System
        }
    }
}

/// Bounded polling used while a start/stop transition settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between state queries.
    pub interval: Duration,
    /// Number of queries before giving up.
    pub attempts: u32,
}

impl PollPolicy {
    /// Upper bound on the time spent waiting.
    pub fn timeout(&self) -> Duration {
        self.interval.saturating_mul(self.attempts)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: STATE_POLL_INTERVAL,
            attempts: STATE_POLL_ATTEMPTS,
        }
    }
}

/// Optional overrides read from a YAML settings file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Service name registered with the supervisor.
    pub service_name: Option<String>,
    /// Display name (Windows service console).
    pub display_name: Option<String>,
    /// Descriptor description.
    pub description: Option<String>,
    /// launchd job label.
    pub launchd_label: Option<String>,
    /// Relay program the service runs.
    pub relay_program: Option<PathBuf>,
    /// Relay data directory.
    pub data_dir: Option<PathBuf>,
    /// Relay log file (launchd and Windows; systemd logs to the journal).
    pub log_path: Option<PathBuf>,
    /// Directory holding the native descriptor file.
    pub descriptor_dir: Option<PathBuf>,
    /// Seconds between state queries during start/stop.
    pub poll_interval_secs: Option<u64>,
    /// Number of state queries during start/stop.
    pub poll_attempts: Option<u32>,
}

/// Fully resolved configuration handed to a service backend.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Service name registered with the supervisor.
    pub service_name: String,
    /// Display name (Windows service console).
    pub display_name: String,
    /// Descriptor description.
    pub description: String,
    /// launchd job label.
    pub launchd_label: String,
    /// Relay program the service runs.
    pub relay_program: PathBuf,
    /// Relay data directory; the only writable path in hardened descriptors.
    pub data_dir: PathBuf,
    /// Relay log file for supervisors without a journal.
    pub log_path: PathBuf,
    /// Directory holding the native descriptor file.
    pub descriptor_dir: PathBuf,
    /// System-wide or per-user installation.
    pub scope: Scope,
    /// Polling bound for start/stop transitions.
    pub poll: PollPolicy,
}

impl ManagerConfig {
    /// Resolves platform defaults for `scope`, then applies `settings`.
    pub fn from_settings(settings: Settings, scope: Scope) -> Result<Self, ConfigError> {
        let service_name = settings
            .service_name
            .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());
        let defaults = PlatformPaths::resolve(&service_name, scope)?;

        let mut poll = PollPolicy::default();
        if let Some(secs) = settings.poll_interval_secs {
            poll.interval = Duration::from_secs(secs);
        }
        if let Some(attempts) = settings.poll_attempts {
            poll.attempts = attempts.max(1);
        }

        Ok(Self {
            display_name: settings
                .display_name
                .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string()),
            description: settings
                .description
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            launchd_label: settings
                .launchd_label
                .unwrap_or_else(|| DEFAULT_LAUNCHD_LABEL.to_string()),
            relay_program: settings.relay_program.unwrap_or_else(default_relay_program),
            data_dir: settings.data_dir.unwrap_or(defaults.data_dir),
            log_path: settings.log_path.unwrap_or(defaults.log_path),
            descriptor_dir: settings.descriptor_dir.unwrap_or(defaults.descriptor_dir),
            service_name,
            scope,
            poll,
        })
    }
}

struct PlatformPaths {
    data_dir: PathBuf,
    log_path: PathBuf,
    descriptor_dir: PathBuf,
}

impl PlatformPaths {
    #[cfg(target_os = "macos")]
    fn resolve(name: &str, scope: Scope) -> Result<Self, ConfigError> {
        match scope {
            Scope::System => Ok(Self {
                data_dir: PathBuf::from(format!("/var/lib/{name}")),
                log_path: PathBuf::from(format!("/var/log/{name}.log")),
                descriptor_dir: PathBuf::from("/Library/LaunchDaemons"),
            }),
            Scope::User => {
                let home = env::var_os("HOME")
                    .filter(|home| !home.is_empty())
                    .map(PathBuf::from)
                    .ok_or(ConfigError::NoHomeDirectory)?;
                Ok(Self {
                    data_dir: home.join(format!(".{name}")),
                    log_path: home.join("Library/Logs").join(format!("{name}.log")),
                    descriptor_dir: home.join("Library/LaunchAgents"),
                })
            }
        }
    }

    #[cfg(windows)]
    fn resolve(name: &str, _scope: Scope) -> Result<Self, ConfigError> {
        let program_data = env::var_os("ProgramData")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"));
        let data_dir = program_data.join(name);
        Ok(Self {
            log_path: data_dir.join(format!("{name}.log")),
            descriptor_dir: data_dir.clone(),
            data_dir,
        })
    }

    #[cfg(not(any(target_os = "macos", windows)))]
    fn resolve(name: &str, _scope: Scope) -> Result<Self, ConfigError> {
        let data_dir = PathBuf::from(format!("/var/lib/{name}"));
        Ok(Self {
            log_path: data_dir.join(format!("{name}.log")),
            descriptor_dir: PathBuf::from("/etc/systemd/system"),
            data_dir,
        })
    }
}

fn default_relay_program() -> PathBuf {
    let file_name = format!("{DEFAULT_RELAY_PROGRAM}{}", env::consts::EXE_SUFFIX);
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&file_name)))
        .unwrap_or_else(|| PathBuf::from(file_name))
}

/// Expands `${VAR}` and `$VAR` references within a string.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?")
        .map_err(|err| ConfigError::MissingVariable(err.to_string()))?;

    let mut missing = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| {
            missing.get_or_insert_with(|| var_name.to_string());
            String::new()
        })
    });

    match missing {
        Some(var_name) => Err(ConfigError::MissingVariable(var_name)),
        None => Ok(result.into_owned()),
    }
}

/// Loads and parses a settings file, expanding environment variables.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    let expanded = expand_env_vars(&content)?;
    if expanded.trim().is_empty() {
        return Ok(Settings::default());
    }

    Ok(serde_yaml::from_str(&expanded)?)
}
