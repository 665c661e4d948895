//! Command-line interface for relayctl.
use std::{path::PathBuf, str::FromStr};

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::{
    config::{ManagerConfig, Scope, Settings, load_settings},
    constants::{DEFAULT_BANDWIDTH_MBPS, DEFAULT_MAX_CLIENTS},
    error::ConfigError,
    install::InstallSpec,
};

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// Debug-level logging, used by `--verbose`.
    pub const DEBUG: LogLevelArg = LogLevelArg(LevelFilter::DEBUG);

    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for relayctl.
#[derive(Parser, Debug)]
#[command(name = "relayctl", version, author)]
#[command(
    about = "Run the Conduit relay as a native OS service and watch it live",
    long_about = None
)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Verbose relay output (recorded at install) and debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// YAML file overriding service names, paths, and polling.
    #[arg(long, value_name = "PATH", global = true)]
    pub settings: Option<PathBuf>,

    /// Relay program the service runs (defaults to `conduit` next to relayctl).
    #[arg(long, value_name = "PATH", global = true)]
    pub relay: Option<PathBuf>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for relayctl.
#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Install the relay as a system service (stopped until `start`).
    Install {
        /// Maximum concurrent clients (1-1000).
        #[arg(short, long, default_value_t = DEFAULT_MAX_CLIENTS)]
        max_clients: u32,

        /// Per-peer bandwidth limit in Mbps (1-40).
        #[arg(short, long, default_value_t = DEFAULT_BANDWIDTH_MBPS)]
        bandwidth: f64,

        /// Upstream network config handed to the relay.
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Stop the service and remove it from the system.
    Uninstall,

    /// Start the installed service.
    Start,

    /// Stop the running service.
    Stop,

    /// Show the service status.
    Status {
        /// Stream live statistics until interrupted.
        #[arg(short, long)]
        follow: bool,
    },

    /// Stream the service's raw log output.
    Logs,
}

impl Cli {
    /// Level requested on the command line, if any. `--log-level` wins over
    /// `--verbose`.
    pub fn log_level(&self) -> Option<LogLevelArg> {
        self.log_level
            .or_else(|| self.verbose.then_some(LogLevelArg::DEBUG))
    }

    /// Builds the one configuration used for this invocation.
    pub fn manager_config(&self, elevated: bool) -> Result<ManagerConfig, ConfigError> {
        let mut settings = match &self.settings {
            Some(path) => load_settings(path)?,
            None => Settings::default(),
        };
        if let Some(relay) = &self.relay {
            settings.relay_program = Some(relay.clone());
        }

        ManagerConfig::from_settings(settings, Scope::for_platform(elevated))
    }

    /// Install options for the `install` command.
    pub fn install_spec(&self, config: &ManagerConfig) -> Option<InstallSpec> {
        match &self.command {
            Commands::Install {
                max_clients,
                bandwidth,
                config: relay_config,
            } => Some(InstallSpec {
                max_clients: *max_clients,
                bandwidth_mbps: *bandwidth,
                relay_config: relay_config.clone(),
                verbose: self.verbose,
                data_dir: config.data_dir.clone(),
            }),
            _ => None,
        }
    }
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
