//! Install options and the relay command line derived from them.
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    constants::{
        BANDWIDTH_FLAG, BANDWIDTH_RANGE_MBPS, DATA_DIR_FLAG, DEFAULT_BANDWIDTH_MBPS,
        DEFAULT_MAX_CLIENTS, MAX_CLIENTS_FLAG, MAX_CLIENTS_RANGE, RELAY_CONFIG_FLAG,
        RELAY_RUN_SUBCOMMAND, VERBOSE_FLAG,
    },
    error::ServiceError,
};

/// Everything the native descriptor encodes about how the relay runs.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallSpec {
    /// Maximum number of concurrent relay clients.
    pub max_clients: u32,
    /// Per-peer bandwidth cap in Mbps.
    pub bandwidth_mbps: f64,
    /// Upstream network configuration handed to the relay.
    pub relay_config: Option<PathBuf>,
    /// Whether the relay logs verbosely.
    pub verbose: bool,
    /// Directory the relay keeps its keys and state in.
    pub data_dir: PathBuf,
}

impl InstallSpec {
    /// Default options writing state into `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            max_clients: DEFAULT_MAX_CLIENTS,
            bandwidth_mbps: DEFAULT_BANDWIDTH_MBPS,
            relay_config: None,
            verbose: false,
            data_dir: data_dir.into(),
        }
    }

    /// Validates ranges and resolves the relay config to an absolute path.
    ///
    /// Runs before any side effect of an install, so a rejected spec leaves the
    /// system untouched.
    pub fn prepared(&self) -> Result<Self, ServiceError> {
        if !MAX_CLIENTS_RANGE.contains(&self.max_clients) {
            return Err(ServiceError::InvalidSpec(format!(
                "max clients must be between {} and {}, got {}",
                MAX_CLIENTS_RANGE.start(),
                MAX_CLIENTS_RANGE.end(),
                self.max_clients
            )));
        }

        if !BANDWIDTH_RANGE_MBPS.contains(&self.bandwidth_mbps) {
            return Err(ServiceError::InvalidSpec(format!(
                "bandwidth must be between {} and {} Mbps, got {}",
                BANDWIDTH_RANGE_MBPS.start(),
                BANDWIDTH_RANGE_MBPS.end(),
                self.bandwidth_mbps
            )));
        }

        let relay_config = match &self.relay_config {
            Some(path) => Some(fs::canonicalize(path).map_err(|err| {
                ServiceError::InvalidSpec(format!(
                    "relay config {} is not readable: {err}",
                    path.display()
                ))
            })?),
            None => None,
        };

        let data_dir = if self.data_dir.is_absolute() {
            self.data_dir.clone()
        } else {
            std::path::absolute(&self.data_dir)?
        };

        Ok(Self {
            relay_config,
            data_dir,
            ..self.clone()
        })
    }

    /// Arguments passed to the relay program, subcommand first.
    pub fn relay_args(&self) -> Vec<String> {
        let mut args = vec![RELAY_RUN_SUBCOMMAND.to_string()];
        if let Some(config) = &self.relay_config {
            args.push(RELAY_CONFIG_FLAG.to_string());
            args.push(config.display().to_string());
        }
        args.push(MAX_CLIENTS_FLAG.to_string());
        args.push(self.max_clients.to_string());
        args.push(BANDWIDTH_FLAG.to_string());
        args.push(format!("{:.1}", self.bandwidth_mbps));
        if self.verbose {
            args.push(VERBOSE_FLAG.to_string());
        }
        args.push(DATA_DIR_FLAG.to_string());
        args.push(self.data_dir.display().to_string());
        args
    }
}

/// Resolves the relay program to an absolute path that exists.
pub fn resolve_relay_program(program: &Path) -> Result<PathBuf, ServiceError> {
    fs::canonicalize(program).map_err(|err| {
        ServiceError::InvalidSpec(format!(
            "relay program {} not found: {err}",
            program.display()
        ))
    })
}

/// Relay limits recovered from an installed descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledLimits {
    /// Maximum number of clients, as written in the descriptor.
    pub max_clients: String,
    /// Bandwidth cap in Mbps, as written in the descriptor.
    pub bandwidth_mbps: String,
}

impl Default for InstalledLimits {
    fn default() -> Self {
        Self {
            max_clients: DEFAULT_MAX_CLIENTS.to_string(),
            bandwidth_mbps: format!("{DEFAULT_BANDWIDTH_MBPS}"),
        }
    }
}

impl InstalledLimits {
    /// Picks the limit flags out of a relay argument vector.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Self {
        let mut limits = Self::default();
        let mut iter = args.iter().map(AsRef::as_ref);
        while let Some(arg) = iter.next() {
            let slot = match arg {
                MAX_CLIENTS_FLAG => &mut limits.max_clients,
                BANDWIDTH_FLAG => &mut limits.bandwidth_mbps,
                _ => continue,
            };
            if let Some(value) = iter.next() {
                *slot = value.to_string();
            }
        }
        limits
    }
}
