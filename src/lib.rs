//! relayctl installs the Conduit relay as a native OS service (systemd, launchd,
//! or the Windows service control manager), drives its start/stop lifecycle,
//! and renders live statistics parsed from the relay's log stream.

/// CLI interface.
pub mod cli;

/// Manager settings.
pub mod config;

/// Shared names, timings, and log markers.
pub mod constants;

/// Native descriptor rendering.
pub mod descriptor;

/// Error handling.
pub mod error;

/// Command execution, log streams, and process queries.
pub mod host;

/// Install options.
pub mod install;

/// Raw log streaming.
pub mod logs;

/// Service lifecycle backends.
pub mod service;

/// Live statistics.
pub mod telemetry;
