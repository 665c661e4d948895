//! Constants and default values for the relay service manager.
//!
//! This module centralizes the names, timings, and wire markers shared by the
//! lifecycle backends and the telemetry monitor.

use std::time::Duration;

// ============================================================================
// Service Identity
// ============================================================================

/// Default service name registered with the platform supervisor.
pub const DEFAULT_SERVICE_NAME: &str = "conduit";

/// Default human-readable name shown by service consoles.
pub const DEFAULT_DISPLAY_NAME: &str = "Conduit Relay";

/// Default description embedded in every native descriptor.
pub const DEFAULT_DESCRIPTION: &str =
    "Conduit relay service - relays traffic for users in censored regions";

/// Default launchd job label.
pub const DEFAULT_LAUNCHD_LABEL: &str = "org.relayctl.conduit";

/// File stem of the relay program looked up next to the manager executable.
pub const DEFAULT_RELAY_PROGRAM: &str = "conduit";

/// Subcommand the relay program runs in the foreground.
pub const RELAY_RUN_SUBCOMMAND: &str = "start";

// ============================================================================
// Relay Command Line
// ============================================================================

/// Relay flag carrying the upstream network configuration path.
pub const RELAY_CONFIG_FLAG: &str = "--psiphon-config";

/// Relay flag carrying the maximum number of concurrent clients.
pub const MAX_CLIENTS_FLAG: &str = "--max-clients";

/// Relay flag carrying the per-peer bandwidth cap in Mbps.
pub const BANDWIDTH_FLAG: &str = "--bandwidth";

/// Relay flag enabling verbose output.
pub const VERBOSE_FLAG: &str = "--verbose";

/// Relay flag carrying the data directory.
pub const DATA_DIR_FLAG: &str = "--data-dir";

/// Default maximum number of relay clients.
pub const DEFAULT_MAX_CLIENTS: u32 = 200;

/// Accepted range for the maximum number of relay clients.
pub const MAX_CLIENTS_RANGE: std::ops::RangeInclusive<u32> = 1..=1000;

/// Default per-peer bandwidth cap in Mbps.
pub const DEFAULT_BANDWIDTH_MBPS: f64 = 5.0;

/// Accepted range for the per-peer bandwidth cap in Mbps.
pub const BANDWIDTH_RANGE_MBPS: std::ops::RangeInclusive<f64> = 1.0..=40.0;

// ============================================================================
// Lifecycle Timing
// ============================================================================

/// Interval between state queries while waiting for a transition to settle.
pub const STATE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Number of state queries before a start/stop transition times out.
pub const STATE_POLL_ATTEMPTS: u32 = 30;

/// Fixed restart delay written into systemd units.
pub const SYSTEMD_RESTART_SEC: u64 = 10;

/// Minimum seconds between launchd respawns of a crashing job.
pub const LAUNCHD_THROTTLE_INTERVAL: u64 = 10;

/// Escalating restart delays registered as Windows recovery actions.
pub const RECOVERY_DELAYS: [Duration; 3] = [
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

/// Window after which the Windows failure counter resets.
pub const RECOVERY_RESET_PERIOD: Duration = Duration::from_secs(3600);

// ============================================================================
// Telemetry
// ============================================================================

/// Marker opening a relay statistics line.
pub const STATS_MARKER: &str = "[STATS]";

/// Phrase the relay logs once it has joined the network.
pub const CONNECTED_MARKER: &str = "[OK] Connected to Psiphon network";

/// Render cadence of the live statistics view.
pub const RENDER_TICK: Duration = Duration::from_secs(1);

/// Number of lines in the interactive statistics block.
pub const STATS_BLOCK_HEIGHT: u16 = 5;

/// Column width each interactive value is padded to.
pub const STATS_FIELD_WIDTH: usize = 20;

/// Lines of history replayed when tailing a log file.
pub const LOG_BACKLOG_LINES: usize = 100;

/// Event-log entries shown when a Windows service has no log file yet.
pub const EVENT_LOG_BACKLOG: usize = 50;
