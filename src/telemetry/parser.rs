//! Recognition of the relay's statistics and connection lines.
use regex::Regex;
use std::{sync::OnceLock, time::Duration};

use crate::constants::{CONNECTED_MARKER, STATS_MARKER};

fn stats_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[STATS\] Clients: (\S+) \| Up: ([^|]+)\| Down: ([^|]+)\| Uptime: (\S+)")
            .expect("valid stats pattern")
    })
}

fn uptime_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:(\d+)h)?(?:(\d+)m)?(?:(\d+(?:\.\d+)?)s)?$").expect("valid uptime pattern")
    })
}

/// One statistics report, fields kept exactly as the relay printed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSample {
    /// Connected client count.
    pub clients: String,
    /// Humanized bytes uploaded.
    pub upload: String,
    /// Humanized bytes downloaded.
    pub download: String,
    /// Relay-reported uptime, e.g. `1h2m3s`.
    pub uptime: String,
}

/// Something worth tracking in a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// A `[STATS]` report.
    Stats(StatsSample),
    /// The relay joined the network.
    Connected,
}

/// Classifies a raw log line. Prefixes such as journal timestamps are ignored.
pub fn parse_line(line: &str) -> Option<LogEvent> {
    if line.contains(STATS_MARKER) {
        let caps = stats_pattern().captures(line)?;
        return Some(LogEvent::Stats(StatsSample {
            clients: caps[1].trim().to_string(),
            upload: caps[2].trim().to_string(),
            download: caps[3].trim().to_string(),
            uptime: caps[4].trim().to_string(),
        }));
    }

    line.contains(CONNECTED_MARKER).then_some(LogEvent::Connected)
}

/// Parses `1h2m3s` style shorthand. Leading components may be omitted and the
/// seconds may be fractional.
pub fn parse_uptime(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let caps = uptime_pattern().captures(value)?;
    let hours = match caps.get(1) {
        Some(h) => h.as_str().parse::<u64>().ok()?,
        None => 0,
    };
    let minutes = match caps.get(2) {
        Some(m) => m.as_str().parse::<u64>().ok()?,
        None => 0,
    };
    let seconds = match caps.get(3) {
        Some(s) => s.as_str().parse::<f64>().ok()?,
        None => 0.0,
    };

    let whole = hours.checked_mul(3600)?.checked_add(minutes.checked_mul(60)?)?;
    Duration::from_secs(whole).checked_add(Duration::try_from_secs_f64(seconds).ok()?)
}

/// Formats a duration rounded to whole seconds: `2m5s`, `1h0m7s`, `0s`.
pub fn format_uptime(elapsed: Duration) -> String {
    let total = (elapsed + Duration::from_millis(500)).as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);

    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}
