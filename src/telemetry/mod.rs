//! Live relay statistics parsed from the service's log stream.

/// Log line recognition.
pub mod parser;
/// Terminal rendering.
pub mod render;
/// Producer/consumer session over a log stream.
pub mod session;

pub use parser::{LogEvent, StatsSample, format_uptime, parse_line, parse_uptime};
pub use render::{Renderer, write_follow_header};
pub use session::{Frame, TelemetrySession, TelemetryState};
