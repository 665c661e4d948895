//! Terminal output for live statistics.
use crossterm::{
    cursor::{Hide, MoveUp, Show},
    execute, queue,
};
use std::io::{self, Write};

use super::session::Frame;
use crate::{
    constants::{STATS_BLOCK_HEIGHT, STATS_FIELD_WIDTH},
    install::InstalledLimits,
};

/// Writes the banner shown above the live statistics.
pub fn write_follow_header<W: Write + ?Sized>(
    out: &mut W,
    limits: &InstalledLimits,
) -> io::Result<()> {
    writeln!(out, "┌─────────────────────────────────────────────────┐")?;
    writeln!(out, "│              RELAY LIVE STATISTICS              │")?;
    writeln!(out, "└─────────────────────────────────────────────────┘")?;
    writeln!(out)?;
    writeln!(out, "  Max Clients:  {}", limits.max_clients)?;
    writeln!(out, "  Bandwidth:    {} Mbps", limits.bandwidth_mbps)?;
    writeln!(out)?;
    writeln!(out, "  Press Ctrl+C to exit")?;
    writeln!(out)?;
    out.flush()
}

/// Redraws a fixed block in place on a terminal, or appends one line per
/// frame otherwise.
pub struct Renderer<W: Write> {
    out: W,
    interactive: bool,
}

impl<W: Write> Renderer<W> {
    /// Creates a renderer; `interactive` is decided once per session.
    pub fn new(out: W, interactive: bool) -> Self {
        Self { out, interactive }
    }

    /// Prints the placeholder block the first frame overwrites.
    pub fn begin(&mut self) -> io::Result<()> {
        if !self.interactive {
            return Ok(());
        }

        queue!(self.out, Hide)?;
        for label in ["Status:", "Clients:", "Upload:", "Download:", "Uptime:"] {
            writeln!(self.out, "  {label:<10} ...")?;
        }
        self.out.flush()
    }

    /// Renders one frame.
    pub fn draw(&mut self, frame: &Frame) -> io::Result<()> {
        let uptime = frame.uptime_label();
        if !self.interactive {
            writeln!(
                self.out,
                "Status: {} | Clients: {} | Up: {} | Down: {} | Uptime: {}",
                frame.status_label(),
                frame.clients,
                frame.upload,
                frame.download,
                uptime
            )?;
            return self.out.flush();
        }

        queue!(self.out, MoveUp(STATS_BLOCK_HEIGHT))?;
        let rows = [
            ("Status:", frame.status_label()),
            ("Clients:", frame.clients.as_str()),
            ("Upload:", frame.upload.as_str()),
            ("Download:", frame.download.as_str()),
            ("Uptime:", uptime.as_str()),
        ];
        for (label, value) in rows {
            writeln!(self.out, "  {label:<10} {value:<width$}", width = STATS_FIELD_WIDTH)?;
        }
        self.out.flush()
    }

    /// Restores the cursor.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.interactive {
            execute!(self.out, Show)?;
        }
        Ok(())
    }
}
