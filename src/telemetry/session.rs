//! A live statistics session: one reader thread feeding shared state, and the
//! calling thread rendering it on a fixed tick.
use chrono::{DateTime, Utc};
use std::{
    io::{BufRead, Write},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};
use tracing::debug;

use super::{
    parser::{LogEvent, StatsSample, format_uptime, parse_line, parse_uptime},
    render::Renderer,
};
use crate::{constants::RENDER_TICK, error::ServiceError};

/// Everything the producer has learned so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryState {
    /// Most recent statistics sample.
    pub latest: Option<StatsSample>,
    /// Set on the first connection marker and never cleared.
    pub connected: bool,
    /// Session start time; immutable once set.
    pub started_at: Option<DateTime<Utc>>,
    /// The log stream reached its end.
    pub finished: bool,
}

impl TelemetryState {
    /// State seeded with the platform-reported start time, if any.
    pub fn new(started_at: Option<DateTime<Utc>>) -> Self {
        Self {
            started_at,
            ..Self::default()
        }
    }

    /// Folds one parsed event into the state, observed at `now`.
    pub fn apply(&mut self, event: LogEvent, now: DateTime<Utc>) {
        match event {
            LogEvent::Connected => self.connected = true,
            LogEvent::Stats(sample) => {
                if self.started_at.is_none() {
                    self.started_at = parse_uptime(&sample.uptime)
                        .and_then(|uptime| chrono::Duration::from_std(uptime).ok())
                        .and_then(|uptime| now.checked_sub_signed(uptime));
                }
                self.latest = Some(sample);
            }
        }
    }

    /// Snapshot to render at `now`.
    pub fn frame(&self, now: DateTime<Utc>) -> Frame {
        let uptime = self
            .started_at
            .map(|started| (now - started).to_std().unwrap_or(Duration::ZERO));

        match &self.latest {
            Some(sample) => Frame {
                connected: self.connected,
                clients: sample.clients.clone(),
                upload: sample.upload.clone(),
                download: sample.download.clone(),
                uptime,
            },
            None => Frame {
                connected: self.connected,
                uptime,
                ..Frame::default()
            },
        }
    }
}

/// One rendered view of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Whether the relay has connected.
    pub connected: bool,
    /// Client count.
    pub clients: String,
    /// Humanized upload total.
    pub upload: String,
    /// Humanized download total.
    pub download: String,
    /// Elapsed time since the session start, once known.
    pub uptime: Option<Duration>,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            connected: false,
            clients: "0".to_string(),
            upload: "0 B".to_string(),
            download: "0 B".to_string(),
            uptime: None,
        }
    }
}

impl Frame {
    /// `Connected` or `Waiting`.
    pub fn status_label(&self) -> &'static str {
        if self.connected { "Connected" } else { "Waiting" }
    }

    /// Formatted uptime, `...` until a start time is known.
    pub fn uptime_label(&self) -> String {
        self.uptime
            .map(format_uptime)
            .unwrap_or_else(|| "...".to_string())
    }
}

/// Owns a log source for the lifetime of one `status --follow`.
pub struct TelemetrySession<R> {
    source: R,
    started_at: Option<DateTime<Utc>>,
    tick: Duration,
}

impl<R> TelemetrySession<R>
where
    R: BufRead + Send + 'static,
{
    /// Session over `source`, anchored at the platform start time if known.
    pub fn new(source: R, started_at: Option<DateTime<Utc>>) -> Self {
        Self {
            source,
            started_at,
            tick: RENDER_TICK,
        }
    }

    /// Overrides the render cadence.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Renders until the source is exhausted, then draws a final frame.
    pub fn run<W: Write>(self, renderer: &mut Renderer<W>) -> Result<(), ServiceError> {
        let state = Arc::new(Mutex::new(TelemetryState::new(self.started_at)));
        let producer_state = Arc::clone(&state);
        let source = self.source;
        let producer = thread::Builder::new()
            .name("telemetry-reader".into())
            .spawn(move || consume_lines(source, &producer_state))?;

        renderer.begin()?;
        let mut last_uptime: Option<Duration> = None;
        let mut next_tick = Instant::now() + self.tick;
        loop {
            let now = Instant::now();
            if now < next_tick {
                thread::sleep(next_tick - now);
            }
            next_tick = (next_tick + self.tick).max(Instant::now());

            // Checked before the snapshot so a reader that ended is fully reflected in it.
            let reader_gone = producer.is_finished();
            let (mut frame, finished) = {
                let guard = state.lock().unwrap_or_else(|p| p.into_inner());
                (guard.frame(Utc::now()), guard.finished)
            };

            // Wall-clock steps must never make the displayed uptime go backwards.
            if let (Some(uptime), Some(previous)) = (frame.uptime, last_uptime) {
                frame.uptime = Some(uptime.max(previous));
            }
            last_uptime = frame.uptime;

            renderer.draw(&frame)?;
            if finished || reader_gone {
                break;
            }
        }

        renderer.finish()?;
        if producer.join().is_err() {
            debug!("telemetry reader panicked");
        }
        Ok(())
    }
}

fn consume_lines<R: BufRead>(source: R, state: &Mutex<TelemetryState>) {
    for line in source.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                debug!("log stream ended with error: {err}");
                break;
            }
        };

        if let Some(event) = parse_line(&line) {
            let mut guard = state.lock().unwrap_or_else(|p| p.into_inner());
            guard.apply(event, Utc::now());
        }
    }

    let mut guard = state.lock().unwrap_or_else(|p| p.into_inner());
    guard.finished = true;
}
