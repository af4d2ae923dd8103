use crate::runtime::config::DisplayMode;
use multibeam_core::{Position, TableSnapshot, TelemetrySnapshot, TubeDisplay, TubeState};
use serde::Serialize;
use std::fmt::Write as _;
use std::io::{self, Write};

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

/// One tube as shown to the operator.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TubeRow {
    /// 1-based, as printed on the rack.
    pub tube: usize,
    #[serde(flatten)]
    pub display: TubeDisplay,
    pub stale: bool,
    pub failed_reads: u64,
}

impl TubeRow {
    fn new(index: usize, state: &TubeState, cycle: u64) -> Self {
        let display = state.display();
        Self {
            tube: index + 1,
            display,
            stale: display != TubeDisplay::Unknown && state.is_stale(cycle),
            failed_reads: state.failed_reads,
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self.display {
            TubeDisplay::Unknown => "UNKNOWN",
            _ if self.stale => "STALE",
            TubeDisplay::Idle => "IDLE",
            TubeDisplay::Position(_) => "ACTIVE",
            TubeDisplay::Eating => "EATING",
        }
    }

    fn position(&self) -> Option<Position> {
        match self.display {
            TubeDisplay::Position(p) => Some(p),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusFrame<'a> {
    pub cycle: u64,
    #[serde(rename = "final")]
    pub is_final: bool,
    pub tubes: Vec<TubeRow>,
    pub telemetry: &'a TelemetrySnapshot,
}

impl<'a> StatusFrame<'a> {
    pub fn new(table: &TableSnapshot, telemetry: &'a TelemetrySnapshot, is_final: bool) -> Self {
        let tubes = table
            .tubes
            .iter()
            .enumerate()
            .map(|(index, state)| TubeRow::new(index, state, table.cycle))
            .collect();
        Self {
            cycle: table.cycle,
            is_final,
            tubes,
            telemetry,
        }
    }
}

pub fn render_table(frame: &StatusFrame<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Cycle {}", frame.cycle);
    let _ = writeln!(out, "Tube | Position | Status  | Activity");
    let _ = writeln!(out, "-----+----------+---------+-----------------");
    for row in &frame.tubes {
        let position = row
            .position()
            .map_or_else(|| "-".to_string(), |p| p.to_string());
        let activity = row.position().map_or(0, |p| usize::from(p.get()));
        let _ = writeln!(
            out,
            "{:>4} | {:>8} | {:<7} | {}",
            row.tube,
            position,
            row.status_label(),
            "#".repeat(activity)
        );
    }
    let t = frame.telemetry;
    let _ = writeln!(
        out,
        "samples {}  read failures {}  late {}  missed {}  eating events {}",
        t.samples_applied, t.read_failures, t.late_samples, t.missed_windows, t.eating_events
    );
    out
}

pub fn render_json(frame: &StatusFrame<'_>) -> serde_json::Result<String> {
    serde_json::to_string(frame)
}

/// Write one frame to stdout in the chosen form.
pub fn show(mode: DisplayMode, frame: &StatusFrame<'_>) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    match mode {
        DisplayMode::Table => {
            if !frame.is_final {
                stdout.write_all(CLEAR_SCREEN.as_bytes())?;
            }
            stdout.write_all(render_table(frame).as_bytes())?;
        }
        DisplayMode::Json => {
            let line = render_json(frame).map_err(io::Error::from)?;
            writeln!(stdout, "{line}")?;
        }
        DisplayMode::None => return Ok(()),
    }
    stdout.flush()
}
