use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters shared by both flows and read by the presentation layer.
#[derive(Debug, Default)]
pub struct Telemetry {
    cycles_completed: AtomicU64,
    transitions_published: AtomicU64,
    max_hold_overrun_us: AtomicU64,
    cycles_observed: AtomicU64,
    samples_applied: AtomicU64,
    read_failures: AtomicU64,
    late_samples: AtomicU64,
    missed_windows: AtomicU64,
    eating_events: AtomicU64,
}

#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub cycles_completed: u64,
    pub transitions_published: u64,
    pub max_hold_overrun_us: u64,
    pub cycles_observed: u64,
    pub samples_applied: u64,
    pub read_failures: u64,
    pub late_samples: u64,
    pub missed_windows: u64,
    pub eating_events: u64,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle_completed(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transition(&self) {
        self.transitions_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hold_overrun(&self, overrun: Duration) {
        self.max_hold_overrun_us
            .fetch_max(overrun.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_cycle_observed(&self) {
        self.cycles_observed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_applied(&self) {
        self.samples_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_failure(&self) {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late_sample(&self) {
        self.late_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_missed_window(&self) {
        self.missed_windows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eating(&self) {
        self.eating_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            transitions_published: self.transitions_published.load(Ordering::Relaxed),
            max_hold_overrun_us: self.max_hold_overrun_us.load(Ordering::Relaxed),
            cycles_observed: self.cycles_observed.load(Ordering::Relaxed),
            samples_applied: self.samples_applied.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            late_samples: self.late_samples.load(Ordering::Relaxed),
            missed_windows: self.missed_windows.load(Ordering::Relaxed),
            eating_events: self.eating_events.load(Ordering::Relaxed),
        }
    }
}
