use crate::decode::{Position, Reading};
use crate::hal::TUBE_COUNT;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// What the presentation layer should show for a tube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "position", rename_all = "snake_case")]
pub enum TubeDisplay {
    /// No successful sample has been taken for this tube yet.
    Unknown,
    /// Sampled, but the tube has never reported a valid position.
    Idle,
    Position(Position),
    Eating,
}

/// Per-tube record written by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TubeState {
    pub last_value: Option<Reading>,
    /// Cycle of the most recent successful sample.
    pub last_sample_cycle: Option<u64>,
    pub failed_reads: u64,
}

impl TubeState {
    pub fn display(&self) -> TubeDisplay {
        match (self.last_sample_cycle, self.last_value) {
            (None, _) => TubeDisplay::Unknown,
            (Some(_), None) => TubeDisplay::Idle,
            (Some(_), Some(Reading::Position(p))) => TubeDisplay::Position(p),
            (Some(_), Some(Reading::Eating)) => TubeDisplay::Eating,
        }
    }

    /// True when the tube missed the sample of the previous complete cycle.
    pub fn is_stale(&self, current_cycle: u64) -> bool {
        match self.last_sample_cycle {
            None => true,
            Some(sampled) => current_cycle.saturating_sub(sampled) > 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSnapshot {
    pub cycle: u64,
    pub tubes: [TubeState; TUBE_COUNT],
}

/// Sixteen independently locked tube records.
///
/// Updating one tube never blocks readers of another.
#[derive(Debug, Default)]
pub struct TubeStateTable {
    tubes: [Mutex<TubeState>; TUBE_COUNT],
    current_cycle: AtomicU64,
}

impl TubeStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, index: usize) -> Option<MutexGuard<'_, TubeState>> {
        self.tubes
            .get(index)
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Copy of one tube's state, or `None` for an index past the last tube.
    pub fn get(&self, index: usize) -> Option<TubeState> {
        self.lock(index).map(|guard| *guard)
    }

    pub fn is_stale(&self, index: usize) -> Option<bool> {
        let cycle = self.current_cycle();
        self.get(index).map(|state| state.is_stale(cycle))
    }

    /// Apply `update` to one tube under its lock and return the new state.
    pub fn update<F>(&self, index: usize, update: F) -> Option<TubeState>
    where
        F: FnOnce(&mut TubeState),
    {
        self.lock(index).map(|mut guard| {
            update(&mut guard);
            *guard
        })
    }

    pub fn current_cycle(&self) -> u64 {
        self.current_cycle.load(Ordering::Acquire)
    }

    pub fn mark_cycle(&self, cycle: u64) {
        self.current_cycle.fetch_max(cycle, Ordering::AcqRel);
    }

    /// Tube-by-tube copy; each entry is consistent, the set as a whole is not
    /// taken atomically.
    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            cycle: self.current_cycle(),
            tubes: std::array::from_fn(|index| self.get(index).unwrap_or_default()),
        }
    }
}
