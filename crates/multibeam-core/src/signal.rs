//! Transition broadcast from the sequencer to the reader.

use crate::hal::TUBE_COUNT;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Transitions per cycle: one reset plus a high and a low per tube.
pub const PHASES_PER_CYCLE: u64 = 1 + 2 * TUBE_COUNT as u64;

/// Control bus phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    ResetActive,
    ClockHigh(usize),
    ClockLow(usize),
}

impl CycleState {
    /// Index of this phase within a cycle; `None` for `Idle`, which sits
    /// outside the cycle.
    pub fn phase(&self) -> Option<u64> {
        match *self {
            Self::Idle => None,
            Self::ResetActive => Some(0),
            Self::ClockHigh(tube) => Some(1 + 2 * tube as u64),
            Self::ClockLow(tube) => Some(2 + 2 * tube as u64),
        }
    }

    /// The phase that follows this one in the fixed cycle.
    pub fn next(&self) -> Self {
        match *self {
            Self::Idle => Self::ResetActive,
            Self::ResetActive => Self::ClockHigh(0),
            Self::ClockHigh(tube) => Self::ClockLow(tube),
            Self::ClockLow(tube) if tube + 1 < TUBE_COUNT => Self::ClockHigh(tube + 1),
            Self::ClockLow(_) => Self::ResetActive,
        }
    }
}

/// A published state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub cycle: u64,
    pub state: CycleState,
    /// Clock time at which the matching line write completed.
    pub at: Duration,
}

impl Transition {
    /// Monotonic position of this transition across all cycles.
    pub fn ordinal(&self) -> Option<u64> {
        self.state
            .phase()
            .map(|phase| self.cycle * PHASES_PER_CYCLE + phase)
    }
}

/// Receiver of sequencer transitions.
pub trait TransitionSink {
    fn publish(&mut self, transition: Transition);

    /// Called once when the sequencer leaves its loop.
    fn close(&mut self) {}
}

/// Result of waiting for a specific transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The awaited transition is the current one.
    Reached(Transition),
    /// The sequencer has already moved past the awaited transition.
    Passed(Transition),
    /// Stop was requested or the sequencer closed the signal.
    Stopped,
    /// Nothing new arrived within the timeout.
    TimedOut(Option<Transition>),
}

#[derive(Debug, Default)]
struct SignalState {
    latest: Option<Transition>,
    closed: bool,
}

/// Latest transition guarded by a mutex and condition variable.
///
/// Every publish wakes all waiters; waiters compare ordinals so that a
/// transition replaced before they woke is reported as passed, never lost.
#[derive(Debug, Default)]
pub struct CycleSignal {
    state: Mutex<SignalState>,
    changed: Condvar,
}

impl CycleSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn publish(&self, transition: Transition) {
        let mut state = self.lock();
        state.latest = Some(transition);
        drop(state);
        self.changed.notify_all();
    }

    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        if let Some(latest) = state.latest.as_mut() {
            latest.state = CycleState::Idle;
        }
        drop(state);
        self.changed.notify_all();
    }

    /// Wake waiters so they re-check the stop flag.
    pub fn wake_all(&self) {
        // Taking the lock orders this wake after any waiter's flag check.
        drop(self.lock());
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// True while `transition` is still the most recent publish.
    pub fn is_current(&self, transition: &Transition) -> bool {
        let state = self.lock();
        !state.closed && state.latest.as_ref() == Some(transition)
    }

    /// Block until the transition at `target` ordinal has been published.
    pub fn wait_for(&self, target: u64, timeout: Duration, stop: &AtomicBool) -> WaitOutcome {
        // A timeout too large to add to `now` never expires.
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        loop {
            if state.closed || stop.load(Ordering::Acquire) {
                return WaitOutcome::Stopped;
            }
            if let Some(latest) = state.latest {
                match latest.ordinal() {
                    Some(ordinal) if ordinal == target => return WaitOutcome::Reached(latest),
                    Some(ordinal) if ordinal > target => return WaitOutcome::Passed(latest),
                    _ => {}
                }
            }
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitOutcome::TimedOut(state.latest);
                    }
                    self.changed
                        .wait_timeout(state, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0)
                }
                None => self
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}

impl TransitionSink for &CycleSignal {
    fn publish(&mut self, transition: Transition) {
        CycleSignal::publish(*self, transition);
    }

    fn close(&mut self) {
        CycleSignal::close(*self);
    }
}
