use crate::decode::{decode, PositionWeighting, TubeSample};
use crate::error::ProtocolError;
use crate::hal::{DigitalInput, TUBE_COUNT};
use crate::signal::{CycleSignal, CycleState, Transition, TransitionSink, WaitOutcome, PHASES_PER_CYCLE};
use crate::table::{TubeState, TubeStateTable};
use crate::telemetry::Telemetry;
use crate::timebase::ClockHandle;
use crate::timing::TimingConfig;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveOutcome {
    Completed { cycle: u64 },
    Stopped,
}

/// Samples the data port inside each clock-high window and keeps the tube
/// table up to date.
pub struct Reader<I: DigitalInput> {
    input: I,
    table: Arc<TubeStateTable>,
    timing: TimingConfig,
    weighting: PositionWeighting,
    clock: ClockHandle,
    telemetry: Arc<Telemetry>,
    desync_timeout: Duration,
    next_cycle: u64,
}

impl<I: DigitalInput> Reader<I> {
    pub fn new(
        input: I,
        table: Arc<TubeStateTable>,
        timing: TimingConfig,
        weighting: PositionWeighting,
        clock: ClockHandle,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            input,
            table,
            timing,
            weighting,
            clock,
            telemetry,
            desync_timeout: timing.default_desync_timeout(),
            next_cycle: 0,
        }
    }

    pub fn with_desync_timeout(mut self, timeout: Duration) -> Self {
        self.desync_timeout = timeout;
        self
    }

    pub fn table(&self) -> &Arc<TubeStateTable> {
        &self.table
    }

    /// Observe cycles until stopped or desynchronized.
    pub fn run(&mut self, signal: &CycleSignal, stop: &AtomicBool) -> Result<(), ProtocolError> {
        info!(
            read_offset_us = self.timing.read_offset().as_micros() as u64,
            weighting = ?self.weighting,
            "Reader started"
        );
        loop {
            match self.observe_cycle(signal, stop) {
                Ok(ObserveOutcome::Completed { .. }) => {}
                Ok(ObserveOutcome::Stopped) => {
                    info!("Reader stopped");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "Reader aborted");
                    return Err(e);
                }
            }
        }
    }

    /// Follow one reset-plus-sixteen-clock pass published on `signal`.
    pub fn observe_cycle(
        &mut self,
        signal: &CycleSignal,
        stop: &AtomicBool,
    ) -> Result<ObserveOutcome, ProtocolError> {
        let reset = loop {
            match self.wait(signal, self.next_cycle, CycleState::ResetActive, stop)? {
                WaitOutcome::Reached(transition) => break transition,
                WaitOutcome::Passed(transition) => {
                    // Joined mid-cycle; only a fresh reset pins tube indices.
                    debug!(cycle = transition.cycle, "Waiting for next cycle boundary");
                    self.next_cycle = transition.cycle + 1;
                }
                _ => return Ok(ObserveOutcome::Stopped),
            }
        };
        let cycle = reset.cycle;
        self.begin_cycle(cycle);

        let mut reached = 0;
        for tube in 0..TUBE_COUNT {
            let high = match self.wait(signal, cycle, CycleState::ClockHigh(tube), stop)? {
                WaitOutcome::Reached(transition) => transition,
                WaitOutcome::Passed(transition) => {
                    self.telemetry.record_missed_window();
                    warn!(tube, cycle, now = ?transition.state, "Missed clock-high window");
                    if transition.cycle != cycle {
                        break;
                    }
                    continue;
                }
                _ => return Ok(ObserveOutcome::Stopped),
            };
            reached += 1;

            // The window must be open both before and after the read, else
            // the sample may belong to a later phase of the bus.
            self.clock.sleep_until(high.at + self.timing.read_offset());
            if !signal.is_current(&high) {
                self.telemetry.record_late_sample();
                warn!(tube, cycle, "Woke after clock-high window; read skipped");
            } else if let Some(sample) = self.read_sample(tube) {
                if signal.is_current(&high) {
                    self.apply_sample(tube, cycle, sample);
                } else {
                    self.telemetry.record_late_sample();
                    warn!(tube, cycle, "Sample landed after clock-high window; discarded");
                }
            }

            match self.wait(signal, cycle, CycleState::ClockLow(tube), stop)? {
                WaitOutcome::Reached(_) | WaitOutcome::Passed(_) => {}
                _ => return Ok(ObserveOutcome::Stopped),
            }
        }

        if reached == TUBE_COUNT {
            self.end_cycle(cycle);
        } else {
            debug!(cycle, reached, "Cycle abandoned with windows missed");
            self.next_cycle = cycle + 1;
        }
        Ok(ObserveOutcome::Completed { cycle })
    }

    /// Wait `read_offset` past the rising edge at `high_at`, then read the
    /// data port once.
    pub fn take_sample(&mut self, tube: usize, high_at: Duration) -> Option<TubeSample> {
        self.clock.sleep_until(high_at + self.timing.read_offset());
        self.read_sample(tube)
    }

    fn read_sample(&mut self, tube: usize) -> Option<TubeSample> {
        match self.input.read_lines() {
            Ok(raw) => {
                trace!(tube, raw, "Sample");
                Some(TubeSample::from_lines(raw))
            }
            Err(e) => {
                self.telemetry.record_read_failure();
                self.table.update(tube, |state| state.failed_reads += 1);
                warn!(tube, error = %e, "Read failed; keeping previous tube state");
                None
            }
        }
    }

    /// Decode `sample` against the tube's stored value and store the result.
    pub fn apply_sample(&self, tube: usize, cycle: u64, sample: TubeSample) -> Option<TubeState> {
        let weighting = self.weighting;
        let mut started_eating = false;
        let updated = self.table.update(tube, |state| {
            let next = decode(sample, state.last_value, weighting);
            started_eating = next.is_some_and(|r| r.is_eating())
                && !state.last_value.is_some_and(|r| r.is_eating());
            state.last_value = next;
            state.last_sample_cycle = Some(cycle);
        });
        self.telemetry.record_sample_applied();
        if started_eating {
            self.telemetry.record_eating();
            debug!(tube, cycle, "Tube started eating");
        }
        updated
    }

    fn begin_cycle(&mut self, cycle: u64) {
        trace!(cycle, "Cycle boundary");
        self.table.mark_cycle(cycle);
    }

    /// Every window of `cycle` was followed.
    fn end_cycle(&mut self, cycle: u64) {
        self.next_cycle = cycle + 1;
        self.telemetry.record_cycle_observed();
    }

    fn wait(
        &self,
        signal: &CycleSignal,
        cycle: u64,
        state: CycleState,
        stop: &AtomicBool,
    ) -> Result<WaitOutcome, ProtocolError> {
        let target = cycle * PHASES_PER_CYCLE + state.phase().unwrap_or(0);
        match signal.wait_for(target, self.desync_timeout, stop) {
            WaitOutcome::TimedOut(latest) => Err(ProtocolError::Desync {
                expected: state,
                observed: latest.map(|transition| transition.state),
                waited: self.desync_timeout,
            }),
            outcome => Ok(outcome),
        }
    }
}

/// Synchronous hand-off: the sequencer calls straight into the reader, so
/// both run on one thread and every sample lands inside its window.
impl<I: DigitalInput> TransitionSink for Reader<I> {
    fn publish(&mut self, transition: Transition) {
        match transition.state {
            CycleState::ResetActive => self.begin_cycle(transition.cycle),
            CycleState::ClockHigh(tube) => {
                if let Some(sample) = self.take_sample(tube, transition.at) {
                    self.apply_sample(tube, transition.cycle, sample);
                }
            }
            CycleState::ClockLow(tube) if tube + 1 == TUBE_COUNT => self.end_cycle(transition.cycle),
            _ => {}
        }
    }
}
