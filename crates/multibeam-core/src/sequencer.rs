use crate::error::{IoError, ProtocolError};
use crate::hal::{DigitalOutput, CLEAR, CLOCK_HIGH, RESET_HIGH, TUBE_COUNT};
use crate::signal::{CycleState, Transition, TransitionSink};
use crate::telemetry::Telemetry;
use crate::timebase::ClockHandle;
use crate::timing::TimingConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    /// Stop was observed at a hold point; the current pulse has run its
    /// full width but the lines have not been cleared yet.
    Stopped,
}

/// Drives the reset/clock lines through the fixed polling cycle.
pub struct Sequencer<O: DigitalOutput> {
    output: O,
    timing: TimingConfig,
    clock: ClockHandle,
    telemetry: Arc<Telemetry>,
    cycle: u64,
}

impl<O: DigitalOutput> Sequencer<O> {
    pub fn new(
        output: O,
        timing: TimingConfig,
        clock: ClockHandle,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            output,
            timing,
            clock,
            telemetry,
            cycle: 0,
        }
    }

    /// Index of the next cycle to be emitted.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    /// Run cycles until `stop` is set or a write fails, then drive both
    /// lines low and close the sink.
    pub fn run<S: TransitionSink>(&mut self, sink: &mut S, stop: &AtomicBool) -> Result<(), ProtocolError> {
        info!(
            unit_us = self.timing.unit_us(),
            cycle_period_us = self.timing.cycle_period().as_micros() as u64,
            "Sequencer started"
        );

        let result = loop {
            if stop.load(Ordering::Acquire) {
                break Ok(());
            }
            match self.run_cycle(sink, stop) {
                Ok(CycleOutcome::Completed) => {}
                Ok(CycleOutcome::Stopped) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        let idle = self.drive_idle();
        sink.close();

        match (result, idle) {
            (Err(e), idle) => {
                if let Err(idle_err) = idle {
                    error!(error = %idle_err, "Bus unreachable while driving idle after failure");
                }
                error!(error = %e, cycle = self.cycle, "Sequencer aborted");
                Err(e)
            }
            (Ok(()), Err(e)) => {
                error!(error = %e, "Failed to drive bus idle on shutdown");
                Err(e.into())
            }
            (Ok(()), Ok(())) => {
                info!(cycles = self.cycle, "Sequencer stopped with bus idle");
                Ok(())
            }
        }
    }

    /// Emit one reset pulse followed by sixteen clock pulses.
    pub fn run_cycle<S: TransitionSink>(
        &mut self,
        sink: &mut S,
        stop: &AtomicBool,
    ) -> Result<CycleOutcome, ProtocolError> {
        let cycle = self.cycle;
        debug!(cycle, "Cycle start");

        let at = self.write(RESET_HIGH)?;
        self.emit(sink, CycleState::ResetActive, at);
        self.hold(at + self.timing.reset_pulse());
        if stop.load(Ordering::Acquire) {
            return Ok(CycleOutcome::Stopped);
        }
        self.write(CLEAR)?;

        for tube in 0..TUBE_COUNT {
            let at = self.write(CLOCK_HIGH)?;
            self.emit(sink, CycleState::ClockHigh(tube), at);
            self.hold(at + self.timing.clock_high());
            if stop.load(Ordering::Acquire) {
                return Ok(CycleOutcome::Stopped);
            }

            let at = self.write(CLEAR)?;
            self.emit(sink, CycleState::ClockLow(tube), at);
            self.hold(at + self.timing.clock_low());
            // a stop during the last low hold still completes the cycle
            if tube + 1 < TUBE_COUNT && stop.load(Ordering::Acquire) {
                return Ok(CycleOutcome::Stopped);
            }
        }

        self.cycle += 1;
        self.telemetry.record_cycle_completed();
        Ok(CycleOutcome::Completed)
    }

    /// Drive both control lines low.
    pub fn drive_idle(&mut self) -> Result<(), IoError> {
        self.output.write_lines(CLEAR)
    }

    fn write(&mut self, mask: u8) -> Result<Duration, ProtocolError> {
        self.output.write_lines(mask)?;
        Ok(self.clock.now())
    }

    fn emit<S: TransitionSink>(&mut self, sink: &mut S, state: CycleState, at: Duration) {
        trace!(cycle = self.cycle, state = ?state, at_us = at.as_micros() as u64, "Transition");
        self.telemetry.record_transition();
        sink.publish(Transition {
            cycle: self.cycle,
            state,
            at,
        });
    }

    fn hold(&self, deadline: Duration) {
        let resumed = self.clock.sleep_until(deadline);
        self.telemetry
            .record_hold_overrun(resumed.saturating_sub(deadline));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::PHASES_PER_CYCLE;
    use crate::timebase::{Clock, VirtualClock};

    #[derive(Default)]
    struct RecordingOutput {
        writes: Vec<(u8, Duration)>,
        clock: VirtualClock,
        fail_on: Option<usize>,
        attempts: usize,
    }

    impl DigitalOutput for RecordingOutput {
        fn write_lines(&mut self, mask: u8) -> Result<(), IoError> {
            let attempt = self.attempts;
            self.attempts += 1;
            if self.fail_on == Some(attempt) {
                return Err(IoError::Write {
                    mask,
                    reason: "injected".into(),
                });
            }
            self.writes.push((mask, self.clock.now()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Collect {
        transitions: Vec<Transition>,
        closed: bool,
        stop_after: Option<(usize, Arc<AtomicBool>)>,
    }

    impl TransitionSink for Collect {
        fn publish(&mut self, transition: Transition) {
            self.transitions.push(transition);
            if let Some((count, stop)) = &self.stop_after {
                if self.transitions.len() >= *count {
                    stop.store(true, Ordering::Release);
                }
            }
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    fn sequencer(clock: &VirtualClock, fail_on: Option<usize>) -> Sequencer<RecordingOutput> {
        let output = RecordingOutput {
            clock: clock.clone(),
            fail_on,
            ..Default::default()
        };
        Sequencer::new(
            output,
            TimingConfig::scaled(200).unwrap(),
            clock.handle(),
            Arc::new(Telemetry::new()),
        )
    }

    #[test]
    fn one_cycle_emits_reset_then_sixteen_clocks() {
        let clock = VirtualClock::new();
        let mut seq = sequencer(&clock, None);
        let mut sink = Collect::default();
        let stop = AtomicBool::new(false);

        assert_eq!(seq.run_cycle(&mut sink, &stop), Ok(CycleOutcome::Completed));

        let masks: Vec<u8> = seq.output().writes.iter().map(|(m, _)| *m).collect();
        assert_eq!(masks.len(), 2 + 2 * TUBE_COUNT);
        assert_eq!(&masks[..4], &[RESET_HIGH, CLEAR, CLOCK_HIGH, CLEAR]);

        let states: Vec<CycleState> = sink.transitions.iter().map(|t| t.state).collect();
        let mut expected = CycleState::Idle;
        for state in &states {
            expected = expected.next();
            assert_eq!(*state, expected);
        }
        assert_eq!(states.len(), 1 + 2 * TUBE_COUNT);
        assert_eq!(seq.cycle(), 1);
    }

    #[test]
    fn holds_follow_timing() {
        let clock = VirtualClock::new();
        let mut seq = sequencer(&clock, None);
        let mut sink = Collect::default();
        seq.run_cycle(&mut sink, &AtomicBool::new(false)).unwrap();

        let at = |i: usize| sink.transitions[i].at;
        assert_eq!(at(0), Duration::ZERO);
        // reset 600us, then clock high 500us, clock low 500us per tube
        assert_eq!(at(1), Duration::from_micros(600));
        assert_eq!(at(2), Duration::from_micros(1_100));
        assert_eq!(at(3), Duration::from_micros(1_600));
        assert_eq!(clock.now(), Duration::from_micros(600 + 16 * 1_000));
    }

    #[test]
    fn write_failure_is_fatal_and_bus_is_cleared() {
        let clock = VirtualClock::new();
        let mut seq = sequencer(&clock, Some(5));
        let mut sink = Collect::default();
        let err = seq.run(&mut sink, &AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, ProtocolError::Io(IoError::Write { .. })));
        assert!(sink.closed);
        assert_eq!(seq.output().writes.last().map(|(m, _)| *m), Some(CLEAR));
    }

    #[test]
    fn stop_completes_current_pulse_then_clears() {
        let clock = VirtualClock::new();
        let mut seq = sequencer(&clock, None);
        let stop = Arc::new(AtomicBool::new(false));
        // stop as soon as ClockHigh(0) is published
        let mut sink = Collect {
            stop_after: Some((2, Arc::clone(&stop))),
            ..Default::default()
        };
        seq.run(&mut sink, &stop).unwrap();

        let writes = &seq.output().writes;
        let masks: Vec<u8> = writes.iter().map(|(m, _)| *m).collect();
        assert_eq!(masks, vec![RESET_HIGH, CLEAR, CLOCK_HIGH, CLEAR]);
        // the clock pulse kept its full high width
        assert_eq!(writes[3].1 - writes[2].1, Duration::from_micros(500));
        assert!(sink.closed);
    }

    #[test]
    fn stop_during_last_low_hold_counts_the_cycle() {
        let clock = VirtualClock::new();
        let mut seq = sequencer(&clock, None);
        let stop = Arc::new(AtomicBool::new(false));
        let mut sink = Collect {
            stop_after: Some((PHASES_PER_CYCLE as usize, Arc::clone(&stop))),
            ..Default::default()
        };
        assert_eq!(seq.run_cycle(&mut sink, &stop), Ok(CycleOutcome::Completed));
        assert_eq!(sink.transitions.len(), PHASES_PER_CYCLE as usize);
        assert_eq!(seq.cycle(), 1);
        assert_eq!(seq.telemetry.snapshot().cycles_completed, 1);

        seq.run(&mut sink, &stop).unwrap();
        assert_eq!(sink.transitions.len(), PHASES_PER_CYCLE as usize);
        assert_eq!(seq.output().writes.last().map(|(m, _)| *m), Some(CLEAR));
    }

    #[test]
    fn stop_before_start_only_clears() {
        let clock = VirtualClock::new();
        let mut seq = sequencer(&clock, None);
        let mut sink = Collect::default();
        seq.run(&mut sink, &AtomicBool::new(true)).unwrap();
        let masks: Vec<u8> = seq.output().writes.iter().map(|(m, _)| *m).collect();
        assert_eq!(masks, vec![CLEAR]);
        assert!(sink.transitions.is_empty());
    }
}
