use crate::error::IoError;
use crate::hal::{DigitalInput, DigitalOutput, CLOCK_HIGH, DATA_MASK, DV_MASK, RESET_HIGH, TUBE_COUNT};
use crate::timebase::ClockHandle;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Line activity observed by the simulated bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    Write { mask: u8, at: Duration },
    Read { tube: Option<usize>, value: u8, at: Duration },
}

/// Deterministic demo motion: each tube walks from position 16 down to 1,
/// eats for a while, then shows no valid data before starting over. Every
/// fourth tube never reports a position.
#[derive(Debug, Clone)]
struct ActivityPattern {
    step_cycles: u64,
    cycle: u64,
}

impl ActivityPattern {
    const PERIOD: u64 = 24;

    fn tick(&mut self, tubes: &mut [u8; TUBE_COUNT]) {
        let step = self.cycle / self.step_cycles.max(1);
        for (index, raw) in tubes.iter_mut().enumerate() {
            if index % 4 == 3 {
                *raw = DV_MASK | 0b0101;
                continue;
            }
            let phase = (step + index as u64 * 5) % Self::PERIOD;
            *raw = match phase {
                0..=15 => 15 - phase as u8,
                16..=19 => DV_MASK,
                _ => DV_MASK | 0b0101,
            };
        }
        self.cycle += 1;
    }
}

#[derive(Debug)]
struct BankState {
    lines: u8,
    selected: Option<usize>,
    tubes: [u8; TUBE_COUNT],
    activity: Option<ActivityPattern>,
    read_faults: Vec<usize>,
    fail_writes_after: Option<u64>,
    writes: u64,
    recording: bool,
    events: Vec<BusEvent>,
}

impl Default for BankState {
    fn default() -> Self {
        Self {
            lines: 0,
            selected: None,
            // nothing valid on the bus until a tube reports
            tubes: [DV_MASK; TUBE_COUNT],
            activity: None,
            read_faults: Vec::new(),
            fail_writes_after: None,
            writes: 0,
            recording: false,
            events: Vec::new(),
        }
    }
}

/// Simulated detector bank on both ports.
///
/// A rising reset edge rewinds the tube counter, each rising clock edge
/// selects the next tube, and reads return the selected tube's 5-bit value.
/// Clones share the same bank, so one clone can be handed to the sequencer
/// and another to the reader.
#[derive(Clone)]
pub struct SimulatedBus {
    state: Arc<Mutex<BankState>>,
    clock: ClockHandle,
}

impl SimulatedBus {
    pub fn new(clock: ClockHandle) -> Self {
        Self {
            state: Arc::new(Mutex::new(BankState::default())),
            clock,
        }
    }

    /// Animate tubes, advancing one step every `step_cycles` resets.
    pub fn with_activity(self, step_cycles: u64) -> Self {
        self.lock().activity = Some(ActivityPattern {
            step_cycles,
            cycle: 0,
        });
        self
    }

    pub fn with_recording(self) -> Self {
        self.lock().recording = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, BankState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the raw 5-bit value a tube presents when selected.
    pub fn set_tube(&self, tube: usize, raw: u8) {
        if let Some(slot) = self.lock().tubes.get_mut(tube) {
            *slot = raw & (DATA_MASK | DV_MASK);
        }
    }

    pub fn set_all(&self, raw: u8) {
        self.lock().tubes = [raw & (DATA_MASK | DV_MASK); TUBE_COUNT];
    }

    /// Make the next read while `tube` is selected fail.
    pub fn fail_next_read(&self, tube: usize) {
        self.lock().read_faults.push(tube);
    }

    /// Accept `count` more writes, then fail every write after that.
    pub fn fail_writes_after(&self, count: u64) {
        let mut state = self.lock();
        state.fail_writes_after = Some(state.writes + count);
    }

    pub fn selected_tube(&self) -> Option<usize> {
        self.lock().selected
    }

    pub fn lines(&self) -> u8 {
        self.lock().lines
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.lock().events.clone()
    }

    pub fn written_masks(&self) -> Vec<u8> {
        self.lock()
            .events
            .iter()
            .filter_map(|event| match event {
                BusEvent::Write { mask, .. } => Some(*mask),
                BusEvent::Read { .. } => None,
            })
            .collect()
    }
}

impl DigitalOutput for SimulatedBus {
    fn write_lines(&mut self, mask: u8) -> Result<(), IoError> {
        let at = self.clock.now();
        let mut state = self.lock();
        if state.fail_writes_after.is_some_and(|limit| state.writes >= limit) {
            return Err(IoError::Write {
                mask,
                reason: "simulated output fault".to_string(),
            });
        }
        state.writes += 1;

        let rising = mask & !state.lines;
        if rising & RESET_HIGH != 0 {
            state.selected = None;
            let BankState {
                activity, tubes, ..
            } = &mut *state;
            if let Some(pattern) = activity.as_mut() {
                pattern.tick(tubes);
            }
        }
        if rising & CLOCK_HIGH != 0 {
            state.selected = Some(state.selected.map_or(0, |tube| (tube + 1) % TUBE_COUNT));
        }
        state.lines = mask;
        if state.recording {
            state.events.push(BusEvent::Write { mask, at });
        }
        Ok(())
    }
}

impl DigitalInput for SimulatedBus {
    fn read_lines(&mut self) -> Result<u8, IoError> {
        let at = self.clock.now();
        let mut state = self.lock();
        let selected = state.selected;
        if let Some(tube) = selected {
            if let Some(pos) = state.read_faults.iter().position(|&t| t == tube) {
                state.read_faults.remove(pos);
                return Err(IoError::Read {
                    reason: format!("simulated input fault on tube {tube}"),
                });
            }
        }
        let value = selected
            .and_then(|tube| state.tubes.get(tube).copied())
            .unwrap_or(DV_MASK);
        if state.recording {
            state.events.push(BusEvent::Read {
                tube: selected,
                value,
                at,
            });
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::CLEAR;
    use crate::timebase::VirtualClock;

    fn bus() -> SimulatedBus {
        SimulatedBus::new(VirtualClock::new().handle()).with_recording()
    }

    #[test]
    fn clock_edges_step_through_tubes() {
        let mut bus = bus();
        for tube in 0..TUBE_COUNT {
            bus.set_tube(tube, tube as u8);
        }
        bus.write_lines(RESET_HIGH).unwrap();
        assert_eq!(bus.selected_tube(), None);
        assert_eq!(bus.read_lines().unwrap(), DV_MASK);
        bus.write_lines(CLEAR).unwrap();
        for tube in 0..3 {
            bus.write_lines(CLOCK_HIGH).unwrap();
            assert_eq!(bus.read_lines().unwrap(), tube as u8);
            bus.write_lines(CLEAR).unwrap();
        }
        assert_eq!(bus.selected_tube(), Some(2));
    }

    #[test]
    fn holding_clock_high_is_one_edge() {
        let mut bus = bus();
        bus.write_lines(CLOCK_HIGH).unwrap();
        bus.write_lines(CLOCK_HIGH).unwrap();
        assert_eq!(bus.selected_tube(), Some(0));
    }

    #[test]
    fn reset_rewinds_counter() {
        let mut bus = bus();
        bus.write_lines(CLOCK_HIGH).unwrap();
        bus.write_lines(CLEAR).unwrap();
        bus.write_lines(CLOCK_HIGH).unwrap();
        bus.write_lines(RESET_HIGH).unwrap();
        assert_eq!(bus.selected_tube(), None);
    }

    #[test]
    fn injected_read_fault_fires_once_for_its_tube() {
        let mut bus = bus();
        bus.fail_next_read(0);
        bus.write_lines(CLOCK_HIGH).unwrap();
        assert!(matches!(bus.read_lines(), Err(IoError::Read { .. })));
        assert!(bus.read_lines().is_ok());
    }

    #[test]
    fn write_fault_after_budget() {
        let mut bus = bus();
        bus.fail_writes_after(2);
        assert!(bus.write_lines(RESET_HIGH).is_ok());
        assert!(bus.write_lines(CLEAR).is_ok());
        assert!(matches!(
            bus.write_lines(CLOCK_HIGH),
            Err(IoError::Write { mask: CLOCK_HIGH, .. })
        ));
        assert_eq!(bus.written_masks(), vec![RESET_HIGH, CLEAR]);
    }

    #[test]
    fn activity_walks_down_to_first_position_then_eats() {
        let mut tubes = [0u8; TUBE_COUNT];
        let mut pattern = ActivityPattern {
            step_cycles: 1,
            cycle: 0,
        };
        pattern.tick(&mut tubes);
        assert_eq!(tubes[0], 15);
        assert_eq!(tubes[3], DV_MASK | 0b0101);
        for _ in 0..15 {
            pattern.tick(&mut tubes);
        }
        assert_eq!(tubes[0], 0);
        pattern.tick(&mut tubes);
        assert_eq!(tubes[0], DV_MASK);
    }
}
