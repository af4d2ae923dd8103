use multibeam_core::hal::{CLEAR, CLOCK_HIGH, DV_MASK, RESET_HIGH};
use multibeam_core::{
    BusEvent, Clock, CycleOutcome, CycleState, Position, PositionWeighting, Reader, Reading, Sequencer,
    SimulatedBus, Telemetry, TimingConfig, Transition, TransitionSink, TubeDisplay,
    TubeStateTable, VirtualClock, TUBE_COUNT,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// Records every transition before handing it to the reader.
struct Tap<'a, S> {
    inner: &'a mut S,
    transitions: Vec<Transition>,
}

impl<S: TransitionSink> TransitionSink for Tap<'_, S> {
    fn publish(&mut self, transition: Transition) {
        self.transitions.push(transition);
        self.inner.publish(transition);
    }
}

struct Rig {
    clock: VirtualClock,
    bus: SimulatedBus,
    table: Arc<TubeStateTable>,
    telemetry: Arc<Telemetry>,
    sequencer: Sequencer<SimulatedBus>,
    reader: Reader<SimulatedBus>,
}

impl Rig {
    fn new(weighting: PositionWeighting) -> Self {
        let clock = VirtualClock::new();
        let bus = SimulatedBus::new(clock.handle()).with_recording();
        let timing = TimingConfig::scaled(200).unwrap();
        let table = Arc::new(TubeStateTable::new());
        let telemetry = Arc::new(Telemetry::new());
        let sequencer = Sequencer::new(bus.clone(), timing, clock.handle(), Arc::clone(&telemetry));
        let reader = Reader::new(
            bus.clone(),
            Arc::clone(&table),
            timing,
            weighting,
            clock.handle(),
            Arc::clone(&telemetry),
        );
        Self {
            clock,
            bus,
            table,
            telemetry,
            sequencer,
            reader,
        }
    }

    fn cycle(&mut self) -> Vec<Transition> {
        let mut tap = Tap {
            inner: &mut self.reader,
            transitions: Vec::new(),
        };
        let outcome = self
            .sequencer
            .run_cycle(&mut tap, &AtomicBool::new(false))
            .unwrap();
        assert_eq!(outcome, CycleOutcome::Completed);
        tap.transitions
    }

    fn reading(&self, tube: usize) -> Option<Reading> {
        self.table.get(tube).unwrap().last_value
    }
}

fn position(value: u8) -> Option<Reading> {
    Position::new(value).map(Reading::Position)
}

#[test]
fn every_sample_falls_strictly_inside_its_clock_high_window() {
    let mut rig = Rig::new(PositionWeighting::Binary);
    let transitions = rig.cycle();

    let reads: Vec<(Option<usize>, Duration)> = rig
        .bus
        .events()
        .into_iter()
        .filter_map(|event| match event {
            BusEvent::Read { tube, at, .. } => Some((tube, at)),
            BusEvent::Write { .. } => None,
        })
        .collect();
    assert_eq!(reads.len(), TUBE_COUNT, "exactly one read per tube");

    for (tube, (selected, read_at)) in reads.iter().enumerate() {
        let high = transitions
            .iter()
            .find(|t| t.state == CycleState::ClockHigh(tube))
            .unwrap();
        let low = transitions
            .iter()
            .find(|t| t.state == CycleState::ClockLow(tube))
            .unwrap();
        assert!(high.at < *read_at && *read_at < low.at, "tube {tube}: {high:?} {read_at:?} {low:?}");
        assert_eq!(*read_at - high.at, Duration::from_micros(200));
        assert_eq!(*selected, Some(tube), "bus counter and cursor agree");
    }
}

#[test]
fn no_read_during_reset() {
    let mut rig = Rig::new(PositionWeighting::Binary);
    rig.cycle();
    let events = rig.bus.events();
    let first_read = events
        .iter()
        .position(|e| matches!(e, BusEvent::Read { .. }))
        .unwrap();
    let masks: Vec<u8> = events[..first_read]
        .iter()
        .filter_map(|e| match e {
            BusEvent::Write { mask, .. } => Some(*mask),
            _ => None,
        })
        .collect();
    assert_eq!(masks, vec![RESET_HIGH, CLEAR, CLOCK_HIGH]);
}

#[test]
fn full_cycle_scenario_position_eating_then_override() {
    let mut rig = Rig::new(PositionWeighting::Binary);
    assert_eq!(rig.table.get(0).unwrap().display(), TubeDisplay::Unknown);

    rig.bus.set_tube(0, 0b0_0000);
    rig.cycle();
    assert_eq!(rig.reading(0), position(1));

    rig.bus.set_tube(0, DV_MASK);
    rig.cycle();
    assert_eq!(rig.reading(0), Some(Reading::Eating));

    rig.bus.set_tube(0, 0b0_1111);
    rig.cycle();
    assert_eq!(rig.reading(0), position(16));
    assert_eq!(rig.table.get(0).unwrap().last_sample_cycle, Some(2));
}

#[test]
fn legacy_weighting_scenario() {
    let mut rig = Rig::new(PositionWeighting::Legacy);
    rig.bus.set_tube(0, 0b0_1111);
    rig.cycle();
    assert_eq!(rig.reading(0), position(15));
}

#[test]
fn tubes_without_valid_data_are_idle_after_first_cycle() {
    let mut rig = Rig::new(PositionWeighting::Binary);
    rig.bus.set_tube(7, 0b0_0110);
    rig.cycle();
    for tube in 0..TUBE_COUNT {
        let display = rig.table.get(tube).unwrap().display();
        if tube == 7 {
            assert_eq!(display, TubeDisplay::Position(Position::new(7).unwrap()));
        } else {
            assert_eq!(display, TubeDisplay::Idle, "tube {tube}");
        }
    }
}

#[test]
fn failed_read_leaves_one_tube_stale_and_others_fresh() {
    let mut rig = Rig::new(PositionWeighting::Binary);
    rig.bus.set_all(0b0_0010);
    rig.cycle();

    rig.bus.set_all(0b0_0100);
    rig.bus.fail_next_read(9);
    rig.cycle();
    rig.cycle();

    let failed = rig.table.get(9).unwrap();
    assert_eq!(failed.failed_reads, 1);
    assert_eq!(failed.last_value, position(5));

    rig.bus.fail_next_read(9);
    rig.bus.fail_next_read(9);
    rig.cycle();
    rig.cycle();
    let failed = rig.table.get(9).unwrap();
    assert_eq!(failed.last_sample_cycle, Some(2));
    assert!(failed.is_stale(4));
    assert_eq!(rig.table.is_stale(8), Some(false));
    assert_eq!(rig.telemetry.snapshot().read_failures, 3);
}

#[test]
fn virtual_cycle_takes_nominal_period() {
    let mut rig = Rig::new(PositionWeighting::Binary);
    rig.cycle();
    assert_eq!(rig.clock.now(), TimingConfig::scaled(200).unwrap().cycle_period());
    let snapshot = rig.telemetry.snapshot();
    assert_eq!(snapshot.cycles_completed, 1);
    assert_eq!(snapshot.cycles_observed, 1);
    assert_eq!(snapshot.samples_applied, TUBE_COUNT as u64);
    assert_eq!(snapshot.transitions_published, 33);
}
