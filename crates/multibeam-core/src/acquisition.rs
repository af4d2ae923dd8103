use crate::decode::PositionWeighting;
use crate::error::{ConfigError, ProtocolError};
use crate::hal::{DigitalInput, DigitalOutput};
use crate::reader::Reader;
use crate::sequencer::Sequencer;
use crate::signal::CycleSignal;
use crate::table::{TableSnapshot, TubeState, TubeStateTable};
use crate::telemetry::{Telemetry, TelemetrySnapshot};
use crate::timebase::ClockHandle;
use crate::timing::TimingConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info};

/// Where the sequencer and reader run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Sequencer and reader on separate threads, synchronized through
    /// `CycleSignal`.
    #[default]
    Threaded,
    /// Both on one thread; the sequencer hands each transition straight to
    /// the reader.
    Inline,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AcquisitionConfig {
    pub timing: TimingConfig,
    pub weighting: PositionWeighting,
    pub mode: ExecutionMode,
    /// Overrides `TimingConfig::default_desync_timeout`.
    pub desync_timeout: Option<Duration>,
}

impl AcquisitionConfig {
    pub fn new(timing: TimingConfig) -> Self {
        Self {
            timing,
            ..Default::default()
        }
    }

    pub fn desync_timeout(&self) -> Duration {
        self.desync_timeout
            .unwrap_or_else(|| self.timing.default_desync_timeout())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timing.validate()?;
        if self.desync_timeout().is_zero() {
            return Err(ConfigError::ZeroDesyncTimeout);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AcquisitionReport {
    pub telemetry: TelemetrySnapshot,
    pub table: TableSnapshot,
}

type FlowHandle = JoinHandle<Result<(), ProtocolError>>;

/// Sets the shared stop flag when a flow exits for any reason, panics
/// included, so the other flow winds down too.
struct StopOnExit {
    stop: Arc<AtomicBool>,
    signal: Arc<CycleSignal>,
}

impl Drop for StopOnExit {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.signal.wake_all();
    }
}

/// A running acquisition: the sequencer and reader flows plus the shared
/// tube table they feed.
pub struct Acquisition {
    stop: Arc<AtomicBool>,
    signal: Arc<CycleSignal>,
    table: Arc<TubeStateTable>,
    telemetry: Arc<Telemetry>,
    flows: Vec<(&'static str, FlowHandle)>,
}

impl Acquisition {
    /// Validate `config` and start the flows. Nothing touches the bus when
    /// the configuration is rejected.
    pub fn start<O, I>(
        config: AcquisitionConfig,
        output: O,
        input: I,
        clock: ClockHandle,
    ) -> Result<Self, ProtocolError>
    where
        O: DigitalOutput + 'static,
        I: DigitalInput + 'static,
    {
        config.validate()?;

        let stop = Arc::new(AtomicBool::new(false));
        let signal = Arc::new(CycleSignal::new());
        let table = Arc::new(TubeStateTable::new());
        let telemetry = Arc::new(Telemetry::new());

        let mut sequencer = Sequencer::new(
            output,
            config.timing,
            Arc::clone(&clock),
            Arc::clone(&telemetry),
        );
        let mut reader = Reader::new(
            input,
            Arc::clone(&table),
            config.timing,
            config.weighting,
            clock,
            Arc::clone(&telemetry),
        )
        .with_desync_timeout(config.desync_timeout());

        info!(
            unit_us = config.timing.unit_us(),
            profile = ?config.timing.profile(),
            weighting = ?config.weighting,
            mode = ?config.mode,
            "Starting acquisition"
        );

        let guard = || StopOnExit {
            stop: Arc::clone(&stop),
            signal: Arc::clone(&signal),
        };

        let flows = match config.mode {
            ExecutionMode::Threaded => {
                let seq_guard = guard();
                let seq_signal = Arc::clone(&signal);
                let seq_stop = Arc::clone(&stop);
                let sequencer_handle = thread::spawn(move || {
                    let _guard = seq_guard;
                    let mut sink: &CycleSignal = &seq_signal;
                    sequencer.run(&mut sink, &seq_stop)
                });

                let reader_guard = guard();
                let reader_signal = Arc::clone(&signal);
                let reader_stop = Arc::clone(&stop);
                let reader_handle = thread::spawn(move || {
                    let _guard = reader_guard;
                    reader.run(&reader_signal, &reader_stop)
                });

                vec![("sequencer", sequencer_handle), ("reader", reader_handle)]
            }
            ExecutionMode::Inline => {
                let inline_guard = guard();
                let inline_stop = Arc::clone(&stop);
                let handle = thread::spawn(move || {
                    let _guard = inline_guard;
                    sequencer.run(&mut reader, &inline_stop)
                });
                vec![("acquisition", handle)]
            }
        };

        Ok(Self {
            stop,
            signal,
            table,
            telemetry,
            flows,
        })
    }

    /// Ask both flows to finish. The sequencer completes its in-flight
    /// pulse and drives the bus idle before exiting.
    pub fn request_stop(&self) {
        info!("Stop requested");
        self.stop.store(true, Ordering::Release);
        self.signal.wake_all();
    }

    pub fn is_running(&self) -> bool {
        self.flows.iter().any(|(_, handle)| !handle.is_finished())
    }

    pub fn get_tube_state(&self, index: usize) -> Option<TubeState> {
        self.table.get(index)
    }

    pub fn table(&self) -> Arc<TubeStateTable> {
        Arc::clone(&self.table)
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    /// Wait for every flow to exit and return the first terminal error.
    pub fn join(self) -> Result<AcquisitionReport, ProtocolError> {
        let mut first_error = None;
        for (flow, handle) in self.flows {
            let result = handle
                .join()
                .unwrap_or(Err(ProtocolError::FlowPanicked { flow }));
            if let Err(e) = result {
                error!(flow, error = %e, "Flow ended with error");
                first_error.get_or_insert(e);
            }
        }

        let report = AcquisitionReport {
            telemetry: self.telemetry.snapshot(),
            table: self.table.snapshot(),
        };
        match first_error {
            Some(e) => Err(e),
            None => {
                info!(
                    cycles_completed = report.telemetry.cycles_completed,
                    samples_applied = report.telemetry.samples_applied,
                    read_failures = report.telemetry.read_failures,
                    "Acquisition finished"
                );
                Ok(report)
            }
        }
    }
}
