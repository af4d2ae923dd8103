use crate::runtime::config::{DisplayMode, RuntimeConfig};
use crate::runtime::display::{self, StatusFrame};
use crate::runtime::logging::{init_tracing, LoggingError};
use multibeam_core::{
    Acquisition, AcquisitionConfig, ConfigError, ProtocolError, SimulatedBus, SystemClock,
    TimingConfig,
};
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

/// Time each step of the simulated activity pattern stays on screen.
const ACTIVITY_STEP: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub fn run_from_args() -> ExitCode {
    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("multibeam-daq: {e}");
            eprintln!("Try --help for usage.");
            return ExitCode::from(2);
        }
    };
    if config.show_help {
        RuntimeConfig::print_help();
        return ExitCode::SUCCESS;
    }

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // the log may be a file, or not set up at all
            eprintln!("multibeam-daq: {e}");
            ExitCode::FAILURE
        }
    }
}

pub fn run(config: RuntimeConfig) -> Result<(), RuntimeError> {
    let _log_guard = init_tracing(config.json_logs, config.log_dir.as_deref())?;
    let result = acquire(&config);
    if let Err(e) = &result {
        error!(error = %e, "Acquisition failed");
    }
    result
}

fn acquire(config: &RuntimeConfig) -> Result<(), RuntimeError> {
    let timing = TimingConfig::new(config.unit_us, config.clock_profile)?;
    let acquisition_config = AcquisitionConfig {
        timing,
        weighting: config.weighting,
        mode: config.mode,
        desync_timeout: None,
    };

    let clock = SystemClock::handle();
    let step_cycles = (ACTIVITY_STEP.as_micros() / timing.cycle_period().as_micros().max(1)).max(1);
    let bus = SimulatedBus::new(clock.clone()).with_activity(step_cycles as u64);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        cycle_period_us = timing.cycle_period().as_micros() as u64,
        run_seconds = ?config.run_seconds,
        display = ?config.display,
        "multibeam-daq starting on simulated bus"
    );

    let acquisition = Acquisition::start(acquisition_config, bus.clone(), bus, clock)?;
    let table = acquisition.table();

    let deadline = config
        .run_seconds
        .map(|seconds| Instant::now() + Duration::from_secs(seconds));
    let mut display_mode = config.display;

    while acquisition.is_running() && deadline.map_or(true, |d| Instant::now() < d) {
        if display_mode != DisplayMode::None {
            let telemetry = acquisition.telemetry();
            let frame = StatusFrame::new(&table.snapshot(), &telemetry, false);
            if let Err(e) = display::show(display_mode, &frame) {
                warn!(error = %e, "Status output failed; display disabled");
                display_mode = DisplayMode::None;
            }
        }
        thread::sleep(config.refresh);
    }

    acquisition.request_stop();
    let report = acquisition.join()?;

    let frame = StatusFrame::new(&report.table, &report.telemetry, true);
    if let Err(e) = display::show(display_mode, &frame) {
        warn!(error = %e, "Final status output failed");
    }

    info!(
        cycles_completed = report.telemetry.cycles_completed,
        samples_applied = report.telemetry.samples_applied,
        read_failures = report.telemetry.read_failures,
        late_samples = report.telemetry.late_samples,
        missed_windows = report.telemetry.missed_windows,
        max_hold_overrun_us = report.telemetry.max_hold_overrun_us,
        "Run complete"
    );
    Ok(())
}
