use multibeam_core::timing::DEFAULT_UNIT_US;
use multibeam_core::{ClockProfile, ExecutionMode, PositionWeighting};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Timebase menu offered by the acquisition console, in microseconds.
pub const TIMEBASE_CHOICES_US: [u64; 4] = [10, 100, 1_000, 10_000];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgError {
    #[error("missing value for {flag}")]
    MissingValue { flag: String },
    #[error("invalid value {value:?} for {flag}: expected {expected}")]
    InvalidValue {
        flag: String,
        value: String,
        expected: &'static str,
    },
    #[error("unknown option {0}")]
    UnknownOption(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    #[default]
    Table,
    Json,
    None,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub unit_us: u64,
    pub clock_profile: ClockProfile,
    pub weighting: PositionWeighting,
    pub mode: ExecutionMode,
    pub run_seconds: Option<u64>,
    pub display: DisplayMode,
    pub refresh: Duration,
    pub json_logs: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            unit_us: DEFAULT_UNIT_US,
            clock_profile: ClockProfile::default(),
            weighting: PositionWeighting::default(),
            mode: ExecutionMode::default(),
            run_seconds: None,
            display: DisplayMode::default(),
            refresh: Duration::from_millis(100),
            json_logs: false,
            log_dir: None,
        }
    }
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, ArgError> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| ArgError::MissingValue {
            flag: flag.to_string(),
        })
}

fn invalid(flag: &str, value: &str, expected: &'static str) -> ArgError {
    ArgError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
        expected,
    }
}

fn parse_u64(flag: &str, raw: &str) -> Result<u64, ArgError> {
    raw.parse::<u64>()
        .map_err(|_| invalid(flag, raw, "a non-negative integer"))
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ArgError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Result<Self, ArgError> {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--timebase-us" => {
                    cfg.unit_us = parse_u64(flag, value(args, i, flag)?)?;
                    i += 1;
                }
                "--timebase-choice" => {
                    let raw = value(args, i, flag)?;
                    cfg.unit_us = raw
                        .parse::<usize>()
                        .ok()
                        .and_then(|choice| choice.checked_sub(1))
                        .and_then(|index| TIMEBASE_CHOICES_US.get(index).copied())
                        .ok_or_else(|| invalid(flag, raw, "1, 2, 3 or 4"))?;
                    i += 1;
                }
                "--clock-profile" => {
                    let raw = value(args, i, flag)?;
                    cfg.clock_profile = match raw {
                        "scaled" => ClockProfile::Scaled,
                        "fixed" => ClockProfile::Fixed,
                        _ => return Err(invalid(flag, raw, "scaled or fixed")),
                    };
                    i += 1;
                }
                "--weighting" => {
                    let raw = value(args, i, flag)?;
                    cfg.weighting = match raw {
                        "binary" => PositionWeighting::Binary,
                        "legacy" => PositionWeighting::Legacy,
                        _ => return Err(invalid(flag, raw, "binary or legacy")),
                    };
                    i += 1;
                }
                "--mode" => {
                    let raw = value(args, i, flag)?;
                    cfg.mode = match raw {
                        "threaded" => ExecutionMode::Threaded,
                        "inline" => ExecutionMode::Inline,
                        _ => return Err(invalid(flag, raw, "threaded or inline")),
                    };
                    i += 1;
                }
                "--run-seconds" => {
                    cfg.run_seconds = Some(parse_u64(flag, value(args, i, flag)?)?);
                    i += 1;
                }
                "--display" => {
                    let raw = value(args, i, flag)?;
                    cfg.display = match raw {
                        "table" => DisplayMode::Table,
                        "json" => DisplayMode::Json,
                        "none" => DisplayMode::None,
                        _ => return Err(invalid(flag, raw, "table, json or none")),
                    };
                    i += 1;
                }
                "--refresh-ms" => {
                    let raw = value(args, i, flag)?;
                    let ms = parse_u64(flag, raw)?;
                    if ms == 0 {
                        return Err(invalid(flag, raw, "at least 1"));
                    }
                    cfg.refresh = Duration::from_millis(ms);
                    i += 1;
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--log-dir" => {
                    cfg.log_dir = Some(PathBuf::from(value(args, i, flag)?));
                    i += 1;
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                other => return Err(ArgError::UnknownOption(other.to_string())),
            }
            i += 1;
        }
        Ok(cfg)
    }

    pub fn print_help() {
        println!(
            r#"multibeam-daq - 16-tube multibeam activity acquisition

USAGE:
    multibeam-daq [OPTIONS]

OPTIONS:
    --timebase-us <N>         Timing unit in microseconds, 10..=50000 [default: 200]
    --timebase-choice <1..4>  Pick a preset unit: 1=0.01ms 2=0.1ms 3=1ms 4=10ms
    --clock-profile <NAME>    Clock window (scaled|fixed) [default: scaled]
                              scaled: high 2.5 units, low 2.5 units
                              fixed:  high 500us, low 500us
    --weighting <NAME>        Data line weights (binary|legacy) [default: binary]
                              binary: 1,2,4,8 -> positions 1..16
                              legacy: 1,1,4,8 -> positions 1..15
    --mode <NAME>             Flow layout (threaded|inline) [default: threaded]
    --run-seconds <SECS>      Run for a fixed duration then exit
    --display <NAME>          Status output on stdout (table|json|none) [default: table]
    --refresh-ms <MS>         Status refresh period [default: 100]
    --json-logs               Output logs in JSON format (for log aggregation)
    --log-dir <DIR>           Write logs to a daily rolling file instead of stderr
    -h, --help                Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                  Set log filter (e.g., RUST_LOG=debug,multibeam_core=trace)

EXAMPLES:
    # Watch the simulated bank at the default timebase
    multibeam-daq

    # Ten-second run with machine-readable output
    multibeam-daq --run-seconds 10 --display json --json-logs

    # Slow bus for a logic analyser, legacy line weights
    multibeam-daq --timebase-choice 4 --weighting legacy
"#
        );
    }
}
