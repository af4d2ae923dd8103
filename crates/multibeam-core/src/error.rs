use crate::signal::CycleState;
use std::time::Duration;
use thiserror::Error;

/// Transport failure on a single line write or read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoError {
    #[error("write of output mask {mask:#04b} failed: {reason}")]
    Write { mask: u8, reason: String },
    #[error("read of input lines failed: {reason}")]
    Read { reason: String },
}

/// Timing or acquisition settings rejected before any flow starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("timing unit {unit_us}us outside supported range {min_us}..={max_us}us")]
    UnitOutOfRange { unit_us: u64, min_us: u64, max_us: u64 },
    #[error("read offset {read_offset:?} does not fall inside clock-high window {clock_high:?}")]
    ReadOffsetOutsideWindow {
        read_offset: Duration,
        clock_high: Duration,
    },
    #[error("desynchronization timeout must be non-zero")]
    ZeroDesyncTimeout,
}

/// Terminal failure of the acquisition protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("output bus failure: {0}")]
    Io(#[from] IoError),
    #[error("lost cycle synchronization: expected {expected:?}, last observed {observed:?} after {waited:?}")]
    Desync {
        expected: CycleState,
        observed: Option<CycleState>,
        waited: Duration,
    },
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("{flow} flow panicked")]
    FlowPanicked { flow: &'static str },
}

impl ProtocolError {
    pub fn is_desync(&self) -> bool {
        matches!(self, Self::Desync { .. })
    }
}
