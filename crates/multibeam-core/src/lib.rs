pub mod acquisition;
pub mod decode;
pub mod error;
pub mod hal;
#[cfg(feature = "simulation")]
pub mod hal_sim;
pub mod reader;
pub mod sequencer;
pub mod signal;
pub mod table;
pub mod telemetry;
pub mod timebase;
pub mod timing;

pub use acquisition::{Acquisition, AcquisitionConfig, AcquisitionReport, ExecutionMode};
pub use decode::{decode, Position, PositionWeighting, Reading, TubeSample};
pub use error::{ConfigError, IoError, ProtocolError};
pub use hal::{DigitalInput, DigitalOutput, TUBE_COUNT};
#[cfg(feature = "simulation")]
pub use hal_sim::{BusEvent, SimulatedBus};
pub use reader::{ObserveOutcome, Reader};
pub use sequencer::{CycleOutcome, Sequencer};
pub use signal::{CycleSignal, CycleState, Transition, TransitionSink, WaitOutcome};
pub use table::{TableSnapshot, TubeDisplay, TubeState, TubeStateTable};
pub use telemetry::{Telemetry, TelemetrySnapshot};
pub use timebase::{Clock, ClockHandle, SystemClock, VirtualClock};
pub use timing::{ClockProfile, TimingConfig};
