use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Remaining wait below which `SystemClock` stops sleeping and spins.
const SPIN_THRESHOLD: Duration = Duration::from_micros(80);

/// Time source shared by the sequencer, the reader and the bus.
///
/// All timestamps are offsets from a common origin so that transitions
/// published on one thread can be compared with samples taken on another.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock origin.
    fn now(&self) -> Duration;

    /// Block until `deadline` (measured from the origin) has passed.
    /// Returns the time at which the caller resumed.
    fn sleep_until(&self, deadline: Duration) -> Duration;

    fn sleep(&self, duration: Duration) -> Duration {
        self.sleep_until(self.now() + duration)
    }
}

pub type ClockHandle = Arc<dyn Clock>;

/// Real-time clock: coarse `thread::sleep` followed by a bounded spin for
/// the final few microseconds of each hold.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn handle() -> ClockHandle {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep_until(&self, deadline: Duration) -> Duration {
        loop {
            let now = self.now();
            if now >= deadline {
                return now;
            }
            let remaining = deadline - now;
            if remaining > SPIN_THRESHOLD {
                std::thread::sleep(remaining - SPIN_THRESHOLD);
            } else {
                std::hint::spin_loop();
            }
        }
    }
}

/// Simulated clock whose time only moves when somebody sleeps.
///
/// Sleeping advances the shared time to the deadline immediately, so a
/// single-threaded acquisition runs a full cycle without real delay and
/// produces exact, reproducible timestamps.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    now_ns: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> ClockHandle {
        Arc::new(self.clone())
    }

    pub fn advance(&self, by: Duration) -> Duration {
        let by_ns = by.as_nanos() as u64;
        let previous = self.now_ns.fetch_add(by_ns, Ordering::AcqRel);
        Duration::from_nanos(previous + by_ns)
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.now_ns.load(Ordering::Acquire))
    }

    fn sleep_until(&self, deadline: Duration) -> Duration {
        let deadline_ns = deadline.as_nanos() as u64;
        let previous = self.now_ns.fetch_max(deadline_ns, Ordering::AcqRel);
        Duration::from_nanos(previous.max(deadline_ns))
    }
}
