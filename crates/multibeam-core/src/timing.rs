use crate::error::ConfigError;
use crate::hal::TUBE_COUNT;
use std::time::Duration;

/// Smallest accepted base time unit (0.01 ms).
pub const MIN_UNIT_US: u64 = 10;
/// Largest accepted base time unit (50 ms).
pub const MAX_UNIT_US: u64 = 50_000;
/// Base unit used when none is configured (0.2 ms).
pub const DEFAULT_UNIT_US: u64 = 200;
/// Slack added to the desynchronization timeout for thread start-up.
pub const DESYNC_GUARD: Duration = Duration::from_millis(200);
/// Clock window width in the fixed profile.
pub const FIXED_CLOCK_WINDOW: Duration = Duration::from_micros(500);

/// How the clock window relates to the base unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockProfile {
    /// High and low phases each last 2.5 units.
    #[default]
    Scaled,
    /// High and low phases each last 500 µs regardless of the unit.
    Fixed,
}

/// Protocol hold durations, all derived from one base unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    unit_us: u64,
    profile: ClockProfile,
}

impl TimingConfig {
    pub fn new(unit_us: u64, profile: ClockProfile) -> Result<Self, ConfigError> {
        if !(MIN_UNIT_US..=MAX_UNIT_US).contains(&unit_us) {
            return Err(ConfigError::UnitOutOfRange {
                unit_us,
                min_us: MIN_UNIT_US,
                max_us: MAX_UNIT_US,
            });
        }
        let timing = Self { unit_us, profile };
        timing.validate()?;
        Ok(timing)
    }

    pub fn scaled(unit_us: u64) -> Result<Self, ConfigError> {
        Self::new(unit_us, ClockProfile::Scaled)
    }

    /// The sample point must fall strictly inside the clock-high window.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_offset() >= self.clock_high() {
            return Err(ConfigError::ReadOffsetOutsideWindow {
                read_offset: self.read_offset(),
                clock_high: self.clock_high(),
            });
        }
        Ok(())
    }

    pub fn unit_us(&self) -> u64 {
        self.unit_us
    }

    pub fn profile(&self) -> ClockProfile {
        self.profile
    }

    pub fn unit(&self) -> Duration {
        Duration::from_micros(self.unit_us)
    }

    pub fn reset_pulse(&self) -> Duration {
        self.unit() * 3
    }

    pub fn clock_high(&self) -> Duration {
        match self.profile {
            ClockProfile::Scaled => self.unit() * 5 / 2,
            ClockProfile::Fixed => FIXED_CLOCK_WINDOW,
        }
    }

    pub fn clock_low(&self) -> Duration {
        match self.profile {
            ClockProfile::Scaled => self.unit() * 5 / 2,
            ClockProfile::Fixed => FIXED_CLOCK_WINDOW,
        }
    }

    /// Delay after the clock rising edge before the data lines are sampled.
    pub fn read_offset(&self) -> Duration {
        self.unit()
    }

    /// Portion of the high window left after the sample point.
    pub fn remaining_high(&self) -> Duration {
        self.clock_high().saturating_sub(self.read_offset())
    }

    /// Nominal duration of one reset-plus-sixteen-tube pass.
    pub fn cycle_period(&self) -> Duration {
        self.reset_pulse() + (self.clock_high() + self.clock_low()) * TUBE_COUNT as u32
    }

    /// How long the reader waits for an expected transition before
    /// declaring the bus desynchronized.
    pub fn default_desync_timeout(&self) -> Duration {
        self.cycle_period() * 4 + DESYNC_GUARD
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            unit_us: DEFAULT_UNIT_US,
            profile: ClockProfile::Scaled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_durations_follow_unit() {
        let timing = TimingConfig::scaled(200).unwrap();
        assert_eq!(timing.reset_pulse(), Duration::from_micros(600));
        assert_eq!(timing.clock_high(), Duration::from_micros(500));
        assert_eq!(timing.clock_low(), Duration::from_micros(500));
        assert_eq!(timing.read_offset(), Duration::from_micros(200));
        assert_eq!(timing.remaining_high(), Duration::from_micros(300));
    }

    #[test]
    fn half_unit_is_kept_for_odd_units() {
        let timing = TimingConfig::scaled(11).unwrap();
        assert_eq!(timing.clock_high(), Duration::from_nanos(27_500));
    }

    #[test]
    fn cycle_period_covers_reset_and_sixteen_clocks() {
        let timing = TimingConfig::scaled(1_000).unwrap();
        assert_eq!(timing.cycle_period(), Duration::from_millis(3 + 16 * 5));
    }

    #[test]
    fn fixed_profile_keeps_500us_window() {
        let timing = TimingConfig::new(100, ClockProfile::Fixed).unwrap();
        assert_eq!(timing.clock_high(), Duration::from_micros(500));
        assert_eq!(timing.reset_pulse(), Duration::from_micros(300));
    }

    #[test]
    fn fixed_profile_rejects_offset_past_window() {
        let err = TimingConfig::new(1_000, ClockProfile::Fixed).unwrap_err();
        assert!(matches!(err, ConfigError::ReadOffsetOutsideWindow { .. }));
        let err = TimingConfig::new(500, ClockProfile::Fixed).unwrap_err();
        assert!(matches!(err, ConfigError::ReadOffsetOutsideWindow { .. }));
    }

    #[test]
    fn rejects_units_outside_range() {
        assert!(matches!(
            TimingConfig::scaled(0),
            Err(ConfigError::UnitOutOfRange { unit_us: 0, .. })
        ));
        assert!(TimingConfig::scaled(MAX_UNIT_US + 1).is_err());
        assert!(TimingConfig::scaled(MIN_UNIT_US).is_ok());
        assert!(TimingConfig::scaled(MAX_UNIT_US).is_ok());
    }
}
