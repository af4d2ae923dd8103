//! Pure decoding of a 5-bit bus sample into a tube reading.

use crate::hal::{DATA_MASK, DV_MASK};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One atomic read of the data port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TubeSample {
    data: u8,
    data_valid: bool,
}

impl TubeSample {
    /// Lines above bit 4 are ignored. DV is active low: a cleared bit 4
    /// means the data lines carry a position.
    pub fn from_lines(raw: u8) -> Self {
        Self {
            data: raw & DATA_MASK,
            data_valid: raw & DV_MASK == 0,
        }
    }

    pub fn new(data: u8, data_valid: bool) -> Self {
        Self {
            data: data & DATA_MASK,
            data_valid,
        }
    }

    pub fn data(&self) -> u8 {
        self.data
    }

    pub fn is_data_valid(&self) -> bool {
        self.data_valid
    }

    pub fn bit(&self, index: u8) -> bool {
        self.data & (1 << index) != 0
    }

    pub fn to_lines(&self) -> u8 {
        if self.data_valid {
            self.data
        } else {
            self.data | DV_MASK
        }
    }
}

/// Position reported by a tube, always within `1..=16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Position(u8);

impl Position {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 16;

    pub fn new(value: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&value).then_some(Self(value))
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Position {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("position {value} outside 1..=16"))
    }
}

impl From<Position> for u8 {
    fn from(position: Position) -> Self {
        position.0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Last meaningful value stored for a tube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "position", rename_all = "snake_case")]
pub enum Reading {
    Position(Position),
    Eating,
}

impl Reading {
    pub fn is_eating(&self) -> bool {
        matches!(self, Self::Eating)
    }
}

/// Weights applied to data lines 0..=3 when forming a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PositionWeighting {
    /// `{1, 2, 4, 8}`: every 4-bit code maps to a distinct position 1..=16.
    #[default]
    Binary,
    /// `{1, 1, 4, 8}`: lines 0 and 1 carry equal weight; reaches 1..=15.
    Legacy,
}

impl PositionWeighting {
    pub fn weights(&self) -> [u8; 4] {
        match self {
            Self::Binary => [1, 2, 4, 8],
            Self::Legacy => [1, 1, 4, 8],
        }
    }

    pub fn weighted_value(&self, sample: &TubeSample) -> u8 {
        self.weights()
            .iter()
            .enumerate()
            .filter(|(bit, _)| sample.bit(*bit as u8))
            .map(|(_, weight)| weight)
            .sum()
    }
}

/// Compute the new stored value for a tube from one sample.
///
/// A valid sample always overwrites. An invalid sample only changes the
/// stored value when all data lines are low right after position 1, which
/// marks the animal as eating; every other invalid sample holds the last
/// value.
pub fn decode(
    sample: TubeSample,
    previous: Option<Reading>,
    weighting: PositionWeighting,
) -> Option<Reading> {
    if sample.is_data_valid() {
        let value = 1 + weighting.weighted_value(&sample);
        return Position::new(value).map(Reading::Position).or(previous);
    }

    let at_first_position = matches!(previous, Some(Reading::Position(p)) if p.get() == 1);
    if sample.data() == 0 && at_first_position {
        Some(Reading::Eating)
    } else {
        previous
    }
}
