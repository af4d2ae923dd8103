use crate::error::IoError;

/// Number of tubes multiplexed onto the data bus.
pub const TUBE_COUNT: usize = 16;

/// Output mask with both control lines low.
pub const CLEAR: u8 = 0b00;
/// Output mask driving the reset line (bit 0) high.
pub const RESET_HIGH: u8 = 0b01;
/// Output mask driving the clock line (bit 1) high.
pub const CLOCK_HIGH: u8 = 0b10;

/// Lines 0..=3 of the input port carry the position data.
pub const DATA_MASK: u8 = 0b0_1111;
/// Line 4 of the input port carries the Data-Valid flag.
pub const DV_MASK: u8 = 0b1_0000;

/// The 2-line control port (reset, clock).
pub trait DigitalOutput: Send {
    fn write_lines(&mut self, mask: u8) -> Result<(), IoError>;
}

/// The 5-line data port (four data lines plus DV).
pub trait DigitalInput: Send {
    fn read_lines(&mut self) -> Result<u8, IoError>;
}

impl<T: DigitalOutput + ?Sized> DigitalOutput for Box<T> {
    fn write_lines(&mut self, mask: u8) -> Result<(), IoError> {
        (**self).write_lines(mask)
    }
}

impl<T: DigitalInput + ?Sized> DigitalInput for Box<T> {
    fn read_lines(&mut self) -> Result<u8, IoError> {
        (**self).read_lines()
    }
}
