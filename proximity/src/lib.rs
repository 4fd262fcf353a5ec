use std::fmt;
use std::fmt::Display;
use std::time::Duration;

use embedded_hal::digital::ErrorKind;

/// Measurement failures shared by proximity devices and the sensor
/// drivers layered over them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProximityError {
    Hardware(ErrorKind),       // a line could not be claimed or driven
    Closed,                    // operation on a closed device or driver
    Timeout,                   // no echo within the wait window
    OutOfRange(u16),           // an out of range value was measured
    InvalidInterval(Duration), // invalid sampling interval
}

impl Display for ProximityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for ProximityError {}

pub trait Proximity {
    // set the expected interval between measurements
    fn set_interval(&mut self, interval: Duration) -> Result<(), ProximityError>;
    // the currently configured interval between measurements
    fn interval(&self) -> Duration;
    // take one proximity measurement in millimeters
    fn get_proximity(&mut self) -> Result<u16, ProximityError>;
    // release the underlying hardware; a no-op once released
    fn close(&mut self);
}
