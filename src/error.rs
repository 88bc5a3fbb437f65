use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Another live [`Dispatcher`](crate::Dispatcher) already owns the
    /// hardware timer. Drop it before constructing a new one.
    TimerUnavailable,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TimerUnavailable => {
                write!(f, "the hardware timer is already owned by a dispatcher")
            }
        }
    }
}

impl core::error::Error for Error {}
