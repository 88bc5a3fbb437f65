#![no_std]

//! Time dispatcher: multiplexes a single one-shot hardware timer into an
//! arbitrary number of one-shot and periodic tasks.
//!
//! Tasks are registered with a [`Dispatcher`], which keeps them in a
//! deadline-ordered timetable and programs the hardware timer for the
//! earliest pending deadline. When the timer expires, its callback is
//! routed back into the live dispatcher, which runs every due task and
//! re-arms the timer.

extern crate alloc;
#[cfg(test)]
extern crate std;

pub use fugit;

pub mod dispatcher;
pub mod error;
pub mod interrupt;
pub mod task;
pub mod timer;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

mod expiry;
mod timetable;

pub use dispatcher::Dispatcher;
pub use error::Error;
pub use interrupt::InterruptMask;
pub use task::{PendingTask, Task, TaskRef};
pub use timer::HalTimer;

/// Rolling millisecond counter. Comparisons wrap around.
pub type Timestamp = fugit::TimerInstantU32<1_000>;

/// Delays and periods, in milliseconds.
pub type Millis = fugit::MillisDurationU32;

/// Longest delay or period the dispatcher accepts. Anything longer would
/// wrap past the half of the counter range that orders after `now`.
pub const MAX_DELAY: Millis = Millis::from_ticks(i32::MAX as u32);

/// `now + delay`, wrapping at the counter width.
pub(crate) fn deadline_after(now: Timestamp, delay: Millis) -> Timestamp {
    Timestamp::from_ticks(now.ticks().wrapping_add(delay.ticks()))
}
