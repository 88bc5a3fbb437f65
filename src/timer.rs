//! The single physical one-shot timer the dispatcher multiplexes.

use crate::{Millis, Timestamp};

/// Routine the timer calls, once, when an armed one-shot expires.
pub type ExpiryCallback = fn();

/// Driver contract for the hardware timer.
///
/// `arm_one_shot` and `stop` are only called with the timer interrupt
/// masked, so implementations need no locking of their own.
pub trait HalTimer {
    /// Longest delay a single reload can count down. Deadlines further out
    /// are reached in several hops.
    const MAX_RELOAD: Millis = Millis::from_ticks(u16::MAX as u32);

    /// Reload used when the next deadline is already due or closer than
    /// this, which postpones it slightly instead of loading a bogus delay.
    const MIN_RELOAD: Millis = Millis::from_ticks(1);

    /// Current value of the rolling tick counter.
    fn now(&self) -> Timestamp;

    /// Calls `callback` once, `delay` from now. Replaces any prior arming.
    fn arm_one_shot(&mut self, delay: Millis, callback: ExpiryCallback);

    /// Disarms the timer. Stopping a stopped timer is a no-op.
    fn stop(&mut self);
}
