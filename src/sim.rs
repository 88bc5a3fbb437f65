//! Software stand-ins for the hardware timer and interrupt controller.
//!
//! Time only moves when the caller says so: [`Sim::advance`] elapses time
//! and delivers expiries the way the hardware would, synchronously and
//! with the interrupt masked for the duration of the callback.

use alloc::rc::Rc;
use core::cell::RefCell;

use crate::interrupt::InterruptMask;
use crate::timer::{ExpiryCallback, HalTimer};
use crate::{Millis, Timestamp};

#[derive(Default)]
struct SimState {
    ticks: u32,
    masked: bool,
    armed: Option<(u32, ExpiryCallback)>,
    arm_count: u32,
    unmasked_accesses: u32,
}

impl SimState {
    fn touch_timer(&mut self) {
        if !self.masked {
            self.unmasked_accesses += 1;
        }
    }
}

/// Shared handle to a simulated clock. Clones observe the same clock.
#[derive(Clone, Default)]
pub struct Sim {
    shared: Rc<RefCell<SimState>>,
}

impl Sim {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timer(&self) -> SimTimer {
        SimTimer {
            shared: self.shared.clone(),
        }
    }

    pub fn interrupts(&self) -> SimInterrupts {
        SimInterrupts {
            shared: self.shared.clone(),
        }
    }

    pub fn now(&self) -> Timestamp {
        Timestamp::from_ticks(self.shared.borrow().ticks)
    }

    /// Moves the counter without delivering expiries.
    pub fn set_time(&self, ticks: u32) {
        self.shared.borrow_mut().ticks = ticks;
    }

    pub fn is_armed(&self) -> bool {
        self.shared.borrow().armed.is_some()
    }

    /// When the armed one-shot will expire.
    pub fn expiry(&self) -> Option<Timestamp> {
        self.shared
            .borrow()
            .armed
            .map(|(expiry, _)| Timestamp::from_ticks(expiry))
    }

    /// Number of times the timer was armed since creation.
    pub fn arm_count(&self) -> u32 {
        self.shared.borrow().arm_count
    }

    /// Number of times the timer was armed or stopped with the interrupt
    /// unmasked.
    pub fn unmasked_accesses(&self) -> u32 {
        self.shared.borrow().unmasked_accesses
    }

    pub fn is_masked(&self) -> bool {
        self.shared.borrow().masked
    }

    /// Elapses `ms` without delivering expiries, as a task body running
    /// inside the expiry interrupt would.
    pub fn busy(&self, ms: u32) {
        let mut state = self.shared.borrow_mut();
        state.ticks = state.ticks.wrapping_add(ms);
    }

    /// Elapses `ms`, invoking the armed callback whenever its expiry is
    /// reached. The callback may re-arm the timer.
    pub fn advance(&self, ms: u32) {
        let mut left = ms;
        loop {
            let callback = {
                let mut state = self.shared.borrow_mut();
                let Some((expiry, callback)) = state.armed else {
                    state.ticks = state.ticks.wrapping_add(left);
                    return;
                };
                let until = expiry.wrapping_sub(state.ticks);
                if until > left {
                    state.ticks = state.ticks.wrapping_add(left);
                    return;
                }
                state.ticks = expiry;
                state.armed = None;
                left -= until;
                callback
            };
            self.interrupt(callback);
        }
    }

    fn interrupt(&self, callback: ExpiryCallback) {
        let was_masked = core::mem::replace(&mut self.shared.borrow_mut().masked, true);
        callback();
        self.shared.borrow_mut().masked = was_masked;
    }
}

/// [`HalTimer`] over a [`Sim`] clock, with the default reload range.
pub struct SimTimer {
    shared: Rc<RefCell<SimState>>,
}

impl HalTimer for SimTimer {
    fn now(&self) -> Timestamp {
        Timestamp::from_ticks(self.shared.borrow().ticks)
    }

    fn arm_one_shot(&mut self, delay: Millis, callback: ExpiryCallback) {
        let mut state = self.shared.borrow_mut();
        state.touch_timer();
        let expiry = state.ticks.wrapping_add(delay.ticks());
        state.armed = Some((expiry, callback));
        state.arm_count += 1;
    }

    fn stop(&mut self) {
        let mut state = self.shared.borrow_mut();
        state.touch_timer();
        state.armed = None;
    }
}

/// [`InterruptMask`] over a [`Sim`] interrupt flag.
pub struct SimInterrupts {
    shared: Rc<RefCell<SimState>>,
}

impl InterruptMask for SimInterrupts {
    fn mask(&self) -> bool {
        !core::mem::replace(&mut self.shared.borrow_mut().masked, true)
    }

    fn unmask(&self) {
        self.shared.borrow_mut().masked = false;
    }
}
