//! Routing of the fixed timer callback to the one live dispatcher.

use core::cell::UnsafeCell;

use crate::interrupt::{CsGuard, InterruptMask};

/// Type-erased pointer to a dispatcher plus the trampoline that knows its
/// concrete type.
#[derive(Clone, Copy)]
pub(crate) struct Binding {
    instance: *const (),
    fire: unsafe fn(*const ()),
}

impl Binding {
    /// # Safety
    ///
    /// `instance` must remain valid for `fire` until the binding is
    /// released.
    pub unsafe fn new(instance: *const (), fire: unsafe fn(*const ())) -> Self {
        Self { instance, fire }
    }
}

/// The hardware timer has exactly one owner at a time.
struct TimerOwner(UnsafeCell<Option<Binding>>);

unsafe impl Sync for TimerOwner {}

impl TimerOwner {
    fn get_mut<I: InterruptMask + ?Sized>(&self, _cs: &CsGuard<'_, I>) -> *mut Option<Binding> {
        self.0.get()
    }
}

static TIMER_OWNER: TimerOwner = TimerOwner(UnsafeCell::new(None));

/// Claims the timer for `binding`. Returns `false` if it is already owned.
pub(crate) fn acquire<I: InterruptMask + ?Sized>(cs: &CsGuard<'_, I>, binding: Binding) -> bool {
    let owner = unsafe { &mut *TIMER_OWNER.get_mut(cs) };
    if owner.is_some() {
        return false;
    }
    *owner = Some(binding);
    true
}

pub(crate) fn release<I: InterruptMask + ?Sized>(cs: &CsGuard<'_, I>) {
    unsafe { *TIMER_OWNER.get_mut(cs) = None };
}

/// Callback handed to [`HalTimer::arm_one_shot`](crate::HalTimer::arm_one_shot).
pub(crate) fn on_timer_expiry() {
    // Runs in interrupt context. The owner slot is only ever written with
    // this interrupt masked, so it cannot change underneath us.
    let binding = unsafe { *TIMER_OWNER.0.get() };

    match binding {
        Some(binding) => unsafe { (binding.fire)(binding.instance) },
        None => {
            #[cfg(feature = "defmt")]
            defmt::warn!("[EXPIRY] no dispatcher owns the timer");
        }
    }
}
