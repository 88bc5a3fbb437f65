//! Masking of the timer interrupt around dispatcher state mutations.

/// Masks and unmasks the interrupt that delivers timer expiries.
///
/// The primitives themselves are not required to nest. [`CsGuard`] keeps
/// track of whether it was the one that masked, so entering a critical
/// section from interrupt context (already masked) never unmasks early.
pub trait InterruptMask {
    /// Masks the interrupt. Returns `true` if it was unmasked before, in
    /// which case the caller must pair this with [`unmask`](Self::unmask).
    fn mask(&self) -> bool;

    fn unmask(&self);
}

/// A critical section which restores its previous state on drop.
pub(crate) struct CsGuard<'a, I: InterruptMask + ?Sized> {
    interrupts: &'a I,
    restore: bool,
}

impl<'a, I: InterruptMask + ?Sized> CsGuard<'a, I> {
    pub fn new(interrupts: &'a I) -> Self {
        let restore = interrupts.mask();
        #[cfg(feature = "defmt")]
        defmt::trace!("[CS] →");

        Self {
            interrupts,
            restore,
        }
    }
}

impl<I: InterruptMask + ?Sized> Drop for CsGuard<'_, I> {
    fn drop(&mut self) {
        if self.restore {
            #[cfg(feature = "defmt")]
            defmt::trace!("[CS] ←");
            self.interrupts.unmask();
        }
    }
}

#[cfg(feature = "cortex-m")]
pub use self::cortex::Primask;

#[cfg(feature = "cortex-m")]
mod cortex {
    use cortex_m::interrupt;
    use cortex_m::register::primask;

    /// Masks every configurable-priority interrupt through PRIMASK.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct Primask;

    impl super::InterruptMask for Primask {
        fn mask(&self) -> bool {
            let primask = primask::read();
            interrupt::disable();
            primask.is_active()
        }

        fn unmask(&self) {
            unsafe { interrupt::enable() }
        }
    }
}

#[cfg(any(test, feature = "critical-section"))]
pub use self::portable::CriticalSectionMask;

#[cfg(any(test, feature = "critical-section"))]
mod portable {
    use core::cell::Cell;

    use critical_section::RestoreState;

    /// Masks through whatever `critical-section` implementation the
    /// final binary links in (`avr-device`, `cortex-m`, `std`, ...).
    #[derive(Default)]
    pub struct CriticalSectionMask {
        held: Cell<Option<RestoreState>>,
    }

    impl CriticalSectionMask {
        pub const fn new() -> Self {
            Self {
                held: Cell::new(None),
            }
        }
    }

    impl super::InterruptMask for CriticalSectionMask {
        fn mask(&self) -> bool {
            let held = self.held.take();
            if held.is_some() {
                self.held.set(held);
                return false;
            }

            // Released by `unmask`, which the guard calls exactly once.
            let state = unsafe { critical_section::acquire() };
            self.held.set(Some(state));
            true
        }

        fn unmask(&self) {
            if let Some(state) = self.held.take() {
                unsafe { critical_section::release(state) };
            }
        }
    }
}
