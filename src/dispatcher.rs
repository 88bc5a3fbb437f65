use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::error::Error;
use crate::expiry::{self, Binding};
use crate::interrupt::{CsGuard, InterruptMask};
use crate::task::{PendingTask, ScheduledTask, TaskRef};
use crate::timer::HalTimer;
use crate::timetable::Timetable;
use crate::{MAX_DELAY, Millis, Timestamp};

/// Schedule shared between foreground calls and the expiry interrupt.
struct State<T> {
    timer: T,
    timetable: Timetable,
    /// Entries taken off the timetable by the firing pass in progress.
    in_flight: Vec<ScheduledTask>,
    /// Tick counter as of the last refresh.
    timestamp: Timestamp,
    /// Deadline the timer is counting down to while `timer_armed`.
    head_timestamp: Timestamp,
    timer_armed: bool,
    firing: bool,
    /// The dispatcher was dropped from inside a task body. The pass in
    /// progress stops and frees the state once it unwinds.
    orphaned: bool,
}

impl<T: HalTimer> State<T> {
    fn refresh_timestamp(&mut self) {
        self.timestamp = self.timer.now();
    }

    /// A periodic task cancelled from inside a task body must not be put
    /// back once the firing pass completes.
    fn cancel_in_flight(&mut self, task: &TaskRef) -> bool {
        let Some(idx) = self
            .in_flight
            .iter()
            .position(|entry| entry.period().is_some() && entry.is_task(task))
        else {
            return false;
        };
        self.in_flight.remove(idx);
        true
    }

    /// Keeps the hardware timer in step with the earliest deadline. Called
    /// after every change to the timetable.
    fn update_head_and_timer(&mut self) {
        let Some(head) = self.timetable.head_deadline() else {
            self.timer.stop();
            self.timer_armed = false;

            #[cfg(feature = "defmt")]
            defmt::debug!("[TIMER] timetable empty, stopped");
            return;
        };

        if head == self.head_timestamp && self.timer_armed {
            return;
        }

        self.timer.stop();
        self.refresh_timestamp();

        // A head that already slipped into the past is postponed by the
        // minimum reload. One beyond the hardware range is reached in hops,
        // each expiry re-running this step.
        let delta = head
            .checked_duration_since(self.timestamp)
            .map_or(0, |delta| delta.ticks());
        let reload = delta
            .max(T::MIN_RELOAD.ticks())
            .min(T::MAX_RELOAD.ticks());

        #[cfg(feature = "defmt")]
        defmt::debug!(
            "[TIMER] now: {}, head: {}, delta: {}, reload: {}",
            self.timestamp.ticks(),
            head.ticks(),
            delta,
            reload
        );

        self.timer
            .arm_one_shot(Millis::from_ticks(reload), expiry::on_timer_expiry);
        self.head_timestamp = head;
        self.timer_armed = true;
    }
}

struct Inner<T, I> {
    interrupts: I,
    state: UnsafeCell<State<T>>,
}

impl<T: HalTimer, I: InterruptMask> Inner<T, I> {
    fn state_mut(&self, _cs: &CsGuard<'_, I>) -> *mut State<T> {
        self.state.get()
    }

    /// Runs `f` on the schedule with the timer interrupt masked.
    ///
    /// `f` must not call back into the dispatcher; task bodies are always
    /// run outside of it.
    fn with_state<R>(&self, f: impl FnOnce(&mut State<T>) -> R) -> R {
        let cs = CsGuard::new(&self.interrupts);
        let state = unsafe { &mut *self.state_mut(&cs) };
        f(state)
    }

    fn add_task(&self, task: &TaskRef, delay: Millis, period: Option<Millis>) {
        let delay = clamp_delay(delay);
        let period = period.map(clamp_delay);

        self.with_state(|state| {
            state.refresh_timestamp();
            let mut entry = ScheduledTask::new(task, state.timestamp, delay, period);
            entry.set_late(state.firing);

            #[cfg(feature = "defmt")]
            defmt::debug!(
                "[SCHEDULE] now: {}, delay: {}, abs dl: {}, periodic: {}",
                state.timestamp.ticks(),
                delay.ticks(),
                entry.abs_deadline().ticks(),
                period.is_some()
            );

            state.timetable.insert(entry);
            state.update_head_and_timer();
        })
    }

    fn remove_task(&self, task: &TaskRef) -> bool {
        self.with_state(|state| {
            let removed = if state.timetable.remove(task).is_some() {
                state.update_head_and_timer();
                true
            } else {
                // The timetable is untouched, and the pass in progress
                // reconciles when it finishes.
                state.cancel_in_flight(task)
            };

            #[cfg(feature = "defmt")]
            defmt::debug!("[REMOVE] found: {}, remaining: {}", removed, state.timetable.len());

            removed
        })
    }

    /// Runs every due task, then re-queues the periodic ones and re-arms
    /// the timer. Only ever reached from the expiry interrupt.
    ///
    /// Returns `true` if a task body dropped the dispatcher, in which case
    /// the caller must free `self`.
    fn process_timetable(&self) -> bool {
        let started = self.with_state(|state| {
            // The one-shot that got us here has expired.
            state.timer_armed = false;
            if state.timetable.is_empty() {
                return false;
            }
            state.firing = true;
            true
        });
        if !started {
            return false;
        }

        // Task bodies take time, so the clock is re-read before every step
        // and entries that came due meanwhile fire in this same pass.
        loop {
            let next = self.with_state(|state| {
                if state.orphaned {
                    return None;
                }
                state.refresh_timestamp();
                let entry = state.timetable.pop_due(state.timestamp)?;
                let task = entry.upgrade();

                match task {
                    Some(_) => {
                        #[cfg(feature = "defmt")]
                        defmt::debug!(
                            "[FIRE] now: {}, abs dl: {}",
                            state.timestamp.ticks(),
                            entry.abs_deadline().ticks()
                        );
                        state.in_flight.push(entry);
                    }
                    None => {
                        #[cfg(feature = "defmt")]
                        defmt::warn!(
                            "[DANGLING] task dropped before its deadline {}",
                            entry.abs_deadline().ticks()
                        );
                    }
                }
                Some(task)
            });

            match next {
                Some(Some(task)) => task.run(),
                Some(None) => {}
                None => break,
            }
        }

        self.with_state(|state| {
            if state.orphaned {
                #[cfg(feature = "defmt")]
                defmt::debug!("[DISPATCHER] dropped during firing, pass abandoned");
                return true;
            }

            state.refresh_timestamp();
            let now = state.timestamp;

            for entry in state.in_flight.drain(..) {
                if !entry.is_alive() {
                    continue;
                }
                if let Some(entry) = entry.into_rearmed(now) {
                    #[cfg(feature = "defmt")]
                    defmt::debug!("[REARM] next dl: {}", entry.abs_deadline().ticks());
                    state.timetable.insert(entry);
                }
            }
            state.timetable.clear_late();
            state.firing = false;

            state.update_head_and_timer();
            false
        })
    }
}

fn clamp_delay(delay: Millis) -> Millis {
    Millis::from_ticks(delay.ticks().min(MAX_DELAY.ticks()))
}

/// Trampoline stored in the timer owner slot.
unsafe fn fire<T: HalTimer, I: InterruptMask>(instance: *const ()) {
    let inner = instance.cast::<Inner<T, I>>();
    let orphaned = unsafe { &*inner }.process_timetable();
    if orphaned {
        // Drop deferred the free to us; nothing borrows the state anymore.
        drop(unsafe { Box::from_raw(inner.cast_mut()) });
    }
}

/// Multiplexes the one hardware timer `T` into any number of one-shot and
/// periodic tasks.
///
/// Only one dispatcher may exist at a time; it owns the timer and receives
/// its expiries until dropped.
///
/// Tasks are held weakly. A task whose every [`TaskRef`] was dropped before
/// its deadline is silently cancelled.
pub struct Dispatcher<T: HalTimer + 'static, I: InterruptMask + 'static> {
    inner: NonNull<Inner<T, I>>,
    _owns: PhantomData<Inner<T, I>>,
}

impl<T: HalTimer + 'static, I: InterruptMask + 'static> Dispatcher<T, I> {
    /// Takes ownership of the hardware timer.
    ///
    /// Fails with [`Error::TimerUnavailable`] while another dispatcher is
    /// alive.
    pub fn new(timer: T, interrupts: I) -> Result<Self, Error> {
        let inner = NonNull::from(Box::leak(Box::new(Inner {
            interrupts,
            state: UnsafeCell::new(State {
                timer,
                timetable: Timetable::new(),
                in_flight: Vec::new(),
                timestamp: Timestamp::from_ticks(0),
                head_timestamp: Timestamp::from_ticks(0),
                timer_armed: false,
                firing: false,
                orphaned: false,
            }),
        })));

        let acquired = {
            let this = unsafe { inner.as_ref() };
            let cs = CsGuard::new(&this.interrupts);
            let binding = unsafe { Binding::new(inner.as_ptr().cast_const().cast(), fire::<T, I>) };
            let acquired = expiry::acquire(&cs, binding);
            if acquired {
                let state = unsafe { &mut *this.state_mut(&cs) };
                state.timer.stop();
            }
            acquired
        };

        if !acquired {
            #[cfg(feature = "defmt")]
            defmt::warn!("[DISPATCHER] timer already owned");
            drop(unsafe { Box::from_raw(inner.as_ptr()) });
            return Err(Error::TimerUnavailable);
        }

        Ok(Self {
            inner,
            _owns: PhantomData,
        })
    }

    fn inner(&self) -> &Inner<T, I> {
        unsafe { self.inner.as_ref() }
    }

    /// Runs `task` once, `delay` from now.
    ///
    /// Delays longer than [`MAX_DELAY`](crate::MAX_DELAY) are shortened to it.
    pub fn add_task_one_shot(&self, task: &TaskRef, delay: Millis) {
        self.inner().add_task(task, delay, None);
    }

    /// Runs `task` every `period`, starting `period` from now, until it is
    /// removed or dropped.
    ///
    /// Periods longer than [`MAX_DELAY`](crate::MAX_DELAY) are shortened to it.
    pub fn add_task_periodic(&self, task: &TaskRef, period: Millis) {
        self.inner().add_task(task, period, Some(period));
    }

    /// Cancels the earliest pending occurrence of `task`. Returns whether
    /// one was found.
    pub fn remove_task(&self, task: &TaskRef) -> bool {
        self.inner().remove_task(task)
    }

    /// Whether `task` has a pending occurrence. Entries being fired by the
    /// current expiry are not pending.
    pub fn is_scheduled(&self, task: &TaskRef) -> bool {
        self.inner().with_state(|state| state.timetable.contains(task))
    }

    /// Number of pending occurrences.
    pub fn len(&self) -> usize {
        self.inner().with_state(|state| state.timetable.len())
    }

    pub fn is_empty(&self) -> bool {
        self.inner().with_state(|state| state.timetable.is_empty())
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.inner().with_state(|state| state.timetable.head_deadline())
    }

    pub fn is_timer_armed(&self) -> bool {
        self.inner().with_state(|state| state.timer_armed)
    }

    /// Deadline the hardware timer was last armed for, if it is armed.
    pub fn armed_deadline(&self) -> Option<Timestamp> {
        self.inner()
            .with_state(|state| state.timer_armed.then_some(state.head_timestamp))
    }

    /// Pending entries in the order they will fire.
    pub fn pending(&self) -> Vec<PendingTask> {
        self.inner().with_state(|state| state.timetable.snapshot())
    }
}

impl<T: HalTimer + 'static, I: InterruptMask + 'static> Drop for Dispatcher<T, I> {
    fn drop(&mut self) {
        let firing = {
            let inner = self.inner();
            let cs = CsGuard::new(&inner.interrupts);
            let state = unsafe { &mut *inner.state_mut(&cs) };
            state.timer.stop();
            state.timer_armed = false;
            state.orphaned = state.firing;
            expiry::release(&cs);
            state.firing
        };

        #[cfg(feature = "defmt")]
        defmt::debug!("[DISPATCHER] released timer, deferred: {}", firing);

        // A firing pass still holds the state; `fire` frees it on the way out.
        if !firing {
            drop(unsafe { Box::from_raw(self.inner.as_ptr()) });
        }
    }
}
