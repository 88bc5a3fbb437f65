use alloc::rc::{Rc, Weak};

use crate::{Millis, Timestamp, deadline_after};

/// A unit of work run by the dispatcher at its deadline.
///
/// `run` executes to completion, possibly in interrupt context. It must not
/// block, and has no error channel: failures are the task's own business.
pub trait Task {
    fn run(&self);
}

impl<F: Fn()> Task for F {
    fn run(&self) {
        self()
    }
}

/// Caller-held handle to a task.
///
/// The dispatcher only keeps a weak reference: dropping the last `TaskRef`
/// cancels every pending occurrence of the task.
pub type TaskRef = Rc<dyn Task>;

#[derive(Debug)]
pub(crate) struct ScheduledTask {
    deadline: Timestamp,
    period: Option<Millis>,
    task: Weak<dyn Task>,
    /// Queued while a firing pass was in progress; not eligible to fire
    /// until that pass completes.
    late: bool,
}

impl ScheduledTask {
    pub fn new(task: &TaskRef, now: Timestamp, delay: Millis, period: Option<Millis>) -> Self {
        Self {
            deadline: deadline_after(now, delay),
            period,
            task: Rc::downgrade(task),
            late: false,
        }
    }

    pub fn abs_deadline(&self) -> Timestamp {
        self.deadline
    }

    pub fn period(&self) -> Option<Millis> {
        self.period
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        self.deadline <= now
    }

    pub fn is_late(&self) -> bool {
        self.late
    }

    pub fn set_late(&mut self, late: bool) {
        self.late = late;
    }

    pub fn upgrade(&self) -> Option<TaskRef> {
        self.task.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.task.strong_count() > 0
    }

    /// Identity is the task allocation, which stays put for as long as any
    /// weak reference to it exists.
    pub fn is_task(&self, task: &TaskRef) -> bool {
        core::ptr::addr_eq(self.task.as_ptr(), Rc::as_ptr(task))
    }

    /// Next occurrence of a periodic entry, `period` after `now`.
    pub fn into_rearmed(self, now: Timestamp) -> Option<Self> {
        let period = self.period?;
        Some(Self {
            deadline: deadline_after(now, period),
            late: false,
            ..self
        })
    }

    pub fn to_pending(&self) -> PendingTask {
        PendingTask {
            deadline: self.deadline,
            period: self.period,
            task: self.task.clone(),
        }
    }
}

/// Snapshot of one timetable entry.
#[derive(Debug, Clone)]
pub struct PendingTask {
    deadline: Timestamp,
    period: Option<Millis>,
    task: Weak<dyn Task>,
}

impl PendingTask {
    pub fn deadline(&self) -> Timestamp {
        self.deadline
    }

    /// `None` for one-shot entries.
    pub fn period(&self) -> Option<Millis> {
        self.period
    }

    /// The task, unless its owner has already dropped it.
    pub fn task(&self) -> Option<TaskRef> {
        self.task.upgrade()
    }

    pub fn is_task(&self, task: &TaskRef) -> bool {
        core::ptr::addr_eq(self.task.as_ptr(), Rc::as_ptr(task))
    }
}
