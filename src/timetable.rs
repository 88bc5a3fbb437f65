use alloc::vec::Vec;

use crate::Timestamp;
use crate::task::{PendingTask, ScheduledTask, TaskRef};

/// Entries ordered by ascending deadline. Entries sharing a deadline stay
/// in insertion order.
///
/// Every pending deadline lies within half the counter range of the
/// current time, so the wrapping order of [`Timestamp`] is total over the
/// table.
#[derive(Debug, Default)]
pub(crate) struct Timetable {
    entries: Vec<ScheduledTask>,
}

impl Timetable {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, task: ScheduledTask) {
        let deadline = task.abs_deadline();
        let idx = self
            .entries
            .partition_point(|queued| queued.abs_deadline() <= deadline);
        self.entries.insert(idx, task);
    }

    /// Removes the earliest entry for `task`.
    pub fn remove(&mut self, task: &TaskRef) -> Option<ScheduledTask> {
        let idx = self.entries.iter().position(|queued| queued.is_task(task))?;
        Some(self.entries.remove(idx))
    }

    pub fn contains(&self, task: &TaskRef) -> bool {
        self.entries.iter().any(|queued| queued.is_task(task))
    }

    pub fn peek(&self) -> Option<&ScheduledTask> {
        self.entries.first()
    }

    pub fn head_deadline(&self) -> Option<Timestamp> {
        self.peek().map(ScheduledTask::abs_deadline)
    }

    /// Takes the earliest entry if it is due at `now` and was queued before
    /// the current firing pass.
    ///
    /// Only the head is considered. A late head ends the pass even when
    /// older entries behind it have come due; those fire on the next
    /// expiry, still in deadline order.
    pub fn pop_due(&mut self, now: Timestamp) -> Option<ScheduledTask> {
        match self.peek() {
            Some(head) if head.is_due(now) && !head.is_late() => Some(self.entries.remove(0)),
            _ => None,
        }
    }

    pub fn clear_late(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.set_late(false);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<PendingTask> {
        self.entries.iter().map(ScheduledTask::to_pending).collect()
    }
}
