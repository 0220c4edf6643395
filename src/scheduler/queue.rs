//! Dispatch queue: a min-heap of pending task entries.
//!
//! Entries are ordered by `(due_at, submitted_at, id)` ascending — the
//! tie-break chain of the dispatch contract: earlier due time wins; equal
//! due time resolves by earlier submission; equal submission resolves by
//! id. Ids are monotonic, so the ordering is total and stable.
//!
//! Cancellation uses lazy deletion: cancelled tasks keep their heap entry
//! and are skipped at pop time by the dispatch loop, which checks the
//! record's state before running it.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use smallvec::SmallVec;

use crate::types::{TaskId, Time};

#[derive(Debug, Clone, Eq, PartialEq)]
struct QueueEntry {
    due_at: Time,
    submitted_at: Time,
    task: TaskId,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest entry first).
        other
            .due_at
            .cmp(&self.due_at)
            .then_with(|| other.submitted_at.cmp(&self.submitted_at))
            .then_with(|| other.task.cmp(&self.task))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of pending task entries ordered by the dispatch contract.
#[derive(Debug, Default)]
pub(crate) struct DispatchQueue {
    heap: BinaryHeap<QueueEntry>,
}

impl DispatchQueue {
    /// Creates a new empty queue.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries in the queue.
    ///
    /// Includes stale entries for cancelled tasks that have not been
    /// popped yet.
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true if the queue is empty.
    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Adds an entry for a task.
    pub(crate) fn insert(&mut self, task: TaskId, due_at: Time, submitted_at: Time) {
        self.heap.push(QueueEntry {
            due_at,
            submitted_at,
            task,
        });
    }

    /// Returns the earliest due time, if any.
    #[must_use]
    pub(crate) fn peek_due_at(&self) -> Option<Time> {
        self.heap.peek().map(|e| e.due_at)
    }

    /// Pops all tasks whose due time is `<= now`, in dispatch order.
    pub(crate) fn pop_due(&mut self, now: Time) -> SmallVec<[TaskId; 4]> {
        let mut due = SmallVec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.due_at <= now {
                if let Some(entry) = self.heap.pop() {
                    due.push(entry.task);
                } else {
                    break;
                }
            } else {
                break;
            }
        }
        due
    }

    /// Clears all entries.
    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn task(n: u64) -> TaskId {
        TaskId::from_u64(n)
    }

    #[test]
    fn empty_queue_has_no_due_time() {
        init_test("empty_queue_has_no_due_time");
        let queue = DispatchQueue::new();
        crate::assert_with_log!(queue.is_empty(), "queue starts empty", true, queue.is_empty());
        crate::assert_with_log!(
            queue.peek_due_at().is_none(),
            "empty queue has no due time",
            None::<Time>,
            queue.peek_due_at()
        );
        crate::test_complete!("empty_queue_has_no_due_time");
    }

    #[test]
    fn earliest_due_time_wins() {
        init_test("earliest_due_time_wins");
        let mut queue = DispatchQueue::new();
        queue.insert(task(1), Time::from_millis(200), Time::ZERO);
        queue.insert(task(2), Time::from_millis(100), Time::ZERO);
        queue.insert(task(3), Time::from_millis(150), Time::ZERO);

        crate::assert_with_log!(
            queue.peek_due_at() == Some(Time::from_millis(100)),
            "earliest due time is kept at top",
            Some(Time::from_millis(100)),
            queue.peek_due_at()
        );

        let order = queue.pop_due(Time::from_millis(200));
        crate::assert_with_log!(
            order.as_slice() == [task(2), task(3), task(1)],
            "pop order follows due time",
            [task(2), task(3), task(1)],
            order.as_slice()
        );
        crate::test_complete!("earliest_due_time_wins");
    }

    #[test]
    fn equal_due_times_resolve_by_submission_then_id() {
        init_test("equal_due_times_resolve_by_submission_then_id");
        let due = Time::from_millis(50);
        let mut queue = DispatchQueue::new();
        // Same due time, later submission.
        queue.insert(task(9), due, Time::from_millis(20));
        // Same due time and submission, ids break the tie.
        queue.insert(task(4), due, Time::from_millis(10));
        queue.insert(task(3), due, Time::from_millis(10));

        let order = queue.pop_due(due);
        crate::assert_with_log!(
            order.as_slice() == [task(3), task(4), task(9)],
            "submission then id break due-time ties",
            [task(3), task(4), task(9)],
            order.as_slice()
        );
        crate::test_complete!("equal_due_times_resolve_by_submission_then_id");
    }

    #[test]
    fn pop_due_leaves_future_entries() {
        init_test("pop_due_leaves_future_entries");
        let mut queue = DispatchQueue::new();
        queue.insert(task(1), Time::from_millis(100), Time::ZERO);
        queue.insert(task(2), Time::from_millis(300), Time::ZERO);

        let due = queue.pop_due(Time::from_millis(100));
        crate::assert_with_log!(
            due.as_slice() == [task(1)],
            "only due entries pop",
            [task(1)],
            due.as_slice()
        );
        crate::assert_with_log!(
            queue.peek_due_at() == Some(Time::from_millis(300)),
            "future entry remains",
            Some(Time::from_millis(300)),
            queue.peek_due_at()
        );
        crate::test_complete!("pop_due_leaves_future_entries");
    }

    #[test]
    fn clear_empties_the_queue() {
        init_test("clear_empties_the_queue");
        let mut queue = DispatchQueue::new();
        queue.insert(task(1), Time::from_millis(10), Time::ZERO);
        queue.insert(task(2), Time::from_millis(20), Time::ZERO);
        queue.clear();
        crate::assert_with_log!(queue.is_empty(), "queue cleared", true, queue.is_empty());
        crate::test_complete!("clear_empties_the_queue");
    }
}
