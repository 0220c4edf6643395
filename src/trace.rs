//! Scheduling trace capture.
//!
//! The scheduler records every scheduling decision into a bounded buffer.
//! Because execution is deterministic, the trace of a run is itself a
//! complete witness of the schedule: tests assert dispatch order against
//! it instead of instrumenting task bodies.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::types::{TaskId, Time};

/// One scheduling event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TraceEvent {
    /// A task was admitted into the dispatch queue.
    Scheduled {
        /// The admitted task.
        task: TaskId,
        /// When the task becomes eligible to run.
        due_at: Time,
        /// When the task was submitted.
        submitted_at: Time,
    },
    /// A continuation was attached to a parent task.
    ContinuationAttached {
        /// The task the continuation was attached to.
        parent: TaskId,
        /// The continuation task.
        task: TaskId,
    },
    /// A task body started executing.
    Dispatched {
        /// The dispatched task.
        task: TaskId,
        /// Clock reading at dispatch.
        at: Time,
    },
    /// A task body returned a value.
    Completed {
        /// The completed task.
        task: TaskId,
        /// Clock reading at completion.
        at: Time,
    },
    /// A task body returned an error or panicked.
    Failed {
        /// The failed task.
        task: TaskId,
        /// Clock reading at failure.
        at: Time,
    },
    /// A task was cancelled before it started.
    Cancelled {
        /// The cancelled task.
        task: TaskId,
        /// Clock reading at cancellation.
        at: Time,
    },
    /// The virtual clock jumped to the next deadline.
    TimeAdvanced {
        /// Clock reading before the jump.
        from: Time,
        /// Clock reading after the jump.
        to: Time,
    },
}

/// Bounded ring of trace events. Oldest events are dropped once full.
#[derive(Debug)]
pub struct TraceBuffer {
    events: VecDeque<TraceEvent>,
    capacity: usize,
    dropped: u64,
}

impl TraceBuffer {
    /// Creates a buffer holding at most `capacity` events. A capacity of
    /// zero disables capture.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Records an event, evicting the oldest if the buffer is full.
    pub fn push(&mut self, event: TraceEvent) {
        if self.capacity == 0 {
            self.dropped += 1;
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    /// Returns the number of buffered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if no events are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns the number of events dropped due to capacity.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Clears all buffered events.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn snapshot(&self) -> Vec<TraceEvent> {
        self.events.iter().cloned().collect()
    }
}

/// Shared handle to a [`TraceBuffer`].
///
/// Cloning is cheap; all clones observe the same buffer.
#[derive(Debug, Clone)]
pub struct TraceHandle {
    inner: Arc<Mutex<TraceBuffer>>,
}

impl TraceHandle {
    /// Creates a handle over a fresh buffer with the given capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TraceBuffer::new(capacity))),
        }
    }

    /// Records an event.
    pub fn record(&self, event: TraceEvent) {
        self.inner.lock().push(event);
    }

    /// Returns a copy of the buffered events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TraceEvent> {
        self.inner.lock().snapshot()
    }

    /// Returns the number of buffered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true if no events are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Clears all buffered events.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: u64) -> TraceEvent {
        TraceEvent::Dispatched {
            task: TaskId::from_u64(n),
            at: Time::from_millis(n),
        }
    }

    #[test]
    fn buffer_keeps_newest_events() {
        let mut buffer = TraceBuffer::new(2);
        buffer.push(event(1));
        buffer.push(event(2));
        buffer.push(event(3));

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dropped(), 1);
        assert_eq!(buffer.snapshot(), vec![event(2), event(3)]);
    }

    #[test]
    fn zero_capacity_disables_capture() {
        let mut buffer = TraceBuffer::new(0);
        buffer.push(event(1));
        assert!(buffer.is_empty());
        assert_eq!(buffer.dropped(), 1);
    }

    #[test]
    fn handle_clones_share_the_buffer() {
        let handle = TraceHandle::with_capacity(8);
        let view = handle.clone();
        handle.record(event(7));
        assert_eq!(view.len(), 1);
        assert_eq!(view.snapshot(), vec![event(7)]);

        view.clear();
        assert!(handle.is_empty());
    }
}
