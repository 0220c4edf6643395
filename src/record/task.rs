//! Task records and the task lifecycle state machine.
//!
//! A [`TaskRecord`] is mutated only by the scheduler's dispatch loop (and
//! by `cancel` for tasks that have not started). State transitions are
//! forward-only:
//!
//! ```text
//! Pending -> Running -> {Completed | Failed}
//! Pending -> Cancelled
//! ```
//!
//! Any other transition is an `InvalidStateTransition` error.

use core::fmt;

use serde::Serialize;

use crate::error::{ActionError, Error, ErrorKind};
use crate::types::{TaskId, Time};

/// The lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskState {
    /// Submitted and waiting for its due time (or, for a continuation,
    /// for its parent to complete).
    Pending,
    /// The task body is currently executing.
    Running,
    /// The task body returned a value.
    Completed,
    /// The task body returned an error or panicked.
    Failed,
    /// The task was cancelled before it started.
    Cancelled,
}

impl TaskState {
    /// Returns true if the task can still run.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Returns true if the task will never run again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// The one-shot body of a task.
///
/// Root tasks carry a zero-argument action; continuation tasks carry a
/// one-argument body that receives the parent's result.
pub(crate) enum Work<T: 'static> {
    Root(Box<dyn FnOnce() -> Result<T, ActionError> + 'static>),
    Continuation(Box<dyn FnOnce(T) -> Result<T, ActionError> + 'static>),
}

impl<T: 'static> fmt::Debug for Work<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root(_) => f.write_str("Work::Root"),
            Self::Continuation(_) => f.write_str("Work::Continuation"),
        }
    }
}

/// One unit of deferred work tracked by the scheduler.
pub struct TaskRecord<T: 'static> {
    pub(crate) id: TaskId,
    pub(crate) due_at: Time,
    pub(crate) submitted_at: Time,
    pub(crate) state: TaskState,
    /// Consumed exactly once when the task runs.
    pub(crate) work: Option<Work<T>>,
    /// At most one continuation per task.
    pub(crate) continuation: Option<TaskId>,
    /// A continuation's pending input, installed by the parent's completion.
    pub(crate) input: Option<T>,
    /// A completed task's unconsumed result, retained for late `then`.
    pub(crate) result: Option<T>,
    /// Whether the task has an entry in the dispatch queue. Continuations
    /// stay unqueued until their parent completes.
    pub(crate) queued: bool,
}

impl<T: 'static> TaskRecord<T> {
    pub(crate) fn new_root(
        id: TaskId,
        submitted_at: Time,
        due_at: Time,
        action: Box<dyn FnOnce() -> Result<T, ActionError> + 'static>,
    ) -> Self {
        debug_assert!(due_at >= submitted_at);
        Self {
            id,
            due_at,
            submitted_at,
            state: TaskState::Pending,
            work: Some(Work::Root(action)),
            continuation: None,
            input: None,
            result: None,
            queued: false,
        }
    }

    pub(crate) fn new_continuation(
        id: TaskId,
        created_at: Time,
        body: Box<dyn FnOnce(T) -> Result<T, ActionError> + 'static>,
    ) -> Self {
        // due/submitted are rebased to the parent's completion time when
        // the continuation is enqueued.
        Self {
            id,
            due_at: created_at,
            submitted_at: created_at,
            state: TaskState::Pending,
            work: Some(Work::Continuation(body)),
            continuation: None,
            input: None,
            result: None,
            queued: false,
        }
    }

    /// Returns the task's id.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the task's current state.
    #[must_use]
    pub const fn state(&self) -> TaskState {
        self.state
    }

    /// Returns the time at which the task becomes eligible to run.
    #[must_use]
    pub const fn due_at(&self) -> Time {
        self.due_at
    }

    /// Returns the task's submission time.
    #[must_use]
    pub const fn submitted_at(&self) -> Time {
        self.submitted_at
    }

    /// Returns the attached continuation, if any.
    #[must_use]
    pub const fn continuation(&self) -> Option<TaskId> {
        self.continuation
    }

    pub(crate) fn take_work(&mut self) -> Option<Work<T>> {
        self.work.take()
    }

    pub(crate) fn take_input(&mut self) -> Option<T> {
        self.input.take()
    }

    /// `Pending -> Running`.
    pub(crate) fn begin_running(&mut self) -> Result<(), Error> {
        self.transition(TaskState::Pending, TaskState::Running)
    }

    /// `Running -> Completed`.
    pub(crate) fn finish_completed(&mut self) -> Result<(), Error> {
        self.transition(TaskState::Running, TaskState::Completed)
    }

    /// `Running -> Failed`.
    pub(crate) fn finish_failed(&mut self) -> Result<(), Error> {
        self.transition(TaskState::Running, TaskState::Failed)
    }

    /// `Pending -> Cancelled`. Returns false (no-op) for any other state.
    pub(crate) fn cancel(&mut self) -> bool {
        if self.state.is_pending() {
            self.state = TaskState::Cancelled;
            // A cancelled task never runs; its body and any staged input
            // are dropped now rather than lingering in the table.
            self.work = None;
            self.input = None;
            true
        } else {
            false
        }
    }

    fn transition(&mut self, from: TaskState, to: TaskState) -> Result<(), Error> {
        if self.state == from {
            self.state = to;
            Ok(())
        } else {
            Err(Error::new(ErrorKind::InvalidStateTransition)
                .with_message(format!("{} -> {to}", self.state))
                .with_task(self.id))
        }
    }
}

impl<T: 'static> fmt::Debug for TaskRecord<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.id)
            .field("due_at", &self.due_at)
            .field("submitted_at", &self.submitted_at)
            .field("state", &self.state)
            .field("work", &self.work)
            .field("continuation", &self.continuation)
            .field("queued", &self.queued)
            .finish()
    }
}
