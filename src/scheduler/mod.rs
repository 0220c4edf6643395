//! The deferred-task scheduler.
//!
//! A single-threaded cooperative dispatch loop over a time-ordered queue:
//!
//! - [`schedule`](Scheduler::schedule) admits a task with a relative
//!   delay; [`schedule_at`](Scheduler::schedule_at) with an absolute
//!   deadline
//! - [`then`](Scheduler::then) attaches a continuation that receives the
//!   parent's result and is scheduled, with zero additional delay, when
//!   the parent completes successfully
//! - [`cancel`](Scheduler::cancel) stops a task that has not started
//! - [`run_until_idle`](Scheduler::run_until_idle) drains due tasks in
//!   `(due_at, submitted_at, id)` order, advancing a virtual clock across
//!   gaps, and returns a [`RunReport`] with every observed failure
//!
//! Only one task body ever runs at a time, and a body runs to completion
//! without preemption. The queue is touched exclusively between body
//! invocations, so no locking discipline applies to it.

mod queue;
mod report;

pub use report::{RunReport, TaskFailure};

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use tracing::{debug, trace};

use crate::config::SchedulerConfig;
use crate::error::{ActionError, Error, ErrorKind};
use crate::record::task::{TaskRecord, TaskState, Work};
use crate::time::{Clock, VirtualClock};
use crate::trace::{TraceEvent, TraceHandle};
use crate::types::{TaskId, Time};

use queue::DispatchQueue;

/// A lightweight reference to a scheduled task.
///
/// Handles stay valid across the task's whole lifecycle; operations on a
/// handle whose record has been swept fail with `UnknownTask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    id: TaskId,
}

impl TaskHandle {
    /// Returns the id of the referenced task.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }
}

/// Deterministic deferred-task scheduler.
///
/// `T` is the value type flowing through task results and continuations;
/// `C` is the time source, the test-controlled [`VirtualClock`] by
/// default.
#[derive(Debug)]
pub struct Scheduler<T: 'static, C = VirtualClock> {
    clock: C,
    config: SchedulerConfig,
    tasks: BTreeMap<TaskId, TaskRecord<T>>,
    queue: DispatchQueue,
    next_id: u64,
    trace: TraceHandle,
}

impl<T: 'static> Scheduler<T, VirtualClock> {
    /// Creates a scheduler over a fresh virtual clock starting at
    /// [`Time::ZERO`], with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(VirtualClock::new())
    }

    /// Creates a virtual-clock scheduler with the given configuration.
    #[must_use]
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self::with_clock_and_config(VirtualClock::new(), config)
    }
}

impl<T: 'static> Default for Scheduler<T, VirtualClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static, C: Clock> Scheduler<T, C> {
    /// Creates a scheduler over the given clock with default
    /// configuration.
    #[must_use]
    pub fn with_clock(clock: C) -> Self {
        Self::with_clock_and_config(clock, SchedulerConfig::default())
    }

    /// Creates a scheduler over the given clock and configuration.
    #[must_use]
    pub fn with_clock_and_config(clock: C, config: SchedulerConfig) -> Self {
        Self {
            clock,
            trace: TraceHandle::with_capacity(config.trace_capacity),
            config,
            tasks: BTreeMap::new(),
            queue: DispatchQueue::new(),
            next_id: 0,
        }
    }

    /// Returns the current clock reading.
    #[must_use]
    pub fn now(&self) -> Time {
        self.clock.now()
    }

    /// Returns the scheduler configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Returns a handle to the scheduling trace.
    #[must_use]
    pub fn trace(&self) -> TraceHandle {
        self.trace.clone()
    }

    /// Schedules `action` to run `delay` after the current time.
    ///
    /// # Errors
    ///
    /// `InvalidDelay` if `now + delay` does not fit the time domain.
    pub fn schedule<F>(&mut self, delay: Duration, action: F) -> Result<TaskHandle, Error>
    where
        F: FnOnce() -> Result<T, ActionError> + 'static,
    {
        let now = self.clock.now();
        let due_at = now.checked_add(delay).ok_or_else(|| {
            Error::new(ErrorKind::InvalidDelay).with_message("delay overflows the time domain")
        })?;
        Ok(self.admit_root(now, due_at, Box::new(action)))
    }

    /// Schedules `action` to run at the absolute deadline `due_at`.
    ///
    /// # Errors
    ///
    /// `InvalidDelay` if `due_at` precedes the current time.
    pub fn schedule_at<F>(&mut self, due_at: Time, action: F) -> Result<TaskHandle, Error>
    where
        F: FnOnce() -> Result<T, ActionError> + 'static,
    {
        let now = self.clock.now();
        if due_at < now {
            return Err(Error::new(ErrorKind::InvalidDelay)
                .with_message(format!("deadline {due_at} precedes current time {now}")));
        }
        Ok(self.admit_root(now, due_at, Box::new(action)))
    }

    /// Attaches a continuation to the task behind `handle`.
    ///
    /// The continuation task is created immediately but scheduled only
    /// when the parent completes successfully, at the completion time,
    /// receiving the parent's result. If the parent has already completed
    /// and its result is still held, the continuation is scheduled at the
    /// current time with that result. If the parent already failed or was
    /// cancelled, the continuation is created cancelled and never runs.
    ///
    /// Returns a handle to the continuation task.
    ///
    /// # Errors
    ///
    /// `UnknownTask` if the handle does not reference a live task;
    /// `ContinuationAlreadySet` if a continuation is already attached (or
    /// the parent's result was already consumed).
    pub fn then<F>(&mut self, handle: TaskHandle, continuation: F) -> Result<TaskHandle, Error>
    where
        F: FnOnce(T) -> Result<T, ActionError> + 'static,
    {
        let parent_id = handle.id();
        let parent_state = {
            let parent = self
                .tasks
                .get(&parent_id)
                .ok_or_else(|| Error::new(ErrorKind::UnknownTask).with_task(parent_id))?;
            if parent.continuation().is_some() {
                return Err(Error::new(ErrorKind::ContinuationAlreadySet).with_task(parent_id));
            }
            if parent.state() == TaskState::Completed && parent.result.is_none() {
                return Err(Error::new(ErrorKind::ContinuationAlreadySet)
                    .with_message("result already consumed")
                    .with_task(parent_id));
            }
            parent.state()
        };

        let now = self.clock.now();
        let child_id = self.allocate_id();
        let mut child = TaskRecord::new_continuation(child_id, now, Box::new(continuation));

        match parent_state {
            TaskState::Pending | TaskState::Running => {
                self.tasks.insert(child_id, child);
            }
            TaskState::Completed => {
                // Late attachment: the parent's retained result feeds the
                // continuation right away.
                let value = self
                    .tasks
                    .get_mut(&parent_id)
                    .and_then(|parent| parent.result.take());
                child.input = value;
                child.queued = true;
                self.tasks.insert(child_id, child);
                self.queue.insert(child_id, now, now);
                self.trace.record(TraceEvent::Scheduled {
                    task: child_id,
                    due_at: now,
                    submitted_at: now,
                });
            }
            TaskState::Failed | TaskState::Cancelled => {
                child.cancel();
                self.tasks.insert(child_id, child);
                self.trace.record(TraceEvent::Cancelled {
                    task: child_id,
                    at: now,
                });
            }
        }

        if let Some(parent) = self.tasks.get_mut(&parent_id) {
            parent.continuation = Some(child_id);
        }
        self.trace.record(TraceEvent::ContinuationAttached {
            parent: parent_id,
            task: child_id,
        });
        debug!(
            "continuation attached: parent={}, task={}, parent_state={}",
            parent_id, child_id, parent_state
        );
        Ok(TaskHandle { id: child_id })
    }

    /// Cancels the task behind `handle` if it has not started.
    ///
    /// Returns true if the task was `Pending` and is now `Cancelled`;
    /// false (no-op) for a task already running or finished. Cancelling a
    /// parent cancels its not-yet-scheduled continuation chain as well.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        let id = handle.id();
        let cancelled = match self.tasks.get_mut(&id) {
            Some(record) => record.cancel(),
            None => false,
        };
        if cancelled {
            let now = self.clock.now();
            self.trace.record(TraceEvent::Cancelled { task: id, at: now });
            debug!("task cancelled: task={}", id);
            self.cancel_chain(id, now);
        }
        cancelled
    }

    /// Returns the current state of the task behind `handle`.
    ///
    /// # Errors
    ///
    /// `UnknownTask` if the handle does not reference a live task.
    pub fn state(&self, handle: TaskHandle) -> Result<TaskState, Error> {
        self.tasks
            .get(&handle.id())
            .map(TaskRecord::state)
            .ok_or_else(|| Error::new(ErrorKind::UnknownTask).with_task(handle.id()))
    }

    /// Returns the number of non-terminal task records.
    #[must_use]
    pub fn live_task_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|r| !r.state().is_terminal())
            .count()
    }

    /// Returns true if no task is queued for dispatch.
    ///
    /// Unqueued continuations awaiting a live parent do not count: they
    /// are reachable only through that parent's completion.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        !self
            .tasks
            .values()
            .any(|r| r.queued && r.state().is_pending())
    }

    /// Removes terminal task records, returning how many were removed.
    ///
    /// Handles to removed tasks subsequently report `UnknownTask`.
    pub fn sweep(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, record| !record.state().is_terminal());
        before - self.tasks.len()
    }

    /// Advances the clock by `delta`. Returns false if the clock refuses
    /// (real time).
    pub fn advance_time(&mut self, delta: Duration) -> bool {
        let target = self.clock.now().saturating_add(delta);
        self.advance_time_to(target)
    }

    /// Advances the clock to `target`. Returns false if the clock refuses
    /// (real time). Requests to move backwards leave the clock untouched.
    pub fn advance_time_to(&mut self, target: Time) -> bool {
        let from = self.clock.now();
        if !self.clock.advance_to(target) {
            return false;
        }
        let to = self.clock.now();
        if to > from {
            self.trace.record(TraceEvent::TimeAdvanced { from, to });
            debug!(
                "virtual clock advanced: delta_ms={}, new_time_ms={}",
                to.saturating_duration_since(from).as_millis(),
                to.as_millis()
            );
        }
        true
    }

    /// The dispatch loop.
    ///
    /// Repeatedly pops the minimum `(due_at, submitted_at, id)` entry
    /// whose due time has arrived and runs it. When only future tasks
    /// remain, the clock is asked to jump to the next deadline: the
    /// virtual clock does, and draining continues until the queue is
    /// empty; a real clock refuses, and the loop returns with those tasks
    /// still pending.
    ///
    /// Failures are recovered locally: a failing task marks itself
    /// `Failed`, its continuation chain is cancelled, and the failure is
    /// recorded in the returned report while unrelated work keeps
    /// running.
    pub fn run_until_idle(&mut self) -> RunReport {
        let time_start = self.clock.now();
        let mut failures = Vec::new();
        let mut steps: u64 = 0;
        let mut auto_advances: u64 = 0;

        loop {
            let now = self.clock.now();
            let due = self.queue.pop_due(now);
            if !due.is_empty() {
                for id in due {
                    if self.dispatch(id, &mut failures) {
                        steps += 1;
                    }
                }
                // A dispatched task may have enqueued its continuation at
                // the current time; re-consult the queue before advancing.
                continue;
            }

            match self.queue.peek_due_at() {
                None => break,
                Some(next_due) => {
                    if self.advance_time_to(next_due) {
                        auto_advances += 1;
                    } else {
                        trace!(
                            "run_until_idle returning: next_due_ms={} is in the future",
                            next_due.as_millis()
                        );
                        break;
                    }
                }
            }
        }

        if !self.config.retain_finished {
            self.sweep();
        }

        RunReport {
            steps,
            auto_advances,
            time_start,
            time_end: self.clock.now(),
            failures,
        }
    }

    fn allocate_id(&mut self) -> TaskId {
        let id = TaskId::from_u64(self.next_id);
        self.next_id += 1;
        id
    }

    fn admit_root(
        &mut self,
        submitted_at: Time,
        due_at: Time,
        action: Box<dyn FnOnce() -> Result<T, ActionError> + 'static>,
    ) -> TaskHandle {
        let id = self.allocate_id();
        let mut record = TaskRecord::new_root(id, submitted_at, due_at, action);
        record.queued = true;
        self.tasks.insert(id, record);
        self.queue.insert(id, due_at, submitted_at);
        self.trace.record(TraceEvent::Scheduled {
            task: id,
            due_at,
            submitted_at,
        });
        trace!(
            "task scheduled: task={}, due_ms={}, submitted_ms={}",
            id,
            due_at.as_millis(),
            submitted_at.as_millis()
        );
        TaskHandle { id }
    }

    /// Runs one popped queue entry. Returns false for stale entries
    /// (cancelled tasks skipped by lazy deletion).
    fn dispatch(&mut self, id: TaskId, failures: &mut Vec<TaskFailure>) -> bool {
        let now = self.clock.now();
        let (work, input) = {
            let Some(record) = self.tasks.get_mut(&id) else {
                return false;
            };
            if !record.state().is_pending() {
                return false;
            }
            record.queued = false;
            if let Err(err) = record.begin_running() {
                debug!("dispatch skipped: {err}");
                return false;
            }
            (record.take_work(), record.take_input())
        };

        self.trace.record(TraceEvent::Dispatched { task: id, at: now });
        trace!("task dispatched: task={}, now_ms={}", id, now.as_millis());

        let catch_panics = self.config.catch_panics;
        let outcome = match work {
            Some(Work::Root(body)) => run_body(catch_panics, body),
            Some(Work::Continuation(body)) => match input {
                Some(value) => run_body(catch_panics, move || body(value)),
                None => Err(ActionError::failed("continuation input missing")),
            },
            None => Err(ActionError::failed("task body already consumed")),
        };

        match outcome {
            Ok(value) => self.complete(id, value),
            Err(error) => {
                self.fail(id, &error);
                failures.push(TaskFailure { task: id, error });
            }
        }
        true
    }

    fn complete(&mut self, id: TaskId, value: T) {
        let now = self.clock.now();
        let continuation = {
            let Some(record) = self.tasks.get_mut(&id) else {
                return;
            };
            if let Err(err) = record.finish_completed() {
                debug!("completion dropped: {err}");
                return;
            }
            record.continuation()
        };
        self.trace.record(TraceEvent::Completed { task: id, at: now });
        trace!("task completed: task={}, now_ms={}", id, now.as_millis());

        match continuation {
            Some(child_id) => {
                if let Some(child) = self.tasks.get_mut(&child_id) {
                    if child.state().is_pending() {
                        // Rebase the continuation on the completion time:
                        // fresh submission, zero additional delay.
                        child.input = Some(value);
                        child.due_at = now;
                        child.submitted_at = now;
                        child.queued = true;
                        self.queue.insert(child_id, now, now);
                        self.trace.record(TraceEvent::Scheduled {
                            task: child_id,
                            due_at: now,
                            submitted_at: now,
                        });
                    }
                    // A cancelled continuation drops the value.
                }
            }
            None => {
                if let Some(record) = self.tasks.get_mut(&id) {
                    record.result = Some(value);
                }
            }
        }
    }

    fn fail(&mut self, id: TaskId, error: &ActionError) {
        let now = self.clock.now();
        {
            let Some(record) = self.tasks.get_mut(&id) else {
                return;
            };
            if let Err(err) = record.finish_failed() {
                debug!("failure dropped: {err}");
                return;
            }
        }
        self.trace.record(TraceEvent::Failed { task: id, at: now });
        debug!("task failed: task={}, error={}", id, error);
        // The success path below this task never runs.
        self.cancel_chain(id, now);
    }

    /// Cancels every continuation reachable from `from`.
    fn cancel_chain(&mut self, from: TaskId, now: Time) {
        let mut next = self.tasks.get(&from).and_then(TaskRecord::continuation);
        while let Some(id) = next {
            let Some(record) = self.tasks.get_mut(&id) else {
                break;
            };
            next = record.continuation();
            if record.cancel() {
                self.trace.record(TraceEvent::Cancelled { task: id, at: now });
                debug!("continuation cancelled: task={}", id);
            }
        }
    }
}

fn run_body<T>(
    catch_panics: bool,
    body: impl FnOnce() -> Result<T, ActionError>,
) -> Result<T, ActionError> {
    if catch_panics {
        match std::panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(outcome) => outcome,
            Err(payload) => Err(ActionError::Panicked(panic_message(payload.as_ref()))),
        }
    } else {
        body()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
