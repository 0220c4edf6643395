//! Error types and error handling strategy.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Structural errors (`InvalidDelay`, `UnknownTask`,
//!   `ContinuationAlreadySet`) are reported synchronously to the caller of
//!   the offending API call
//! - Runtime action failures are recovered locally by the dispatch loop,
//!   recorded as [`ActionError`] values, and surfaced only in the batched
//!   [`RunReport`](crate::scheduler::RunReport) — one failing task never
//!   takes down unrelated pending work
//! - Panics inside task bodies are isolated and converted to
//!   [`ActionError::Panicked`]

use core::fmt;

use serde::Serialize;

use crate::types::TaskId;

/// The kind of structural error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A delay or deadline was rejected at call time: the resulting due
    /// time would precede the submission time or overflow the time domain.
    InvalidDelay,
    /// An operation referenced a handle with no corresponding live task
    /// (never existed, or already swept after completion).
    UnknownTask,
    /// A second continuation was attached to a task that already has one.
    ContinuationAlreadySet,
    /// A task state change violating the forward-only lifecycle was
    /// requested. Scheduler bug; surfaced typed rather than panicking.
    InvalidStateTransition,
}

impl ErrorKind {
    /// Returns a short static description of the kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidDelay => "invalid delay",
            Self::UnknownTask => "unknown task",
            Self::ContinuationAlreadySet => "continuation already set",
            Self::InvalidStateTransition => "invalid state transition",
        }
    }

    /// Returns true if the error indicates scheduler-internal misbehavior
    /// rather than caller misuse.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::InvalidStateTransition)
    }
}

/// The main error type for scheduler operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    task: Option<TaskId>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            task: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds the task the error relates to.
    #[must_use]
    pub fn with_task(mut self, task: TaskId) -> Self {
        self.task = Some(task);
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the task the error relates to, if any.
    #[must_use]
    pub const fn task(&self) -> Option<TaskId> {
        self.task
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.as_str())?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        if let Some(task) = self.task {
            write!(f, " ({task})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// The failure payload of a task body.
///
/// Actions return `Result<T, ActionError>`. The dispatch loop captures the
/// error, marks the task `Failed`, and records the payload in the run
/// report. A panicking action (with panic isolation enabled) is converted
/// to the `Panicked` variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ActionError {
    /// The action signalled failure through its return value.
    Failed(String),
    /// The action panicked; the payload is the panic message when it was a
    /// string, or a placeholder otherwise.
    Panicked(String),
}

impl ActionError {
    /// Creates a plain failure from a message.
    #[must_use]
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Returns true if the failure came from a caught panic.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }

    /// Returns the failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Failed(msg) | Self::Panicked(msg) => msg,
        }
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(msg) => write!(f, "action failed: {msg}"),
            Self::Panicked(msg) => write!(f, "action panicked: {msg}"),
        }
    }
}

impl std::error::Error for ActionError {}

impl From<String> for ActionError {
    fn from(msg: String) -> Self {
        Self::Failed(msg)
    }
}

impl From<&str> for ActionError {
    fn from(msg: &str) -> Self {
        Self::Failed(msg.to_string())
    }
}
