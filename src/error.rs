// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025-2026 ObzenFlow Contributors
// https://obzenflow.dev

//! Error types for FSM operations.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Errors returned by the engine, its queues, and the persistence layer.
#[derive(Error, Debug)]
pub enum FsmError {
    /// A registered action reported a failure.
    ///
    /// The machine still moved to the state the action returned; the same failure was
    /// delivered to observers as `MachineError`.
    #[error("Action failed: {0}")]
    ActionFailed(#[source] ActionError),

    /// An event was submitted before [`start`](crate::AsyncStateMachine::start).
    #[error("Machine has not been started")]
    NotStarted,

    /// `start` was called on a machine that is already running.
    #[error("Machine already started")]
    AlreadyStarted,

    /// The event or notification queue no longer accepts messages.
    #[error("Queue is closed")]
    QueueClosed,

    /// A non-blocking send found the bounded queue full.
    #[error("Queue is full")]
    QueueFull,

    /// A background task (event consumer or notification worker) panicked.
    #[error("Background task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),

    /// Reading or writing persisted state failed.
    #[error("Persistence I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted state could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FsmError {
    /// Whether this error reports a failed action rather than an engine problem.
    pub fn is_action_failure(&self) -> bool {
        matches!(self, FsmError::ActionFailed(_))
    }
}

/// Failure reported by a transition action.
///
/// Cheap to clone, so one failure can be returned to the caller and carried by a
/// `MachineError` notification at the same time.
#[derive(Error, Debug, Clone)]
#[error(transparent)]
pub struct ActionError(Arc<dyn StdError + Send + Sync + 'static>);

impl ActionError {
    /// Wrap any error (or a `String` / `&str` message).
    pub fn new<E>(error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self(Arc::from(error.into()))
    }

    /// Borrow the underlying error.
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<ActionError> for FsmError {
    fn from(error: ActionError) -> Self {
        FsmError::ActionFailed(error)
    }
}

/// Result type for FSM operations
pub type FsmResult<T> = Result<T, FsmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_error_displays_message() {
        let err = ActionError::new("disk on fire");
        assert_eq!(err.to_string(), "disk on fire");

        let wrapped: FsmError = err.clone().into();
        assert!(wrapped.is_action_failure());
        assert_eq!(wrapped.to_string(), "Action failed: disk on fire");
    }

    #[test]
    fn action_error_clones_share_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = ActionError::new(io);
        let copy = err.clone();
        assert!(Arc::ptr_eq(&err.0, &copy.0));
        assert_eq!(copy.inner().to_string(), "boom");
    }

    #[test]
    fn lifecycle_errors_are_not_action_failures() {
        assert!(!FsmError::QueueClosed.is_action_failure());
        assert!(!FsmError::NotStarted.is_action_failure());
    }
}
