//! Core types for the FSM library

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use crate::error::{ActionError, FsmResult};
use crate::observer::Observer;

/// Result of running a transition action.
///
/// An action always names the state the machine should move to. It may additionally report
/// a failure; the engine still applies `next_state` in that case and surfaces the failure
/// through a `MachineError` notification and the caller's return value.
#[derive(Clone, Debug)]
pub struct Transition<S> {
    /// The next state to transition to
    pub next_state: S,
    /// Failure reported by the action, if any
    pub failure: Option<ActionError>,
}

impl<S> Transition<S> {
    /// Successful transition to `next_state`
    pub fn to(next_state: S) -> Self {
        Self {
            next_state,
            failure: None,
        }
    }

    /// Failed transition that still moves the machine to `next_state`.
    ///
    /// Return the current state here to leave the machine where it was.
    pub fn failed(next_state: S, failure: impl Into<ActionError>) -> Self {
        Self {
            next_state,
            failure: Some(failure.into()),
        }
    }

    /// Attach a failure to an existing transition
    pub fn with_failure(mut self, failure: impl Into<ActionError>) -> Self {
        self.failure = Some(failure.into());
        self
    }

    /// Whether the action reported a failure
    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// What a single call to `execute` did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecuteOutcome<S> {
    /// No action is registered for the current state and event.
    NotAccepted,
    /// An action ran and the machine moved `from` → `to` (possibly a self-transition).
    Transitioned { from: S, to: S },
}

impl<S> ExecuteOutcome<S> {
    /// Whether an action ran
    pub fn is_transition(&self) -> bool {
        matches!(self, ExecuteOutcome::Transitioned { .. })
    }
}

/// Trait for state values.
///
/// States are opaque lookup keys: anything cloneable, hashable and comparable qualifies.
pub trait StateKey: Clone + Debug + Eq + Hash + Send + Sync + 'static {}

impl<T> StateKey for T where T: Clone + Debug + Eq + Hash + Send + Sync + 'static {}

/// Trait for event values.
pub trait EventKey: Clone + Debug + Eq + Hash + Send + Sync + 'static {}

impl<T> EventKey for T where T: Clone + Debug + Eq + Hash + Send + Sync + 'static {}

/// Operations shared by the bare [`StateMachine`](crate::StateMachine) and the queued
/// [`AsyncStateMachine`](crate::AsyncStateMachine).
///
/// Collaborators such as a [`Persister`](crate::Persister) are written against this trait
/// so they work with either.
#[async_trait::async_trait]
pub trait Fsm: Send + Sync {
    /// State value type
    type State: StateKey;
    /// Event value type
    type Event: EventKey;
    /// Parameter handed to actions
    type Param: Send + 'static;

    /// Begin accepting events and announce `MachineStarted`.
    async fn start(&self) -> FsmResult<()>;

    /// Stop accepting events and announce `MachineStopped`.
    async fn close(&self) -> FsmResult<()>;

    /// Register an observer; it receives every notification emitted afterwards.
    fn add_observer(&self, observer: Arc<dyn Observer<Self::State, Self::Event>>);

    /// Set the current state without transition semantics.
    async fn set_initial_state(&self, state: Self::State) -> FsmResult<()>;

    /// Snapshot of the current state (`None` before an initial state is set).
    fn current_state(&self) -> Option<Self::State>;

    /// Feed one event to the machine.
    async fn send_event(&self, event: Self::Event, param: Self::Param) -> FsmResult<()>;
}

/// A boxed future that is Send
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_to_has_no_failure() {
        let t = Transition::to("open");
        assert_eq!(t.next_state, "open");
        assert!(!t.is_failure());
    }

    #[test]
    fn failed_transition_keeps_next_state() {
        let t = Transition::failed("closed", ActionError::new("jammed"));
        assert_eq!(t.next_state, "closed");
        assert_eq!(t.failure.unwrap().to_string(), "jammed");

        let t = Transition::to(3).with_failure(ActionError::new("late"));
        assert!(t.is_failure());
    }

    #[test]
    fn outcome_reports_transition() {
        assert!(!ExecuteOutcome::<u8>::NotAccepted.is_transition());
        assert!(ExecuteOutcome::Transitioned { from: 1, to: 2 }.is_transition());
    }
}
