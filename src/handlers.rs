//! Handler type aliases and the transition table

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::types::{BoxFuture, EventKey, StateKey, Transition};

/// Type alias for async transition actions
///
/// The action is invoked with the parameter passed alongside the event and returns a
/// future resolving to the [`Transition`] to apply. The returned future owns everything
/// it needs, so the engine can await it without holding any lock.
pub type Action<S, P> = Arc<dyn Fn(P) -> BoxFuture<'static, Transition<S>> + Send + Sync>;

/// Box an async closure into an [`Action`].
pub fn action<S, P, F, Fut>(handler: F) -> Action<S, P>
where
    S: 'static,
    P: 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Transition<S>> + Send + 'static,
{
    Arc::new(move |param: P| -> BoxFuture<'static, Transition<S>> { Box::pin(handler(param)) })
}

/// Two-level map from state to event to action.
///
/// A miss at either level means no transition is registered.
pub struct TransitionTable<S, E, P> {
    states: HashMap<S, HashMap<E, Action<S, P>>>,
}

impl<S, E, P> Default for TransitionTable<S, E, P> {
    fn default() -> Self {
        Self {
            states: HashMap::new(),
        }
    }
}

impl<S, E, P> TransitionTable<S, E, P>
where
    S: StateKey,
    E: EventKey,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `action` for `(state, event)`, replacing any previous one.
    ///
    /// Returns the replaced action, if there was one.
    pub fn insert(&mut self, state: S, event: E, action: Action<S, P>) -> Option<Action<S, P>> {
        self.states.entry(state).or_default().insert(event, action)
    }

    /// Clone the action registered for `(state, event)` out of the table.
    pub fn lookup(&self, state: &S, event: &E) -> Option<Action<S, P>> {
        self.states.get(state)?.get(event).cloned()
    }

    /// Whether `(state, event)` has an action
    pub fn contains(&self, state: &S, event: &E) -> bool {
        self.states
            .get(state)
            .is_some_and(|events| events.contains_key(event))
    }

    /// Number of registered `(state, event)` pairs
    pub fn len(&self) -> usize {
        self.states.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
