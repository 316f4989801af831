//! Observers and the ordered registry that broadcasts to them

use std::sync::{Arc, RwLock};

use tracing::{error, info, warn};

use crate::error::ActionError;
use crate::notification::Notification;

/// Recipient of machine lifecycle notifications.
///
/// Every callback has an empty default body; implement only the ones you care about.
/// Callbacks run on whichever task delivers notifications (the caller of `execute` for
/// inline delivery, the notification worker for queued delivery) and should return
/// quickly. A panic inside a callback is not caught by the engine.
pub trait Observer<S, E>: Send + Sync {
    /// The machine moved from `from` to `to`
    fn state_changed(&self, _from: &S, _to: &S) {}

    /// The machine entered `state` (also fired for the initial state)
    fn state_entered(&self, _state: &S) {}

    /// The machine left `state`
    fn state_exited(&self, _state: &S) {}

    /// No action is registered for `event` in `state`
    fn event_not_accepted(&self, _state: Option<&S>, _event: &E) {}

    /// The action for `(state, event)` is about to run
    fn transition_started(&self, _state: &S, _event: &E) {}

    /// The action for `(state, event)` returned
    fn transition_ended(&self, _state: &S, _event: &E) {}

    fn machine_started(&self) {}

    fn machine_stopped(&self) {}

    /// An action reported a failure
    fn machine_error(&self, _error: &ActionError) {}
}

/// Ordered set of observers.
///
/// Registration order is invocation order. Observers are never removed.
pub struct ObserverRegistry<S, E> {
    observers: RwLock<Vec<Arc<dyn Observer<S, E>>>>,
}

impl<S, E> Default for ObserverRegistry<S, E> {
    fn default() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
        }
    }
}

impl<S, E> ObserverRegistry<S, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer.
    pub fn register(&self, observer: Arc<dyn Observer<S, E>>) {
        self.observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(observer);
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver one notification to every observer, in registration order.
    ///
    /// The list is copied before delivery so callbacks may register more observers; those
    /// only see later notifications.
    pub fn dispatch(&self, notification: &Notification<S, E>) {
        for observer in self.snapshot() {
            notification.deliver(observer.as_ref());
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn Observer<S, E>>> {
        // A panicking observer can poison the lock only while registering; the list itself
        // is always consistent, so recover it.
        self.observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Observer that writes one human-readable line per notification through `tracing`.
///
/// Install a subscriber (e.g. `tracing_subscriber::fmt`) to see the output.
#[derive(Clone, Debug, Default)]
pub struct LogObserver {
    silent: bool,
}

impl LogObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `LogObserver` that writes nothing.
    pub fn silent() -> Self {
        Self { silent: true }
    }

    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }
}

impl<S, E> Observer<S, E> for LogObserver
where
    S: std::fmt::Debug,
    E: std::fmt::Debug,
{
    fn state_changed(&self, from: &S, to: &S) {
        if !self.silent {
            info!("State changed: {:?} -> {:?}", from, to);
        }
    }

    fn state_entered(&self, state: &S) {
        if !self.silent {
            info!("State entered: {:?}", state);
        }
    }

    fn state_exited(&self, state: &S) {
        if !self.silent {
            info!("State exited: {:?}", state);
        }
    }

    fn event_not_accepted(&self, state: Option<&S>, event: &E) {
        if !self.silent {
            warn!("Event not accepted: {:?} in state {:?}", event, state);
        }
    }

    fn transition_started(&self, state: &S, event: &E) {
        if !self.silent {
            info!("Transition started: {:?} on {:?}", state, event);
        }
    }

    fn transition_ended(&self, state: &S, event: &E) {
        if !self.silent {
            info!("Transition ended: {:?} on {:?}", state, event);
        }
    }

    fn machine_started(&self) {
        if !self.silent {
            info!("Machine started");
        }
    }

    fn machine_stopped(&self) {
        if !self.silent {
            info!("Machine stopped");
        }
    }

    fn machine_error(&self, err: &ActionError) {
        if !self.silent {
            error!("Machine error: {}", err);
        }
    }
}
