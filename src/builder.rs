//! Fluent builder API for assembling machines (inspired by Akka Classic FSM)

use std::future::Future;
use std::sync::Arc;

use crate::async_machine::AsyncStateMachine;
use crate::config::MachineConfig;
use crate::error::FsmResult;
use crate::handlers::{self, TransitionTable};
use crate::machine::StateMachine;
use crate::notification::NotificationChannel;
use crate::observer::{Observer, ObserverRegistry};
use crate::types::{EventKey, StateKey, Transition};

/// Main builder for creating machines
///
/// ```rust
/// use fsm_engine::{MachineBuilder, Transition};
///
/// # async fn demo() -> fsm_engine::FsmResult<()> {
/// let machine = MachineBuilder::<&str, &str>::new()
///     .initial("green")
///     .when("green")
///         .on("timer", |_| async { Transition::to("yellow") })
///         .done()
///     .when("yellow")
///         .on("timer", |_| async { Transition::to("red") })
///         .done()
///     .build()?;
///
/// machine.execute("timer", ()).await?;
/// assert_eq!(machine.current_state(), Some("yellow"));
/// # Ok(())
/// # }
/// ```
pub struct MachineBuilder<S, E, P = ()> {
    config: MachineConfig,
    initial_state: Option<S>,
    transitions: TransitionTable<S, E, P>,
    observers: Vec<Arc<dyn Observer<S, E>>>,
}

impl<S, E, P> Default for MachineBuilder<S, E, P>
where
    S: StateKey,
    E: EventKey,
    P: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S, E, P> MachineBuilder<S, E, P>
where
    S: StateKey,
    E: EventKey,
    P: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            config: MachineConfig::default(),
            initial_state: None,
            transitions: TransitionTable::new(),
            observers: Vec::new(),
        }
    }

    /// State the machine starts in. `StateEntered` is emitted for it at build time, after
    /// observers are registered.
    pub fn initial(mut self, state: S) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Replace the queue configuration used by [`build_async`](Self::build_async).
    pub fn config(mut self, config: MachineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn event_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.event_queue_capacity = capacity;
        self
    }

    /// Zero selects inline delivery.
    pub fn notification_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.notification_queue_capacity = capacity;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn Observer<S, E>>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Start defining transitions out of `state`
    pub fn when(self, state: S) -> WhenBuilder<S, E, P> {
        WhenBuilder {
            builder: self,
            state,
        }
    }

    /// Build the synchronous core. Notifications are always delivered inline.
    pub fn build(self) -> FsmResult<StateMachine<S, E, P>> {
        let machine = StateMachine::from_parts(
            NotificationChannel::inline(Arc::new(ObserverRegistry::new())),
            self.transitions,
        );
        for observer in self.observers {
            machine.add_observer(observer);
        }
        if let Some(state) = self.initial_state {
            machine.set_initial_state_now(state)?;
        }
        Ok(machine)
    }

    /// Build a queued machine. It still has to be started.
    pub fn build_async(self) -> FsmResult<AsyncStateMachine<S, E, P>> {
        let machine = AsyncStateMachine::from_parts(self.config, self.transitions);
        for observer in self.observers {
            machine.add_observer(observer);
        }
        if let Some(state) = self.initial_state {
            // Held until the notification worker starts.
            machine.core().set_initial_state_now(state)?;
        }
        Ok(machine)
    }
}

/// Builder for the transitions out of one state
pub struct WhenBuilder<S, E, P> {
    builder: MachineBuilder<S, E, P>,
    state: S,
}

impl<S, E, P> WhenBuilder<S, E, P>
where
    S: StateKey,
    E: EventKey,
    P: Send + 'static,
{
    /// Define a transition for a specific event
    pub fn on<F, Fut>(mut self, event: E, handler: F) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Transition<S>> + Send + 'static,
    {
        self.builder
            .transitions
            .insert(self.state.clone(), event, handlers::action(handler));
        self
    }

    /// Continue with the builder (ends this state's configuration)
    pub fn done(self) -> MachineBuilder<S, E, P> {
        self.builder
    }
}
