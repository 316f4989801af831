//! StateMachine implementation
//!
//! The synchronous core: it owns the transition table and the current-state cell and runs
//! one transition per [`execute`](StateMachine::execute) call on the caller's task.
//!
//! One mutex guards the state cell and the table. It is held only to read or write them,
//! never while an action runs and never while observers are notified, so an action may call
//! back into the machine (including `execute` itself) without deadlocking. The core does not
//! serialize concurrent `execute` calls on its own; [`AsyncStateMachine`] does that by
//! funnelling every event through a single consumer task.
//!
//! [`AsyncStateMachine`]: crate::AsyncStateMachine

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::{FsmError, FsmResult};
use crate::handlers::{self, Action, TransitionTable};
use crate::notification::{Notification, NotificationChannel};
use crate::observer::{Observer, ObserverRegistry};
use crate::types::{EventKey, ExecuteOutcome, Fsm, StateKey, Transition};

struct Inner<S, E, P> {
    current: Option<S>,
    table: TransitionTable<S, E, P>,
}

/// The concrete FSM implementation
pub struct StateMachine<S, E, P = ()> {
    inner: Mutex<Inner<S, E, P>>,
    notifier: NotificationChannel<S, E>,
}

impl<S, E, P> Default for StateMachine<S, E, P>
where
    S: StateKey,
    E: EventKey,
    P: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S, E, P> StateMachine<S, E, P>
where
    S: StateKey,
    E: EventKey,
    P: Send + 'static,
{
    /// Create a machine that delivers notifications inline.
    pub fn new() -> Self {
        Self::with_notifier(NotificationChannel::inline(Arc::new(ObserverRegistry::new())))
    }

    /// Create a machine that emits through `notifier`.
    pub fn with_notifier(notifier: NotificationChannel<S, E>) -> Self {
        Self::from_parts(notifier, TransitionTable::new())
    }

    pub(crate) fn from_parts(
        notifier: NotificationChannel<S, E>,
        table: TransitionTable<S, E, P>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: None,
                table,
            }),
            notifier,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<S, E, P>> {
        // Only O(1) table and cell operations run under the lock; recover from a panic in a
        // user Hash/Eq impl rather than poisoning the machine.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `handler` for `(state, event)`, replacing any previous action.
    pub fn add_transition<F, Fut>(&self, state: S, event: E, handler: F)
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Transition<S>> + Send + 'static,
    {
        self.add_action(state, event, handlers::action(handler));
    }

    /// Register an already boxed action for `(state, event)`.
    pub fn add_action(&self, state: S, event: E, action: Action<S, P>) {
        if self.lock().table.insert(state.clone(), event.clone(), action).is_some() {
            debug!("Replaced transition for state {:?} on event {:?}", state, event);
        }
    }

    /// Whether an action is registered for `(state, event)`
    pub fn has_transition(&self, state: &S, event: &E) -> bool {
        self.lock().table.contains(state, event)
    }

    pub fn add_observer(&self, observer: Arc<dyn Observer<S, E>>) {
        self.notifier.register(observer);
    }

    pub fn notifier(&self) -> &NotificationChannel<S, E> {
        &self.notifier
    }

    /// Get the current state
    pub fn current_state(&self) -> Option<S> {
        self.lock().current.clone()
    }

    /// Set the current state without transition semantics.
    ///
    /// Only `StateEntered` is emitted; nothing is exited because, from the machine's point
    /// of view, there was no previous state.
    pub async fn set_initial_state(&self, state: S) -> FsmResult<()> {
        self.lock().current = Some(state.clone());
        debug!("FSM initial state {:?}", state);
        self.notify(Notification::StateEntered(state)).await
    }

    /// Non-waiting variant of [`set_initial_state`](Self::set_initial_state) for callers
    /// that have no async context (the builder).
    pub(crate) fn set_initial_state_now(&self, state: S) -> FsmResult<()> {
        self.lock().current = Some(state.clone());
        self.notifier.try_send(Notification::StateEntered(state))
    }

    pub(crate) async fn notify(&self, notification: Notification<S, E>) -> FsmResult<()> {
        self.notifier.send(notification).await
    }

    /// Handle one event.
    ///
    /// With no action registered for the current state and `event`, emits
    /// `EventNotAccepted` and returns [`ExecuteOutcome::NotAccepted`]; that is not an error.
    ///
    /// Otherwise emits `TransitionStarted`, runs the action with `param`, emits
    /// `TransitionEnded` (and `MachineError` if the action failed), then `StateEntered`,
    /// switches the current state, and emits `StateExited` and `StateChanged`. The state the
    /// action returned is applied even when it reports a failure; the failure is returned
    /// as [`FsmError::ActionFailed`].
    pub async fn execute(&self, event: E, param: P) -> FsmResult<ExecuteOutcome<S>> {
        let lookup = {
            let inner = self.lock();
            let state = inner.current.clone();
            let action = state
                .as_ref()
                .and_then(|state| inner.table.lookup(state, &event));
            (state, action)
        };

        let (state, action) = match lookup {
            (Some(state), Some(action)) => (state, action),
            (state, _) => {
                debug!("FSM ignoring event {:?} in state {:?}", event, state);
                self.notify(Notification::EventNotAccepted { state, event })
                    .await?;
                return Ok(ExecuteOutcome::NotAccepted);
            }
        };

        debug!("FSM handling event {:?} in state {:?}", event, state);
        self.notify(Notification::TransitionStarted {
            state: state.clone(),
            event: event.clone(),
        })
        .await?;

        let Transition {
            next_state,
            failure,
        } = action(param).await;

        // The action has run: from here on the state change is applied no matter what, and
        // the first delivery failure is reported after it.
        let mut delivered = self
            .notify(Notification::TransitionEnded {
                state: state.clone(),
                event,
            })
            .await;
        if let Some(err) = &failure {
            delivered = delivered.and(self.notify(Notification::MachineError(err.clone())).await);
        }
        delivered = delivered.and(
            self.notify(Notification::StateEntered(next_state.clone()))
                .await,
        );

        let origin = {
            let mut inner = self.lock();
            inner.current.replace(next_state.clone())
        }
        .unwrap_or(state);
        debug!("FSM transitioned from {:?} to {:?}", origin, next_state);

        delivered = delivered.and(self.notify(Notification::StateExited(origin.clone())).await);
        delivered = delivered.and(
            self.notify(Notification::StateChanged {
                from: origin.clone(),
                to: next_state.clone(),
            })
            .await,
        );

        if let Some(err) = failure {
            return Err(FsmError::ActionFailed(err));
        }
        delivered?;

        Ok(ExecuteOutcome::Transitioned {
            from: origin,
            to: next_state,
        })
    }

    /// Announce `MachineStarted`. The bare core has no queue, so there is nothing else to
    /// start.
    pub async fn start(&self) -> FsmResult<()> {
        self.notify(Notification::MachineStarted).await
    }

    /// Announce `MachineStopped`.
    pub async fn close(&self) -> FsmResult<()> {
        self.notify(Notification::MachineStopped).await
    }
}

#[async_trait::async_trait]
impl<S, E, P> Fsm for StateMachine<S, E, P>
where
    S: StateKey,
    E: EventKey,
    P: Send + 'static,
{
    type State = S;
    type Event = E;
    type Param = P;

    async fn start(&self) -> FsmResult<()> {
        StateMachine::start(self).await
    }

    async fn close(&self) -> FsmResult<()> {
        StateMachine::close(self).await
    }

    fn add_observer(&self, observer: Arc<dyn Observer<S, E>>) {
        StateMachine::add_observer(self, observer);
    }

    async fn set_initial_state(&self, state: S) -> FsmResult<()> {
        StateMachine::set_initial_state(self, state).await
    }

    fn current_state(&self) -> Option<S> {
        StateMachine::current_state(self)
    }

    async fn send_event(&self, event: E, param: P) -> FsmResult<()> {
        self.execute(event, param).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActionError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    enum Door {
        Closed,
        Open,
        Locked,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    enum Input {
        Push,
        Pull,
        Lock,
    }

    #[derive(Default)]
    struct Journal(Mutex<Vec<String>>);

    impl Journal {
        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Observer<Door, Input> for Journal {
        fn state_changed(&self, from: &Door, to: &Door) {
            self.0.lock().unwrap().push(format!("changed {from:?}->{to:?}"));
        }
        fn state_entered(&self, state: &Door) {
            self.0.lock().unwrap().push(format!("entered {state:?}"));
        }
        fn state_exited(&self, state: &Door) {
            self.0.lock().unwrap().push(format!("exited {state:?}"));
        }
        fn event_not_accepted(&self, _state: Option<&Door>, event: &Input) {
            self.0.lock().unwrap().push(format!("rejected {event:?}"));
        }
        fn transition_started(&self, _state: &Door, _event: &Input) {
            self.0.lock().unwrap().push("started".into());
        }
        fn transition_ended(&self, _state: &Door, _event: &Input) {
            self.0.lock().unwrap().push("ended".into());
        }
        fn machine_error(&self, err: &ActionError) {
            self.0.lock().unwrap().push(format!("error {err}"));
        }
    }

    fn door() -> (StateMachine<Door, Input>, Arc<Journal>) {
        let machine: StateMachine<Door, Input> = StateMachine::new();
        machine.add_transition(Door::Closed, Input::Pull, |_| async {
            Transition::to(Door::Open)
        });
        machine.add_transition(Door::Open, Input::Push, |_| async {
            Transition::to(Door::Closed)
        });
        machine.add_transition(Door::Closed, Input::Lock, |_| async {
            Transition::failed(Door::Locked, "key snapped")
        });
        let journal = Arc::new(Journal::default());
        machine.add_observer(journal.clone());
        (machine, journal)
    }

    #[tokio::test]
    async fn initial_state_emits_only_entered() {
        let (machine, journal) = door();
        assert_eq!(machine.current_state(), None);

        machine.set_initial_state(Door::Closed).await.unwrap();

        assert_eq!(machine.current_state(), Some(Door::Closed));
        assert_eq!(journal.entries(), vec!["entered Closed"]);
    }

    #[tokio::test]
    async fn successful_transition_notifies_in_order() {
        let (machine, journal) = door();
        machine.set_initial_state(Door::Closed).await.unwrap();

        let outcome = machine.execute(Input::Pull, ()).await.unwrap();

        assert_eq!(
            outcome,
            ExecuteOutcome::Transitioned {
                from: Door::Closed,
                to: Door::Open
            }
        );
        assert_eq!(machine.current_state(), Some(Door::Open));
        assert_eq!(
            journal.entries()[1..],
            [
                "started",
                "ended",
                "entered Open",
                "exited Closed",
                "changed Closed->Open"
            ]
        );
    }

    #[tokio::test]
    async fn unknown_event_is_not_an_error() {
        let (machine, journal) = door();
        machine.set_initial_state(Door::Closed).await.unwrap();

        let outcome = machine.execute(Input::Push, ()).await.unwrap();

        assert_eq!(outcome, ExecuteOutcome::NotAccepted);
        assert_eq!(machine.current_state(), Some(Door::Closed));
        assert_eq!(journal.entries()[1..], ["rejected Push"]);
    }

    #[tokio::test]
    async fn events_before_initial_state_are_not_accepted() {
        let (machine, journal) = door();

        let outcome = machine.execute(Input::Pull, ()).await.unwrap();

        assert_eq!(outcome, ExecuteOutcome::NotAccepted);
        assert_eq!(machine.current_state(), None);
        assert_eq!(journal.entries(), vec!["rejected Pull"]);
    }

    #[tokio::test]
    async fn failed_action_still_moves_state() {
        let (machine, journal) = door();
        machine.set_initial_state(Door::Closed).await.unwrap();

        let err = machine.execute(Input::Lock, ()).await.unwrap_err();

        assert!(matches!(err, FsmError::ActionFailed(_)));
        assert_eq!(err.to_string(), "Action failed: key snapped");
        assert_eq!(machine.current_state(), Some(Door::Locked));
        assert_eq!(
            journal.entries()[1..],
            [
                "started",
                "ended",
                "error key snapped",
                "entered Locked",
                "exited Closed",
                "changed Closed->Locked"
            ]
        );
    }

    #[tokio::test]
    async fn re_registering_replaces_action() {
        let (machine, _journal) = door();
        machine.add_transition(Door::Closed, Input::Pull, |_| async {
            Transition::to(Door::Locked)
        });
        machine.set_initial_state(Door::Closed).await.unwrap();

        machine.execute(Input::Pull, ()).await.unwrap();
        assert_eq!(machine.current_state(), Some(Door::Locked));
        assert!(machine.has_transition(&Door::Open, &Input::Push));
        assert!(!machine.has_transition(&Door::Locked, &Input::Push));
    }

    #[tokio::test]
    async fn action_may_reenter_machine() {
        let machine: Arc<StateMachine<Door, Input>> = Arc::new(StateMachine::new());
        let weak = Arc::downgrade(&machine);
        let seen_during_action = Arc::new(Mutex::new(None));
        let seen = seen_during_action.clone();

        machine.add_transition(Door::Closed, Input::Pull, move |_| {
            let weak = weak.clone();
            let seen = seen.clone();
            async move {
                if let Some(machine) = weak.upgrade() {
                    // The lock is free while the action runs.
                    *seen.lock().unwrap() = machine.current_state();
                    machine.add_transition(Door::Open, Input::Push, |_| async {
                        Transition::to(Door::Closed)
                    });
                }
                Transition::to(Door::Open)
            }
        });
        machine.set_initial_state(Door::Closed).await.unwrap();

        machine.execute(Input::Pull, ()).await.unwrap();
        assert_eq!(*seen_during_action.lock().unwrap(), Some(Door::Closed));

        machine.execute(Input::Push, ()).await.unwrap();
        assert_eq!(machine.current_state(), Some(Door::Closed));
    }

    #[tokio::test]
    async fn param_reaches_action() {
        let machine: StateMachine<u32, &'static str, u32> = StateMachine::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        machine.add_transition(0, "add", move |n: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Transition::to(n) }
        });
        machine.set_initial_state(0).await.unwrap();

        machine.execute("add", 5).await.unwrap();
        assert_eq!(machine.current_state(), Some(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fsm_trait_delegates() {
        let (machine, journal) = door();
        let fsm: &dyn Fsm<State = Door, Event = Input, Param = ()> = &machine;

        fsm.start().await.unwrap();
        fsm.set_initial_state(Door::Closed).await.unwrap();
        fsm.send_event(Input::Pull, ()).await.unwrap();
        assert!(fsm.send_event(Input::Lock, ()).await.is_ok());
        fsm.close().await.unwrap();

        assert_eq!(fsm.current_state(), Some(Door::Open));
        assert!(journal.entries().contains(&"rejected Lock".to_string()));
    }
}
