//! Queued state machine: serialized event processing on a single consumer task
//!
//! [`AsyncStateMachine`] wraps a [`StateMachine`] and owns a bounded event queue. Producers
//! call [`send_event`](AsyncStateMachine::send_event) from any task; one consumer task
//! dequeues events and calls [`StateMachine::execute`] for each, so transitions run one at a
//! time in queue order no matter how many producers there are.
//!
//! Lifecycle: `Created → Started → Closed`.
//!
//! - Events are accepted only while `Started`.
//! - [`close`](AsyncStateMachine::close) returns promptly. The consumer finishes the
//!   transition it is running, discards whatever is still queued, and emits
//!   `MachineStopped` as its last act. [`join`](AsyncStateMachine::join) waits for that.
//! - Closing twice is a no-op; starting twice or after close is an error.
//!
//! Action failures have no caller to return to here. The consumer logs them at `debug`;
//! observers learn about them from `MachineError`.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::MachineConfig;
use crate::error::{FsmError, FsmResult};
use crate::handlers::{Action, TransitionTable};
use crate::machine::StateMachine;
use crate::notification::{Notification, NotificationChannel};
use crate::observer::{Observer, ObserverRegistry};
use crate::types::{EventKey, Fsm, StateKey, Transition};

/// Lifecycle phase of an [`AsyncStateMachine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Created,
    Started,
    Closed,
}

struct Envelope<E, P> {
    event: E,
    param: P,
}

/// Cloneable handle for feeding events into an [`AsyncStateMachine`].
///
/// Actions can capture one to emit follow-up events without holding the machine itself.
/// Prefer [`try_send`](Self::try_send) from inside an action: `send` waits for queue space,
/// and only the consumer running that action can make space.
pub struct EventSender<E, P> {
    tx: mpsc::Sender<Envelope<E, P>>,
    phase: watch::Receiver<Phase>,
}

impl<E, P> Clone for EventSender<E, P> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            phase: self.phase.clone(),
        }
    }
}

impl<E, P> EventSender<E, P>
where
    E: EventKey,
    P: Send + 'static,
{
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    fn check_phase(&self) -> FsmResult<()> {
        match self.phase() {
            Phase::Created => Err(FsmError::NotStarted),
            Phase::Started => Ok(()),
            Phase::Closed => Err(FsmError::QueueClosed),
        }
    }

    /// Enqueue an event, waiting while the queue is full.
    pub async fn send(&self, event: E, param: P) -> FsmResult<()> {
        self.check_phase()?;
        self.tx
            .send(Envelope { event, param })
            .await
            .map_err(|_| FsmError::QueueClosed)
    }

    /// Enqueue an event without waiting; a full queue yields [`FsmError::QueueFull`].
    pub fn try_send(&self, event: E, param: P) -> FsmResult<()> {
        self.check_phase()?;
        self.tx
            .try_send(Envelope { event, param })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => FsmError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => FsmError::QueueClosed,
            })
    }
}

#[derive(Default)]
struct Tasks {
    consumer: Option<JoinHandle<()>>,
    notifier: Option<JoinHandle<()>>,
}

/// State machine that serializes events through a queue and a single consumer task.
pub struct AsyncStateMachine<S, E, P = ()> {
    core: Arc<StateMachine<S, E, P>>,
    events: EventSender<E, P>,
    phase: watch::Sender<Phase>,
    // Handed to the consumer task on start.
    queue: Mutex<Option<mpsc::Receiver<Envelope<E, P>>>>,
    tasks: Mutex<Tasks>,
    config: MachineConfig,
}

impl<S, E, P> Default for AsyncStateMachine<S, E, P>
where
    S: StateKey,
    E: EventKey,
    P: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S, E, P> AsyncStateMachine<S, E, P>
where
    S: StateKey,
    E: EventKey,
    P: Send + 'static,
{
    /// Create a machine with the default [`MachineConfig`].
    pub fn new() -> Self {
        Self::with_config(MachineConfig::default())
    }

    pub fn with_config(config: MachineConfig) -> Self {
        Self::from_parts(config, TransitionTable::new())
    }

    pub(crate) fn from_parts(config: MachineConfig, table: TransitionTable<S, E, P>) -> Self {
        let notifier = NotificationChannel::with_mode(
            Arc::new(ObserverRegistry::new()),
            config.notification_mode(),
        );
        let core = Arc::new(StateMachine::from_parts(notifier, table));
        let (tx, rx) = mpsc::channel(config.effective_event_queue_capacity());
        let (phase, phase_rx) = watch::channel(Phase::Created);

        Self {
            core,
            events: EventSender {
                tx,
                phase: phase_rx,
            },
            phase,
            queue: Mutex::new(Some(rx)),
            tasks: Mutex::new(Tasks::default()),
            config,
        }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// The wrapped synchronous core.
    pub fn core(&self) -> &Arc<StateMachine<S, E, P>> {
        &self.core
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// A cloneable handle for submitting events.
    pub fn sender(&self) -> EventSender<E, P> {
        self.events.clone()
    }

    /// Register `handler` for `(state, event)`, replacing any previous action.
    pub fn add_transition<F, Fut>(&self, state: S, event: E, handler: F)
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Transition<S>> + Send + 'static,
    {
        self.core.add_transition(state, event, handler);
    }

    pub fn add_action(&self, state: S, event: E, action: Action<S, P>) {
        self.core.add_action(state, event, action);
    }

    pub fn add_observer(&self, observer: Arc<dyn Observer<S, E>>) {
        self.core.add_observer(observer);
    }

    pub async fn set_initial_state(&self, state: S) -> FsmResult<()> {
        self.core.set_initial_state(state).await
    }

    pub fn current_state(&self) -> Option<S> {
        self.core.current_state()
    }

    /// Enqueue an event for the consumer task.
    ///
    /// Fails with [`FsmError::NotStarted`] before `start` and [`FsmError::QueueClosed`]
    /// after `close`. Waits only while the queue is full.
    pub async fn send_event(&self, event: E, param: P) -> FsmResult<()> {
        self.events.send(event, param).await
    }

    /// Enqueue an event without waiting.
    pub fn try_send_event(&self, event: E, param: P) -> FsmResult<()> {
        self.events.try_send(event, param)
    }

    /// Spawn the consumer (and the notification worker, for queued delivery) and emit
    /// `MachineStarted`.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start(&self) -> FsmResult<()> {
        // Subscribed before the flip so the consumer cannot miss a close that lands while
        // this call is still running.
        let watcher = self.phase.subscribe();
        let mut previous = Phase::Created;
        self.phase.send_if_modified(|phase| {
            previous = *phase;
            if *phase == Phase::Created {
                *phase = Phase::Started;
                true
            } else {
                false
            }
        });

        match previous {
            Phase::Created => {}
            Phase::Started => return Err(FsmError::AlreadyStarted),
            Phase::Closed => return Err(FsmError::QueueClosed),
        }

        let events = self
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(FsmError::AlreadyStarted)?;

        let notifier = self.core.notifier().spawn_worker();
        self.core.notify(Notification::MachineStarted).await?;

        let consumer = tokio::spawn(run_event_loop(self.core.clone(), events, watcher));

        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.consumer = Some(consumer);
        tasks.notifier = notifier;
        debug!(
            "FSM started (event queue {}, notifications {:?})",
            self.config.effective_event_queue_capacity(),
            self.config.notification_mode()
        );
        Ok(())
    }

    /// Stop accepting events and signal the consumer to stop.
    ///
    /// Returns without waiting for the consumer; see [`join`](Self::join). A second call
    /// is a no-op. Closing a machine that was never started emits nothing.
    pub async fn close(&self) -> FsmResult<()> {
        let mut previous = Phase::Closed;
        self.phase.send_if_modified(|phase| {
            previous = *phase;
            if *phase == Phase::Closed {
                false
            } else {
                *phase = Phase::Closed;
                true
            }
        });

        match previous {
            Phase::Created => {
                // Never started: drop the queue so nothing can ever be consumed.
                self.queue
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .take();
                debug!("FSM closed before start");
            }
            Phase::Started => debug!("FSM closing"),
            Phase::Closed => {}
        }
        Ok(())
    }

    /// Wait for the background tasks to finish after [`close`](Self::close).
    ///
    /// Returns [`FsmError::TaskFailed`] if the consumer or the notification worker panicked,
    /// typically because an observer panicked. Returns immediately if the machine was never
    /// started or was already joined.
    pub async fn join(&self) -> FsmResult<()> {
        let Tasks { consumer, notifier } = std::mem::take(
            &mut *self
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );

        if let Some(consumer) = consumer {
            if let Err(err) = consumer.await {
                // The consumer never emitted MachineStopped, so the worker would wait forever.
                if let Some(notifier) = notifier {
                    notifier.abort();
                }
                return Err(FsmError::TaskFailed(err));
            }
        }
        if let Some(notifier) = notifier {
            notifier.await?;
        }
        Ok(())
    }
}

async fn run_event_loop<S, E, P>(
    core: Arc<StateMachine<S, E, P>>,
    mut events: mpsc::Receiver<Envelope<E, P>>,
    mut phase: watch::Receiver<Phase>,
) where
    S: StateKey,
    E: EventKey,
    P: Send + 'static,
{
    debug!("Event consumer started");
    if *phase.borrow_and_update() != Phase::Closed {
        consume(&core, &mut events, &mut phase).await;
    }

    events.close();
    let mut discarded = 0usize;
    while events.try_recv().is_ok() {
        discarded += 1;
    }
    if discarded > 0 {
        debug!("Discarded {} queued events on close", discarded);
    }

    if let Err(err) = core.notify(Notification::MachineStopped).await {
        warn!("Could not deliver MachineStopped: {}", err);
    }
    debug!("Event consumer stopped");
}

/// Execute queued events until the machine is closed or dropped.
async fn consume<S, E, P>(
    core: &StateMachine<S, E, P>,
    events: &mut mpsc::Receiver<Envelope<E, P>>,
    phase: &mut watch::Receiver<Phase>,
) where
    S: StateKey,
    E: EventKey,
    P: Send + 'static,
{
    loop {
        tokio::select! {
            biased;

            changed = phase.changed() => {
                // An error means the machine itself was dropped.
                if changed.is_err() || *phase.borrow_and_update() == Phase::Closed {
                    break;
                }
            }
            envelope = events.recv() => {
                let Some(Envelope { event, param }) = envelope else {
                    break;
                };
                match core.execute(event, param).await {
                    Ok(_) => {}
                    Err(err) if err.is_action_failure() => debug!("{}", err),
                    Err(err) => warn!("Event handling failed: {}", err),
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl<S, E, P> Fsm for AsyncStateMachine<S, E, P>
where
    S: StateKey,
    E: EventKey,
    P: Send + 'static,
{
    type State = S;
    type Event = E;
    type Param = P;

    async fn start(&self) -> FsmResult<()> {
        AsyncStateMachine::start(self).await
    }

    async fn close(&self) -> FsmResult<()> {
        AsyncStateMachine::close(self).await
    }

    fn add_observer(&self, observer: Arc<dyn Observer<S, E>>) {
        AsyncStateMachine::add_observer(self, observer);
    }

    async fn set_initial_state(&self, state: S) -> FsmResult<()> {
        AsyncStateMachine::set_initial_state(self, state).await
    }

    fn current_state(&self) -> Option<S> {
        AsyncStateMachine::current_state(self)
    }

    async fn send_event(&self, event: E, param: P) -> FsmResult<()> {
        AsyncStateMachine::send_event(self, event, param).await
    }
}
