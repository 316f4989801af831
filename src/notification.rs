//! Lifecycle notifications and the channel that delivers them
//!
//! Every lifecycle fact the engine reports is a [`Notification`] value. The machine hands
//! notifications to a [`NotificationChannel`], which either dispatches them to the
//! [`ObserverRegistry`] on the spot ([`NotificationMode::Inline`]) or puts them on a bounded
//! queue drained by a single worker task ([`NotificationMode::Queued`]).
//!
//! Queued delivery keeps observers off the transition path, at the cost of ordering relative
//! to the event queue: an observer may see `TransitionStarted` for one event before it has
//! processed `StateChanged` for the previous one. Within the notification queue, delivery is
//! strictly FIFO.
//!
//! Until the worker is spawned, queued notifications are held in an unbounded backlog instead
//! of the bounded queue: nothing could drain the queue yet, so waiting on it would never end.
//! The worker delivers the backlog first.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::NotificationMode;
use crate::error::{ActionError, FsmError, FsmResult};
use crate::observer::{Observer, ObserverRegistry};
use crate::types::{EventKey, StateKey};

/// One lifecycle fact, carrying exactly what its observer callback needs.
#[derive(Clone, Debug)]
pub enum Notification<S, E> {
    StateChanged { from: S, to: S },
    StateEntered(S),
    StateExited(S),
    EventNotAccepted { state: Option<S>, event: E },
    TransitionStarted { state: S, event: E },
    TransitionEnded { state: S, event: E },
    MachineStarted,
    MachineStopped,
    MachineError(ActionError),
}

impl<S, E> Notification<S, E> {
    /// Invoke the callback on `observer` that corresponds to this notification.
    pub fn deliver(&self, observer: &dyn Observer<S, E>) {
        match self {
            Notification::StateChanged { from, to } => observer.state_changed(from, to),
            Notification::StateEntered(state) => observer.state_entered(state),
            Notification::StateExited(state) => observer.state_exited(state),
            Notification::EventNotAccepted { state, event } => {
                observer.event_not_accepted(state.as_ref(), event)
            }
            Notification::TransitionStarted { state, event } => {
                observer.transition_started(state, event)
            }
            Notification::TransitionEnded { state, event } => {
                observer.transition_ended(state, event)
            }
            Notification::MachineStarted => observer.machine_started(),
            Notification::MachineStopped => observer.machine_stopped(),
            Notification::MachineError(err) => observer.machine_error(err),
        }
    }

    /// Short name of the variant, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::StateChanged { .. } => "StateChanged",
            Notification::StateEntered(_) => "StateEntered",
            Notification::StateExited(_) => "StateExited",
            Notification::EventNotAccepted { .. } => "EventNotAccepted",
            Notification::TransitionStarted { .. } => "TransitionStarted",
            Notification::TransitionEnded { .. } => "TransitionEnded",
            Notification::MachineStarted => "MachineStarted",
            Notification::MachineStopped => "MachineStopped",
            Notification::MachineError(_) => "MachineError",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Notification::MachineStopped)
    }
}

enum Delivery<S, E> {
    Inline,
    Queued {
        tx: mpsc::Sender<Notification<S, E>>,
        worker: Mutex<Worker<S, E>>,
    },
}

enum Worker<S, E> {
    /// Not spawned yet: the receiver waits here and sends go to the backlog.
    Pending {
        rx: mpsc::Receiver<Notification<S, E>>,
        backlog: VecDeque<Notification<S, E>>,
    },
    Spawned,
}

/// Delivers notifications to an [`ObserverRegistry`], inline or through a queue.
pub struct NotificationChannel<S, E> {
    registry: Arc<ObserverRegistry<S, E>>,
    delivery: Delivery<S, E>,
}

impl<S, E> NotificationChannel<S, E>
where
    S: StateKey,
    E: EventKey,
{
    /// Channel that dispatches on the sender's task before `send` returns.
    pub fn inline(registry: Arc<ObserverRegistry<S, E>>) -> Self {
        Self {
            registry,
            delivery: Delivery::Inline,
        }
    }

    /// Channel backed by a bounded queue of `capacity` notifications.
    ///
    /// Nothing is delivered until [`spawn_worker`](Self::spawn_worker) is called; until then
    /// sends never wait. A zero capacity is rounded up to one.
    pub fn queued(registry: Arc<ObserverRegistry<S, E>>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            registry,
            delivery: Delivery::Queued {
                tx,
                worker: Mutex::new(Worker::Pending {
                    rx,
                    backlog: VecDeque::new(),
                }),
            },
        }
    }

    /// Build the channel selected by `mode`.
    pub fn with_mode(registry: Arc<ObserverRegistry<S, E>>, mode: NotificationMode) -> Self {
        match mode {
            NotificationMode::Inline => Self::inline(registry),
            NotificationMode::Queued(capacity) => Self::queued(registry, capacity),
        }
    }

    pub fn mode(&self) -> NotificationMode {
        match &self.delivery {
            Delivery::Inline => NotificationMode::Inline,
            Delivery::Queued { tx, .. } => NotificationMode::Queued(tx.max_capacity()),
        }
    }

    pub fn registry(&self) -> &Arc<ObserverRegistry<S, E>> {
        &self.registry
    }

    /// Register an observer with the underlying registry
    pub fn register(&self, observer: Arc<dyn Observer<S, E>>) {
        self.registry.register(observer);
    }

    /// Deliver (inline) or enqueue (queued) one notification.
    ///
    /// In queued mode this waits while the queue is full, and fails with
    /// [`FsmError::QueueClosed`] once the worker has stopped.
    pub async fn send(&self, notification: Notification<S, E>) -> FsmResult<()> {
        match &self.delivery {
            Delivery::Inline => {
                self.registry.dispatch(&notification);
                Ok(())
            }
            Delivery::Queued { tx, worker } => {
                let Some(notification) = Self::hold_back(worker, notification) else {
                    return Ok(());
                };
                tx.send(notification)
                    .await
                    .map_err(|_| FsmError::QueueClosed)
            }
        }
    }

    /// Like [`send`](Self::send) but never waits: a full queue yields
    /// [`FsmError::QueueFull`].
    pub fn try_send(&self, notification: Notification<S, E>) -> FsmResult<()> {
        match &self.delivery {
            Delivery::Inline => {
                self.registry.dispatch(&notification);
                Ok(())
            }
            Delivery::Queued { tx, worker } => {
                let Some(notification) = Self::hold_back(worker, notification) else {
                    return Ok(());
                };
                tx.try_send(notification).map_err(|e| match e {
                    mpsc::error::TrySendError::Full(_) => FsmError::QueueFull,
                    mpsc::error::TrySendError::Closed(_) => FsmError::QueueClosed,
                })
            }
        }
    }

    /// Park `notification` in the backlog while no worker exists; otherwise hand it back.
    fn hold_back(
        worker: &Mutex<Worker<S, E>>,
        notification: Notification<S, E>,
    ) -> Option<Notification<S, E>> {
        match &mut *lock(worker) {
            Worker::Pending { backlog, .. } => {
                backlog.push_back(notification);
                None
            }
            Worker::Spawned => Some(notification),
        }
    }

    /// Spawn the task that drains the queue.
    ///
    /// Returns `None` for inline channels and when the worker was already spawned. The worker
    /// delivers in FIFO order and exits right after delivering `MachineStopped`; later sends
    /// fail with [`FsmError::QueueClosed`].
    pub fn spawn_worker(&self) -> Option<JoinHandle<()>> {
        let Delivery::Queued { worker, .. } = &self.delivery else {
            return None;
        };
        let (mut rx, backlog) = {
            let mut worker = lock(worker);
            match std::mem::replace(&mut *worker, Worker::Spawned) {
                Worker::Pending { rx, backlog } => (rx, backlog),
                Worker::Spawned => return None,
            }
        };
        let registry = self.registry.clone();

        Some(tokio::spawn(async move {
            debug!(
                "Notification worker started with {} held notifications",
                backlog.len()
            );
            let mut stopped = false;
            for notification in backlog {
                registry.dispatch(&notification);
                if notification.is_terminal() {
                    stopped = true;
                    break;
                }
            }
            while !stopped {
                let Some(notification) = rx.recv().await else {
                    break;
                };
                registry.dispatch(&notification);
                stopped = notification.is_terminal();
            }
            rx.close();
            debug!("Notification worker stopped");
        }))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
