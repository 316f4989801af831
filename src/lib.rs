//! Async finite state machine (FSM) engine with observers, a serialized event queue and
//! pluggable persistence.
//!
//! `fsm-engine` models a machine as a table of `(state, event) → action`. An action is an async
//! closure that receives a caller-supplied parameter and returns the next state, optionally
//! together with a failure. Around that table the engine reports every lifecycle fact
//! (state entered/exited/changed, transition started/ended, event not accepted, machine
//! started/stopped, action error) to registered observers.
//!
//! Two machines share the same core:
//! - [`StateMachine`] runs one transition per [`execute`](StateMachine::execute) call on the
//!   caller's task. It never holds its lock across an action or an observer callback, so
//!   actions can call back into the machine.
//! - [`AsyncStateMachine`] puts a bounded event queue and a single consumer task in front of the
//!   core. Any number of producers can [`send_event`](AsyncStateMachine::send_event)
//!   concurrently; transitions still run one at a time, in queue order.
//!
//! Notifications are either dispatched inline on the emitting task or pushed onto their own
//! bounded queue drained by a worker task (see [`NotificationMode`]). Inline delivery preserves
//! ordering against the event stream; queued delivery keeps slow observers off the
//! transition path.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use fsm_engine::{FsmResult, LogObserver, MachineBuilder, Transition};
//!
//! #[derive(Clone, Debug, PartialEq, Eq, Hash)]
//! enum Door {
//!     Closed,
//!     Open,
//!     Locked,
//! }
//!
//! #[derive(Clone, Debug, PartialEq, Eq, Hash)]
//! enum Input {
//!     Push,
//!     Pull,
//!     Lock,
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> FsmResult<()> {
//!     let door = MachineBuilder::<Door, Input>::new()
//!         .initial(Door::Closed)
//!         .observer(Arc::new(LogObserver::new()))
//!         .when(Door::Closed)
//!             .on(Input::Push, |_| async { Transition::to(Door::Open) })
//!             .on(Input::Lock, |_| async { Transition::to(Door::Locked) })
//!             .done()
//!         .when(Door::Open)
//!             .on(Input::Pull, |_| async { Transition::to(Door::Closed) })
//!             .done()
//!         .build()?;
//!
//!     door.execute(Input::Push, ()).await?;
//!     assert_eq!(door.current_state(), Some(Door::Open));
//!
//!     // Nothing is registered for (Open, Lock): the event is reported, not failed.
//!     let outcome = door.execute(Input::Lock, ()).await?;
//!     assert!(!outcome.is_transition());
//!     assert_eq!(door.current_state(), Some(Door::Open));
//!     Ok(())
//! }
//! ```
//!
//! ## Failing actions
//!
//! An action that cannot do its job still names the state the machine ends up in, and attaches
//! the failure with [`Transition::failed`]. The state is applied, observers get
//! `MachineError`, and `execute` returns [`FsmError::ActionFailed`]:
//!
//! ```rust
//! use fsm_engine::{FsmError, StateMachine, Transition};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let machine: StateMachine<&str, &str, u32> = StateMachine::new();
//! machine.add_transition("idle", "charge", |amount| async move {
//!     if amount > 100 {
//!         Transition::failed("declined", format!("{amount} exceeds the limit"))
//!     } else {
//!         Transition::to("paid")
//!     }
//! });
//! machine.set_initial_state("idle").await.unwrap();
//!
//! let err = machine.execute("charge", 250).await.unwrap_err();
//! assert!(matches!(err, FsmError::ActionFailed(_)));
//! assert_eq!(machine.current_state(), Some("declined"));
//! # }
//! ```
//!
//! ## Queued machines
//!
//! [`AsyncStateMachine`] has a lifecycle: events are accepted between
//! [`start`](AsyncStateMachine::start) and [`close`](AsyncStateMachine::close).
//! `close` lets the running transition finish, drops anything still queued and makes the
//! consumer emit `MachineStopped`; [`join`](AsyncStateMachine::join) waits for the background
//! tasks and reports a panic in any of them as [`FsmError::TaskFailed`].
//!
//! ```rust
//! use fsm_engine::{FsmResult, MachineBuilder, Transition};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> FsmResult<()> {
//!     let turnstile = MachineBuilder::<&str, &str>::new()
//!         .initial("locked")
//!         .when("locked")
//!             .on("coin", |_| async { Transition::to("unlocked") })
//!             .done()
//!         .when("unlocked")
//!             .on("push", |_| async { Transition::to("locked") })
//!             .done()
//!         .build_async()?;
//!
//!     turnstile.start().await?;
//!     let sender = turnstile.sender();
//!     sender.send("coin", ()).await?;
//!     sender.send("push", ()).await?;
//!     sender.send("coin", ()).await?;
//!
//!     while turnstile.current_state() != Some("unlocked") {
//!         tokio::task::yield_now().await;
//!     }
//!
//!     turnstile.close().await?;
//!     turnstile.join().await
//! }
//! ```
//!
//! Actions that feed events back into their own machine should capture an [`EventSender`] and
//! use [`try_send`](EventSender::try_send): the consumer running the action is the only task
//! that can make room in a full queue.
//!
//! ## Persistence
//!
//! [`Persister`] saves and restores the current state of anything implementing [`Fsm`].
//! [`FilePersister`] keeps it as JSON in one file:
//!
//! ```rust,no_run
//! # use fsm_engine::{FilePersister, FsmResult, Persister, StateMachine};
//! # async fn example() -> FsmResult<()> {
//! let persister = FilePersister::new("/var/lib/app/door.json");
//! let door: StateMachine<String, String> = StateMachine::new();
//! persister.restore(&door).await?;
//! // ... run the machine ...
//! persister.save(&door).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Restoring uses [`set_initial_state`](Fsm::set_initial_state), so observers see only
//! `StateEntered`.

// Module declarations
pub mod async_machine;
pub mod builder;
pub mod config;
pub mod error;
pub mod handlers;
pub mod machine;
pub mod notification;
pub mod observer;
pub mod persist;
pub mod types;

// Re-export main types for convenience
pub use async_machine::{AsyncStateMachine, EventSender, Phase};
pub use builder::{MachineBuilder, WhenBuilder};
pub use config::{MachineConfig, NotificationMode, DEFAULT_QUEUE_CAPACITY};
pub use error::{ActionError, FsmError, FsmResult};
pub use machine::StateMachine;
pub use notification::{Notification, NotificationChannel};
pub use observer::{LogObserver, Observer, ObserverRegistry};
pub use persist::{FilePersister, Persister};
pub use types::{EventKey, ExecuteOutcome, Fsm, StateKey, Transition};

// Re-export handler types for advanced usage
pub use handlers::{Action, TransitionTable};
