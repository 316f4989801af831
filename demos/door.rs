//! A door driven by a queued machine, with every notification logged.
//!
//! Run with `cargo run --example door`; set `RUST_LOG=debug` to see the engine's own logs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fsm_engine::{
    FilePersister, FsmResult, LogObserver, MachineBuilder, Observer, Persister, Transition,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
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
    Unlock,
}

/// Counts inputs the machine is done with, accepted or not.
#[derive(Default)]
struct Handled(AtomicUsize);

impl Handled {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl Observer<Door, Input> for Handled {
    fn state_changed(&self, _from: &Door, _to: &Door) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn event_not_accepted(&self, _state: Option<&Door>, _event: &Input) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::main]
async fn main() -> FsmResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let handled = Arc::new(Handled::default());

    // The key code travels with the event as the action parameter.
    let door = MachineBuilder::<Door, Input, u32>::new()
        .initial(Door::Closed)
        .observer(Arc::new(LogObserver::new()))
        .observer(handled.clone())
        .when(Door::Closed)
            .on(Input::Push, |_| async { Transition::to(Door::Open) })
            .on(Input::Lock, |_| async { Transition::to(Door::Locked) })
            .done()
        .when(Door::Open)
            .on(Input::Pull, |_| async { Transition::to(Door::Closed) })
            .done()
        .when(Door::Locked)
            .on(Input::Unlock, |code| async move {
                if code == 1234 {
                    Transition::to(Door::Closed)
                } else {
                    Transition::failed(Door::Locked, format!("wrong code {code}"))
                }
            })
            .done()
        .build_async()?;

    door.start().await?;
    let inputs = [
        (Input::Push, 0),
        (Input::Lock, 0),
        (Input::Pull, 0),
        (Input::Lock, 0),
        (Input::Unlock, 1111),
        (Input::Unlock, 1234),
    ];
    let inputs_len = inputs.len();
    for (input, code) in inputs {
        door.send_event(input, code).await?;
    }

    // Close discards whatever is still queued, so wait for every input to be handled.
    while handled.count() < inputs_len {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let persister = FilePersister::new(std::env::temp_dir().join("fsm-engine-door.json"));
    persister.save(&door).await?;
    info!("Saved door state to {}", persister.path().display());

    door.close().await?;
    door.join().await
}
