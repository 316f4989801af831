#![allow(dead_code)]

use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fsm_engine::{ActionError, Observer};

/// Observer that records one line per notification.
#[derive(Default)]
pub struct Recorder {
    lines: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.starts_with(prefix))
            .collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.matching(prefix).len()
    }

    fn push(&self, line: String) {
        self.lines.lock().unwrap().push(line);
    }
}

impl<S: Debug, E: Debug> Observer<S, E> for Recorder {
    fn state_changed(&self, from: &S, to: &S) {
        self.push(format!("changed {from:?} -> {to:?}"));
    }

    fn state_entered(&self, state: &S) {
        self.push(format!("entered {state:?}"));
    }

    fn state_exited(&self, state: &S) {
        self.push(format!("exited {state:?}"));
    }

    fn event_not_accepted(&self, state: Option<&S>, event: &E) {
        self.push(format!("not accepted {event:?} in {state:?}"));
    }

    fn transition_started(&self, state: &S, event: &E) {
        self.push(format!("started {state:?} on {event:?}"));
    }

    fn transition_ended(&self, state: &S, event: &E) {
        self.push(format!("ended {state:?} on {event:?}"));
    }

    fn machine_started(&self) {
        self.push("machine started".to_string());
    }

    fn machine_stopped(&self) {
        self.push("machine stopped".to_string());
    }

    fn machine_error(&self, err: &ActionError) {
        self.push(format!("error {err}"));
    }
}

/// Poll `condition` until it holds, failing the test after ten seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
