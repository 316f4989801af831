//! Saving and restoring the current state
//!
//! Only the current state is persisted. Transitions, observers and queued events are
//! configuration or in-flight work and are rebuilt by the application.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::FsmResult;
use crate::types::Fsm;

/// Stores and reloads a machine's current state.
#[async_trait]
pub trait Persister<M>: Send + Sync
where
    M: Fsm + ?Sized,
{
    /// Write the machine's current state (or its absence) to the store.
    async fn save(&self, machine: &M) -> FsmResult<()>;

    /// Load the stored state and install it with `set_initial_state`.
    ///
    /// A stored absent state leaves the machine untouched.
    async fn restore(&self, machine: &M) -> FsmResult<()>;
}

/// [`Persister`] that keeps the state as JSON in a single file.
///
/// Saves write a sibling `.tmp` file and rename it over the target, so readers never see a
/// half-written file.
#[derive(Clone, Debug)]
pub struct FilePersister {
    path: PathBuf,
}

impl FilePersister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

#[async_trait]
impl<M> Persister<M> for FilePersister
where
    M: Fsm + ?Sized,
    M::State: Serialize + DeserializeOwned,
{
    async fn save(&self, machine: &M) -> FsmResult<()> {
        let state = machine.current_state();
        let bytes = serde_json::to_vec(&state)?;

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Saved state {:?} to {}", state, self.path.display());
        Ok(())
    }

    async fn restore(&self, machine: &M) -> FsmResult<()> {
        let bytes = tokio::fs::read(&self.path).await?;
        match serde_json::from_slice::<Option<M::State>>(&bytes)? {
            Some(state) => {
                debug!("Restoring state {:?} from {}", state, self.path.display());
                machine.set_initial_state(state).await
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FsmError;
    use crate::machine::StateMachine;

    fn scratch_file() -> PathBuf {
        std::env::temp_dir().join(format!("fsm-engine-{}.json", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn save_writes_json_state() {
        let path = scratch_file();
        let persister = FilePersister::new(&path);
        let machine: StateMachine<String, String> = StateMachine::new();
        machine.set_initial_state("ready".to_string()).await.unwrap();

        persister.save(&machine).await.unwrap();

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, "\"ready\"");
        assert!(!persister.temp_path().exists());
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn restoring_absent_state_is_a_no_op() {
        let path = scratch_file();
        let persister = FilePersister::new(&path);

        let empty: StateMachine<String, String> = StateMachine::new();
        persister.save(&empty).await.unwrap();

        let target: StateMachine<String, String> = StateMachine::new();
        target.set_initial_state("kept".to_string()).await.unwrap();
        persister.restore(&target).await.unwrap();
        assert_eq!(target.current_state().as_deref(), Some("kept"));
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let persister = FilePersister::new(scratch_file());
        let machine: StateMachine<String, String> = StateMachine::new();
        let err = persister.restore(&machine).await.unwrap_err();
        assert!(matches!(err, FsmError::Io(_)));
    }

    #[tokio::test]
    async fn garbage_is_serialization_error() {
        let path = scratch_file();
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let persister = FilePersister::new(&path);
        let machine: StateMachine<String, String> = StateMachine::new();

        let err = persister.restore(&machine).await.unwrap_err();
        assert!(matches!(err, FsmError::Serialization(_)));
        assert_eq!(machine.current_state(), None);
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
