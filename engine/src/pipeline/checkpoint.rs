//! Checkpoint storage
//!
//! The orchestrator saves a [`PipelineState`] after every stage transition.
//! `SqliteCheckpointStore` in the db module survives restarts; the in-memory
//! store is for tests and one-shot runs.

use async_trait::async_trait;
use sdk::errors::GraderError;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::state::PipelineState;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Latest checkpoint for `key`, if any
    async fn load(&self, key: &str) -> Result<Option<PipelineState>, GraderError>;

    /// Insert or replace the checkpoint for `state.key`
    async fn save(&self, state: &PipelineState) -> Result<(), GraderError>;

    /// Remove the checkpoint; returns whether one existed
    async fn delete(&self, key: &str) -> Result<bool, GraderError>;
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    states: RwLock<HashMap<String, PipelineState>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, key: &str) -> Result<Option<PipelineState>, GraderError> {
        Ok(self.states.read().await.get(key).cloned())
    }

    async fn save(&self, state: &PipelineState) -> Result<(), GraderError> {
        self.states
            .write()
            .await
            .insert(state.key.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, GraderError> {
        Ok(self.states.write().await.remove(key).is_some())
    }
}
