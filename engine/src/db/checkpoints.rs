/// Checkpoint persistence
///
/// One row per submission in `pipeline_states`. The full `PipelineState` is
/// stored as JSON; stage, token and error are duplicated into columns for
/// inspection with plain SQL.
use anyhow::{Context, Result};
use async_trait::async_trait;
use sdk::errors::GraderError;
use sqlx::{Row, SqlitePool};

use crate::pipeline::{CheckpointStore, PipelineState, Stage};

/// Summary row for listing submissions
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointSummary {
    pub key: String,
    pub stage: Stage,
    pub updated_at: i64,
}

/// Sqlite-backed checkpoint store
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_state(&self, key: &str) -> Result<Option<PipelineState>> {
        let row = sqlx::query("SELECT state_json FROM pipeline_states WHERE submission_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch checkpoint")?;

        row.map(|r| {
            let json: String = r.get("state_json");
            serde_json::from_str(&json).context("Failed to decode checkpoint")
        })
        .transpose()
    }

    async fn save_state(&self, state: &PipelineState) -> Result<()> {
        let json = serde_json::to_string(state).context("Failed to encode checkpoint")?;

        sqlx::query(
            r#"
            INSERT INTO pipeline_states
                (submission_key, stage, suspension_token, error, state_json, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(submission_key) DO UPDATE SET
                stage = excluded.stage,
                suspension_token = excluded.suspension_token,
                error = excluded.error,
                state_json = excluded.state_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.key)
        .bind(state.stage.as_str())
        .bind(state.suspension_token.as_deref())
        .bind(state.error.as_deref())
        .bind(json)
        .bind(state.updated_at.timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to save checkpoint")?;

        Ok(())
    }

    async fn delete_state(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pipeline_states WHERE submission_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .context("Failed to delete checkpoint")?;

        Ok(result.rows_affected() > 0)
    }

    /// Most recently updated submissions first
    pub async fn list(&self, limit: i64) -> Result<Vec<CheckpointSummary>> {
        let rows = sqlx::query(
            "SELECT submission_key, stage, updated_at FROM pipeline_states ORDER BY updated_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list checkpoints")?;

        rows.into_iter()
            .map(|r| {
                let stage: String = r.get("stage");
                Ok(CheckpointSummary {
                    key: r.get("submission_key"),
                    stage: stage.parse()?,
                    updated_at: r.get("updated_at"),
                })
            })
            .collect()
    }
}

fn storage_error(e: anyhow::Error) -> GraderError {
    GraderError::Database(format!("{:#}", e))
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self, key: &str) -> Result<Option<PipelineState>, GraderError> {
        self.load_state(key).await.map_err(storage_error)
    }

    async fn save(&self, state: &PipelineState) -> Result<(), GraderError> {
        self.save_state(state).await.map_err(storage_error)
    }

    async fn delete(&self, key: &str) -> Result<bool, GraderError> {
        self.delete_state(key).await.map_err(storage_error)
    }
}
