/// Durable session storage
///
/// `sessions` holds one row per submission key, `session_turns` the ordered
/// history. Creation is `INSERT OR IGNORE` followed by a `SELECT` in the same
/// transaction, so concurrent creators for one key end up with the same row.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::GraderError;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::agent::AgentRole;
use crate::llm::MessageRole;
use crate::session::{Session, SessionStore, Turn, APP_NAME};

pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, key: &str) -> Result<Option<Session>> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        let session = fetch_in(&mut tx, key).await?;
        tx.commit().await.context("Failed to commit transaction")?;
        Ok(session)
    }

    async fn insert_or_fetch(&self, key: &str) -> Result<Session> {
        let fresh = Session::new(key);
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            "INSERT OR IGNORE INTO sessions (submission_key, id, app_name, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(key)
        .bind(fresh.id.to_string())
        .bind(APP_NAME)
        .bind(fresh.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .context("Failed to create session")?;

        let session = fetch_in(&mut tx, key)
            .await?
            .ok_or_else(|| anyhow!("Session {} missing after insert", key))?;
        tx.commit().await.context("Failed to commit transaction")?;

        Ok(session)
    }

    async fn insert_turn(&self, key: &str, turn: &Turn) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO session_turns (submission_key, agent, author, content, created_at)
            SELECT ?, ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM sessions WHERE submission_key = ?)
            "#,
        )
        .bind(key)
        .bind(turn.agent.as_str())
        .bind(turn.author.to_string())
        .bind(&turn.content)
        .bind(turn.created_at.to_rfc3339())
        .bind(key)
        .execute(&self.pool)
        .await
        .context("Failed to append session turn")?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE submission_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .context("Failed to delete session")?;

        Ok(result.rows_affected() > 0)
    }
}

async fn fetch_in(tx: &mut Transaction<'_, Sqlite>, key: &str) -> Result<Option<Session>> {
    let row = sqlx::query("SELECT id, app_name, created_at FROM sessions WHERE submission_key = ?")
        .bind(key)
        .fetch_optional(&mut **tx)
        .await
        .context("Failed to fetch session")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let turns = sqlx::query(
        "SELECT agent, author, content, created_at FROM session_turns WHERE submission_key = ? ORDER BY id",
    )
    .bind(key)
    .fetch_all(&mut **tx)
    .await
    .context("Failed to fetch session turns")?;

    let id: String = row.get("id");
    let created_at: String = row.get("created_at");

    Ok(Some(Session {
        id: Uuid::parse_str(&id).context("Invalid session id")?,
        key: key.to_string(),
        app_name: row.get("app_name"),
        created_at: parse_time(&created_at)?,
        history: turns.iter().map(turn_from_row).collect::<Result<Vec<_>>>()?,
    }))
}

fn turn_from_row(row: &SqliteRow) -> Result<Turn> {
    let agent: String = row.get("agent");
    let author: String = row.get("author");
    let created_at: String = row.get("created_at");

    Ok(Turn {
        agent: match agent.as_str() {
            "grading" => AgentRole::Grading,
            "feedback" => AgentRole::Feedback,
            other => return Err(anyhow!("Unknown agent role '{}'", other)),
        },
        author: match author.as_str() {
            "user" => MessageRole::User,
            "assistant" => MessageRole::Assistant,
            "system" => MessageRole::System,
            other => return Err(anyhow!("Unknown message role '{}'", other)),
        },
        content: row.get("content"),
        created_at: parse_time(&created_at)?,
    })
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp '{}'", value))?
        .with_timezone(&Utc))
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn lookup(&self, key: &str) -> Result<Option<Session>, GraderError> {
        self.fetch(key)
            .await
            .map_err(|e| GraderError::SessionLookup(format!("{:#}", e)))
    }

    async fn create(&self, key: &str) -> Result<Session, GraderError> {
        self.insert_or_fetch(key)
            .await
            .map_err(|e| GraderError::Database(format!("{:#}", e)))
    }

    async fn append(&self, key: &str, turn: Turn) -> Result<(), GraderError> {
        let appended = self
            .insert_turn(key, &turn)
            .await
            .map_err(|e| GraderError::Database(format!("{:#}", e)))?;

        if !appended {
            return Err(GraderError::SessionLookup(format!("no session for {}", key)));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, GraderError> {
        self.remove(key)
            .await
            .map_err(|e| GraderError::Database(format!("{:#}", e)))
    }
}
