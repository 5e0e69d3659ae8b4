//! Per-submission sessions
//!
//! A session holds the ordered history of agent turns for one submission key.
//! Agents read prior turns for context; turns are only ever appended.
//!
//! Two stores implement [`SessionStore`]:
//!
//! - [`InMemorySessionStore`]: process-scoped, gone after a restart
//! - [`crate::db::SqliteSessionStore`]: durable, enabled with
//!   `storage.durable_sessions`
//!
//! Pipeline checkpoints never depend on sessions surviving a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::GraderError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::agent::AgentRole;
use crate::llm::MessageRole;

pub mod context;

pub use context::ContextWindow;

/// App name recorded on every session
pub const APP_NAME: &str = "grader";

/// One entry in a session's history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    /// Agent the turn belongs to
    pub agent: AgentRole,
    /// `User` for the request sent to the agent, `Assistant` for its reply
    pub author: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn request(agent: AgentRole, content: impl Into<String>) -> Self {
        Self {
            agent,
            author: MessageRole::User,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn response(agent: AgentRole, content: impl Into<String>) -> Self {
        Self {
            agent,
            author: MessageRole::Assistant,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Conversation state for one submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub key: String,
    pub app_name: String,
    pub created_at: DateTime<Utc>,
    pub history: Vec<Turn>,
}

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            app_name: APP_NAME.to_string(),
            created_at: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Turns recorded for one agent, oldest first
    pub fn turns_for(&self, agent: AgentRole) -> impl Iterator<Item = &Turn> {
        self.history.iter().filter(move |t| t.agent == agent)
    }
}

/// Keyed session storage
///
/// `lookup` distinguishes "not found" (`Ok(None)`) from a storage failure
/// (`Err`). A failed lookup must never be treated as a miss.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the session for `key`, if one exists
    async fn lookup(&self, key: &str) -> Result<Option<Session>, GraderError>;

    /// Create the session for `key`
    ///
    /// Never replaces an existing session: if one was created concurrently,
    /// that session is returned instead.
    async fn create(&self, key: &str) -> Result<Session, GraderError>;

    /// Append a turn to the session's history
    async fn append(&self, key: &str, turn: Turn) -> Result<(), GraderError>;

    /// Remove the session; returns whether one existed
    async fn delete(&self, key: &str) -> Result<bool, GraderError>;

    /// Lookup first, create only on a miss
    async fn get_or_create(&self, key: &str) -> Result<Session, GraderError> {
        if let Some(session) = self.lookup(key).await? {
            return Ok(session);
        }

        tracing::debug!("No session for {}, creating one", key);
        self.create(key).await
    }
}

/// Process-scoped session store
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn lookup(&self, key: &str) -> Result<Option<Session>, GraderError> {
        Ok(self.sessions.lock().await.get(key).cloned())
    }

    async fn create(&self, key: &str) -> Result<Session, GraderError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry(key.to_string())
            .or_insert_with(|| Session::new(key));
        Ok(session.clone())
    }

    async fn append(&self, key: &str, turn: Turn) -> Result<(), GraderError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(key)
            .ok_or_else(|| GraderError::SessionLookup(format!("no session for {}", key)))?;
        session.history.push(turn);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, GraderError> {
        Ok(self.sessions.lock().await.remove(key).is_some())
    }

    async fn get_or_create(&self, key: &str) -> Result<Session, GraderError> {
        // Lookup and insert under one lock so concurrent callers agree on the id.
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(key) {
            return Ok(session.clone());
        }

        let session = Session::new(key);
        sessions.insert(key.to_string(), session.clone());
        Ok(session)
    }
}
