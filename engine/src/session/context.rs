//! Context window over a session's history
//!
//! Builds the message list sent to a provider: the agent's system instruction,
//! then as many of the most recent turns as fit the token budget, then the
//! current request. Older turns are dropped from the view only; the session's
//! history is never rewritten.

use super::{Session, Turn};
use crate::agent::AgentRole;
use crate::llm::Message;

/// Default context limit in tokens (conservative estimate for most models)
const DEFAULT_CONTEXT_LIMIT: usize = 8000;

/// Average characters per token (rough estimate: 1 token ≈ 4 characters)
const CHARS_PER_TOKEN: usize = 4;

/// Per-message overhead for role and structure
const MESSAGE_OVERHEAD: usize = 10;

/// Bounded prompt view of a session
#[derive(Debug, Clone, Copy)]
pub struct ContextWindow {
    context_limit: usize,
}

impl ContextWindow {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_CONTEXT_LIMIT)
    }

    pub fn with_limit(context_limit: usize) -> Self {
        Self { context_limit }
    }

    pub fn context_limit(&self) -> usize {
        self.context_limit
    }

    /// Messages for one invocation of `agent`
    ///
    /// The system instruction and the current request are always included.
    /// Prior turns of the same agent fill the remaining budget, newest first.
    pub fn build(
        &self,
        session: &Session,
        agent: AgentRole,
        system: &str,
        request: &str,
    ) -> Vec<Message> {
        let system_msg = Message::system(system);
        let request_msg = Message::user(request);

        let mut budget = self
            .context_limit
            .saturating_sub(Self::estimate_tokens(&system_msg))
            .saturating_sub(Self::estimate_tokens(&request_msg));

        let mut prior: Vec<Message> = Vec::new();
        for turn in session.turns_for(agent).collect::<Vec<_>>().into_iter().rev() {
            let message = Self::turn_message(turn);
            let cost = Self::estimate_tokens(&message);
            if cost > budget {
                break;
            }
            budget -= cost;
            prior.push(message);
        }
        prior.reverse();

        let mut messages = Vec::with_capacity(prior.len() + 2);
        messages.push(system_msg);
        messages.extend(prior);
        messages.push(request_msg);
        messages
    }

    fn turn_message(turn: &Turn) -> Message {
        Message {
            role: turn.author,
            content: turn.content.clone(),
        }
    }

    /// Estimate the number of tokens in a message
    fn estimate_tokens(message: &Message) -> usize {
        message.content.len().div_ceil(CHARS_PER_TOKEN) + MESSAGE_OVERHEAD
    }
}

impl Default for ContextWindow {
    fn default() -> Self {
        Self::new()
    }
}
