//! LLM Provider Abstraction Layer
//!
//! The grading and feedback agents talk to a language model through the
//! `LLMProvider` trait. Two providers ship with the grader: Gemini (cloud) and
//! Ollama (local). Provider output is free text; [`extract_json`] recovers the
//! structured object the agents ask for.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::LLMConfig;
use sdk::errors::GraderError;

pub mod gemini;
pub mod ollama;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Message in a conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (user, assistant, system)
    pub role: MessageRole,

    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "gemini", "ollama")
    fn name(&self) -> &str;

    /// Returns true if this is a local provider (e.g., Ollama), false for cloud providers
    fn is_local(&self) -> bool;

    /// Generate a completion for the conversation
    ///
    /// # Arguments
    /// * `messages` - System instruction, prior turns and the current request
    async fn generate(&self, messages: &[Message]) -> Result<String>;
}

/// Build the provider named by `llm.default_provider`
///
/// `api_key` is the Gemini key read from the environment at startup. It is
/// only required when the Gemini provider is selected.
pub fn provider_from_config(
    config: &LLMConfig,
    api_key: Option<String>,
) -> std::result::Result<Arc<dyn LLMProvider>, GraderError> {
    match config.default_provider.as_str() {
        "gemini" => {
            let key = api_key.ok_or_else(|| {
                GraderError::Config(
                    "GOOGLE_API_KEY (or GEMINI_API_KEY) must be set to use the gemini provider"
                        .to_string(),
                )
            })?;
            Ok(Arc::new(gemini::GeminiProvider::new(
                config.gemini.clone(),
                key,
            )))
        }
        "ollama" => Ok(Arc::new(ollama::OllamaProvider::new(
            config.ollama.base_url.clone(),
            config.ollama.model.clone(),
        ))),
        other => Err(GraderError::Config(format!(
            "Unknown LLM provider '{}'",
            other
        ))),
    }
}

/// Pull a JSON object out of model output.
///
/// Handles multiple LLM output formats:
/// 1. Raw JSON: `{...}`
/// 2. Fenced JSON (with or without trailing text): ` ```json\n{...}\n``` `
/// 3. JSON embedded in prose, found by a balanced-brace scan
pub fn extract_json(content: &str) -> Option<serde_json::Value> {
    let trimmed = content.trim();

    // Pattern 1: the whole response is a JSON object
    if let Some(value) = parse_object(trimmed) {
        return Some(value);
    }

    // Pattern 2: markdown code fence
    if let Some(inner) = extract_fenced_json(trimmed) {
        if let Some(value) = parse_object(inner.trim()) {
            return Some(value);
        }
    }

    // Pattern 3: first balanced object anywhere in the prose
    let mut offset = 0;
    while let Some(pos) = trimmed[offset..].find('{') {
        let start = offset + pos;
        if let Some(json_str) = extract_balanced_json(&trimmed[start..]) {
            if let Some(value) = parse_object(json_str) {
                return Some(value);
            }
        }
        offset = start + 1;
    }

    None
}

fn parse_object(s: &str) -> Option<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_str(s).ok()?;
    value.is_object().then_some(value)
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing ```.
/// Returns `None` if no fenced block is found.
fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals, to find the
/// matching close brace.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_message_creation() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, MessageRole::User);
        assert_eq!(user_msg.content, "Hello");

        let system_msg = Message::system("You are a strict grader");
        assert_eq!(system_msg.role, MessageRole::System);
    }

    #[test]
    fn test_message_serialization() {
        let msg = Message::assistant("{\"overall_score\": 80}");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""role":"assistant""#));
        let deserialized: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, deserialized);
    }

    #[test]
    fn test_extract_raw_json() {
        let value = extract_json(r#"{"overall_score": 72, "rationale": "ok"}"#).unwrap();
        assert_eq!(value["overall_score"], 72);
    }

    #[test]
    fn test_extract_fenced_json_with_trailing_prose() {
        let content = "Here you go:\n```json\n{\"overall_score\": 90}\n```\nLet me know!";
        let value = extract_json(content).unwrap();
        assert_eq!(value["overall_score"], 90);
    }

    #[test]
    fn test_extract_embedded_json_skips_braces_in_prose() {
        let content = r#"The set {a, b} is small. Result: {"suggestions": ["Cite {sources}"]} done"#;
        let value = extract_json(content).unwrap();
        assert_eq!(value["suggestions"][0], "Cite {sources}");
    }

    #[test]
    fn test_extract_json_none_for_plain_text() {
        assert!(extract_json("This essay is good.").is_none());
        assert!(extract_json("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_gemini_requires_api_key() {
        let config = Config::default_config();
        let err = provider_from_config(&config.llm, None)
            .err()
            .unwrap();
        assert!(matches!(err, GraderError::Config(_)));

        let provider = provider_from_config(&config.llm, Some("k".to_string())).unwrap();
        assert_eq!(provider.name(), "gemini");
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let mut config = Config::default_config();
        config.llm.default_provider = "ollama".to_string();
        let provider = provider_from_config(&config.llm, None).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert!(provider.is_local());
    }
}
