//! Per-consumer length caps
//!
//! Truncation always runs on sanitized text. Lengths are counted in chars, so
//! a multi-byte character is never split. When a cap applies the caller gets a
//! [`Warning::Truncated`] to carry into the report; truncation never fails.

use crate::config::LimitsConfig;
use crate::report::Warning;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Downstream consumers with their own length budget
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Consumer {
    Analysis,
    Grading,
    Feedback,
}

impl fmt::Display for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Consumer::Analysis => write!(f, "analysis"),
            Consumer::Grading => write!(f, "grading"),
            Consumer::Feedback => write!(f, "feedback"),
        }
    }
}

/// Result of capping a text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncated {
    pub text: String,
    pub truncated: bool,
    /// Length of the input in chars
    pub original_len: usize,
}

/// Cap `text` to at most `limit` chars
///
/// # Example
///
/// ```
/// use grader_engine::truncation::truncate;
///
/// let out = truncate("héllo world", 5);
/// assert_eq!(out.text, "héllo");
/// assert!(out.truncated);
/// assert_eq!(out.original_len, 11);
/// ```
pub fn truncate(text: &str, limit: usize) -> Truncated {
    let original_len = text.chars().count();

    if original_len <= limit {
        return Truncated {
            text: text.to_string(),
            truncated: false,
            original_len,
        };
    }

    let cut = text
        .char_indices()
        .nth(limit)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());

    Truncated {
        text: text[..cut].to_string(),
        truncated: true,
        original_len,
    }
}

/// Limits for every consumer, read once from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncationPolicy {
    analysis: usize,
    grading: usize,
    feedback: usize,
}

impl TruncationPolicy {
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            analysis: limits.analysis_chars,
            grading: limits.grading_chars,
            feedback: limits.feedback_chars,
        }
    }

    pub fn for_consumer(&self, consumer: Consumer) -> usize {
        match consumer {
            Consumer::Analysis => self.analysis,
            Consumer::Grading => self.grading,
            Consumer::Feedback => self.feedback,
        }
    }

    /// Cap text for `consumer`, returning a warning when it was cut
    pub fn apply(&self, consumer: Consumer, text: &str) -> (String, Option<Warning>) {
        let limit = self.for_consumer(consumer);
        let out = truncate(text, limit);

        if !out.truncated {
            return (out.text, None);
        }

        tracing::info!(
            "Truncated {} input from {} to {} chars",
            consumer,
            out.original_len,
            limit
        );

        let warning = Warning::Truncated {
            consumer,
            original_len: out.original_len,
            limit,
        };

        (out.text, Some(warning))
    }
}

impl Default for TruncationPolicy {
    fn default() -> Self {
        Self::new(&LimitsConfig::default())
    }
}
