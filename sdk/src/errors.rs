//! Error types and handling
//!
//! This module provides the error taxonomy used throughout the grader.
//! All errors implement the `GraderErrorExt` trait which provides user-friendly
//! hints and tells the orchestrator whether an error is fatal for a submission.
//!
//! # Propagation
//!
//! - **Fatal** errors (`Extraction`, `AgentInvocation`) abort the submission and
//!   are recorded in its pipeline checkpoint.
//! - **Recoverable** errors (`AnalysisTask`) never leave the analysis coordinator;
//!   they are folded into a degraded `AnalysisOutcome`.
//! - **Caller** errors (`InvalidResumeToken`, `NotSuspended`, ...) are rejected
//!   without touching persisted state.

use thiserror::Error;

/// Trait for grader error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and whether the error must move a submission to the failed stage.
pub trait GraderErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain
    /// document text, API keys, or internal paths.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is fatal for the submission being processed
    fn is_fatal(&self) -> bool;
}

/// Reasons ingestion could not produce usable text
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("No parser available for format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read file: {0}")]
    ReadFailed(String),

    #[error("No extractable text")]
    EmptyText,
}

/// Reasons a single analysis branch could not complete normally
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalysisTaskError {
    #[error("External dependency unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Analysis failed: {0}")]
    Failed(String),

    #[error("Analysis task panicked")]
    Panicked,
}

/// Main grader error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{ExtractionError, GraderError, GraderErrorExt};
///
/// let error = GraderError::Extraction(ExtractionError::EmptyText);
/// assert!(error.is_fatal());
///
/// let caller_error = GraderError::InvalidResumeToken { key: "abc".to_string() };
/// assert!(!caller_error.is_fatal());
/// println!("Hint: {}", caller_error.user_hint());
/// ```
#[derive(Debug, Error)]
pub enum GraderError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // Ingestion errors
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    // Agent errors
    #[error("Agent invocation failed ({role}): {reason}")]
    AgentInvocation { role: String, reason: String },

    // Analysis errors
    #[error("Analysis task error: {0}")]
    AnalysisTask(#[from] AnalysisTaskError),

    // Session errors
    #[error("Session lookup failed: {0}")]
    SessionLookup(String),

    // Pipeline errors
    #[error("Invalid resume token for submission {key}")]
    InvalidResumeToken { key: String },

    #[error("Submission not found: {0}")]
    SubmissionNotFound(String),

    #[error("Submission is not suspended: {0}")]
    NotSuspended(String),

    #[error("Invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Resume result does not match pending stage: expected {expected}, got {got}")]
    ResumeResultMismatch { expected: String, got: String },

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraderError {
    /// Create an agent invocation error for the given role
    pub fn agent(role: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AgentInvocation {
            role: role.into(),
            reason: reason.into(),
        }
    }
}

impl GraderErrorExt for GraderError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Database(_) => "Checkpoint storage failed. Check the data directory",

            Self::Extraction(ExtractionError::FileNotFound(_)) => "The input file does not exist",
            Self::Extraction(ExtractionError::UnsupportedFormat(_)) => {
                "This file format cannot be read. Submit a text export instead"
            }
            Self::Extraction(ExtractionError::ReadFailed(_)) => "The input file could not be read",
            Self::Extraction(ExtractionError::EmptyText) => {
                "No text could be extracted from the submission"
            }

            Self::AgentInvocation { .. } => {
                "The language model could not be reached. Check your API key and network"
            }
            Self::AnalysisTask(_) => "An analysis check could not run and was reported as degraded",
            Self::SessionLookup(_) => "Session storage failed. Try again",

            Self::InvalidResumeToken { .. } => "The resume token does not match this submission",
            Self::SubmissionNotFound(_) => "No pipeline state exists for this submission",
            Self::NotSuspended(_) => "This submission is not waiting to be resumed",
            Self::InvalidTransition { .. } => "The submission cannot move to that stage",
            Self::ResumeResultMismatch { .. } => {
                "The supplied result does not match the stage awaiting input"
            }

            Self::Serialization(_) => "Malformed data. Check the JSON you supplied",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_fatal(&self) -> bool {
        matches!(self, Self::Extraction(_) | Self::AgentInvocation { .. })
    }
}
