//! Analysis outcome records
//!
//! Every analysis branch (plagiarism, AI-text detection) reports an
//! `AnalysisOutcome`, even when it could not run. An `AnalysisResult` always
//! holds both outcomes, so a missing branch is unrepresentable.

use crate::errors::AnalysisTaskError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two independent analysis branches run per submission
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Plagiarism,
    AiDetection,
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisKind::Plagiarism => write!(f, "plagiarism"),
            AnalysisKind::AiDetection => write!(f, "ai_detection"),
        }
    }
}

/// Whether the branch produced a usable result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Ok,
    Unavailable,
    Error,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &str {
        match self {
            AnalysisStatus::Ok => "ok",
            AnalysisStatus::Unavailable => "unavailable",
            AnalysisStatus::Error => "error",
        }
    }
}

/// Tri-state confidence reported alongside every outcome
///
/// - `Unavailable`: the check could not run at all
/// - `Limited`: the check ran with reduced evidence
/// - `Moderate`: the check ran normally
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Unavailable,
    Limited,
    Moderate,
}

/// Result record for one analysis branch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisOutcome {
    pub kind: AnalysisKind,

    pub status: AnalysisStatus,

    pub confidence: Confidence,

    /// Likely plagiarized / likely AI-generated. Unset unless `status` is `ok`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    /// Tool-specific metrics (similarities, entropy, findings)
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,

    /// Set when the branch was degraded by an external rate limit
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub rate_limited: bool,
}

impl AnalysisOutcome {
    /// A branch that ran and produced a verdict
    pub fn ok(
        kind: AnalysisKind,
        confidence: Confidence,
        verdict: bool,
        details: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            status: AnalysisStatus::Ok,
            confidence,
            verdict: Some(verdict),
            note: None,
            details,
            rate_limited: false,
        }
    }

    /// A branch that could not complete; never carries a verdict
    pub fn degraded(kind: AnalysisKind, error: &AnalysisTaskError) -> Self {
        let status = match error {
            AnalysisTaskError::Unavailable(_) | AnalysisTaskError::RateLimited { .. } => {
                AnalysisStatus::Unavailable
            }
            AnalysisTaskError::Timeout { .. }
            | AnalysisTaskError::Failed(_)
            | AnalysisTaskError::Panicked => AnalysisStatus::Error,
        };

        Self {
            kind,
            status,
            confidence: Confidence::Unavailable,
            verdict: None,
            note: Some(error.to_string()),
            details: serde_json::Value::Null,
            rate_limited: matches!(error, AnalysisTaskError::RateLimited { .. }),
        }
    }

    /// Attach a note to the outcome
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == AnalysisStatus::Ok
    }

    /// Verdict of a plagiarism outcome
    pub fn likely_plagiarized(&self) -> Option<bool> {
        match self.kind {
            AnalysisKind::Plagiarism => self.verdict,
            AnalysisKind::AiDetection => None,
        }
    }

    /// Verdict of an AI-detection outcome
    pub fn likely_ai(&self) -> Option<bool> {
        match self.kind {
            AnalysisKind::AiDetection => self.verdict,
            AnalysisKind::Plagiarism => None,
        }
    }
}

/// Both analysis outcomes for one submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub plagiarism: AnalysisOutcome,
    pub ai_detection: AnalysisOutcome,
}

impl AnalysisResult {
    pub fn new(plagiarism: AnalysisOutcome, ai_detection: AnalysisOutcome) -> Self {
        Self {
            plagiarism,
            ai_detection,
        }
    }

    /// Whether any branch was degraded by a rate limit
    pub fn rate_limited(&self) -> bool {
        self.plagiarism.rate_limited || self.ai_detection.rate_limited
    }

    /// Whether both branches ran normally
    pub fn is_complete(&self) -> bool {
        self.plagiarism.is_ok() && self.ai_detection.is_ok()
    }
}
