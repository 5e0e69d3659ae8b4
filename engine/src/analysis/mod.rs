//! Analysis Coordinator
//!
//! Runs the plagiarism check and the AI-text check as sibling tokio tasks.
//! Each task is bounded by the configured timeout and isolated from the other:
//!
//! - an `Err` from the tool becomes a degraded outcome for that branch
//! - a timeout aborts the task, joins it, and degrades the branch to `error`
//! - a panic surfaces as a `JoinError` and degrades the branch to `error`
//!
//! Both tasks are always joined before `run_analysis` returns, and the result
//! always holds both outcomes.

use regex::Regex;
use sdk::errors::AnalysisTaskError;
use sdk::tool::AnalysisTool;
use sdk::types::{AnalysisKind, AnalysisOutcome, AnalysisResult};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::timeout;

use crate::config::AnalysisConfig;

pub mod ai_detection;
pub mod plagiarism;
pub mod search;

pub use ai_detection::AiTextDetector;
pub use plagiarism::PlagiarismChecker;
pub use search::{HttpSearchBackend, SearchBackend, SearchHit};

/// Runs both analysis branches concurrently
pub struct AnalysisCoordinator {
    plagiarism: Arc<dyn AnalysisTool>,
    ai_detection: Arc<dyn AnalysisTool>,
    task_timeout: Duration,
}

impl AnalysisCoordinator {
    pub fn new(
        plagiarism: Arc<dyn AnalysisTool>,
        ai_detection: Arc<dyn AnalysisTool>,
        task_timeout: Duration,
    ) -> Self {
        Self {
            plagiarism,
            ai_detection,
            task_timeout,
        }
    }

    /// Coordinator with the built-in tools
    ///
    /// The plagiarism check uses the configured search endpoint; without one it
    /// reports `unavailable` on every run.
    pub fn from_config(config: &AnalysisConfig) -> Self {
        let backend: Option<Arc<dyn SearchBackend>> = config
            .search_endpoint
            .as_ref()
            .map(|endpoint| Arc::new(HttpSearchBackend::new(endpoint.clone())) as Arc<dyn SearchBackend>);

        Self::new(
            Arc::new(PlagiarismChecker::new(backend, config)),
            Arc::new(AiTextDetector::new(config.strict_ai_detection)),
            config.task_timeout(),
        )
    }

    /// Analyze sanitized text with both tools
    pub async fn run_analysis(&self, text: &str) -> AnalysisResult {
        let text: Arc<str> = Arc::from(text);

        tracing::info!(
            "Starting analysis ({} chars, timeout {}s per task)",
            text.chars().count(),
            self.task_timeout.as_secs()
        );

        let (plagiarism, ai_detection) = tokio::join!(
            run_bounded(
                Arc::clone(&self.plagiarism),
                AnalysisKind::Plagiarism,
                Arc::clone(&text),
                self.task_timeout
            ),
            run_bounded(
                Arc::clone(&self.ai_detection),
                AnalysisKind::AiDetection,
                Arc::clone(&text),
                self.task_timeout
            ),
        );

        tracing::info!(
            "Analysis finished: plagiarism={}, ai_detection={}",
            plagiarism.status.as_str(),
            ai_detection.status.as_str()
        );

        AnalysisResult::new(plagiarism, ai_detection)
    }
}

/// Run one tool in its own task, converting every failure into a degraded outcome
async fn run_bounded(
    tool: Arc<dyn AnalysisTool>,
    kind: AnalysisKind,
    text: Arc<str>,
    limit: Duration,
) -> AnalysisOutcome {
    let mut handle = tokio::spawn(async move { tool.analyze(&text).await });

    let error = match timeout(limit, &mut handle).await {
        Ok(Ok(Ok(outcome))) => return normalize(kind, outcome),
        Ok(Ok(Err(e))) => e,
        Ok(Err(join_error)) => {
            if join_error.is_panic() {
                AnalysisTaskError::Panicked
            } else {
                AnalysisTaskError::Failed("task was cancelled".to_string())
            }
        }
        Err(_) => {
            handle.abort();
            // Join the aborted task so nothing outlives the coordinator.
            let _ = handle.await;
            AnalysisTaskError::Timeout {
                secs: limit.as_secs(),
            }
        }
    };

    tracing::warn!("{} analysis degraded: {}", kind, error);
    AnalysisOutcome::degraded(kind, &error)
}

/// Enforce the outcome invariants regardless of what a tool returned
pub(crate) fn normalize(kind: AnalysisKind, mut outcome: AnalysisOutcome) -> AnalysisOutcome {
    if outcome.kind != kind {
        tracing::warn!("{} tool reported kind {}", kind, outcome.kind);
        outcome.kind = kind;
    }
    if !outcome.is_ok() {
        outcome.verdict = None;
    }
    outcome
}

/// Words as matched by `\w+`
pub(crate) fn words(text: &str) -> Vec<&str> {
    static WORD: OnceLock<Option<Regex>> = OnceLock::new();
    match WORD.get_or_init(|| Regex::new(r"\w+").ok()) {
        Some(re) => re.find_iter(text).map(|m| m.as_str()).collect(),
        None => text.split_whitespace().collect(),
    }
}
