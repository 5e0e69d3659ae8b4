//! Capability traits for external collaborators
//!
//! The orchestrator only depends on these interfaces. Concrete analysis
//! tools and document extractors live in the engine or out of tree.

use crate::errors::{AnalysisTaskError, ExtractionError};
use crate::types::{AnalysisKind, AnalysisOutcome};
use async_trait::async_trait;
use std::path::Path;

/// Trait that every analysis branch must implement
///
/// Implementations must not block indefinitely; the coordinator still bounds
/// every call with its own timeout.
#[async_trait]
pub trait AnalysisTool: Send + Sync {
    /// Which branch this tool fills
    fn kind(&self) -> AnalysisKind;

    /// Analyze sanitized submission text
    ///
    /// Returning `Err` degrades this branch only; it never aborts the
    /// submission.
    async fn analyze(&self, text: &str) -> Result<AnalysisOutcome, AnalysisTaskError>;
}

/// Text and non-fatal warnings produced by ingestion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    pub warnings: Vec<String>,
}

impl Extracted {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Trait for document text extraction
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract plain text from the file at `path`
    async fn extract(&self, path: &Path) -> Result<Extracted, ExtractionError>;
}
