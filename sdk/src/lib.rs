//! Grader SDK
//!
//! Shared library providing error types, analysis records, and the capability
//! traits implemented by external collaborators (analysis tools, extractors).
//! This crate is used by the engine and by out-of-tree tool implementations.

/// Error types and handling
pub mod errors;

/// Analysis outcome records
pub mod types;

/// Capability traits for external collaborators
pub mod tool;

// Re-export commonly used types
pub use errors::{AnalysisTaskError, ExtractionError, GraderError, GraderErrorExt};
pub use tool::{AnalysisTool, Extracted, Extractor};
pub use types::{AnalysisKind, AnalysisOutcome, AnalysisResult, AnalysisStatus, Confidence};
