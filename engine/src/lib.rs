//! Grader Engine Library
//!
//! This library provides the core functionality of the grading pipeline.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// Prompt-injection sanitizer
pub mod sanitizer;

/// Per-consumer text truncation
pub mod truncation;

/// Document intake and submission keys
pub mod ingestion;

/// Temporary upload workspace
pub mod workspace;

/// Conversation sessions shared by the agents
pub mod session;

/// LLM provider abstraction layer
pub mod llm;

/// Grading and feedback agents
pub mod agent;

/// Concurrent plagiarism and AI-text analysis
pub mod analysis;

/// Report assembly
pub mod report;

/// Pipeline state machine and orchestrator
pub mod pipeline;

/// Database persistence module
pub mod db;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
