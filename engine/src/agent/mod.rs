//! Grading and feedback agents
//!
//! Each agent is a fixed capability behind the [`Agent`] trait. The pipeline
//! only talks to agents through the [`AgentInvoker`], which binds the agent for
//! a role to the submission's session, bounds the call with a timeout and
//! records the exchange in session memory.
//!
//! - [`LlmAgent`]: prompts a language model and parses its JSON answer
//! - [`AgentInvoker`]: maps every failure to a fatal `AgentInvocation` error

use async_trait::async_trait;
use sdk::types::AnalysisResult;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::llm::LLMError;
use crate::session::Session;

pub mod invoker;
pub mod llm_agent;

pub use invoker::AgentInvoker;
pub use llm_agent::{LlmAgent, RetryPolicy};

/// Rubric used when the caller supplies none
pub const DEFAULT_RUBRIC: &str = "Overall clarity, accuracy, structure, evidence";

/// The two agent roles in the pipeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Grading,
    Feedback,
}

impl AgentRole {
    pub fn as_str(&self) -> &str {
        match self {
            AgentRole::Grading => "grading",
            AgentRole::Feedback => "feedback",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything an agent may read for one invocation
#[derive(Debug, Clone)]
pub struct AgentInputs {
    /// Sanitized and truncated submission text
    pub text: String,
    pub rubric: String,
    /// Grading result, required by the feedback agent
    pub grade: Option<GradeResult>,
    pub analysis: Option<AnalysisResult>,
}

impl AgentInputs {
    pub fn for_grading(text: impl Into<String>, rubric: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            rubric: rubric.into(),
            grade: None,
            analysis: None,
        }
    }

    pub fn for_feedback(
        text: impl Into<String>,
        rubric: impl Into<String>,
        grade: GradeResult,
        analysis: AnalysisResult,
    ) -> Self {
        Self {
            text: text.into(),
            rubric: rubric.into(),
            grade: Some(grade),
            analysis: Some(analysis),
        }
    }
}

/// Score for one rubric criterion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionScore {
    pub name: String,
    pub score: f64,
    #[serde(default)]
    pub notes: String,
}

/// Structured output of the grading agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradeResult {
    /// 0 to 100
    pub overall_score: f64,
    #[serde(default)]
    pub criteria: Vec<CriterionScore>,
    #[serde(default, alias = "notes")]
    pub rationale: String,
}

impl GradeResult {
    /// Parse and range-check a grading answer
    pub fn from_value(value: serde_json::Value) -> Result<Self, AgentError> {
        let grade: GradeResult = serde_json::from_value(value)
            .map_err(|e| AgentError::MalformedOutput(e.to_string()))?;

        if !grade.overall_score.is_finite() || !(0.0..=100.0).contains(&grade.overall_score) {
            return Err(AgentError::MalformedOutput(format!(
                "overall_score {} is outside 0-100",
                grade.overall_score
            )));
        }

        Ok(grade)
    }
}

/// Structured output of the feedback agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FeedbackResult {
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// URLs or citations the student should consult
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub style: Vec<String>,
    #[serde(default, alias = "notes")]
    pub rationale: String,
}

impl FeedbackResult {
    pub fn from_value(value: serde_json::Value) -> Result<Self, AgentError> {
        let feedback: FeedbackResult = serde_json::from_value(value)
            .map_err(|e| AgentError::MalformedOutput(e.to_string()))?;

        if feedback.suggestions.is_empty() && feedback.style.is_empty() {
            return Err(AgentError::MalformedOutput(
                "feedback has neither suggestions nor style notes".to_string(),
            ));
        }

        Ok(feedback)
    }
}

/// Output of one agent invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentOutput {
    Grade(GradeResult),
    Feedback(FeedbackResult),
}

impl AgentOutput {
    pub fn role(&self) -> AgentRole {
        match self {
            AgentOutput::Grade(_) => AgentRole::Grading,
            AgentOutput::Feedback(_) => AgentRole::Feedback,
        }
    }
}

/// Failure inside an agent, before the invoker wraps it
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Provider error: {0}")]
    Provider(#[from] LLMError),

    #[error("Malformed agent output: {0}")]
    MalformedOutput(String),

    #[error("Missing input: {0}")]
    MissingInput(&'static str),
}

/// Capability interface for one agent role
#[async_trait]
pub trait Agent: Send + Sync {
    fn role(&self) -> AgentRole;

    /// The request text recorded in session memory for this invocation
    fn render_request(&self, inputs: &AgentInputs) -> Result<String, AgentError>;

    /// Run the agent against the session's prior context
    async fn invoke(&self, session: &Session, inputs: &AgentInputs)
        -> Result<AgentOutput, AgentError>;
}
