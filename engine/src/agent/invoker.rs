//! Uniform entry point for agent calls
//!
//! `invoke(key, role, inputs)` resolves the submission's session, runs the
//! agent for `role` under the configured timeout, and appends the request and
//! the answer to session memory. Any agent failure becomes
//! `GraderError::AgentInvocation`, which the pipeline treats as fatal.
//! Session storage failures propagate unchanged.

use sdk::errors::GraderError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use super::{
    Agent, AgentInputs, AgentOutput, AgentRole, FeedbackResult, GradeResult, LlmAgent,
    RetryPolicy,
};
use crate::config::LLMConfig;
use crate::llm::LLMProvider;
use crate::session::{SessionStore, Turn};

pub struct AgentInvoker {
    sessions: Arc<dyn SessionStore>,
    grading: Arc<dyn Agent>,
    feedback: Arc<dyn Agent>,
    timeout: Duration,
}

impl AgentInvoker {
    /// Bind one agent per role
    ///
    /// # Errors
    ///
    /// Returns a configuration error if an agent is registered under the wrong role.
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        grading: Arc<dyn Agent>,
        feedback: Arc<dyn Agent>,
        timeout: Duration,
    ) -> Result<Self, GraderError> {
        if grading.role() != AgentRole::Grading || feedback.role() != AgentRole::Feedback {
            return Err(GraderError::Config(
                "agents registered under the wrong role".to_string(),
            ));
        }

        Ok(Self {
            sessions,
            grading,
            feedback,
            timeout,
        })
    }

    /// Both roles backed by LLM agents on one provider
    pub fn from_provider(
        sessions: Arc<dyn SessionStore>,
        provider: Arc<dyn LLMProvider>,
        config: &LLMConfig,
    ) -> Self {
        let retry = RetryPolicy::from_config(config);
        Self {
            sessions,
            grading: Arc::new(LlmAgent::grading(Arc::clone(&provider)).with_retry(retry)),
            feedback: Arc::new(LlmAgent::feedback(provider).with_retry(retry)),
            timeout: config.agent_timeout(),
        }
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    fn agent_for(&self, role: AgentRole) -> &Arc<dyn Agent> {
        match role {
            AgentRole::Grading => &self.grading,
            AgentRole::Feedback => &self.feedback,
        }
    }

    /// Invoke the agent for `role` against the session of submission `key`
    pub async fn invoke(
        &self,
        key: &str,
        role: AgentRole,
        inputs: &AgentInputs,
    ) -> Result<AgentOutput, GraderError> {
        let session = self.sessions.get_or_create(key).await?;
        let agent = self.agent_for(role);

        let request = agent
            .render_request(inputs)
            .map_err(|e| GraderError::agent(role.as_str(), e.to_string()))?;

        tracing::info!("Invoking {} agent for {}", role, key);
        let start = std::time::Instant::now();

        let output = match timeout(self.timeout, agent.invoke(&session, inputs)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::error!("{} agent failed for {}: {}", role, key, e);
                return Err(GraderError::agent(role.as_str(), e.to_string()));
            }
            Err(_) => {
                tracing::error!(
                    "{} agent timed out after {}s for {}",
                    role,
                    self.timeout.as_secs(),
                    key
                );
                return Err(GraderError::agent(
                    role.as_str(),
                    format!("timed out after {}s", self.timeout.as_secs()),
                ));
            }
        };

        if output.role() != role {
            return Err(GraderError::agent(
                role.as_str(),
                format!("agent returned {} output", output.role()),
            ));
        }

        let answer = serde_json::to_string(&output)?;
        self.sessions.append(key, Turn::request(role, request)).await?;
        self.sessions.append(key, Turn::response(role, answer)).await?;

        tracing::info!(
            "{} agent finished for {} in {}ms",
            role,
            key,
            start.elapsed().as_millis()
        );

        Ok(output)
    }

    pub async fn grade(&self, key: &str, inputs: &AgentInputs) -> Result<GradeResult, GraderError> {
        match self.invoke(key, AgentRole::Grading, inputs).await? {
            AgentOutput::Grade(grade) => Ok(grade),
            AgentOutput::Feedback(_) => Err(GraderError::agent("grading", "unexpected output")),
        }
    }

    pub async fn feedback(
        &self,
        key: &str,
        inputs: &AgentInputs,
    ) -> Result<FeedbackResult, GraderError> {
        match self.invoke(key, AgentRole::Feedback, inputs).await? {
            AgentOutput::Feedback(feedback) => Ok(feedback),
            AgentOutput::Grade(_) => Err(GraderError::agent("feedback", "unexpected output")),
        }
    }
}
