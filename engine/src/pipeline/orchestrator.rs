//! Orchestrator
//!
//! Drives one submission through
//! `ingested -> sanitized -> analyzing -> analyzed -> grading -> graded ->
//! feedback -> feedback_done -> done`, saving a checkpoint after every
//! transition. `analyzing`, `grading` and `feedback` are checkpointed before
//! their long-running step starts, so a restart re-runs only the step that was
//! in flight.
//!
//! Fatal errors (no extractable text, failed agent invocation) move the
//! submission to `failed`. Storage errors propagate without touching the
//! checkpoint, so `continue_run` can retry from the last saved stage.

use sdk::errors::{ExtractionError, GraderError, GraderErrorExt};
use sdk::tool::Extractor;
use sdk::types::{AnalysisKind, AnalysisResult};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use super::checkpoint::CheckpointStore;
use super::state::{PipelineState, RunOptions, Stage, StageOutput};
use crate::agent::{AgentInputs, AgentInvoker};
use crate::analysis::{normalize, AnalysisCoordinator};
use crate::config::Config;
use crate::ingestion::{FileExtractor, Submission, SubmissionKey};
use crate::llm::LLMProvider;
use crate::report::{self, Report, Warning};
use crate::sanitizer::Sanitizer;
use crate::session::SessionStore;
use crate::truncation::{Consumer, TruncationPolicy};

/// How a run ended without a fatal error
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(Report),
    /// Waiting at `stage` until resumed with `token`
    Suspended { stage: Stage, token: String },
}

/// What to resume a suspended submission with
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeWith {
    /// Accept the draft held in the checkpoint
    Draft,
    /// Replace the draft with a supplied output
    Output(StageOutput),
}

pub struct Orchestrator {
    sanitizer: Sanitizer,
    truncation: TruncationPolicy,
    analysis: AnalysisCoordinator,
    agents: AgentInvoker,
    checkpoints: Arc<dyn CheckpointStore>,
    extractor: Arc<dyn Extractor>,
    suspend_on_rate_limit: bool,
}

impl Orchestrator {
    pub fn new(
        analysis: AnalysisCoordinator,
        agents: AgentInvoker,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<Self, GraderError> {
        let sanitizer = Sanitizer::new()
            .map_err(|e| GraderError::Config(format!("Failed to build sanitizer: {}", e)))?;

        Ok(Self {
            sanitizer,
            truncation: TruncationPolicy::default(),
            analysis,
            agents,
            checkpoints,
            extractor: Arc::new(FileExtractor::new()),
            suspend_on_rate_limit: false,
        })
    }

    /// Orchestrator wired from configuration
    pub fn from_config(
        config: &Config,
        provider: Arc<dyn LLMProvider>,
        sessions: Arc<dyn SessionStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<Self, GraderError> {
        let analysis = AnalysisCoordinator::from_config(&config.analysis);
        let agents = AgentInvoker::from_provider(sessions, provider, &config.llm);

        Ok(Self::new(analysis, agents, checkpoints)?
            .with_truncation(TruncationPolicy::new(&config.limits))
            .with_suspend_on_rate_limit(config.analysis.suspend_on_rate_limit))
    }

    pub fn with_truncation(mut self, truncation: TruncationPolicy) -> Self {
        self.truncation = truncation;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_suspend_on_rate_limit(mut self, enabled: bool) -> Self {
        self.suspend_on_rate_limit = enabled;
        self
    }

    /// Extract `path` and run the resulting submission
    ///
    /// A failed extraction records a `failed` checkpoint and returns the
    /// extraction error; nothing downstream runs.
    pub async fn run_file(
        &self,
        path: &Path,
        key: SubmissionKey,
        rubric: Option<String>,
        options: RunOptions,
    ) -> Result<RunOutcome, GraderError> {
        self.ensure_can_start(key.as_str()).await?;

        let extracted = match self.extractor.extract(path).await {
            Ok(extracted) => extracted,
            Err(e) => return Err(self.reject(key.as_str(), e, options).await),
        };

        let submission = Submission::from_extracted(key, extracted, rubric);
        self.run(submission, options).await
    }

    /// Run a submission from ingestion to the report
    ///
    /// A submission that is already in flight must be continued or resumed
    /// instead; a terminal one starts over.
    pub async fn run(
        &self,
        submission: Submission,
        options: RunOptions,
    ) -> Result<RunOutcome, GraderError> {
        let key = submission.key().to_string();
        self.ensure_can_start(&key).await?;

        // Covers callers that built the submission themselves or plugged in
        // an extractor that does not check for empty text.
        if submission.raw_text().trim().is_empty() {
            return Err(self.reject(&key, ExtractionError::EmptyText, options).await);
        }

        // Created at first use; a lookup failure stops the run here.
        self.agents.sessions().get_or_create(&key).await?;

        let state = PipelineState::ingested(submission, options);
        tracing::info!("Submission {}: ingested", key);
        self.checkpoints.save(&state).await?;

        self.drive(state).await
    }

    /// Record a `failed` checkpoint for input that never got past ingestion
    async fn reject(&self, key: &str, e: ExtractionError, options: RunOptions) -> GraderError {
        let error = GraderError::Extraction(e);
        tracing::error!("Ingestion failed for {}: {}", key, error);

        let state = PipelineState::failed_ingestion(key, &error, options);
        match self.checkpoints.save(&state).await {
            Ok(()) => error,
            Err(save_error) => save_error,
        }
    }

    /// Pick up from the last checkpoint, e.g. after a restart
    pub async fn continue_run(&self, key: &str) -> Result<RunOutcome, GraderError> {
        let state = self.status(key).await?;
        tracing::info!("Continuing submission {} from {}", key, state.stage);
        self.drive(state).await
    }

    /// Complete the suspended stage with `with` and advance exactly one stage
    ///
    /// Every check runs before anything is written: a wrong token, a
    /// submission that is not suspended, or an output for the wrong stage
    /// leaves the checkpoint unchanged.
    pub async fn resume(
        &self,
        key: &str,
        token: &str,
        with: ResumeWith,
    ) -> Result<PipelineState, GraderError> {
        let mut state = self.status(key).await?;

        if state.stage != Stage::Suspended {
            return Err(GraderError::NotSuspended(key.to_string()));
        }
        if state.suspension_token.as_deref() != Some(token) {
            tracing::warn!("Rejected resume of {} with a mismatched token", key);
            return Err(GraderError::InvalidResumeToken {
                key: key.to_string(),
            });
        }

        let pending = state
            .suspended_at
            .ok_or_else(|| corrupt(key, "suspended stage"))?;
        let completed = pending
            .completed()
            .ok_or_else(|| corrupt(key, "resumable stage"))?;

        let (output, reviewed) = match with {
            ResumeWith::Draft => (
                state
                    .outputs
                    .draft
                    .clone()
                    .ok_or_else(|| corrupt(key, "draft output"))?,
                false,
            ),
            ResumeWith::Output(output) => {
                let changed = state.outputs.draft.as_ref() != Some(&output);
                (output, changed)
            }
        };

        if output.pending_stage() != pending {
            return Err(GraderError::ResumeResultMismatch {
                expected: pending.to_string(),
                got: output.pending_stage().to_string(),
            });
        }
        output.validate()?;

        apply_output(&mut state, output);
        if reviewed {
            state.outputs.warn(Warning::ReviewedOutput {
                stage: pending.to_string(),
            });
        }
        state.resume_into(completed);
        self.checkpoints.save(&state).await?;

        Ok(state)
    }

    /// Latest checkpoint for `key`
    pub async fn status(&self, key: &str) -> Result<PipelineState, GraderError> {
        self.checkpoints
            .load(key)
            .await?
            .ok_or_else(|| GraderError::SubmissionNotFound(key.to_string()))
    }

    /// Report of a finished submission, straight from its checkpoint
    pub async fn report(&self, key: &str) -> Result<Report, GraderError> {
        let state = self.status(key).await?;
        match (state.stage, state.outputs.report) {
            (Stage::Done, Some(report)) => Ok(report),
            (stage, _) => Err(GraderError::InvalidTransition {
                from: stage.to_string(),
                to: Stage::Done.to_string(),
            }),
        }
    }

    /// Forget a submission: its checkpoint and its session
    pub async fn discard(&self, key: &str) -> Result<bool, GraderError> {
        let had_state = self.checkpoints.delete(key).await?;
        let had_session = self.agents.sessions().delete(key).await?;
        Ok(had_state || had_session)
    }

    async fn ensure_can_start(&self, key: &str) -> Result<(), GraderError> {
        if let Some(existing) = self.checkpoints.load(key).await? {
            if !existing.stage.is_terminal() {
                return Err(GraderError::InvalidTransition {
                    from: existing.stage.to_string(),
                    to: Stage::Ingested.to_string(),
                });
            }
            tracing::info!("Submission {} was {}, starting over", key, existing.stage);
        }
        Ok(())
    }

    async fn drive(&self, mut state: PipelineState) -> Result<RunOutcome, GraderError> {
        loop {
            match state.stage {
                Stage::Ingested => {
                    let submission = submission(&state)?;
                    let sanitized = self.sanitizer.sanitize(submission.raw_text());
                    state.outputs.note_neutralized(&sanitized.flags);
                    state.outputs.sanitized = Some(sanitized);
                    self.advance(&mut state, Stage::Sanitized).await?;
                }
                Stage::Sanitized => self.advance(&mut state, Stage::Analyzing).await?,
                Stage::Analyzing => {
                    let text = self.prepare(&mut state, Consumer::Analysis)?;
                    let result = self.analysis.run_analysis(&text).await;

                    if result.rate_limited() && self.suspend_on_rate_limit {
                        tracing::warn!("Submission {}: analysis was rate limited", state.key);
                        return self
                            .suspend(&mut state, Stage::Analyzing, StageOutput::Analysis(result))
                            .await;
                    }
                    if let Some(outcome) = self
                        .complete(&mut state, Stage::Analyzing, StageOutput::Analysis(result))
                        .await?
                    {
                        return Ok(outcome);
                    }
                }
                Stage::Analyzed => self.advance(&mut state, Stage::Grading).await?,
                Stage::Grading => {
                    let text = self.prepare(&mut state, Consumer::Grading)?;
                    let inputs = AgentInputs::for_grading(text, submission(&state)?.rubric());

                    let grade = match self.agents.grade(&state.key, &inputs).await {
                        Ok(grade) => grade,
                        Err(e) => return Err(self.fail(&mut state, e).await),
                    };
                    if let Some(outcome) = self
                        .complete(&mut state, Stage::Grading, StageOutput::Grade(grade))
                        .await?
                    {
                        return Ok(outcome);
                    }
                }
                Stage::Graded => self.advance(&mut state, Stage::Feedback).await?,
                Stage::Feedback => {
                    let text = self.prepare(&mut state, Consumer::Feedback)?;
                    let grade = state
                        .outputs
                        .grade
                        .clone()
                        .ok_or_else(|| corrupt(&state.key, "grade"))?;
                    let analysis = state
                        .outputs
                        .analysis
                        .clone()
                        .ok_or_else(|| corrupt(&state.key, "analysis result"))?;
                    let inputs = AgentInputs::for_feedback(
                        text,
                        submission(&state)?.rubric(),
                        grade,
                        analysis,
                    );

                    let feedback = match self.agents.feedback(&state.key, &inputs).await {
                        Ok(feedback) => feedback,
                        Err(e) => return Err(self.fail(&mut state, e).await),
                    };
                    if let Some(outcome) = self
                        .complete(&mut state, Stage::Feedback, StageOutput::Feedback(feedback))
                        .await?
                    {
                        return Ok(outcome);
                    }
                }
                Stage::FeedbackDone => {
                    let outputs = &state.outputs;
                    let mut warnings = outputs.warnings.clone();
                    if let Some(analysis) = &outputs.analysis {
                        warnings.extend(degradation_warnings(analysis));
                    }

                    let report = report::assemble(
                        &state.key,
                        outputs.grade.clone(),
                        outputs.analysis.clone(),
                        outputs.feedback.clone(),
                        warnings,
                    );
                    state.outputs.report = Some(report);
                    self.advance(&mut state, Stage::Done).await?;
                }
                Stage::Done => {
                    let report = state
                        .outputs
                        .report
                        .clone()
                        .ok_or_else(|| corrupt(&state.key, "report"))?;
                    tracing::info!("Submission {} done", state.key);
                    return Ok(RunOutcome::Completed(report));
                }
                Stage::Suspended => {
                    let stage = state
                        .suspended_at
                        .ok_or_else(|| corrupt(&state.key, "suspended stage"))?;
                    let token = state
                        .suspension_token
                        .clone()
                        .ok_or_else(|| corrupt(&state.key, "suspension token"))?;
                    return Ok(RunOutcome::Suspended { stage, token });
                }
                Stage::Failed => {
                    return Err(GraderError::InvalidTransition {
                        from: Stage::Failed.to_string(),
                        to: "continue".to_string(),
                    });
                }
            }
        }
    }

    /// Sanitized text capped for `consumer`; records a truncation warning
    ///
    /// The cut is scanned again, since it can close a phrase the sanitizer
    /// passed over.
    fn prepare(&self, state: &mut PipelineState, consumer: Consumer) -> Result<String, GraderError> {
        let sanitized = state
            .outputs
            .sanitized
            .as_ref()
            .ok_or_else(|| corrupt(&state.key, "sanitized text"))?;

        let (mut text, warning) = self.truncation.apply(consumer, sanitized.as_str());
        if let Some(warning) = warning {
            tracing::warn!("Submission {}: {}", state.key, warning);
            state.outputs.warn(warning);

            let dropped = self.sanitizer.cut_at_matches(&mut text);
            if !dropped.is_empty() {
                tracing::warn!(
                    "Submission {}: dropped an injection phrase completed by the {} cut",
                    state.key,
                    consumer
                );
                state.outputs.note_neutralized(&dropped);
            }
        }
        Ok(text)
    }

    /// Store the output of a long-running stage, or hold it for review
    async fn complete(
        &self,
        state: &mut PipelineState,
        stage: Stage,
        output: StageOutput,
    ) -> Result<Option<RunOutcome>, GraderError> {
        if state.options.pauses_at(stage) {
            return self.suspend(state, stage, output).await.map(Some);
        }

        let next = stage
            .completed()
            .ok_or_else(|| corrupt(&state.key, "completed stage"))?;
        apply_output(state, output);
        self.advance(state, next).await?;
        Ok(None)
    }

    async fn suspend(
        &self,
        state: &mut PipelineState,
        at: Stage,
        draft: StageOutput,
    ) -> Result<RunOutcome, GraderError> {
        let token = Uuid::new_v4().to_string();

        state.transition(Stage::Suspended)?;
        state.suspended_at = Some(at);
        state.suspension_token = Some(token.clone());
        state.outputs.draft = Some(draft);
        self.checkpoints.save(state).await?;

        tracing::info!("Submission {} suspended at {}", state.key, at);
        Ok(RunOutcome::Suspended { stage: at, token })
    }

    async fn advance(&self, state: &mut PipelineState, to: Stage) -> Result<(), GraderError> {
        state.transition(to)?;
        self.checkpoints.save(state).await
    }

    /// Record a fatal error; other errors pass through untouched
    async fn fail(&self, state: &mut PipelineState, error: GraderError) -> GraderError {
        if !error.is_fatal() {
            return error;
        }

        tracing::error!("Submission {} failed at {}: {}", state.key, state.stage, error);
        state.error = Some(error.to_string());
        if let Err(e) = state.transition(Stage::Failed) {
            tracing::error!("Could not mark {} failed: {}", state.key, e);
            return error;
        }
        if let Err(e) = self.checkpoints.save(state).await {
            tracing::error!("Could not save failed checkpoint for {}: {}", state.key, e);
        }
        error
    }
}

fn submission(state: &PipelineState) -> Result<&Submission, GraderError> {
    state
        .outputs
        .submission
        .as_ref()
        .ok_or_else(|| corrupt(&state.key, "submission"))
}

fn apply_output(state: &mut PipelineState, output: StageOutput) {
    match output {
        StageOutput::Analysis(result) => {
            state.outputs.analysis = Some(AnalysisResult::new(
                normalize(AnalysisKind::Plagiarism, result.plagiarism),
                normalize(AnalysisKind::AiDetection, result.ai_detection),
            ));
        }
        StageOutput::Grade(grade) => state.outputs.grade = Some(grade),
        StageOutput::Feedback(feedback) => state.outputs.feedback = Some(feedback),
    }
}

fn degradation_warnings(analysis: &AnalysisResult) -> Vec<Warning> {
    [&analysis.plagiarism, &analysis.ai_detection]
        .into_iter()
        .filter(|outcome| !outcome.is_ok())
        .map(|outcome| Warning::AnalysisDegraded {
            analysis: outcome.kind,
            status: outcome.status,
            note: outcome.note.clone().unwrap_or_default(),
        })
        .collect()
}

fn corrupt(key: &str, missing: &str) -> GraderError {
    GraderError::Database(format!("checkpoint for {} has no {}", key, missing))
}
