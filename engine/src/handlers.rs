//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - grade: Run a document through the pipeline and write its report
//! - resume: Complete a suspended stage and finish the run
//! - continue: Pick up a submission from its last checkpoint
//! - status: Show one checkpoint or list recent submissions
//! - cleanup: Remove expired temporary files
//!
//! Handlers return `anyhow::Result`; pipeline errors keep their
//! `GraderError` inside so `main` can print the user hint.

use anyhow::{bail, Context, Result};
use sdk::types::{AnalysisOutcome, AnalysisResult};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agent::{FeedbackResult, GradeResult};
use crate::config::Config;
use crate::db::Database;
use crate::ingestion::SubmissionKey;
use crate::llm::provider_from_config;
use crate::pipeline::{
    CheckpointStore, Orchestrator, PipelineState, ResumeWith, RunOptions, RunOutcome, Stage,
    StageOutput,
};
use crate::report::{Report, Section};
use crate::session::{InMemorySessionStore, SessionStore};
use crate::workspace::TempWorkspace;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Arguments of the grade command
#[derive(Debug, Clone, Default)]
pub struct GradeRequest {
    pub input: PathBuf,
    pub rubric: Option<String>,
    pub student: Option<String>,
    pub assignment: Option<String>,
    pub output: Option<PathBuf>,
    pub options: RunOptions,
}

/// Arguments of the resume command
#[derive(Debug, Clone, Default)]
pub struct ResumeRequest {
    pub key: String,
    pub token: String,
    pub result: Option<PathBuf>,
    pub accept_draft: bool,
    pub output: Option<PathBuf>,
}

/// Open the database and wire an orchestrator over it
async fn open_pipeline(config: &Config, api_key: Option<String>) -> Result<(Orchestrator, Database)> {
    let database = Database::new(&config.database_path())
        .await
        .context("Failed to open database")?;

    let provider = provider_from_config(&config.llm, api_key)?;
    tracing::info!("Using {} provider", provider.name());

    let sessions: Arc<dyn SessionStore> = if config.storage.durable_sessions {
        Arc::new(database.sessions())
    } else {
        Arc::new(InMemorySessionStore::new())
    };
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(database.checkpoints());

    let orchestrator = Orchestrator::from_config(config, provider, sessions, checkpoints)?;
    Ok((orchestrator, database))
}

/// Flush and close the database on every path; the command's own error wins
async fn close_with<T>(database: Database, result: Result<T>) -> Result<T> {
    let closed = database.close().await;

    match result {
        Ok(value) => closed.map(|()| value),
        Err(e) => {
            if let Err(close_error) = closed {
                tracing::warn!("Failed to close database: {:#}", close_error);
            }
            Err(e)
        }
    }
}

fn report_path(config: &Config, key: &str, output: Option<PathBuf>) -> PathBuf {
    output.unwrap_or_else(|| config.core.output_dir.join(format!("{}.json", key)))
}

/// Grade one document
pub async fn handle_grade(
    request: GradeRequest,
    config: &Config,
    api_key: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let workspace = TempWorkspace::from_config(&config.core);
    if let Err(e) = workspace.cleanup_expired().await {
        tracing::warn!("Temp cleanup failed: {:#}", e);
    }

    let key = SubmissionKey::resolve(
        request.student.as_deref(),
        request.assignment.as_deref(),
        &request.input,
    );

    let (orchestrator, database) = open_pipeline(config, api_key).await?;

    let result: Result<()> = async {
        // Missing inputs go straight to the extractor so the failure is checkpointed.
        let lease = if request.input.is_file() {
            Some(workspace.stage(&request.input).await?)
        } else {
            None
        };
        let source = lease
            .as_ref()
            .map(|l| l.path().to_path_buf())
            .unwrap_or_else(|| request.input.clone());

        let run = orchestrator
            .run_file(&source, key.clone(), request.rubric, request.options)
            .await;

        if let Some(lease) = lease {
            if let Err(e) = workspace.release_and_remove(lease).await {
                tracing::warn!("Failed to remove staged input: {:#}", e);
            }
        }

        finish(run?, key.as_str(), config, request.output, format).await
    }
    .await;

    close_with(database, result).await
}

/// Resume a suspended submission and run it to the end
pub async fn handle_resume(
    request: ResumeRequest,
    config: &Config,
    api_key: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let ResumeRequest {
        key,
        token,
        result,
        accept_draft,
        output,
    } = request;

    if result.is_none() && !accept_draft {
        bail!("Pass --result <FILE> or --accept-draft");
    }

    let (orchestrator, database) = open_pipeline(config, api_key).await?;

    let ran: Result<()> = async {
        let with = match result {
            Some(path) => {
                let state = orchestrator.status(&key).await?;
                ResumeWith::Output(read_stage_output(&path, &state)?)
            }
            None => ResumeWith::Draft,
        };

        let state = orchestrator.resume(&key, &token, with).await?;
        tracing::info!("Resumed {} at {}", key, state.stage);

        let outcome = orchestrator.continue_run(&key).await?;
        finish(outcome, &key, config, output, format).await
    }
    .await;

    close_with(database, ran).await
}

/// Continue a submission from its last checkpoint
pub async fn handle_continue(
    key: String,
    output: Option<PathBuf>,
    config: &Config,
    api_key: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let (orchestrator, database) = open_pipeline(config, api_key).await?;

    let result = match orchestrator.continue_run(&key).await {
        Ok(outcome) => finish(outcome, &key, config, output, format).await,
        Err(e) => Err(e.into()),
    };

    close_with(database, result).await
}

/// Show one checkpoint, or list recent submissions
pub async fn handle_status(
    key: Option<String>,
    limit: usize,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let database = Database::new(&config.database_path())
        .await
        .context("Failed to open database")?;
    let checkpoints = database.checkpoints();

    let result: Result<()> = async {
        match key {
            Some(key) => {
                let state = checkpoints
                    .load(&key)
                    .await?
                    .ok_or_else(|| sdk::errors::GraderError::SubmissionNotFound(key.clone()))?;
                print_state(&state, format)?;
            }
            None => {
                let rows = checkpoints
                    .list(limit as i64)
                    .await
                    .context("Failed to list submissions")?;

                match format {
                    OutputFormat::Text => {
                        if rows.is_empty() {
                            println!("No submissions");
                        }
                        for row in &rows {
                            let updated = chrono::DateTime::from_timestamp(row.updated_at, 0)
                                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                                .unwrap_or_else(|| "Unknown".to_string());
                            println!("{}  {:<14} {}", row.key, row.stage.as_str(), updated);
                        }
                    }
                    OutputFormat::Json => {
                        let submissions: Vec<_> = rows
                            .iter()
                            .map(|r| {
                                json!({
                                    "key": r.key,
                                    "stage": r.stage,
                                    "updated_at": r.updated_at,
                                })
                            })
                            .collect();
                        let output = json!({
                            "submissions": submissions,
                            "count": rows.len(),
                            "limit": limit,
                        });
                        println!("{}", serde_json::to_string_pretty(&output)?);
                    }
                }
            }
        }
        Ok(())
    }
    .await;

    close_with(database, result).await
}

/// Remove expired temporary files
pub async fn handle_cleanup(config: &Config, format: OutputFormat) -> Result<()> {
    let workspace = TempWorkspace::from_config(&config.core);
    let removed = workspace.cleanup_expired().await?;

    match format {
        OutputFormat::Text => println!(
            "Removed {} expired file(s) from {}",
            removed,
            workspace.dir().display()
        ),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "removed": removed,
                "dir": workspace.dir(),
            }))?
        ),
    }

    Ok(())
}

/// Parse a reviewer-supplied output for the stage the submission waits at
fn read_stage_output(path: &Path, state: &PipelineState) -> Result<StageOutput> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("{} is not JSON", path.display()))?;

    let output = match state.suspended_at {
        Some(Stage::Analyzing) => {
            StageOutput::Analysis(serde_json::from_value::<AnalysisResult>(value)?)
        }
        Some(Stage::Grading) => StageOutput::Grade(GradeResult::from_value(value)?),
        Some(Stage::Feedback) => StageOutput::Feedback(FeedbackResult::from_value(value)?),
        _ => serde_json::from_value(value)?,
    };
    Ok(output)
}

/// Write the report of a completed run, or print how to resume
async fn finish(
    outcome: RunOutcome,
    key: &str,
    config: &Config,
    output: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    match outcome {
        RunOutcome::Completed(report) => {
            let path = report_path(config, key, output);
            report.write_json(&path).await?;

            match format {
                OutputFormat::Text => print_report(&report, &path),
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "status": "done",
                        "report_path": path,
                        "report": report,
                    }))?
                ),
            }
        }
        RunOutcome::Suspended { stage, token } => match format {
            OutputFormat::Text => {
                println!("Submission {} suspended at {}", key, stage);
                println!("Resume with: grader resume {} {} --accept-draft", key, token);
                println!("         or: grader resume {} {} --result <FILE>", key, token);
            }
            OutputFormat::Json => println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "status": "suspended",
                    "submission_key": key,
                    "stage": stage,
                    "token": token,
                }))?
            ),
        },
    }

    Ok(())
}

fn verdict(outcome: &AnalysisOutcome) -> String {
    let verdict = match outcome.verdict {
        Some(true) => "likely",
        Some(false) => "unlikely",
        None => "no verdict",
    };
    let mut line = format!(
        "{} ({}, confidence {:?})",
        outcome.status.as_str(),
        verdict,
        outcome.confidence
    );
    if let Some(note) = &outcome.note {
        line.push_str(&format!(" - {}", note));
    }
    line
}

fn print_report(report: &Report, path: &Path) {
    println!("Report for {}", report.submission_key);
    println!();

    match &report.grade {
        Section::Present(grade) => println!("Grade: {:.1}/100", grade.overall_score),
        Section::Absent { reason } => println!("Grade: absent ({})", reason),
    }
    if let Section::Present(criteria) = &report.rubric_breakdown {
        for criterion in criteria {
            println!("  {}: {}", criterion.name, criterion.score);
        }
    }

    println!("Plagiarism: {}", verdict(&report.plagiarism));
    println!("AI text: {}", verdict(&report.ai_detection));

    match &report.feedback {
        Section::Present(feedback) => {
            println!("Feedback:");
            for suggestion in feedback.suggestions.iter().chain(&feedback.style) {
                println!("  - {}", suggestion);
            }
        }
        Section::Absent { reason } => println!("Feedback: absent ({})", reason),
    }

    if !report.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in report.warning_messages() {
            println!("  - {}", warning);
        }
    }

    println!();
    println!("Written to {}", path.display());
}

fn print_state(state: &PipelineState, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("Submission: {}", state.key);
            println!("  Stage: {}", state.stage);
            if let Some(stage) = state.suspended_at {
                println!("  Waiting at: {}", stage);
            }
            if let Some(token) = &state.suspension_token {
                println!("  Token: {}", token);
            }
            if let Some(error) = &state.error {
                println!("  Error: {}", error);
            }
            println!("  Warnings: {}", state.outputs.warnings.len());
            println!("  Updated: {}", state.updated_at.format("%Y-%m-%d %H:%M:%S"));
        }
        OutputFormat::Json => {
            let output = json!({
                "submission_key": state.key,
                "stage": state.stage,
                "suspended_at": state.suspended_at,
                "suspension_token": state.suspension_token,
                "error": state.error,
                "warnings": state.outputs.warnings,
                "updated_at": state.updated_at.to_rfc3339(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::Submission;
    use serde_json::json;

    fn suspended_at(stage: Stage) -> PipelineState {
        let submission = Submission::new(SubmissionKey::derive("a", "b"), "text", None);
        let mut state = PipelineState::ingested(submission, RunOptions::default());
        state.stage = Stage::Suspended;
        state.suspended_at = Some(stage);
        state
    }

    #[test]
    fn test_read_grade_output_for_grading_stage() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("grade.json");
        std::fs::write(&path, json!({"overall_score": 91, "rationale": "fixed"}).to_string())
            .unwrap();

        let output = read_stage_output(&path, &suspended_at(Stage::Grading)).unwrap();
        assert!(matches!(output, StageOutput::Grade(g) if g.overall_score == 91.0));
    }

    #[test]
    fn test_read_rejects_invalid_grade() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("grade.json");
        std::fs::write(&path, json!({"overall_score": 400}).to_string()).unwrap();

        assert!(read_stage_output(&path, &suspended_at(Stage::Grading)).is_err());
    }

    #[test]
    fn test_default_report_path() {
        let config = Config::default_config();
        let path = report_path(&config, "abc", None);
        assert!(path.ends_with("abc.json"));
        assert_eq!(
            report_path(&config, "abc", Some(PathBuf::from("out.json"))),
            PathBuf::from("out.json")
        );
    }
}
