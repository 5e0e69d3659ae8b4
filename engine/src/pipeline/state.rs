//! Pipeline stages and the persisted per-submission record

use chrono::{DateTime, Utc};
use sdk::errors::GraderError;
use sdk::types::{AnalysisKind, AnalysisResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::agent::{FeedbackResult, GradeResult};
use crate::ingestion::Submission;
use crate::report::{Report, Warning};
use crate::sanitizer::{InjectionClass, SanitizedText};

/// Pipeline stages
///
/// Forward stages carry a rank; a submission only moves to a higher rank,
/// to `Suspended`, or to `Failed`. Leaving `Suspended` is only possible
/// through a resume with the matching token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingested,
    Sanitized,
    Analyzing,
    Analyzed,
    Grading,
    Graded,
    Feedback,
    FeedbackDone,
    Done,
    Suspended,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &str {
        match self {
            Stage::Ingested => "ingested",
            Stage::Sanitized => "sanitized",
            Stage::Analyzing => "analyzing",
            Stage::Analyzed => "analyzed",
            Stage::Grading => "grading",
            Stage::Graded => "graded",
            Stage::Feedback => "feedback",
            Stage::FeedbackDone => "feedback_done",
            Stage::Done => "done",
            Stage::Suspended => "suspended",
            Stage::Failed => "failed",
        }
    }

    /// Position in the forward order; `None` for `Suspended` and `Failed`
    pub fn rank(&self) -> Option<u8> {
        match self {
            Stage::Ingested => Some(0),
            Stage::Sanitized => Some(1),
            Stage::Analyzing => Some(2),
            Stage::Analyzed => Some(3),
            Stage::Grading => Some(4),
            Stage::Graded => Some(5),
            Stage::Feedback => Some(6),
            Stage::FeedbackDone => Some(7),
            Stage::Done => Some(8),
            Stage::Suspended | Stage::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    /// Whether a checkpoint may move from `self` to `to` without a resume
    pub fn can_transition_to(&self, to: Stage) -> bool {
        if self.is_terminal() || *self == Stage::Suspended {
            return false;
        }
        match to {
            Stage::Failed | Stage::Suspended => true,
            _ => match (self.rank(), to.rank()) {
                (Some(from), Some(to)) => to > from,
                _ => false,
            },
        }
    }

    /// Stage reached once the long-running step started at `self` completes
    pub fn completed(&self) -> Option<Stage> {
        match self {
            Stage::Analyzing => Some(Stage::Analyzed),
            Stage::Grading => Some(Stage::Graded),
            Stage::Feedback => Some(Stage::FeedbackDone),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Stage {
    type Err = GraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stage = match s {
            "ingested" => Stage::Ingested,
            "sanitized" => Stage::Sanitized,
            "analyzing" => Stage::Analyzing,
            "analyzed" => Stage::Analyzed,
            "grading" => Stage::Grading,
            "graded" => Stage::Graded,
            "feedback" => Stage::Feedback,
            "feedback_done" => Stage::FeedbackDone,
            "done" => Stage::Done,
            "suspended" => Stage::Suspended,
            "failed" => Stage::Failed,
            other => return Err(GraderError::Database(format!("unknown stage '{}'", other))),
        };
        Ok(stage)
    }
}

/// Points where a run can pause for human review
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReviewPoint {
    Analysis,
    Grading,
    Feedback,
}

impl ReviewPoint {
    /// The stage whose output is held for review
    pub fn stage(&self) -> Stage {
        match self {
            ReviewPoint::Analysis => Stage::Analyzing,
            ReviewPoint::Grading => Stage::Grading,
            ReviewPoint::Feedback => Stage::Feedback,
        }
    }
}

/// Options fixed for the whole life of a submission
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunOptions {
    #[serde(default)]
    pub pause_after: Option<ReviewPoint>,
}

impl RunOptions {
    pub fn pause_after(point: ReviewPoint) -> Self {
        Self {
            pause_after: Some(point),
        }
    }

    pub fn pauses_at(&self, stage: Stage) -> bool {
        self.pause_after.map(|p| p.stage()) == Some(stage)
    }
}

/// Output of one long-running stage, as drafted by the pipeline or supplied
/// on resume
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "stage", content = "output", rename_all = "snake_case")]
pub enum StageOutput {
    Analysis(AnalysisResult),
    Grade(GradeResult),
    Feedback(FeedbackResult),
}

impl StageOutput {
    /// The suspended stage this output completes
    pub fn pending_stage(&self) -> Stage {
        match self {
            StageOutput::Analysis(_) => Stage::Analyzing,
            StageOutput::Grade(_) => Stage::Grading,
            StageOutput::Feedback(_) => Stage::Feedback,
        }
    }

    /// Reject outputs that break the analysis pair invariant
    pub fn validate(&self) -> Result<(), GraderError> {
        if let StageOutput::Analysis(result) = self {
            if result.plagiarism.kind != AnalysisKind::Plagiarism
                || result.ai_detection.kind != AnalysisKind::AiDetection
            {
                return Err(GraderError::ResumeResultMismatch {
                    expected: "plagiarism and ai_detection outcomes".to_string(),
                    got: format!("{} and {}", result.plagiarism.kind, result.ai_detection.kind),
                });
            }
        }
        Ok(())
    }
}

/// Everything produced so far for one submission
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PartialOutputs {
    #[serde(default)]
    pub submission: Option<Submission>,
    #[serde(default)]
    pub sanitized: Option<SanitizedText>,
    #[serde(default)]
    pub analysis: Option<AnalysisResult>,
    #[serde(default)]
    pub grade: Option<GradeResult>,
    #[serde(default)]
    pub feedback: Option<FeedbackResult>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    /// Output held while suspended
    #[serde(default)]
    pub draft: Option<StageOutput>,
    #[serde(default)]
    pub report: Option<Report>,
}

impl PartialOutputs {
    /// Record a warning once; re-running a stage after a restart must not
    /// duplicate it
    pub fn warn(&mut self, warning: Warning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    /// Fold `classes` into the single injection warning
    pub fn note_neutralized(&mut self, classes: &[InjectionClass]) {
        let existing = self.warnings.iter_mut().find_map(|w| match w {
            Warning::InjectionNeutralized { patterns } => Some(patterns),
            _ => None,
        });

        match existing {
            Some(patterns) => {
                for class in classes {
                    if !patterns.contains(class) {
                        patterns.push(*class);
                    }
                }
            }
            None if !classes.is_empty() => self.warnings.push(Warning::InjectionNeutralized {
                patterns: classes.to_vec(),
            }),
            None => {}
        }
    }
}

/// Persisted checkpoint for one submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineState {
    pub key: String,
    pub stage: Stage,
    /// Stage awaiting an output while `stage` is `Suspended`
    #[serde(default)]
    pub suspended_at: Option<Stage>,
    pub outputs: PartialOutputs,
    #[serde(default)]
    pub suspension_token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub options: RunOptions,
    pub updated_at: DateTime<Utc>,
}

impl PipelineState {
    /// State for a freshly ingested submission
    pub fn ingested(submission: Submission, options: RunOptions) -> Self {
        let mut outputs = PartialOutputs::default();
        for message in submission.extraction_warnings() {
            outputs.warn(Warning::Extraction {
                message: message.clone(),
            });
        }

        Self {
            key: submission.key().to_string(),
            stage: Stage::Ingested,
            suspended_at: None,
            outputs: PartialOutputs {
                submission: Some(submission),
                ..outputs
            },
            suspension_token: None,
            error: None,
            options,
            updated_at: Utc::now(),
        }
    }

    /// State for a submission whose ingestion failed
    pub fn failed_ingestion(key: &str, error: &GraderError, options: RunOptions) -> Self {
        Self {
            key: key.to_string(),
            stage: Stage::Failed,
            suspended_at: None,
            outputs: PartialOutputs::default(),
            suspension_token: None,
            error: Some(error.to_string()),
            options,
            updated_at: Utc::now(),
        }
    }

    /// Move forward, or to `Suspended`/`Failed`
    pub fn transition(&mut self, to: Stage) -> Result<(), GraderError> {
        if !self.stage.can_transition_to(to) {
            return Err(GraderError::InvalidTransition {
                from: self.stage.to_string(),
                to: to.to_string(),
            });
        }

        tracing::info!("Submission {}: {} -> {}", self.key, self.stage, to);
        self.stage = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Leave `Suspended` for the stage completed by the resumed output
    pub(crate) fn resume_into(&mut self, to: Stage) {
        tracing::info!("Submission {}: {} -> {} (resumed)", self.key, self.stage, to);
        self.stage = to;
        self.suspended_at = None;
        self.suspension_token = None;
        self.outputs.draft = None;
        self.updated_at = Utc::now();
    }
}
