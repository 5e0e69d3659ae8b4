//! Report assembly
//!
//! `assemble` is a pure merge of the pipeline's outputs. Nothing is
//! recomputed, and a missing upstream output is marked absent with a reason
//! instead of being replaced by a default value.

use chrono::{DateTime, SecondsFormat, Utc};
use sdk::errors::{AnalysisTaskError, GraderError};
use sdk::types::{AnalysisKind, AnalysisOutcome, AnalysisResult, AnalysisStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::agent::{CriterionScore, FeedbackResult, GradeResult};
use crate::sanitizer::InjectionClass;
use crate::truncation::Consumer;

/// Something the reader of a report should know about how it was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A consumer saw a shortened text
    Truncated {
        consumer: Consumer,
        original_len: usize,
        limit: usize,
    },
    /// Reported by the extractor (e.g. replaced bytes)
    Extraction { message: String },
    /// Injection patterns were neutralized before any agent saw the text
    InjectionNeutralized { patterns: Vec<InjectionClass> },
    /// An analysis branch did not run normally
    AnalysisDegraded {
        analysis: AnalysisKind,
        status: AnalysisStatus,
        note: String,
    },
    /// A stage output was supplied by a reviewer on resume
    ReviewedOutput { stage: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::Truncated {
                consumer,
                original_len,
                limit,
            } => write!(
                f,
                "{} input truncated from {} to {} characters",
                consumer, original_len, limit
            ),
            Warning::Extraction { message } => write!(f, "extraction: {}", message),
            Warning::InjectionNeutralized { patterns } => {
                let names: Vec<&str> = patterns.iter().map(|p| p.as_str()).collect();
                write!(f, "neutralized injection patterns: {}", names.join(", "))
            }
            Warning::AnalysisDegraded {
                analysis,
                status,
                note,
            } => write!(f, "{} analysis {}: {}", analysis, status.as_str(), note),
            Warning::ReviewedOutput { stage } => {
                write!(f, "{} output was supplied by a reviewer", stage)
            }
        }
    }
}

/// A report section that may be missing
///
/// Serializes as the value itself, or as `{"absent": "<reason>"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Section<T> {
    Absent {
        #[serde(rename = "absent")]
        reason: String,
    },
    Present(T),
}

impl<T> Section<T> {
    pub fn absent(reason: impl Into<String>) -> Self {
        Section::Absent {
            reason: reason.into(),
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Section::Present(_))
    }

    pub fn as_option(&self) -> Option<&T> {
        match self {
            Section::Present(value) => Some(value),
            Section::Absent { .. } => None,
        }
    }
}

/// Headline grade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeSummary {
    pub overall_score: f64,
    pub rationale: String,
}

/// Final aggregate for one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub submission_key: String,
    pub generated_at: String,
    pub grade: Section<GradeSummary>,
    pub rubric_breakdown: Section<Vec<CriterionScore>>,
    pub plagiarism: AnalysisOutcome,
    pub ai_detection: AnalysisOutcome,
    pub feedback: Section<FeedbackResult>,
    pub warnings: Vec<Warning>,
}

impl Report {
    /// Write the report as pretty JSON, creating parent directories
    pub async fn write_json(&self, path: &Path) -> Result<(), GraderError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;

        tracing::info!("Report for {} written to {}", self.submission_key, path.display());
        Ok(())
    }

    /// Warnings as display strings
    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(|w| w.to_string()).collect()
    }
}

/// Merge pipeline outputs into a report
pub fn assemble(
    submission_key: &str,
    grade: Option<GradeResult>,
    analysis: Option<AnalysisResult>,
    feedback: Option<FeedbackResult>,
    warnings: Vec<Warning>,
) -> Report {
    assemble_at(submission_key, grade, analysis, feedback, warnings, Utc::now())
}

/// [`assemble`] with an explicit timestamp
pub fn assemble_at(
    submission_key: &str,
    grade: Option<GradeResult>,
    analysis: Option<AnalysisResult>,
    feedback: Option<FeedbackResult>,
    warnings: Vec<Warning>,
    generated_at: DateTime<Utc>,
) -> Report {
    let (grade, rubric_breakdown) = match grade {
        Some(grade) => {
            let breakdown = if grade.criteria.is_empty() {
                Section::absent("grading returned no per-criterion scores")
            } else {
                Section::Present(grade.criteria)
            };
            (
                Section::Present(GradeSummary {
                    overall_score: grade.overall_score,
                    rationale: grade.rationale,
                }),
                breakdown,
            )
        }
        None => (
            Section::absent("grading did not produce a result"),
            Section::absent("grading did not produce a result"),
        ),
    };

    let (plagiarism, ai_detection) = match analysis {
        Some(result) => (result.plagiarism, result.ai_detection),
        None => {
            let missing = AnalysisTaskError::Unavailable("analysis did not run".to_string());
            (
                AnalysisOutcome::degraded(AnalysisKind::Plagiarism, &missing),
                AnalysisOutcome::degraded(AnalysisKind::AiDetection, &missing),
            )
        }
    };

    let feedback = match feedback {
        Some(feedback) => Section::Present(feedback),
        None => Section::absent("feedback was not generated"),
    };

    Report {
        submission_key: submission_key.to_string(),
        generated_at: generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        grade,
        rubric_breakdown,
        plagiarism,
        ai_detection,
        feedback,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::types::Confidence;
    use serde_json::json;

    fn grade() -> GradeResult {
        GradeResult {
            overall_score: 78.0,
            criteria: vec![CriterionScore {
                name: "structure".to_string(),
                score: 8.0,
                notes: String::new(),
            }],
            rationale: "clear argument".to_string(),
        }
    }

    fn analysis() -> AnalysisResult {
        AnalysisResult::new(
            AnalysisOutcome::degraded(
                AnalysisKind::Plagiarism,
                &AnalysisTaskError::Unavailable("network down".to_string()),
            ),
            AnalysisOutcome::ok(
                AnalysisKind::AiDetection,
                Confidence::Moderate,
                false,
                serde_json::Value::Null,
            ),
        )
    }

    #[test]
    fn test_full_report() {
        let feedback = FeedbackResult {
            suggestions: vec!["Cite sources".to_string()],
            ..Default::default()
        };
        let report = assemble("k1", Some(grade()), Some(analysis()), Some(feedback), vec![]);

        assert_eq!(report.grade.as_option().unwrap().overall_score, 78.0);
        assert!(report.rubric_breakdown.is_present());
        assert!(report.feedback.is_present());
        assert_eq!(report.plagiarism.status, AnalysisStatus::Unavailable);
        assert_eq!(report.plagiarism.likely_plagiarized(), None);
    }

    #[test]
    fn test_missing_grade_is_absent_not_zero() {
        let report = assemble("k1", None, Some(analysis()), None, vec![]);
        let json = serde_json::to_value(&report).unwrap();

        assert!(json["grade"]["absent"].is_string());
        assert!(json["grade"].get("overall_score").is_none());
        assert!(json["feedback"]["absent"].is_string());
    }

    #[test]
    fn test_missing_analysis_is_unavailable() {
        let report = assemble("k1", Some(grade()), None, None, vec![]);
        assert_eq!(report.plagiarism.status, AnalysisStatus::Unavailable);
        assert_eq!(report.ai_detection.status, AnalysisStatus::Unavailable);
        assert_eq!(report.ai_detection.verdict, None);
    }

    #[test]
    fn test_empty_criteria_marks_breakdown_absent() {
        let mut g = grade();
        g.criteria.clear();
        let report = assemble("k1", Some(g), Some(analysis()), None, vec![]);
        assert!(report.grade.is_present());
        assert!(!report.rubric_breakdown.is_present());
    }

    #[test]
    fn test_report_round_trips_through_json() {
        let feedback = FeedbackResult {
            style: vec!["Shorter paragraphs".to_string()],
            ..Default::default()
        };
        let report = assemble(
            "k1",
            Some(grade()),
            Some(analysis()),
            Some(feedback),
            vec![Warning::Truncated {
                consumer: Consumer::Grading,
                original_len: 9000,
                limit: 8000,
            }],
        );

        let json = serde_json::to_string(&report).unwrap();
        let back: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_warning_serialization() {
        let warning = Warning::Truncated {
            consumer: Consumer::Grading,
            original_len: 9000,
            limit: 8000,
        };
        assert_eq!(
            serde_json::to_value(&warning).unwrap(),
            json!({"kind": "truncated", "consumer": "grading", "original_len": 9000, "limit": 8000})
        );
        assert!(warning.to_string().contains("9000"));
    }

    #[tokio::test]
    async fn test_write_json_creates_parents() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("reports").join("k1.json");
        let report = assemble("k1", None, None, None, vec![]);

        report.write_json(&path).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["submission_key"], "k1");
    }
}
