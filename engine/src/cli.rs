//! CLI interface for the grader
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::pipeline::ReviewPoint;

/// Automated grading pipeline
///
/// Grades a submitted document against a rubric and writes a report with a
/// grade, a plagiarism assessment, an AI-text assessment and feedback.
#[derive(Parser, Debug)]
#[command(name = "grader")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Grade a document and write its report
    Grade {
        /// Input file (text; other formats need a registered parser)
        input: PathBuf,

        /// Rubric text
        #[arg(short, long)]
        rubric: Option<String>,

        /// Student identifier, used with --assignment to key the submission
        #[arg(long, requires = "assignment")]
        student: Option<String>,

        /// Assignment identifier
        #[arg(long, requires = "student")]
        assignment: Option<String>,

        /// Report path (default: <output_dir>/<key>.json)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Suspend for review after this stage
        #[arg(long, value_enum, value_name = "STAGE")]
        pause_after: Option<PausePoint>,
    },

    /// Resume a suspended submission
    Resume {
        /// Submission key
        key: String,

        /// Suspension token printed when the submission was suspended
        token: String,

        /// JSON file with the stage output to use instead of the draft
        #[arg(long, value_name = "FILE", conflicts_with = "accept_draft")]
        result: Option<PathBuf>,

        /// Accept the draft output unchanged
        #[arg(long)]
        accept_draft: bool,

        /// Report path (default: <output_dir>/<key>.json)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Continue a submission from its last checkpoint
    Continue {
        /// Submission key
        key: String,

        /// Report path (default: <output_dir>/<key>.json)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Show the checkpoint of one submission, or list recent ones
    Status {
        /// Submission key
        key: Option<String>,

        /// Number of submissions to list without a key
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Remove expired temporary files
    Cleanup,
}

/// Stages a run can pause after
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PausePoint {
    Analysis,
    Grading,
    Feedback,
}

impl From<PausePoint> for ReviewPoint {
    fn from(point: PausePoint) -> Self {
        match point {
            PausePoint::Analysis => ReviewPoint::Analysis,
            PausePoint::Grading => ReviewPoint::Grading,
            PausePoint::Feedback => ReviewPoint::Feedback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_grade_command_parsing() {
        let cli = Cli::try_parse_from([
            "grader",
            "grade",
            "essay.txt",
            "--rubric",
            "Clarity",
            "--pause-after",
            "grading",
        ])
        .unwrap();

        match cli.command {
            Command::Grade {
                input,
                rubric,
                pause_after,
                ..
            } => {
                assert_eq!(input, PathBuf::from("essay.txt"));
                assert_eq!(rubric.as_deref(), Some("Clarity"));
                assert_eq!(pause_after, Some(PausePoint::Grading));
            }
            _ => panic!("Expected Grade command"),
        }
    }

    #[test]
    fn test_student_requires_assignment() {
        assert!(Cli::try_parse_from(["grader", "grade", "a.txt", "--student", "ada"]).is_err());
        assert!(Cli::try_parse_from([
            "grader",
            "grade",
            "a.txt",
            "--student",
            "ada",
            "--assignment",
            "essay-1"
        ])
        .is_ok());
    }

    #[test]
    fn test_resume_flags_conflict() {
        assert!(Cli::try_parse_from([
            "grader",
            "resume",
            "key",
            "token",
            "--result",
            "r.json",
            "--accept-draft"
        ])
        .is_err());
    }

    #[test]
    fn test_global_flags() {
        let cli =
            Cli::try_parse_from(["grader", "--json", "--log", "debug", "status", "abc"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.log.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Command::Status { key: Some(_), .. }));
    }
}
