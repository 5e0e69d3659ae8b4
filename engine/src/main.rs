// Grader Engine
// Main entry point for the grader binary

use clap::Parser;
use grader_engine::cli::{Cli, Command};
use grader_engine::config::Config;
use grader_engine::handlers::{
    handle_cleanup, handle_continue, handle_grade, handle_resume, handle_status, GradeRequest,
    OutputFormat, ResumeRequest,
};
use grader_engine::telemetry::init_telemetry_with_level;
use sdk::errors::{GraderError, GraderErrorExt};

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        if let Some(grader_error) = e.downcast_ref::<GraderError>() {
            eprintln!("Hint: {}", grader_error.user_hint());
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the configured level; RUST_LOG wins over both
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("Grader v{} ({} - {})", version, commit, timestamp);

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Read once at startup and passed down explicitly
    let api_key = std::env::var("GOOGLE_API_KEY")
        .or_else(|_| std::env::var("GEMINI_API_KEY"))
        .ok()
        .filter(|key| !key.is_empty());

    // Handle commands
    match cli.command {
        Command::Grade {
            input,
            rubric,
            student,
            assignment,
            output,
            pause_after,
        } => {
            tracing::info!("Grading {}", input.display());
            let request = GradeRequest {
                input,
                rubric,
                student,
                assignment,
                output,
                options: grader_engine::pipeline::RunOptions {
                    pause_after: pause_after.map(Into::into),
                },
            };
            handle_grade(request, &config, api_key, format).await
        }

        Command::Resume {
            key,
            token,
            result,
            accept_draft,
            output,
        } => {
            tracing::info!("Resuming {}", key);
            let request = ResumeRequest {
                key,
                token,
                result,
                accept_draft,
                output,
            };
            handle_resume(request, &config, api_key, format).await
        }

        Command::Continue { key, output } => {
            tracing::info!("Continuing {}", key);
            handle_continue(key, output, &config, api_key, format).await
        }

        Command::Status { key, limit } => handle_status(key, limit, &config, format).await,

        Command::Cleanup => {
            tracing::info!("Cleaning temporary files");
            handle_cleanup(&config, format).await
        }
    }
}
