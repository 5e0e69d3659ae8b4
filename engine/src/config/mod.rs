//! Configuration management
//!
//! This module handles loading, validation, and management of the grader
//! configuration. Configuration is stored in TOML format at ~/.grader/config.toml.
//!
//! Configuration is read exactly once at startup into an immutable `Config`
//! which is then passed explicitly (usually as `Arc<Config>`) to the components
//! that need it. Nothing re-reads the file or the environment mid-pipeline.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data/output/temp directories, temp file retention
//! - **limits**: Per-consumer truncation limits (characters)
//! - **analysis**: Analysis task timeouts, strict AI detection, search endpoint
//! - **llm**: Agent provider settings and invocation timeout
//! - **server**: Allowed origins for any network front end
//! - **storage**: Session store backend
//!
//! # Examples
//!
//! ```no_run
//! use grader_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Grading limit: {}", config.limits.grading_chars);
//! println!("Provider: {}", config.llm.default_provider);
//! # Ok(())
//! # }
//! ```

use sdk::errors::GraderError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    pub core: CoreConfig,

    /// Truncation limits per downstream consumer
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Analysis coordinator settings
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Agent provider configuration
    pub llm: LLMConfig,

    /// Network front end settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Persistence settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory holding the checkpoint database (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory where reports are written (supports ~ expansion)
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Directory for temporary uploaded files (supports ~ expansion)
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,

    /// Temporary files older than this are removed by cleanup
    #[serde(default = "default_temp_max_age_hours")]
    pub temp_max_age_hours: u64,
}

/// Truncation limits, in characters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_grading_chars")]
    pub grading_chars: usize,

    #[serde(default = "default_feedback_chars")]
    pub feedback_chars: usize,

    #[serde(default = "default_analysis_chars")]
    pub analysis_chars: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            grading_chars: default_grading_chars(),
            feedback_chars: default_feedback_chars(),
            analysis_chars: default_analysis_chars(),
        }
    }
}

/// Analysis coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Lower the AI-detection verdict threshold
    #[serde(default)]
    pub strict_ai_detection: bool,

    /// Bound on each analysis task
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Fewer comparable sources than this yields `limited` confidence
    #[serde(default = "default_min_comparable_sources")]
    pub min_comparable_sources: usize,

    /// Words per plagiarism search chunk
    #[serde(default = "default_chunk_words")]
    pub chunk_words: usize,

    /// Searches in flight at once during the plagiarism check
    #[serde(default = "default_search_concurrency")]
    pub search_concurrency: usize,

    /// Longer texts search an evenly spaced sample of this many chunks
    #[serde(default = "default_max_search_chunks")]
    pub max_search_chunks: usize,

    /// Web search endpoint used by the plagiarism check
    #[serde(default)]
    pub search_endpoint: Option<String>,

    /// Suspend the submission instead of grading when a lookup was rate limited
    #[serde(default)]
    pub suspend_on_rate_limit: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            strict_ai_detection: false,
            task_timeout_secs: default_task_timeout_secs(),
            min_comparable_sources: default_min_comparable_sources(),
            chunk_words: default_chunk_words(),
            search_concurrency: default_search_concurrency(),
            max_search_chunks: default_max_search_chunks(),
            search_endpoint: None,
            suspend_on_rate_limit: false,
        }
    }
}

impl AnalysisConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Agent provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Provider used by the grading and feedback agents (gemini, ollama)
    pub default_provider: String,

    /// Bound on each agent invocation
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,

    /// Attempts per agent call when the provider fails transiently (429, 5xx)
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Delay before the first retry; doubles on every further attempt
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    /// Gemini provider settings
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,
}

impl LLMConfig {
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }
}

/// Gemini provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Base URL for Gemini API
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_gemini_model")]
    pub model: String,
    // Note: API key is read from the environment at startup, not stored here
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// Network front end configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Origins allowed to call a network front end
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Keep sessions in the sqlite database instead of process memory
    #[serde(default)]
    pub durable_sessions: bool,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.grader")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("~/.grader/output")
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from("~/.grader/tmp")
}

fn default_temp_max_age_hours() -> u64 {
    24
}

fn default_grading_chars() -> usize {
    8000
}

fn default_feedback_chars() -> usize {
    6000
}

fn default_analysis_chars() -> usize {
    20000
}

fn default_task_timeout_secs() -> u64 {
    30
}

fn default_min_comparable_sources() -> usize {
    3
}

fn default_chunk_words() -> usize {
    40
}

fn default_search_concurrency() -> usize {
    4
}

fn default_max_search_chunks() -> usize {
    30
}

fn default_agent_timeout_secs() -> u64 {
    120
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_initial_delay_ms() -> u64 {
    1000
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash-lite".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:8080".to_string(),
        "http://localhost:3000".to_string(),
        "http://127.0.0.1:8080".to_string(),
    ]
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_gemini_base_url(),
            model: default_gemini_model(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.grader/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, GraderError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, GraderError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| GraderError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, GraderError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| GraderError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, GraderError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                GraderError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| GraderError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| GraderError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.grader/config.toml)
    fn default_config_path() -> Result<PathBuf, GraderError> {
        let home = dirs::home_dir()
            .ok_or_else(|| GraderError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".grader").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig {
                log_level: default_log_level(),
                data_dir: default_data_dir(),
                output_dir: default_output_dir(),
                tmp_dir: default_tmp_dir(),
                temp_max_age_hours: default_temp_max_age_hours(),
            },
            limits: LimitsConfig::default(),
            analysis: AnalysisConfig::default(),
            llm: LLMConfig {
                default_provider: "gemini".to_string(),
                agent_timeout_secs: default_agent_timeout_secs(),
                retry_attempts: default_retry_attempts(),
                retry_initial_delay_ms: default_retry_initial_delay_ms(),
                gemini: GeminiConfig::default(),
                ollama: OllamaConfig::default(),
            },
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
        }
    }

    /// Path of the checkpoint database
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("grader.db")
    }

    /// Validate and process configuration
    ///
    /// This method validates value ranges and expands `~` in every path.
    /// Directories are created lazily by the components that write to them.
    fn validate_and_process(&mut self) -> Result<(), GraderError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(GraderError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["gemini", "ollama"];
        if !valid_providers.contains(&self.llm.default_provider.as_str()) {
            return Err(GraderError::Config(format!(
                "Invalid default provider '{}'. Must be one of: {}",
                self.llm.default_provider,
                valid_providers.join(", ")
            )));
        }

        let limits = [
            ("grading_chars", self.limits.grading_chars),
            ("feedback_chars", self.limits.feedback_chars),
            ("analysis_chars", self.limits.analysis_chars),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(GraderError::Config(format!(
                    "limits.{} must be greater than 0",
                    name
                )));
            }
        }

        if self.analysis.task_timeout_secs == 0 {
            return Err(GraderError::Config(
                "analysis.task_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.llm.agent_timeout_secs == 0 {
            return Err(GraderError::Config(
                "llm.agent_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.llm.retry_attempts == 0 {
            return Err(GraderError::Config(
                "llm.retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.analysis.chunk_words < 5 {
            return Err(GraderError::Config(
                "analysis.chunk_words must be at least 5".to_string(),
            ));
        }
        if self.analysis.search_concurrency == 0 || self.analysis.max_search_chunks == 0 {
            return Err(GraderError::Config(
                "analysis.search_concurrency and analysis.max_search_chunks must be at least 1"
                    .to_string(),
            ));
        }

        for origin in &self.server.allowed_origins {
            if !(origin.starts_with("http://") || origin.starts_with("https://")) {
                return Err(GraderError::Config(format!(
                    "Invalid allowed origin '{}'. Origins must start with http:// or https://",
                    origin
                )));
            }
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        self.core.output_dir = expand_path(&self.core.output_dir)?;
        self.core.tmp_dir = expand_path(&self.core.tmp_dir)?;

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, GraderError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| GraderError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| GraderError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| GraderError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
