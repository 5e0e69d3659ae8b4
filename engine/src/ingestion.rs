//! Ingestion
//!
//! Turns an input file into an immutable [`Submission`]. The built-in
//! [`FileExtractor`] reads text files; PDF and image formats need a parser
//! registered for their extension and otherwise fail with
//! `ExtractionError::UnsupportedFormat`.

use async_trait::async_trait;
use sdk::errors::ExtractionError;
use sdk::tool::{Extracted, Extractor};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::agent::DEFAULT_RUBRIC;

/// Hex chars kept from the SHA-256 digest
const KEY_LEN: usize = 16;

/// Extensions that need a dedicated parser
const BINARY_FORMATS: &[&str] = &["pdf", "png", "jpg", "jpeg", "tiff", "tif", "bmp", "gif", "webp"];

/// Stable identity of a submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SubmissionKey(String);

impl SubmissionKey {
    /// Key for a student's work on an assignment
    ///
    /// # Example
    ///
    /// ```
    /// use grader_engine::ingestion::SubmissionKey;
    ///
    /// let a = SubmissionKey::derive("ada", "essay-1");
    /// let b = SubmissionKey::derive("ada", "essay-1");
    /// assert_eq!(a, b);
    /// assert_eq!(a.as_str().len(), 16);
    /// ```
    pub fn derive(student: &str, assignment: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(student.trim().as_bytes());
        hasher.update([0u8]);
        hasher.update(assignment.trim().as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self(digest[..KEY_LEN].to_string())
    }

    /// Key for an anonymous file, based on its absolute path
    pub fn for_path(path: &Path) -> Self {
        let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        Self::derive("file", &absolute.to_string_lossy())
    }

    /// Student + assignment when both are given, otherwise the file path
    pub fn resolve(student: Option<&str>, assignment: Option<&str>, path: &Path) -> Self {
        match (student, assignment) {
            (Some(student), Some(assignment)) => Self::derive(student, assignment),
            _ => Self::for_path(path),
        }
    }

    /// Wrap a key supplied by a caller (e.g. on the command line)
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let valid = !raw.is_empty()
            && raw.len() <= 128
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubmissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One document to grade; never mutated after creation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    key: SubmissionKey,
    raw_text: String,
    rubric: String,
    #[serde(default)]
    extraction_warnings: Vec<String>,
}

impl Submission {
    /// `rubric` falls back to the default rubric when absent or blank
    pub fn new(key: SubmissionKey, raw_text: impl Into<String>, rubric: Option<String>) -> Self {
        let rubric = rubric
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_RUBRIC.to_string());

        Self {
            key,
            raw_text: raw_text.into(),
            rubric,
            extraction_warnings: Vec::new(),
        }
    }

    pub fn from_extracted(key: SubmissionKey, extracted: Extracted, rubric: Option<String>) -> Self {
        let mut submission = Self::new(key, extracted.text, rubric);
        submission.extraction_warnings = extracted.warnings;
        submission
    }

    pub fn key(&self) -> &SubmissionKey {
        &self.key
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn rubric(&self) -> &str {
        &self.rubric
    }

    pub fn extraction_warnings(&self) -> &[String] {
        &self.extraction_warnings
    }
}

/// Reads text files and dispatches other formats to registered parsers
#[derive(Default)]
pub struct FileExtractor {
    parsers: HashMap<String, Arc<dyn Extractor>>,
}

impl FileExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parser for a file extension (without the dot)
    pub fn with_parser(mut self, extension: &str, parser: Arc<dyn Extractor>) -> Self {
        self.parsers.insert(extension.to_lowercase(), parser);
        self
    }

    fn decode(bytes: Vec<u8>) -> Result<Extracted, ExtractionError> {
        if bytes.contains(&0) {
            return Err(ExtractionError::UnsupportedFormat(
                "binary content".to_string(),
            ));
        }

        let (text, warning) = match String::from_utf8(bytes) {
            Ok(text) => (text, None),
            Err(e) => {
                let lossy = String::from_utf8_lossy(e.as_bytes()).into_owned();
                let replaced = lossy.matches(char::REPLACEMENT_CHARACTER).count();
                (
                    lossy,
                    Some(format!("replaced {} invalid UTF-8 sequences", replaced)),
                )
            }
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(ExtractionError::EmptyText);
        }

        let mut extracted = Extracted::new(text);
        if let Some(warning) = warning {
            extracted = extracted.with_warning(warning);
        }
        Ok(extracted)
    }
}

#[async_trait]
impl Extractor for FileExtractor {
    async fn extract(&self, path: &Path) -> Result<Extracted, ExtractionError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(ExtractionError::FileNotFound(path.display().to_string()));
        }

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if let Some(parser) = self.parsers.get(&extension) {
            let extracted = parser.extract(path).await?;
            if extracted.text.trim().is_empty() {
                return Err(ExtractionError::EmptyText);
            }
            return Ok(extracted);
        }

        if BINARY_FORMATS.contains(&extension.as_str()) {
            return Err(ExtractionError::UnsupportedFormat(extension));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ExtractionError::ReadFailed(e.to_string()))?;

        let extracted = Self::decode(bytes)?;
        tracing::info!(
            "Extracted {} chars from {}",
            extracted.text.chars().count(),
            path.display()
        );
        Ok(extracted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_key_is_stable_and_distinct() {
        let a = SubmissionKey::derive("ada", "essay-1");
        assert_eq!(a, SubmissionKey::derive(" ada ", "essay-1"));
        assert_ne!(a, SubmissionKey::derive("ada", "essay-2"));
        assert_ne!(
            SubmissionKey::derive("ab", "c"),
            SubmissionKey::derive("a", "bc")
        );
    }

    #[test]
    fn test_resolve_falls_back_to_path() {
        let path = Path::new("/no/such/essay.txt");
        assert_eq!(
            SubmissionKey::resolve(Some("ada"), Some("essay-1"), path),
            SubmissionKey::derive("ada", "essay-1")
        );
        assert_eq!(
            SubmissionKey::resolve(Some("ada"), None, path),
            SubmissionKey::for_path(path)
        );
    }

    #[test]
    fn test_parse_key() {
        assert!(SubmissionKey::parse("3f2a9c01d4e5b6a7").is_some());
        assert!(SubmissionKey::parse("").is_none());
        assert!(SubmissionKey::parse("../etc").is_none());
    }

    #[test]
    fn test_default_rubric() {
        let key = SubmissionKey::derive("a", "b");
        let s = Submission::new(key.clone(), "text", None);
        assert_eq!(s.rubric(), DEFAULT_RUBRIC);
        let s = Submission::new(key, "text", Some("   ".to_string()));
        assert_eq!(s.rubric(), DEFAULT_RUBRIC);
    }

    #[tokio::test]
    async fn test_reads_text_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("essay.txt");
        std::fs::write(&path, "  An essay about rivers.\n").unwrap();

        let extracted = FileExtractor::new().extract(&path).await.unwrap();
        assert_eq!(extracted.text, "An essay about rivers.");
        assert!(extracted.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = FileExtractor::new()
            .extract(Path::new("/definitely/not/here.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_whitespace_only_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blank.txt");
        std::fs::write(&path, " \n\t ").unwrap();

        let err = FileExtractor::new().extract(&path).await.unwrap_err();
        assert_eq!(err, ExtractionError::EmptyText);
    }

    #[tokio::test]
    async fn test_pdf_without_parser_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.pdf");
        std::fs::write(&path, b"%PDF-1.7").unwrap();

        let err = FileExtractor::new().extract(&path).await.unwrap_err();
        assert_eq!(err, ExtractionError::UnsupportedFormat("pdf".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced_with_warning() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("latin1.txt");
        std::fs::write(&path, b"caf\xe9 au lait").unwrap();

        let extracted = FileExtractor::new().extract(&path).await.unwrap();
        assert!(extracted.text.starts_with("caf"));
        assert_eq!(extracted.warnings.len(), 1);
    }

    struct FixedParser;

    #[async_trait]
    impl Extractor for FixedParser {
        async fn extract(&self, _path: &Path) -> Result<Extracted, ExtractionError> {
            Ok(Extracted::new("ocr text"))
        }
    }

    #[tokio::test]
    async fn test_registered_parser_is_used() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.PNG");
        std::fs::write(&path, [0u8, 1, 2]).unwrap();

        let extractor = FileExtractor::new().with_parser("png", Arc::new(FixedParser));
        let extracted = extractor.extract(&path).await.unwrap();
        assert_eq!(extracted.text, "ocr text");
    }
}
