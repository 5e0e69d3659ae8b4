//! Plagiarism check
//!
//! The text is split into word windows, each window is searched, and the best
//! match per window is scored with word-bigram Dice similarity. A window at or
//! above [`HIGH_SIMILARITY`] counts as a hit; the submission is flagged when hits
//! reach one sixth of the windows (at least one).

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use sdk::errors::AnalysisTaskError;
use sdk::tool::AnalysisTool;
use sdk::types::{AnalysisKind, AnalysisOutcome, Confidence};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::search::{SearchBackend, SearchHit};
use super::words;
use crate::config::AnalysisConfig;

/// Smallest window; the final window may be shorter when the text runs out
const MIN_CHUNK_WORDS: usize = 25;

/// Results requested per window
const RESULTS_PER_CHUNK: usize = 3;

/// Similarity at which a window counts as matched
pub const HIGH_SIMILARITY: f64 = 0.85;

/// Findings kept in the outcome details
const MAX_FINDINGS: usize = 5;

/// Chars of each window echoed into findings
const FINDING_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize)]
struct Finding {
    chunk: String,
    similarity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    best_match: Option<SearchHit>,
}

/// Web-search backed plagiarism check
pub struct PlagiarismChecker {
    backend: Option<Arc<dyn SearchBackend>>,
    chunk_words: usize,
    min_comparable_sources: usize,
    concurrency: usize,
    max_chunks: usize,
}

impl PlagiarismChecker {
    /// `backend` is `None` when no search endpoint is configured
    pub fn new(backend: Option<Arc<dyn SearchBackend>>, config: &AnalysisConfig) -> Self {
        Self {
            backend,
            chunk_words: config.chunk_words.max(MIN_CHUNK_WORDS),
            min_comparable_sources: config.min_comparable_sources,
            concurrency: config.search_concurrency.max(1),
            max_chunks: config.max_search_chunks.max(1),
        }
    }

    /// Split text into windows of `chunk_words` words
    fn chunk(&self, text: &str) -> Vec<String> {
        let words = words(text);
        let mut chunks = Vec::new();
        let mut i = 0;

        while i < words.len() {
            let size = self.chunk_words.min(MIN_CHUNK_WORDS.max(words.len() - i));
            let end = (i + size).min(words.len());
            chunks.push(words[i..end].join(" "));
            i += size;
        }

        chunks
    }

    /// Evenly spaced subset of `chunks`, at most `max_chunks` long
    fn sample(&self, chunks: Vec<String>) -> Vec<String> {
        let total = chunks.len();
        if total <= self.max_chunks {
            return chunks;
        }

        chunks
            .into_iter()
            .enumerate()
            // Index i is kept exactly when i * max / total steps up
            .filter(|(i, _)| (i * self.max_chunks) % total < self.max_chunks)
            .map(|(_, chunk)| chunk)
            .collect()
    }
}

/// Dice coefficient over lowercase word bigrams
///
/// Texts shorter than two words compare by exact word match.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a_words: Vec<String> = words(a).iter().map(|w| w.to_lowercase()).collect();
    let b_words: Vec<String> = words(b).iter().map(|w| w.to_lowercase()).collect();

    if a_words.is_empty() || b_words.is_empty() {
        return 0.0;
    }
    if a_words.len() < 2 || b_words.len() < 2 {
        return if a_words == b_words { 1.0 } else { 0.0 };
    }

    let mut a_bigrams: HashMap<(&str, &str), usize> = HashMap::new();
    for pair in a_words.windows(2) {
        *a_bigrams
            .entry((pair[0].as_str(), pair[1].as_str()))
            .or_insert(0) += 1;
    }

    let mut overlap = 0usize;
    for pair in b_words.windows(2) {
        if let Some(count) = a_bigrams.get_mut(&(pair[0].as_str(), pair[1].as_str())) {
            if *count > 0 {
                *count -= 1;
                overlap += 1;
            }
        }
    }

    let total = (a_words.len() - 1) + (b_words.len() - 1);
    (2 * overlap) as f64 / total as f64
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[async_trait]
impl AnalysisTool for PlagiarismChecker {
    fn kind(&self) -> AnalysisKind {
        AnalysisKind::Plagiarism
    }

    async fn analyze(&self, text: &str) -> Result<AnalysisOutcome, AnalysisTaskError> {
        let backend = self.backend.as_ref().ok_or_else(|| {
            AnalysisTaskError::Unavailable("no search endpoint configured".to_string())
        })?;

        let chunks = self.chunk(text);
        if chunks.is_empty() {
            return Ok(AnalysisOutcome::ok(
                AnalysisKind::Plagiarism,
                Confidence::Limited,
                false,
                json!({"chunks": 0}),
            )
            .with_note("no searchable text"));
        }

        let total_chunks = chunks.len();
        let chunks = self.sample(chunks);

        let mut findings: Vec<Finding> = Vec::with_capacity(chunks.len());
        let mut sources: HashSet<String> = HashSet::new();
        let mut failed_searches = 0usize;
        let mut last_error: Option<AnalysisTaskError> = None;

        let search_futures: Vec<_> = chunks
            .iter()
            .map(|chunk| async move { (chunk, backend.search(chunk, RESULTS_PER_CHUNK).await) })
            .collect();
        let mut searches = stream::iter(search_futures).buffer_unordered(self.concurrency);

        while let Some((chunk, result)) = searches.next().await {
            let hits = match result {
                Ok(hits) => hits,
                // Dropping the stream cancels the searches still in flight
                Err(e @ AnalysisTaskError::RateLimited { .. }) => return Err(e),
                Err(e) => {
                    tracing::debug!("Search failed for one chunk: {}", e);
                    failed_searches += 1;
                    last_error = Some(e);
                    continue;
                }
            };

            let mut best: Option<(f64, SearchHit)> = None;
            for hit in hits {
                if !hit.href.is_empty() {
                    sources.insert(hit.href.clone());
                }
                let score = similarity(chunk, &hit.comparable_text());
                if best.as_ref().map_or(true, |(s, _)| score > *s) {
                    best = Some((score, hit));
                }
            }

            let (score, best_match) = match best {
                Some((score, hit)) => (score, Some(hit)),
                None => (0.0, None),
            };

            findings.push(Finding {
                chunk: chunk.chars().take(FINDING_PREVIEW_CHARS).collect(),
                similarity: round3(score),
                best_match,
            });
        }

        if failed_searches == chunks.len() {
            return Err(last_error.unwrap_or_else(|| {
                AnalysisTaskError::Unavailable("every search failed".to_string())
            }));
        }

        let searched = findings.len();
        let avg_similarity =
            findings.iter().map(|f| f.similarity).sum::<f64>() / searched as f64;
        let high_similarity_chunks = findings
            .iter()
            .filter(|f| f.similarity >= HIGH_SIMILARITY)
            .count();
        let likely_plagiarized = high_similarity_chunks >= (searched / 6).max(1);

        let confidence = if sources.len() < self.min_comparable_sources || failed_searches > 0 {
            Confidence::Limited
        } else {
            Confidence::Moderate
        };

        findings.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        findings.truncate(MAX_FINDINGS);

        let details = json!({
            "chunks": total_chunks,
            "searched_chunks": searched,
            "comparable_sources": sources.len(),
            "avg_similarity": round3(avg_similarity),
            "high_similarity_chunks": high_similarity_chunks,
            "findings": findings,
        });

        let mut outcome =
            AnalysisOutcome::ok(AnalysisKind::Plagiarism, confidence, likely_plagiarized, details);
        if failed_searches > 0 {
            outcome = outcome.with_note(format!(
                "{} of {} searches failed",
                failed_searches,
                chunks.len()
            ));
        }

        Ok(outcome)
    }
}
