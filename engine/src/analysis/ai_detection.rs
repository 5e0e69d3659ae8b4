//! AI-generated text heuristics
//!
//! Four signals each add one point to a 0..=4 score:
//!
//! | signal                      | fires when   |
//! |-----------------------------|--------------|
//! | word entropy (nats)         | `< 3.0`      |
//! | sentence length variance    | `< 30`       |
//! | trigrams seen 3+ times      | `>= 5`       |
//! | stopword ratio              | `> 0.55`     |
//!
//! The verdict fires at 3 points, or 2 in strict mode. Texts under
//! [`MIN_WORDS_FOR_EVIDENCE`] words report `limited` confidence.

use async_trait::async_trait;
use sdk::errors::AnalysisTaskError;
use sdk::tool::AnalysisTool;
use sdk::types::{AnalysisKind, AnalysisOutcome, Confidence};
use serde_json::json;
use std::collections::HashMap;

use super::words;

/// Below this many words the signals are too noisy for `moderate` confidence
pub const MIN_WORDS_FOR_EVIDENCE: usize = 50;

const ENTROPY_THRESHOLD: f64 = 3.0;
const SENTENCE_VARIANCE_THRESHOLD: f64 = 30.0;
const REPEATED_TRIGRAM_THRESHOLD: usize = 5;
const STOPWORD_RATIO_THRESHOLD: f64 = 0.55;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "on", "in", "at", "by", "for", "with", "to",
    "from", "of", "as", "is", "are", "was", "were", "be", "been", "being",
];

/// Raw signal values for one text
#[derive(Debug, Clone, PartialEq)]
pub struct Signals {
    pub word_count: usize,
    pub entropy: f64,
    pub avg_sentence_len: f64,
    pub var_sentence_len: f64,
    pub repetitive_trigrams: usize,
    pub stopword_ratio: f64,
}

impl Signals {
    pub fn measure(text: &str) -> Self {
        let lower = text.to_lowercase();
        let words = words(&lower);

        let lengths: Vec<usize> = text
            .trim()
            .split(['.', '!', '?'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| super::words(s).len())
            .collect();

        let (avg_sentence_len, var_sentence_len) = if lengths.is_empty() {
            (0.0, 0.0)
        } else {
            let n = lengths.len() as f64;
            let avg = lengths.iter().sum::<usize>() as f64 / n;
            let var = lengths
                .iter()
                .map(|&l| (l as f64 - avg).powi(2))
                .sum::<f64>()
                / n;
            (avg, var)
        };

        let mut trigram_counts: HashMap<(&str, &str, &str), usize> = HashMap::new();
        for w in words.windows(3) {
            *trigram_counts.entry((w[0], w[1], w[2])).or_insert(0) += 1;
        }
        let repetitive_trigrams = trigram_counts.values().filter(|&&c| c >= 3).count();

        let stopwords = words.iter().filter(|w| STOPWORDS.contains(*w)).count();
        let stopword_ratio = stopwords as f64 / words.len().max(1) as f64;

        Self {
            word_count: words.len(),
            entropy: entropy(&words),
            avg_sentence_len,
            var_sentence_len,
            repetitive_trigrams,
            stopword_ratio,
        }
    }

    /// Number of signals that fired, 0..=4
    pub fn score(&self) -> u8 {
        [
            self.entropy < ENTROPY_THRESHOLD,
            self.var_sentence_len < SENTENCE_VARIANCE_THRESHOLD,
            self.repetitive_trigrams >= REPEATED_TRIGRAM_THRESHOLD,
            self.stopword_ratio > STOPWORD_RATIO_THRESHOLD,
        ]
        .iter()
        .filter(|&&fired| fired)
        .count() as u8
    }
}

/// Shannon entropy of the word distribution, in nats
fn entropy(words: &[&str]) -> f64 {
    if words.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for w in words {
        *counts.entry(*w).or_insert(0) += 1;
    }

    let total = words.len() as f64;
    -counts
        .values()
        .map(|&c| {
            let p = c as f64 / total;
            p * p.ln()
        })
        .sum::<f64>()
}

fn risk(score: u8) -> &'static str {
    match score {
        0 | 1 => "low",
        2 => "moderate",
        _ => "high",
    }
}

fn round(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Heuristic AI-text detector
pub struct AiTextDetector {
    strict: bool,
}

impl AiTextDetector {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    fn threshold(&self) -> u8 {
        if self.strict {
            2
        } else {
            3
        }
    }
}

#[async_trait]
impl AnalysisTool for AiTextDetector {
    fn kind(&self) -> AnalysisKind {
        AnalysisKind::AiDetection
    }

    async fn analyze(&self, text: &str) -> Result<AnalysisOutcome, AnalysisTaskError> {
        let signals = Signals::measure(text);
        let score = signals.score();

        let confidence = if signals.word_count < MIN_WORDS_FOR_EVIDENCE {
            Confidence::Limited
        } else {
            Confidence::Moderate
        };

        let details = json!({
            "word_count": signals.word_count,
            "entropy": round(signals.entropy, 3),
            "avg_sentence_len": round(signals.avg_sentence_len, 2),
            "var_sentence_len": round(signals.var_sentence_len, 2),
            "repetitive_trigrams": signals.repetitive_trigrams,
            "stopword_ratio": round(signals.stopword_ratio, 3),
            "score": score,
            "risk": risk(score),
            "strict": self.strict,
        });

        Ok(AnalysisOutcome::ok(
            AnalysisKind::AiDetection,
            confidence,
            score >= self.threshold(),
            details,
        ))
    }
}
