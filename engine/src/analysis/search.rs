//! Web search backend for the plagiarism check
//!
//! The HTTP backend expects a JSON endpoint answering
//! `GET <endpoint>?q=<query>&max_results=<n>` with
//! `{"results": [{"title": ..., "body": ..., "href": ...}]}`.

use async_trait::async_trait;
use reqwest::StatusCode;
use sdk::errors::AnalysisTaskError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One search result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub href: String,
}

impl SearchHit {
    /// Text compared against a submission chunk
    pub fn comparable_text(&self) -> String {
        format!("{} {}", self.body, self.title)
    }
}

/// Source of comparable documents
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str, max_results: usize)
        -> Result<Vec<SearchHit>, AnalysisTaskError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// JSON-over-HTTP search backend
pub struct HttpSearchBackend {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpSearchBackend {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, AnalysisTaskError> {
        let max_results = max_results.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("max_results", max_results.as_str())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisTaskError::Unavailable("search request timed out".to_string())
                } else {
                    AnalysisTaskError::Unavailable(format!("search request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            return Err(AnalysisTaskError::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            return Err(AnalysisTaskError::Unavailable(format!(
                "search endpoint returned {}",
                status
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| AnalysisTaskError::Failed(format!("invalid search response: {}", e)))?;

        Ok(body.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_defaults() {
        let hit: SearchHit = serde_json::from_str(r#"{"href": "https://a.example"}"#).unwrap();
        assert_eq!(hit.title, "");
        assert_eq!(hit.comparable_text(), " ");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let backend = HttpSearchBackend::new("http://127.0.0.1:9/search");
        let err = backend.search("query", 3).await.unwrap_err();
        assert!(matches!(err, AnalysisTaskError::Unavailable(_)));
    }
}
