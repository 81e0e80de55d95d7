use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    candidate::RawCandidate,
    config::PipelineConfig,
    error::{Error, Result},
};

/// Turns text into a vector in the same space the index was built with.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Length of every vector returned by [`Embedder::embed`].
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Nearest-neighbour search over stored case vectors.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return up to `limit` hits, most similar first, payloads included.
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RawCandidate>>;
}

/// Result of searching one query. A failure never escapes as an error so
/// that sibling searches are unaffected.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Found(Vec<RawCandidate>),
    Failed(String),
}

impl SearchOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, SearchOutcome::Failed(_))
    }

    pub fn candidates(&self) -> &[RawCandidate] {
        match self {
            SearchOutcome::Found(c) => c,
            SearchOutcome::Failed(_) => &[],
        }
    }

    pub fn into_candidates(self) -> Vec<RawCandidate> {
        match self {
            SearchOutcome::Found(c) => c,
            SearchOutcome::Failed(_) => Vec::new(),
        }
    }
}

/// Attempt budget for network-bound calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub attempt_timeout: Duration,
}

impl From<&PipelineConfig> for RetryPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff,
            attempt_timeout: config.attempt_timeout,
        }
    }
}

/// Embeds one query and fetches its nearest candidates.
#[derive(Clone)]
pub struct CandidateSearcher {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    retry: RetryPolicy,
    min_score: Option<f32>,
}

impl CandidateSearcher {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            embedder,
            index,
            retry,
            min_score: None,
        }
    }

    /// Drop hits scoring below `min_score`, when set.
    pub fn with_min_score(mut self, min_score: Option<f32>) -> Self {
        self.min_score = min_score;
        self
    }

    /// Search `query`, converting any failure into [`SearchOutcome::Failed`].
    pub async fn search(&self, query: &str, limit: usize) -> SearchOutcome {
        match self.try_search(query, limit).await {
            Ok(candidates) => {
                debug!(query, hits = candidates.len(), "query searched");
                SearchOutcome::Found(candidates)
            }
            Err(e) => {
                warn!(query, error = %e, "query search failed");
                SearchOutcome::Failed(e.to_string())
            }
        }
    }

    /// Search `query`, surfacing the last error once retries are exhausted.
    pub async fn try_search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RawCandidate>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let embedder = self.embedder.as_ref();
        let vector = self
            .with_retry("embedding", move || embedder.embed(query))
            .await?;

        let expected = embedder.dimension();
        if vector.len() != expected {
            return Err(Error::Embedding {
                reason: format!(
                    "expected a {expected}-dimensional vector, got {}",
                    vector.len()
                ),
                retryable: false,
            });
        }

        let index = self.index.as_ref();
        let vector = vector.as_slice();
        let mut candidates = self
            .with_retry("index search", move || index.search(vector, limit))
            .await?;

        // NaN scores are kept here; the merger rejects them.
        if let Some(min_score) = self.min_score {
            candidates.retain(|c| !(c.score < min_score));
        }
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(limit);

        Ok(candidates)
    }

    /// Run `call` until it succeeds, fails permanently, or the attempt
    /// budget runs out. Both the backoff and the per-attempt timeout double
    /// after every failure.
    async fn with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.retry.initial_backoff;
        let mut timeout = self.retry.attempt_timeout;
        let mut attempt = 1;

        loop {
            let result = match tokio::time::timeout(timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    operation,
                    after: timeout,
                }),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e)
                    if attempt < self.retry.max_attempts
                        && e.is_retryable() =>
                {
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        "call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    timeout = timeout.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Script, ScriptedCorpus, fast_retry};

    fn searcher(corpus: &Arc<ScriptedCorpus>) -> CandidateSearcher {
        CandidateSearcher::new(corpus.clone(), corpus.clone(), fast_retry())
    }

    #[tokio::test]
    async fn returns_hits_sorted_by_score() {
        let corpus = ScriptedCorpus::new().with(
            "q",
            Script::hits(&[("B", 0.5), ("A", 0.9), ("C", 0.7)]),
        );

        let outcome = searcher(&corpus).search("q", 10).await;
        let ids: Vec<&str> = outcome
            .candidates()
            .iter()
            .map(|c| c.case_id.as_str())
            .collect();
        assert_eq!(ids, vec!["A", "C", "B"]);
    }

    #[tokio::test]
    async fn respects_limit() {
        let corpus = ScriptedCorpus::new().with(
            "q",
            Script::hits(&[("A", 0.9), ("B", 0.8), ("C", 0.7)]),
        );

        let outcome = searcher(&corpus).search("q", 2).await;
        assert_eq!(outcome.candidates().len(), 2);
    }

    #[tokio::test]
    async fn zero_limit_skips_collaborators() {
        let corpus =
            ScriptedCorpus::new().with("q", Script::hits(&[("A", 0.9)]));

        let outcome = searcher(&corpus).search("q", 0).await;
        assert_eq!(outcome, SearchOutcome::Found(vec![]));
        assert_eq!(corpus.embed_calls(), 0);
        assert_eq!(corpus.search_calls("q"), 0);
    }

    #[tokio::test]
    async fn retries_transient_index_failures() {
        let corpus = ScriptedCorpus::new()
            .with("q", Script::hits(&[("A", 0.9)]).failing_first(2));

        let outcome = searcher(&corpus).search("q", 10).await;
        assert_eq!(outcome.candidates().len(), 1);
        assert_eq!(corpus.search_calls("q"), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let corpus = ScriptedCorpus::new().with("q", Script::Unavailable);

        let outcome = searcher(&corpus).search("q", 10).await;
        assert!(outcome.is_failed());
        assert!(outcome.candidates().is_empty());
        assert_eq!(corpus.search_calls("q"), fast_retry().max_attempts as usize);
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let corpus = ScriptedCorpus::new().with("q", Script::Rejected);

        let outcome = searcher(&corpus).search("q", 10).await;
        assert!(outcome.is_failed());
        assert_eq!(corpus.search_calls("q"), 1);
    }

    #[tokio::test]
    async fn slow_attempts_time_out_and_retry() {
        let corpus = ScriptedCorpus::new().with(
            "q",
            Script::hits(&[("A", 0.9)]).slow_first(1, Duration::from_secs(5)),
        );

        let outcome = searcher(&corpus).search("q", 10).await;
        assert_eq!(outcome.candidates().len(), 1);
        assert_eq!(corpus.search_calls("q"), 2);
    }

    #[tokio::test]
    async fn unknown_query_fails_at_embedding() {
        let corpus = ScriptedCorpus::new();

        let err = searcher(&corpus).try_search("nope", 10).await.unwrap_err();
        assert!(matches!(err, Error::Embedding { .. }));
    }

    #[tokio::test]
    async fn dimension_mismatch_is_permanent() {
        let corpus = ScriptedCorpus::new()
            .with("q", Script::hits(&[("A", 0.9)]))
            .with_dimension(3);

        let err = searcher(&corpus).try_search("q", 10).await.unwrap_err();
        assert!(matches!(err, Error::Embedding { retryable: false, .. }));
        assert_eq!(corpus.search_calls("q"), 0);
    }

    #[tokio::test]
    async fn min_score_filters_weak_hits() {
        let corpus = ScriptedCorpus::new()
            .with("q", Script::hits(&[("A", 0.9), ("B", 0.2)]));

        let outcome = searcher(&corpus)
            .with_min_score(Some(0.3))
            .search("q", 10)
            .await;
        let ids: Vec<&str> = outcome
            .candidates()
            .iter()
            .map(|c| c.case_id.as_str())
            .collect();
        assert_eq!(ids, vec!["A"]);
    }

    #[tokio::test]
    async fn negative_scores_are_kept_without_threshold() {
        let corpus = ScriptedCorpus::new().with(
            "q",
            Script::hits(&[("A", 0.3), ("B", -0.05), ("C", -0.2)]),
        );

        let outcome = searcher(&corpus).search("q", 10).await;
        let ids: Vec<&str> = outcome
            .candidates()
            .iter()
            .map(|c| c.case_id.as_str())
            .collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }
}
