use async_trait::async_trait;

use crate::{candidate::MergedCandidate, error::Result};

/// Final ordering stage applied after merging.
///
/// Implementations receive the merger's ranked list together with the
/// original question and return at most `top_k` candidates. An error sends
/// the whole request down the single-query fallback path.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        candidates: Vec<MergedCandidate>,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<MergedCandidate>>;
}

/// Keeps the merger's own order and truncates to `top_k`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityReranker;

#[async_trait]
impl Reranker for IdentityReranker {
    async fn rerank(
        &self,
        mut candidates: Vec<MergedCandidate>,
        _question: &str,
        top_k: usize,
    ) -> Result<Vec<MergedCandidate>> {
        candidates.truncate(top_k);
        Ok(candidates)
    }
}
