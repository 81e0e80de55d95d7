//! Multi-query retrieval: generate queries, search them concurrently, merge,
//! rerank, and fall back to a plain single-query search when any of that
//! cannot complete.

use std::sync::Arc;

use serde::Serialize;
use tokio::{task::JoinSet, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    candidate::{self, RankedResult, RawCandidate},
    config::{
        API_KEY_ENV_VAR,
        PipelineConfig,
        PipelineOverrides,
        QDRANT_API_KEY_ENV_VAR,
        Settings,
        secret_from_env,
    },
    error::{Error, Result},
    merger,
    openai::{ChatCompletions, OpenAiEmbedder},
    qdrant::QdrantIndex,
    query_gen::{QueryGenerationBackend, QueryGenerator},
    reranker::{IdentityReranker, Reranker},
    searcher::{
        CandidateSearcher,
        Embedder,
        RetryPolicy,
        SearchOutcome,
        VectorIndex,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    GeneratingQueries,
    Searching,
    Merging,
    Reranking,
    FallbackBasicSearch,
    Done,
}

fn enter(stage: Stage) {
    debug!(?stage, "pipeline stage");
}

/// Which route produced a result list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetrievalPath {
    /// Several generated queries were searched and merged.
    MultiQuery {
        queries: Vec<String>,
        failed_queries: Vec<String>,
    },
    /// Only one query ran, either by configuration or because generation
    /// degraded to the original question.
    SingleQuery {
        query: String,
        degraded: Option<String>,
    },
    /// The multi-query pipeline was switched off for this request.
    Basic,
    /// The pipeline failed and the original question was searched directly.
    Fallback { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutput {
    pub path: RetrievalPath,
    pub results: Vec<RankedResult>,
}

/// Orchestrates one retrieval request end to end.
pub struct Pipeline {
    backend: Arc<dyn QueryGenerationBackend>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    reranker: Arc<dyn Reranker>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        backend: Arc<dyn QueryGenerationBackend>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            backend,
            embedder,
            index,
            reranker: Arc::new(IdentityReranker),
            config,
        }
    }

    /// Wire the HTTP collaborators described by `settings`. API keys are
    /// read from the environment.
    pub fn from_settings(settings: &Settings) -> Self {
        let http = reqwest::Client::new();
        let api_key = secret_from_env(API_KEY_ENV_VAR);

        let backend = ChatCompletions::new(
            http.clone(),
            &settings.llm_base_url,
            api_key.clone(),
            &settings.generation_model,
        );
        let embedder = OpenAiEmbedder::new(
            http.clone(),
            &settings.embedding_url,
            api_key,
            &settings.embedding_model,
            settings.embedding_dimension,
        );
        let index = QdrantIndex::new(
            http,
            &settings.qdrant_url,
            &settings.collection,
            secret_from_env(QDRANT_API_KEY_ENV_VAR),
            &settings.id_field,
        );

        Self::new(
            Arc::new(backend),
            Arc::new(embedder),
            Arc::new(index),
            settings.pipeline.clone(),
        )
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Answer `question` using the configured defaults adjusted by
    /// `overrides`.
    pub async fn run(
        &self,
        question: &str,
        overrides: &PipelineOverrides,
    ) -> Result<PipelineOutput> {
        let config = self.config.with_overrides(overrides);
        self.run_with(question, &config).await
    }

    /// Answer `question` with an explicit configuration.
    ///
    /// Only returns an error ([`Error::SearchUnavailable`]) when the plain
    /// single-query search fails as well.
    pub async fn run_with(
        &self,
        question: &str,
        config: &PipelineConfig,
    ) -> Result<PipelineOutput> {
        if let Err(e) = config.validate() {
            return self.fallback(question, config, e.to_string()).await;
        }

        if !config.multi_query {
            info!("multi-query retrieval disabled, searching the question");
            let results = self
                .basic_search(question, config)
                .await
                .map_err(|e| Error::SearchUnavailable {
                    reason: e.to_string(),
                })?;
            enter(Stage::Done);
            return Ok(PipelineOutput {
                path: RetrievalPath::Basic,
                results,
            });
        }

        match self.multi_query(question, config).await {
            Ok(output) => {
                enter(Stage::Done);
                Ok(output)
            }
            Err(e) => self.fallback(question, config, e.to_string()).await,
        }
    }

    async fn multi_query(
        &self,
        question: &str,
        config: &PipelineConfig,
    ) -> Result<PipelineOutput> {
        enter(Stage::GeneratingQueries);
        let generator = QueryGenerator::new(
            self.backend.clone(),
            config.generation_timeout,
        );
        let plan = generator.generate(question, config.num_queries).await;

        enter(Stage::Searching);
        let searcher = self.searcher(config);
        let outcomes = fan_out(&searcher, &plan.queries, config).await;

        let failed_queries: Vec<String> = plan
            .queries
            .iter()
            .zip(&outcomes)
            .filter(|(_, outcome)| outcome.is_failed())
            .map(|(query, _)| query.clone())
            .collect();
        if outcomes.iter().all(|o| o.candidates().is_empty()) {
            return Err(Error::AllQueriesFailed {
                queries: outcomes.len(),
            });
        }
        if !failed_queries.is_empty() {
            warn!(
                failed = failed_queries.len(),
                total = outcomes.len(),
                "continuing with partial search results"
            );
        }

        enter(Stage::Merging);
        let lists: Vec<Vec<RawCandidate>> = outcomes
            .into_iter()
            .map(SearchOutcome::into_candidates)
            .collect();
        let merged = merger::merge(lists)?;

        enter(Stage::Reranking);
        let mut reranked = self
            .reranker
            .rerank(merged, question, config.final_top_k)
            .await?;
        reranked.truncate(config.final_top_k);

        let path = match plan.queries.as_slice() {
            [query] => RetrievalPath::SingleQuery {
                query: query.clone(),
                degraded: plan.degraded,
            },
            _ => RetrievalPath::MultiQuery {
                queries: plan.queries,
                failed_queries,
            },
        };

        Ok(PipelineOutput {
            path,
            results: candidate::rank(reranked),
        })
    }

    async fn fallback(
        &self,
        question: &str,
        config: &PipelineConfig,
        reason: String,
    ) -> Result<PipelineOutput> {
        enter(Stage::FallbackBasicSearch);
        warn!(%reason, "multi-query retrieval failed, searching the question");

        let results =
            self.basic_search(question, config).await.map_err(|e| {
                Error::SearchUnavailable {
                    reason: format!("{reason}; fallback search failed: {e}"),
                }
            })?;

        enter(Stage::Done);
        Ok(PipelineOutput {
            path: RetrievalPath::Fallback { reason },
            results,
        })
    }

    /// Embed-and-search the unmodified question, bypassing merge and rerank.
    async fn basic_search(
        &self,
        question: &str,
        config: &PipelineConfig,
    ) -> Result<Vec<RankedResult>> {
        let hits = self
            .searcher(config)
            .try_search(question, config.final_top_k)
            .await?;

        Ok(hits
            .into_iter()
            .enumerate()
            .map(|(i, hit)| RankedResult {
                rank: i + 1,
                case_id: hit.case_id,
                weighted_score: hit.score,
                frequency: 1,
                payload: hit.payload,
            })
            .collect())
    }

    fn searcher(&self, config: &PipelineConfig) -> CandidateSearcher {
        CandidateSearcher::new(
            self.embedder.clone(),
            self.index.clone(),
            RetryPolicy::from(config),
        )
        .with_min_score(config.min_score)
    }
}

/// Search every query concurrently and wait for all of them.
///
/// Outcomes come back in query order regardless of completion order. When
/// the configured deadline passes, outstanding searches are cancelled and
/// count as failed.
async fn fan_out(
    searcher: &CandidateSearcher,
    queries: &[String],
    config: &PipelineConfig,
) -> Vec<SearchOutcome> {
    let limit = config.results_per_query;
    let mut outcomes: Vec<Option<SearchOutcome>> = vec![None; queries.len()];
    let mut tasks = JoinSet::new();

    for (i, query) in queries.iter().enumerate() {
        let searcher = searcher.clone();
        let query = query.clone();
        tasks.spawn(async move { (i, searcher.search(&query, limit).await) });
    }

    let deadline = config.deadline.map(|d| Instant::now() + d);
    loop {
        let next = match deadline {
            Some(at) => {
                match tokio::time::timeout_at(at, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            pending = tasks.len(),
                            "deadline reached, cancelling pending searches"
                        );
                        tasks.abort_all();
                        break;
                    }
                }
            }
            None => tasks.join_next().await,
        };

        match next {
            Some(Ok((i, outcome))) => outcomes[i] = Some(outcome),
            Some(Err(e)) => warn!(error = %e, "search task did not complete"),
            None => break,
        }
    }

    outcomes
        .into_iter()
        .map(|o| {
            o.unwrap_or_else(|| {
                SearchOutcome::Failed("search did not complete".to_string())
            })
        })
        .collect()
}
