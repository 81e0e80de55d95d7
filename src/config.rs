use std::time::Duration;

use crate::{
    config_db::ConfigDb,
    error::{Error, Result},
};

pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6333";
pub const DEFAULT_COLLECTION: &str = "czech_court_decisions_rag";
pub const DEFAULT_LLM_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_EMBEDDING_URL: &str = "http://localhost:8080/v1";
pub const DEFAULT_GENERATION_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_EMBEDDING_MODEL: &str =
    "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2";
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;
pub const DEFAULT_ID_FIELD: &str = "case_number";

pub const API_KEY_ENV_VAR: &str = "PRECEDENT_API_KEY";
pub const QDRANT_API_KEY_ENV_VAR: &str = "PRECEDENT_QDRANT_API_KEY";

/// Knobs of one multi-query retrieval run.
///
/// Passed by value into the pipeline; per-request tweaks go through
/// [`PipelineOverrides`] rather than mutating shared state.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub num_queries: usize,
    pub results_per_query: usize,
    pub final_top_k: usize,
    pub multi_query: bool,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub attempt_timeout: Duration,
    pub generation_timeout: Duration,
    pub deadline: Option<Duration>,
    /// Hits scoring below this are dropped per query. Off by default:
    /// cosine scores may be negative and still rank.
    pub min_score: Option<f32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_queries: 3,
            results_per_query: 10,
            final_top_k: 5,
            multi_query: true,
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(30),
            generation_timeout: Duration::from_secs(30),
            deadline: None,
            min_score: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_queries == 0 {
            return Err(Error::Config(
                "num_queries must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.min_score.is_some_and(|s| !s.is_finite()) {
            return Err(Error::Config("min_score must be finite".to_string()));
        }
        Ok(())
    }

    pub fn with_overrides(&self, overrides: &PipelineOverrides) -> Self {
        Self {
            num_queries: overrides.num_queries.unwrap_or(self.num_queries),
            results_per_query: overrides
                .results_per_query
                .unwrap_or(self.results_per_query),
            final_top_k: overrides.final_top_k.unwrap_or(self.final_top_k),
            multi_query: overrides.multi_query.unwrap_or(self.multi_query),
            ..self.clone()
        }
    }
}

/// Per-request adjustments layered over the configured defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOverrides {
    pub num_queries: Option<usize>,
    pub results_per_query: Option<usize>,
    pub final_top_k: Option<usize>,
    pub multi_query: Option<bool>,
}

/// Every key accepted by `precedent config set`.
pub const SETTING_KEYS: &[&str] = &[
    "num_queries",
    "results_per_query",
    "final_top_k",
    "multi_query",
    "max_attempts",
    "deadline_ms",
    "min_score",
    "qdrant_url",
    "collection",
    "id_field",
    "llm_base_url",
    "generation_model",
    "embedding_url",
    "embedding_model",
    "embedding_dimension",
];

/// Resolved settings: pipeline knobs plus collaborator endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub pipeline: PipelineConfig,
    pub qdrant_url: String,
    pub collection: String,
    pub id_field: String,
    pub llm_base_url: String,
    pub generation_model: String,
    pub embedding_url: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            qdrant_url: DEFAULT_QDRANT_URL.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            id_field: DEFAULT_ID_FIELD.to_string(),
            llm_base_url: DEFAULT_LLM_BASE_URL.to_string(),
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            embedding_url: DEFAULT_EMBEDDING_URL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

impl Settings {
    /// Defaults overlaid with whatever is persisted in config.db.
    pub fn load(config_db: &ConfigDb) -> Result<Self> {
        let mut settings = Self::default();
        for (key, value) in config_db.list_settings()? {
            settings.apply(&key, &value)?;
        }
        settings.pipeline.validate()?;
        Ok(settings)
    }

    /// Parse and apply one `key = value` pair.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "num_queries" => self.pipeline.num_queries = parse(key, value)?,
            "results_per_query" => {
                self.pipeline.results_per_query = parse(key, value)?
            }
            "final_top_k" => self.pipeline.final_top_k = parse(key, value)?,
            "multi_query" => self.pipeline.multi_query = parse(key, value)?,
            "max_attempts" => self.pipeline.max_attempts = parse(key, value)?,
            "deadline_ms" => {
                let ms: u64 = parse(key, value)?;
                self.pipeline.deadline =
                    (ms > 0).then(|| Duration::from_millis(ms));
            }
            "min_score" => {
                self.pipeline.min_score = match value {
                    "" | "none" => None,
                    _ => Some(parse(key, value)?),
                }
            }
            "qdrant_url" => self.qdrant_url = value.to_string(),
            "collection" => self.collection = value.to_string(),
            "id_field" => self.id_field = value.to_string(),
            "llm_base_url" => self.llm_base_url = value.to_string(),
            "generation_model" => self.generation_model = value.to_string(),
            "embedding_url" => self.embedding_url = value.to_string(),
            "embedding_model" => self.embedding_model = value.to_string(),
            "embedding_dimension" => {
                self.embedding_dimension = parse(key, value)?
            }
            _ => {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key.to_string(),
                });
            }
        }
        Ok(())
    }

    /// All settings as displayable `(key, value)` pairs, in key order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        let p = &self.pipeline;
        let deadline_ms = p.deadline.map_or(0, |d| d.as_millis());
        vec![
            ("num_queries", p.num_queries.to_string()),
            ("results_per_query", p.results_per_query.to_string()),
            ("final_top_k", p.final_top_k.to_string()),
            ("multi_query", p.multi_query.to_string()),
            ("max_attempts", p.max_attempts.to_string()),
            ("deadline_ms", deadline_ms.to_string()),
            (
                "min_score",
                p.min_score.map_or("none".to_string(), |s| s.to_string()),
            ),
            ("qdrant_url", self.qdrant_url.clone()),
            ("collection", self.collection.clone()),
            ("id_field", self.id_field.clone()),
            ("llm_base_url", self.llm_base_url.clone()),
            ("generation_model", self.generation_model.clone()),
            ("embedding_url", self.embedding_url.clone()),
            ("embedding_model", self.embedding_model.clone()),
            ("embedding_dimension", self.embedding_dimension.to_string()),
        ]
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::Config(format!("invalid value for {key}: {e}")))
}

/// Read an optional secret from the environment, treating empty as unset.
pub fn secret_from_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}
