//! precedent - multi-query retrieval of court decisions from a vector index.
//!
//! A legal question is rephrased into several search queries by a language
//! model. Each query is embedded and searched in a
//! [Qdrant](https://qdrant.tech) collection, and the per-query hits are
//! merged so that decisions found by several phrasings rank above those
//! found by only one. Whenever generation, merging, or reranking cannot
//! complete, the question itself is searched directly instead.
//!
//! # Quick start
//!
//! ```no_run
//! use precedent::{ConfigDb, DataDir, Pipeline, Settings};
//! use precedent::config::PipelineOverrides;
//!
//! # async fn run() -> precedent::Result<()> {
//! let data_dir = DataDir::resolve(None)?;
//! let config_db = ConfigDb::open(&data_dir.config_db())?;
//! let settings = Settings::load(&config_db)?;
//!
//! let pipeline = Pipeline::from_settings(&settings);
//! let question = "Je platná výpověď doručená během dovolené?";
//! let output = pipeline.run(question, &PipelineOverrides::default()).await?;
//! for r in &output.results {
//!     println!("{} {} (score: {:.3})", r.rank, r.case_id, r.weighted_score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod candidate;
pub mod config;
pub mod config_db;
pub mod data_dir;
pub mod error;
pub mod mcp;
pub mod merger;
pub mod openai;
pub mod pipeline;
pub mod qdrant;
pub mod query_gen;
pub mod reranker;
pub mod search;
pub mod searcher;

#[cfg(test)]
mod test_support;

pub use candidate::{CaseSummary, MergedCandidate, RankedResult, RawCandidate};
pub use config::{PipelineConfig, Settings};
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelineOutput, RetrievalPath};
