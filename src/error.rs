use std::{path::PathBuf, time::Duration};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("embedding failed: {reason}")]
    Embedding { reason: String, retryable: bool },

    #[error("index search failed: {reason}")]
    Index { reason: String, retryable: bool },

    #[error("query generation failed: {0}")]
    Generation(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("all {queries} query searches failed or came back empty")]
    AllQueriesFailed { queries: usize },

    #[error("merge failed: {0}")]
    Merge(String),

    #[error("rerank failed: {0}")]
    Rerank(String),

    #[error("search unavailable: {reason}")]
    SearchUnavailable { reason: String },
}

impl Error {
    /// Whether a failed embedding or index call is worth another attempt.
    ///
    /// Client-side rejections (4xx, dimension mismatches) will fail the same
    /// way again, and so will a response body that does not decode. Only
    /// transport failures, timeouts and server errors qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Embedding { retryable, .. }
            | Error::Index { retryable, .. } => *retryable,
            Error::Timeout { .. } => true,
            Error::Http(e) if e.is_decode() => false,
            Error::Http(e) => match e.status() {
                Some(status) => status.is_server_error(),
                None => true,
            },
            _ => false,
        }
    }
}
