//! Scripted in-memory collaborators for unit tests.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;

use crate::{
    candidate::RawCandidate,
    config::PipelineConfig,
    error::{Error, Result},
    query_gen::QueryGenerationBackend,
    searcher::{Embedder, RetryPolicy, VectorIndex},
};

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        attempt_timeout: Duration::from_millis(50),
    }
}

pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        initial_backoff: Duration::from_millis(1),
        attempt_timeout: Duration::from_millis(50),
        generation_timeout: Duration::from_millis(50),
        ..Default::default()
    }
}

/// How the index answers one query.
#[derive(Debug, Clone)]
pub enum Script {
    Hits {
        hits: Vec<RawCandidate>,
        fail_first: usize,
        slow_first: usize,
        delay: Duration,
    },
    /// Always fails with a retryable error.
    Unavailable,
    /// Always fails with a permanent error.
    Rejected,
}

impl Script {
    pub fn hits(pairs: &[(&str, f32)]) -> Self {
        let hits = pairs
            .iter()
            .map(|(id, score)| {
                let payload = json!({ "case_number": id, "court": "test" });
                RawCandidate::new(*id, *score)
                    .with_payload(payload.as_object().unwrap().clone())
            })
            .collect();
        Script::Hits {
            hits,
            fail_first: 0,
            slow_first: 0,
            delay: Duration::ZERO,
        }
    }

    pub fn failing_first(self, n: usize) -> Self {
        match self {
            Script::Hits {
                hits,
                slow_first,
                delay,
                ..
            } => Script::Hits {
                hits,
                fail_first: n,
                slow_first,
                delay,
            },
            other => other,
        }
    }

    pub fn slow_first(self, n: usize, delay: Duration) -> Self {
        match self {
            Script::Hits {
                hits, fail_first, ..
            } => Script::Hits {
                hits,
                fail_first,
                slow_first: n,
                delay,
            },
            other => other,
        }
    }
}

/// Embedder and index in one: each known query embeds to a vector that
/// encodes its position, and the index answers from that query's script.
pub struct ScriptedCorpus {
    scripts: Mutex<Vec<(String, Script)>>,
    dimension: AtomicUsize,
    embed_calls: AtomicUsize,
    search_calls: Mutex<HashMap<usize, usize>>,
}

impl ScriptedCorpus {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(Vec::new()),
            dimension: AtomicUsize::new(2),
            embed_calls: AtomicUsize::new(0),
            search_calls: Mutex::new(HashMap::new()),
        })
    }

    pub fn with(self: Arc<Self>, query: &str, script: Script) -> Arc<Self> {
        self.scripts
            .lock()
            .unwrap()
            .push((query.to_string(), script));
        self
    }

    /// Report a dimension that differs from the vectors actually produced.
    pub fn with_dimension(self: Arc<Self>, dimension: usize) -> Arc<Self> {
        self.dimension.store(dimension, Ordering::SeqCst);
        self
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self, query: &str) -> usize {
        let Some(pos) = self.position(query) else {
            return 0;
        };
        *self.search_calls.lock().unwrap().get(&pos).unwrap_or(&0)
    }

    fn position(&self, query: &str) -> Option<usize> {
        self.scripts
            .lock()
            .unwrap()
            .iter()
            .position(|(q, _)| q == query)
    }
}

#[async_trait]
impl Embedder for ScriptedCorpus {
    fn dimension(&self) -> usize {
        self.dimension.load(Ordering::SeqCst)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        match self.position(text) {
            Some(pos) => Ok(vec![pos as f32, 1.0]),
            None => Err(Error::Embedding {
                reason: format!("no script for {text:?}"),
                retryable: false,
            }),
        }
    }
}

#[async_trait]
impl VectorIndex for ScriptedCorpus {
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RawCandidate>> {
        let pos = vector[0] as usize;
        let attempt = {
            let mut calls = self.search_calls.lock().unwrap();
            let count = calls.entry(pos).or_insert(0);
            *count += 1;
            *count
        };
        let script = self.scripts.lock().unwrap()[pos].1.clone();

        match script {
            Script::Hits {
                mut hits,
                fail_first,
                slow_first,
                delay,
            } => {
                if attempt <= fail_first {
                    return Err(Error::Index {
                        reason: "503 Service Unavailable".to_string(),
                        retryable: true,
                    });
                }
                if attempt <= slow_first {
                    tokio::time::sleep(delay).await;
                }
                hits.truncate(limit);
                Ok(hits)
            }
            Script::Unavailable => Err(Error::Index {
                reason: "connection refused".to_string(),
                retryable: true,
            }),
            Script::Rejected => Err(Error::Index {
                reason: "400 Bad Request".to_string(),
                retryable: false,
            }),
        }
    }
}

/// Query-generation backend with a canned reply.
pub enum ScriptedBackend {
    Reply(String),
    Fail,
    Hang,
}

impl ScriptedBackend {
    pub fn replying(text: &str) -> Arc<Self> {
        Arc::new(ScriptedBackend::Reply(text.to_string()))
    }
}

#[async_trait]
impl QueryGenerationBackend for ScriptedBackend {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        match self {
            ScriptedBackend::Reply(text) => Ok(text.clone()),
            ScriptedBackend::Fail => {
                Err(Error::Generation("model unavailable".to_string()))
            }
            ScriptedBackend::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(String::new())
            }
        }
    }
}

/// Answer exactly one HTTP request on a loopback port with `status` and a
/// JSON `body`. The handle resolves to the raw request text.
pub async fn serve_once(
    status: u16,
    body: &str,
) -> (String, tokio::task::JoinHandle<String>) {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = body.to_string();

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if request_complete(&buf) {
                break;
            }
        }

        let response = format!(
            "HTTP/1.1 {status} Scripted\r\n\
             content-type: application/json\r\n\
             content-length: {}\r\n\
             connection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        let _ = stream.shutdown().await;
        String::from_utf8_lossy(&buf).into_owned()
    });

    (format!("http://{addr}"), handle)
}

fn request_complete(buf: &[u8]) -> bool {
    let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
    let length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    buf.len() >= end + 4 + length
}
