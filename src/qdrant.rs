use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{
    candidate::{Payload, RawCandidate},
    error::{Error, Result},
    openai::{describe, is_transient},
    searcher::VectorIndex,
};

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Payload>,
}

/// A Qdrant collection queried over the REST API.
///
/// Each hit's `case_id` is read from the `id_field` payload key. Points that
/// lack it fall back to their own point id, so collections indexed without
/// case metadata still merge correctly.
#[derive(Debug, Clone)]
pub struct QdrantIndex {
    http: reqwest::Client,
    url: String,
    collection: String,
    api_key: Option<String>,
    id_field: String,
}

impl QdrantIndex {
    pub fn new(
        http: reqwest::Client,
        url: &str,
        collection: &str,
        api_key: Option<String>,
        id_field: &str,
    ) -> Self {
        Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            collection: collection.to_string(),
            api_key,
            id_field: id_field.to_string(),
        }
    }

    fn candidate(&self, point: ScoredPoint) -> Option<RawCandidate> {
        let payload = point.payload.unwrap_or_default();
        let case_id = payload
            .get(&self.id_field)
            .and_then(id_text)
            .or_else(|| id_text(&point.id))?;
        Some(RawCandidate::new(case_id, point.score).with_payload(payload))
    }
}

/// Strings and integers both identify a case; anything else does not.
fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RawCandidate>> {
        let request = SearchRequest {
            vector,
            limit,
            with_payload: true,
        };

        let url = format!(
            "{}/collections/{}/points/search",
            self.url, self.collection
        );
        let mut builder = self.http.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Index {
                reason: describe(status, &body),
                retryable: is_transient(status),
            });
        }

        let reply: SearchResponse = response.json().await?;
        let returned = reply.result.len();
        let hits: Vec<RawCandidate> = reply
            .result
            .into_iter()
            .filter_map(|point| self.candidate(point))
            .collect();

        if hits.len() < returned {
            debug!(
                skipped = returned - hits.len(),
                collection = %self.collection,
                "points without a usable id"
            );
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve_once;

    fn index(url: &str, api_key: Option<&str>) -> QdrantIndex {
        QdrantIndex::new(
            reqwest::Client::new(),
            url,
            "decisions",
            api_key.map(str::to_string),
            "case_number",
        )
    }

    #[tokio::test]
    async fn search_posts_vector_and_reads_case_numbers() {
        let body = r#"{
            "result": [
                {"id": 17, "score": 0.91, "payload": {
                    "case_number": "21 Cdo 1234/2020",
                    "court": "Nejvyšší soud"
                }},
                {"id": "a3c1", "score": 0.72, "payload": {"court": "NS"}},
                {"id": 5, "score": 0.40}
            ],
            "status": "ok",
            "time": 0.002
        }"#;
        let (url, request) = serve_once(200, body).await;

        let hits = index(&url, Some("qkey"))
            .search(&[0.5, -0.25], 3)
            .await
            .unwrap();

        let ids: Vec<&str> = hits.iter().map(|h| h.case_id.as_str()).collect();
        assert_eq!(ids, vec!["21 Cdo 1234/2020", "a3c1", "5"]);
        assert!((hits[0].score - 0.91).abs() < 1e-6);
        assert_eq!(hits[0].payload["court"], "Nejvyšší soud");
        assert!(hits[2].payload.is_empty());

        let request = request.await.unwrap();
        assert!(
            request.starts_with("POST /collections/decisions/points/search")
        );
        assert!(request.to_lowercase().contains("api-key: qkey"));
        assert!(request.contains("\"with_payload\":true"));
        assert!(request.contains("\"limit\":3"));
    }

    #[tokio::test]
    async fn server_errors_are_retryable() {
        let (url, _request) = serve_once(502, "").await;
        let err = index(&url, None).search(&[1.0], 5).await.unwrap_err();
        assert!(matches!(err, Error::Index { retryable: true, .. }));
    }

    #[tokio::test]
    async fn missing_collection_is_permanent() {
        let (url, _request) = serve_once(
            404,
            r#"{"status":{"error":"Collection `decisions` doesn't exist!"}}"#,
        )
        .await;
        let err = index(&url, None).search(&[1.0], 5).await.unwrap_err();
        match err {
            Error::Index { reason, retryable } => {
                assert!(!retryable);
                assert!(reason.contains("doesn't exist"));
            }
            other => panic!("expected index error, got {other:?}"),
        }
    }

    #[test]
    fn points_without_any_id_are_dropped() {
        let idx = index("http://unused", None);
        let point = ScoredPoint {
            id: Value::Null,
            score: 0.3,
            payload: None,
        };
        assert!(idx.candidate(point).is_none());
    }

    #[test]
    fn blank_payload_id_falls_back_to_point_id() {
        let idx = index("http://unused", None);
        let mut payload = Payload::new();
        payload.insert("case_number".into(), Value::String("  ".into()));
        let point = ScoredPoint {
            id: Value::from(42),
            score: 0.3,
            payload: Some(payload),
        };
        assert_eq!(idx.candidate(point).unwrap().case_id, "42");
    }
}
