use serde::Serialize;

/// Opaque document metadata as returned by the index.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// One hit returned by the index for a single query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawCandidate {
    pub case_id: String,
    pub score: f32,
    pub payload: Payload,
}

impl RawCandidate {
    pub fn new(case_id: impl Into<String>, score: f32) -> Self {
        Self {
            case_id: case_id.into(),
            score,
            payload: Payload::new(),
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }
}

/// A candidate deduplicated across every query of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedCandidate {
    pub case_id: String,
    /// One score per query that returned this candidate.
    pub scores: Vec<f32>,
    pub frequency: usize,
    pub average_score: f32,
    pub weighted_score: f32,
    pub payload: Payload,
}

/// A final, ranked result handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub rank: usize,
    pub case_id: String,
    pub weighted_score: f32,
    pub frequency: usize,
    pub payload: Payload,
}

impl RankedResult {
    pub fn summary(&self) -> CaseSummary {
        CaseSummary::from_payload(&self.payload)
    }
}

/// Typed view over the well-known fields of a court decision payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaseSummary {
    pub case_number: Option<String>,
    pub court: Option<String>,
    pub subject: Option<String>,
    pub date_issued: Option<String>,
    pub ecli: Option<String>,
    pub source_url: Option<String>,
}

impl CaseSummary {
    pub fn from_payload(payload: &Payload) -> Self {
        let field = |name: &str| {
            payload
                .get(name)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            case_number: field("case_number"),
            court: field("court"),
            subject: field("subject"),
            date_issued: field("date_issued"),
            ecli: field("ecli"),
            source_url: field("source_url"),
        }
    }
}

pub(crate) fn rank(merged: Vec<MergedCandidate>) -> Vec<RankedResult> {
    merged
        .into_iter()
        .enumerate()
        .map(|(i, m)| RankedResult {
            rank: i + 1,
            case_id: m.case_id,
            weighted_score: m.weighted_score,
            frequency: m.frequency,
            payload: m.payload,
        })
        .collect()
}
