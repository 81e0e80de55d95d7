use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Language-model completion endpoint used to phrase search queries.
#[async_trait]
pub trait QueryGenerationBackend: Send + Sync {
    /// Answer `user` under the `system` instruction, returning the raw
    /// model output.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

const INSTRUCTION: &str = "\
You generate search queries for a database of court decisions. Rewrite the \
user's legal question into {n} distinct search queries, each covering a \
different aspect of the question: a direct restatement using legal \
terminology, the key legal concepts involved, and synonymous or alternative \
phrasings. Write the queries in the language of the question. Output only \
the queries, one per line, without numbering, bullets or commentary.";

/// Build the system instruction asking for `n` queries.
pub fn build_instruction(n: usize) -> String {
    INSTRUCTION.replace("{n}", &n.to_string())
}

/// The queries a pipeline run will execute.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub queries: Vec<String>,
    /// Set when generation failed and the plan is just the original question.
    pub degraded: Option<String>,
}

impl QueryPlan {
    pub fn single(question: &str) -> Self {
        Self {
            queries: vec![question.to_string()],
            degraded: None,
        }
    }

    fn degraded(question: &str, reason: String) -> Self {
        Self {
            queries: vec![question.to_string()],
            degraded: Some(reason),
        }
    }
}

/// Turns one question into up to N search queries.
#[derive(Clone)]
pub struct QueryGenerator {
    backend: Arc<dyn QueryGenerationBackend>,
    timeout: Duration,
}

impl QueryGenerator {
    pub fn new(
        backend: Arc<dyn QueryGenerationBackend>,
        timeout: Duration,
    ) -> Self {
        Self { backend, timeout }
    }

    /// Generate `n` queries for `question`.
    ///
    /// Never fails: a backend error, a timeout or an unparseable completion
    /// yields a plan holding only the original question.
    pub async fn generate(&self, question: &str, n: usize) -> QueryPlan {
        if n <= 1 {
            return QueryPlan::single(question);
        }

        match self.try_generate(question, n).await {
            Ok(queries) => {
                info!(count = queries.len(), "generated search queries");
                for (i, q) in queries.iter().enumerate() {
                    debug!(index = i, query = %q, "generated query");
                }
                QueryPlan {
                    queries,
                    degraded: None,
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "query generation failed, using the original question"
                );
                QueryPlan::degraded(question, e.to_string())
            }
        }
    }

    async fn try_generate(
        &self,
        question: &str,
        n: usize,
    ) -> Result<Vec<String>> {
        let instruction = build_instruction(n);
        let completion = self.backend.complete(&instruction, question);
        let raw = tokio::time::timeout(self.timeout, completion)
            .await
            .map_err(|_| Error::Timeout {
                operation: "query generation",
                after: self.timeout,
            })??;

        let queries = parse_queries(&raw, n);
        if queries.is_empty() {
            return Err(Error::Generation(
                "completion contained no usable queries".to_string(),
            ));
        }
        Ok(queries)
    }
}

/// Parse a completion into at most `n` distinct queries.
///
/// Each line is trimmed, stripped of a leading enumeration marker (`1.`,
/// `2)`, `-`, `*`, `•`) and of wrapping quotes. A marker counts only when
/// whitespace or the end of the line follows it and a numeric marker has at
/// most two digits, so `1.5 million` and `2020: novela` are kept whole.
/// Lines without a letter or digit and exact duplicates are dropped.
pub fn parse_queries(raw: &str, n: usize) -> Vec<String> {
    let mut queries: Vec<String> = Vec::with_capacity(n);

    for line in raw.lines() {
        if queries.len() == n {
            break;
        }
        let query = unquote(strip_marker(line.trim())).trim();
        if !query.chars().any(char::is_alphanumeric)
            || queries.iter().any(|q| q == query)
        {
            continue;
        }
        queries.push(query.to_string());
    }

    queries
}

/// Longer leading numbers are years or statute numbers, not enumeration.
const MAX_MARKER_DIGITS: usize = 2;

fn strip_marker(line: &str) -> &str {
    if let Some(rest) = line.strip_prefix(['-', '*', '•', '+', '–'])
        && ends_marker(rest)
    {
        return rest.trim_start();
    }

    let digits = line.len()
        - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if (1..=MAX_MARKER_DIGITS).contains(&digits)
        && let Some(rest) = line[digits..].strip_prefix(['.', ')', ':'])
        && ends_marker(rest)
    {
        return rest.trim_start();
    }

    line
}

fn ends_marker(rest: &str) -> bool {
    rest.chars().next().is_none_or(char::is_whitespace)
}

fn unquote(s: &str) -> &str {
    const PAIRS: [(char, char); 4] =
        [('"', '"'), ('\'', '\''), ('„', '“'), ('“', '”')];

    for (open, close) in PAIRS {
        if s.len() < open.len_utf8() + close.len_utf8() {
            continue;
        }
        if let Some(inner) =
            s.strip_prefix(open).and_then(|rest| rest.strip_suffix(close))
        {
            return inner;
        }
    }
    s
}
