use std::sync::Arc;

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{
    candidate::{Payload, RankedResult},
    config::PipelineOverrides,
    error,
    pipeline::{Pipeline, PipelineOutput, RetrievalPath},
};

#[derive(Clone)]
pub struct PrecedentMcpServer {
    pipeline: Arc<Pipeline>,
    tool_router: ToolRouter<Self>,
}

impl PrecedentMcpServer {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl PrecedentMcpServer {
    /// Multi-query retrieval of court decisions.
    #[tool(
        name = "precedent_search",
        description = "Find court decisions relevant to a legal question. The question is rephrased into several search queries and decisions found by more of them rank higher."
    )]
    pub async fn precedent_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let overrides = PipelineOverrides {
            num_queries: params.num_queries,
            results_per_query: params.results_per_query,
            final_top_k: params.top_k,
            multi_query: params.multi_query,
        };

        let output = self
            .pipeline
            .run(&params.question, &overrides)
            .await
            .map_err(|e| mcp_error("search failed", e))?;

        let items: Vec<SearchResultItem> =
            output.results.iter().map(SearchResultItem::from).collect();
        let summary = format_search_summary(&items, &params.question);
        let structured = serde_json::to_value(SearchResponse {
            queries: generated_queries(&output),
            path: output.path,
            question: params.question,
            result_count: items.len(),
            results: items,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for PrecedentMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut server_info = Implementation::default();
        server_info.name = "precedent".to_string();
        server_info.title = Some("precedent MCP".to_string());
        server_info.version = env!("CARGO_PKG_VERSION").to_string();

        let mut info = ServerInfo::default();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.server_info = server_info;
        info.instructions = Some(
            "Use precedent_search with a full natural-language legal question. Set multiQuery to false for a plain single-query search."
                .to_string(),
        );
        info
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Legal question in natural language.
    pub question: String,
    /// Number of decisions to return (default: 5).
    pub top_k: Option<usize>,
    /// Number of search queries to generate (default: 3).
    pub num_queries: Option<usize>,
    /// Candidates fetched per generated query (default: 10).
    pub results_per_query: Option<usize>,
    /// Use multi-query retrieval (default: true).
    pub multi_query: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    question: String,
    path: RetrievalPath,
    queries: Vec<String>,
    result_count: usize,
    results: Vec<SearchResultItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResultItem {
    rank: usize,
    case_id: String,
    score: f32,
    frequency: usize,
    court: Option<String>,
    date_issued: Option<String>,
    subject: Option<String>,
    ecli: Option<String>,
    source_url: Option<String>,
    payload: Payload,
}

impl From<&RankedResult> for SearchResultItem {
    fn from(r: &RankedResult) -> Self {
        let summary = r.summary();
        Self {
            rank: r.rank,
            case_id: r.case_id.clone(),
            score: r.weighted_score,
            frequency: r.frequency,
            court: summary.court,
            date_issued: summary.date_issued,
            subject: summary.subject,
            ecli: summary.ecli,
            source_url: summary.source_url,
            payload: r.payload.clone(),
        }
    }
}

fn generated_queries(output: &PipelineOutput) -> Vec<String> {
    match &output.path {
        RetrievalPath::MultiQuery { queries, .. } => queries.clone(),
        RetrievalPath::SingleQuery { query, .. } => vec![query.clone()],
        RetrievalPath::Basic | RetrievalPath::Fallback { .. } => Vec::new(),
    }
}

fn format_search_summary(
    results: &[SearchResultItem],
    question: &str,
) -> String {
    if results.is_empty() {
        return format!("No decisions found for \"{question}\"");
    }

    let mut lines = Vec::with_capacity(results.len() + 1);
    let suffix = if results.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} decision{} for \"{question}\":",
        results.len(),
        suffix
    ));

    for item in results {
        let court = item.court.as_deref().unwrap_or("unknown court");
        lines.push(format!(
            "{}. {} ({court}) score {:.3}, matched {} quer{}",
            item.rank,
            item.case_id,
            item.score,
            item.frequency,
            if item.frequency == 1 { "y" } else { "ies" }
        ));
    }

    lines.join("\n")
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub async fn run_mcp(pipeline: Pipeline) -> error::Result<()> {
    let server = PrecedentMcpServer::new(pipeline);
    info!("serving MCP over stdio");

    let transport = rmcp::transport::stdio();
    let running = server.serve(transport).await.map_err(|e| {
        error::Error::Config(format!("MCP server initialization failed: {e}"))
    })?;
    running
        .waiting()
        .await
        .map_err(|e| error::Error::Config(format!("MCP server error: {e}")))?;
    Ok(())
}
