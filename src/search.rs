//! Terminal and JSON rendering of pipeline output.

use std::fmt::Write as _;

use serde::Serialize;

use crate::{
    candidate::RankedResult,
    error::Result,
    pipeline::{PipelineOutput, RetrievalPath},
};

const SUBJECT_MAX_CHARS: usize = 120;

#[derive(Serialize)]
struct JsonReport<'a> {
    question: &'a str,
    path: &'a RetrievalPath,
    result_count: usize,
    results: &'a [RankedResult],
}

/// One line describing how the results were obtained.
pub fn describe_path(path: &RetrievalPath) -> String {
    match path {
        RetrievalPath::MultiQuery {
            queries,
            failed_queries,
        } if failed_queries.is_empty() => {
            format!("merged from {} queries", queries.len())
        }
        RetrievalPath::MultiQuery {
            queries,
            failed_queries,
        } => format!(
            "merged from {} queries ({} failed)",
            queries.len(),
            failed_queries.len()
        ),
        RetrievalPath::SingleQuery {
            degraded: Some(reason),
            ..
        } => format!("single query, generation degraded: {reason}"),
        RetrievalPath::SingleQuery { .. } => "single query".to_string(),
        RetrievalPath::Basic => "basic search".to_string(),
        RetrievalPath::Fallback { reason } => {
            format!("fallback search after: {reason}")
        }
    }
}

pub fn render_human(output: &PipelineOutput) -> String {
    let mut out = String::new();

    if let RetrievalPath::MultiQuery { queries, .. } = &output.path {
        for (i, q) in queries.iter().enumerate() {
            let _ = writeln!(out, "  q{}: {q}", i + 1);
        }
        out.push('\n');
    }

    if output.results.is_empty() {
        out.push_str("No results found.\n");
    }

    for r in &output.results {
        let summary = r.summary();
        let _ = writeln!(
            out,
            "{:>3}. [{:.3}] {} (x{})",
            r.rank, r.weighted_score, r.case_id, r.frequency
        );

        let details: Vec<&str> = [&summary.court, &summary.date_issued]
            .into_iter()
            .filter_map(|f| f.as_deref())
            .collect();
        if !details.is_empty() {
            let _ = writeln!(out, "     {}", details.join(", "));
        }
        if let Some(subject) = &summary.subject {
            let _ = writeln!(out, "     {}", clip(subject, SUBJECT_MAX_CHARS));
        }
        if let Some(url) = &summary.source_url {
            let _ = writeln!(out, "     {url}");
        }
    }

    let _ = writeln!(
        out,
        "\n{} result(s), {}",
        output.results.len(),
        describe_path(&output.path)
    );
    out
}

pub fn format_human(output: &PipelineOutput) {
    print!("{}", render_human(output));
}

pub fn render_json(output: &PipelineOutput, question: &str) -> Result<String> {
    let report = JsonReport {
        question,
        path: &output.path,
        result_count: output.results.len(),
        results: &output.results,
    };
    Ok(serde_json::to_string(&report)?)
}

pub fn format_json(output: &PipelineOutput, question: &str) -> Result<()> {
    println!("{}", render_json(output, question)?);
    Ok(())
}

fn clip(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
