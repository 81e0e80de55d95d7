use std::{cmp::Ordering, collections::HashMap};

use tracing::debug;

use crate::{
    candidate::{MergedCandidate, Payload, RawCandidate},
    error::{Error, Result},
};

struct Accumulator {
    case_id: String,
    scores: Vec<f32>,
    best_score: f32,
    payload: Payload,
}

/// Deduplicate candidates from every query and rank them.
///
/// `results` must be in query-generation order; it decides which payload
/// wins when two occurrences share the highest score. Each candidate ends up
/// with `weighted_score = mean(scores) * sqrt(frequency)`, and the output is
/// sorted by weighted score, then frequency, then average score (all
/// descending), then `case_id` ascending.
pub fn merge(results: Vec<Vec<RawCandidate>>) -> Result<Vec<MergedCandidate>> {
    let num_lists = results.len();
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<Accumulator> = Vec::new();

    for list in results {
        for candidate in collapse_repeats(list)? {
            match slots.get(&candidate.case_id) {
                Some(&slot) => {
                    let acc = &mut merged[slot];
                    acc.scores.push(candidate.score);
                    if candidate.score > acc.best_score {
                        acc.best_score = candidate.score;
                        acc.payload = candidate.payload;
                    }
                }
                None => {
                    slots.insert(candidate.case_id.clone(), merged.len());
                    merged.push(Accumulator {
                        case_id: candidate.case_id,
                        scores: vec![candidate.score],
                        best_score: candidate.score,
                        payload: candidate.payload,
                    });
                }
            }
        }
    }

    let mut merged: Vec<MergedCandidate> =
        merged.into_iter().map(finish).collect();
    merged.sort_by(compare);

    debug!(lists = num_lists, unique = merged.len(), "merged candidates");
    Ok(merged)
}

/// Keep one hit per `case_id` within a single query's list. Chunked
/// collections return several chunks of the same decision; only the best
/// one counts towards that query's vote.
fn collapse_repeats(list: Vec<RawCandidate>) -> Result<Vec<RawCandidate>> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<RawCandidate> = Vec::with_capacity(list.len());

    for candidate in list {
        if candidate.case_id.is_empty() {
            return Err(Error::Merge("candidate without a case id".to_string()));
        }
        if !candidate.score.is_finite() {
            return Err(Error::Merge(format!(
                "candidate {} has a non-finite score ({})",
                candidate.case_id, candidate.score
            )));
        }

        match positions.get(&candidate.case_id) {
            Some(&pos) => {
                if candidate.score > unique[pos].score {
                    unique[pos] = candidate;
                }
            }
            None => {
                positions.insert(candidate.case_id.clone(), unique.len());
                unique.push(candidate);
            }
        }
    }

    Ok(unique)
}

fn finish(acc: Accumulator) -> MergedCandidate {
    let frequency = acc.scores.len();
    let sum: f64 = acc.scores.iter().map(|&s| f64::from(s)).sum();
    let average = sum / frequency as f64;
    let weighted = average * (frequency as f64).sqrt();

    MergedCandidate {
        case_id: acc.case_id,
        scores: acc.scores,
        frequency,
        average_score: average as f32,
        weighted_score: weighted as f32,
        payload: acc.payload,
    }
}

fn compare(a: &MergedCandidate, b: &MergedCandidate) -> Ordering {
    b.weighted_score
        .total_cmp(&a.weighted_score)
        .then_with(|| b.frequency.cmp(&a.frequency))
        .then_with(|| b.average_score.total_cmp(&a.average_score))
        .then_with(|| a.case_id.cmp(&b.case_id))
}
