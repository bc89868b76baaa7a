use std::{collections::HashSet, sync::OnceLock};

use common::utils::llm::{GenerationRequest, TextGenerator};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{titles::document_title, Candidate};

pub const DEFAULT_TOP_N: usize = 8;

/// Longest snippet of a candidate packed into the scoring prompt.
const SNIPPET_CHARS: usize = 600;

#[derive(Debug, Deserialize)]
struct RerankScore {
    index: serde_json::Value,
    score: serde_json::Value,
}

fn json_array_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?s)\[.*?\]").ok())
        .as_ref()
}

fn as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

pub fn rerank_prompt(question: &str, candidates: &[Candidate]) -> String {
    let packed = candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| {
            let snippet: String = candidate.content.chars().take(SNIPPET_CHARS).collect();
            format!(
                "#{index}\nTitle: {title}\nSection: {section}\nSnippet: {snippet}",
                title = document_title(&candidate.document_name),
                section = candidate.section_title.as_deref().unwrap_or_default(),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Score each chunk for how well it can answer the question (0-100).\n\
         Return JSON array of {{\"index\": number, \"score\": number}} objects and nothing else.\n\
         Question: \"{question}\"\n\nChunks:\n{packed}"
    )
}

fn as_index(value: &serde_json::Value) -> Option<usize> {
    let index = as_f64(value)?;
    if index.fract() != 0.0 || index < 0.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some(index as usize)
}

/// Reads one bracketed span as either `{index, score}` objects or a bare
/// ranking of indices, best first.
fn parse_array(span: &str) -> Option<Vec<(serde_json::Value, f64)>> {
    if let Ok(entries) = serde_json::from_str::<Vec<RerankScore>>(span) {
        return Some(
            entries
                .into_iter()
                .filter_map(|entry| Some((entry.index, as_f64(&entry.score)?)))
                .collect(),
        );
    }

    let ranking: Vec<serde_json::Value> = serde_json::from_str(span).ok()?;
    if ranking.is_empty() || ranking.iter().any(|value| as_index(value).is_none()) {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let total = ranking.len() as f64;
    Some(
        ranking
            .into_iter()
            .zip(0_u32..)
            .map(|(value, rank)| (value, total - f64::from(rank)))
            .collect(),
    )
}

/// Parses `{index, score}` pairs out of model output.
///
/// Every bracketed span is tried in turn until one parses. Returns `None`
/// when none does. Entries with an index outside `0..candidate_count`, a
/// missing score, or a repeated index are dropped.
pub fn parse_scores(raw: &str, candidate_count: usize) -> Option<Vec<(usize, f64)>> {
    let entries = json_array_pattern()?
        .find_iter(raw)
        .find_map(|span| parse_array(span.as_str()))?;

    let mut seen = HashSet::new();
    let scores = entries
        .iter()
        .filter_map(|(index, score)| {
            let index = as_index(index)?;
            (index < candidate_count && seen.insert(index)).then_some((index, *score))
        })
        .collect();
    Some(scores)
}

/// Uses a generative model as a relevance judge over a small candidate set.
pub struct LlmReranker<'a> {
    generator: &'a dyn TextGenerator,
}

impl<'a> LlmReranker<'a> {
    pub fn new(generator: &'a dyn TextGenerator) -> Self {
        Self { generator }
    }

    /// Returns at most `top_n` candidates ordered by model score.
    ///
    /// Any failure to obtain or parse scores keeps the incoming order.
    pub async fn rerank(
        &self,
        question: &str,
        candidates: Vec<Candidate>,
        top_n: usize,
    ) -> Vec<Candidate> {
        if candidates.is_empty() {
            return candidates;
        }

        let request = GenerationRequest::new(rerank_prompt(question, &candidates))
            .with_temperature(0.0)
            .with_max_tokens(400);

        let raw = match self.generator.generate(request).await {
            Ok(generation) => generation.salvage().unwrap_or_default().to_string(),
            Err(err) => {
                warn!(error = %err, "Reranking call failed; keeping retrieval order");
                return keep_order(candidates, top_n);
            }
        };

        let Some(mut scores) = parse_scores(&raw, candidates.len()).filter(|s| !s.is_empty())
        else {
            warn!("Could not parse reranking scores; keeping retrieval order");
            return keep_order(candidates, top_n);
        };

        scores.sort_by(|a, b| b.1.total_cmp(&a.1));
        scores.truncate(top_n);

        let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
        let reranked: Vec<Candidate> = scores
            .into_iter()
            .filter_map(|(index, _)| slots.get_mut(index).and_then(Option::take))
            .collect();

        debug!(kept = reranked.len(), "Reranked candidates");
        reranked
    }
}

fn keep_order(mut candidates: Vec<Candidate>, top_n: usize) -> Vec<Candidate> {
    candidates.truncate(top_n);
    candidates
}
