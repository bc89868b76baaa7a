use std::sync::OnceLock;

use common::utils::llm::{GenerationRequest, TextGenerator};
use regex::Regex;
use tracing::{debug, warn};

pub const MAX_EXPANDED_QUERIES: usize = 6;

pub fn expansion_prompt(question: &str, max_queries: usize) -> String {
    format!(
        "You will generate diverse paraphrases and decompositions of a user question \
         to search a user guide. Return {max_queries} lines, each a different query; include synonyms \
         and alternate phrasings; avoid punctuation. Do not number the lines.\nQuestion: \"{question}\""
    )
}

fn list_marker() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+").ok())
        .as_ref()
}

/// Strips list markers and surrounding quotes from one model output line.
///
/// Only a marker followed by whitespace is removed, so queries that start
/// with a number keep it.
fn clean_line(line: &str) -> &str {
    let trimmed = line.trim();
    let without_marker = list_marker()
        .and_then(|pattern| pattern.find(trimmed))
        .map_or(trimmed, |marker| trimmed.get(marker.end()..).unwrap_or_default())
        .trim();
    let unquoted = without_marker.trim_matches(['"', '\'']).trim();

    // A line that was only a number or marker keeps nothing useful.
    if unquoted.chars().any(char::is_alphabetic) {
        unquoted
    } else {
        ""
    }
}

/// Merges model lines behind the original question, dropping duplicates and noise.
pub fn merge_expansions(question: &str, raw: &str, max_queries: usize) -> Vec<String> {
    let mut queries = vec![question.to_string()];
    let mut seen = vec![question.trim().to_lowercase()];

    for line in raw.lines().map(clean_line).filter(|line| !line.is_empty()) {
        if queries.len() >= max_queries.max(1) {
            break;
        }
        let key = line.to_lowercase();
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        queries.push(line.to_string());
    }

    queries
}

/// Returns the original question followed by up to `max_queries - 1` alternate phrasings.
///
/// Never fails: any model error yields just the original question.
pub async fn expand_queries(
    generator: &dyn TextGenerator,
    question: &str,
    max_queries: usize,
) -> Vec<String> {
    let max_queries = max_queries.clamp(1, MAX_EXPANDED_QUERIES);
    let request = GenerationRequest::new(expansion_prompt(question, max_queries))
        .with_temperature(0.7)
        .with_max_tokens(300);

    match generator.generate(request).await {
        Ok(generation) => {
            let queries = merge_expansions(question, generation.salvage().unwrap_or_default(), max_queries);
            debug!(count = queries.len(), "Expanded question into search queries");
            queries
        }
        Err(err) => {
            warn!(error = %err, "Query expansion failed; searching with the original question only");
            vec![question.to_string()]
        }
    }
}
