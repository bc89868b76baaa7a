use std::collections::HashSet;

use common::storage::types::citation::Citation;
use serde::{Deserialize, Serialize};

/// Weights used for linear fusion of the semantic and lexical channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub semantic: f32,
    pub lexical: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            semantic: 0.7,
            lexical: 0.3,
        }
    }
}

impl FusionWeights {
    pub fn fuse(&self, semantic: f32, lexical: f32) -> f32 {
        semantic.mul_add(self.semantic, lexical * self.lexical)
    }
}

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        dot = x.mul_add(*y, dot);
        norm_a = x.mul_add(*x, norm_a);
        norm_b = y.mul_add(*y, norm_b);
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator <= f32::EPSILON || !denominator.is_finite() {
        return 0.0;
    }
    dot / denominator
}

pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    let mut min = f32::MAX;
    let mut max = f32::MIN;

    for s in scores {
        if !s.is_finite() {
            continue;
        }
        if *s < min {
            min = *s;
        }
        if *s > max {
            max = *s;
        }
    }

    if !min.is_finite() || !max.is_finite() || min > max {
        return scores.iter().map(|_| 0.0).collect();
    }

    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }

    scores
        .iter()
        .map(|score| {
            if score.is_finite() {
                clamp_unit((score - min) / (max - min))
            } else {
                0.0
            }
        })
        .collect()
}

/// Lowercased, punctuation-stripped, whitespace-collapsed prefix of `content`.
pub fn content_fingerprint(content: &str) -> String {
    let stripped: String = content
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
        .collect();

    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .chars()
        .take(100)
        .collect()
}

/// Drops items whose content fingerprint was already seen, keeping the first occurrence.
pub fn dedup_by_content<T>(items: Vec<T>, content: impl Fn(&T) -> &str) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(content_fingerprint(content(item))))
        .collect()
}

pub fn dedup_citations(citations: Vec<Citation>) -> Vec<Citation> {
    dedup_by_content(citations, |citation| citation.content_preview.as_str())
}

pub fn sort_by_similarity_desc(citations: &mut [Citation]) {
    citations.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
}
