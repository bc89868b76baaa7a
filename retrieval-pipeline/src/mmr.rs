//! Maximal marginal relevance selection over a candidate pool.

use crate::{scoring::cosine_similarity, Candidate};

pub const DEFAULT_LAMBDA: f32 = 0.75;

struct PoolEntry {
    candidate: Candidate,
    relevance: f32,
    selected: bool,
}

/// Greedily picks up to `top_k` candidates, trading relevance to `query_embedding`
/// against redundancy with what has already been picked.
///
/// Each round maximises `λ·sim(query, c) − (1−λ)·max(sim(c, selected))`.
/// A pool no larger than `top_k` is returned whole, in its original order.
pub fn select(
    query_embedding: &[f32],
    pool: Vec<Candidate>,
    top_k: usize,
    lambda: f32,
) -> Vec<Candidate> {
    if pool.len() <= top_k {
        return pool;
    }

    let lambda = lambda.clamp(0.0, 1.0);
    let mut entries: Vec<PoolEntry> = pool
        .into_iter()
        .map(|candidate| PoolEntry {
            relevance: cosine_similarity(query_embedding, &candidate.embedding),
            candidate,
            selected: false,
        })
        .collect();

    // Indices into `entries`, in selection order.
    let mut order: Vec<usize> = Vec::with_capacity(top_k);

    while order.len() < top_k {
        let mut best: Option<(usize, f32)> = None;

        for (index, entry) in entries.iter().enumerate() {
            if entry.selected {
                continue;
            }

            let redundancy = order
                .iter()
                .filter_map(|&chosen| entries.get(chosen))
                .map(|chosen| cosine_similarity(&entry.candidate.embedding, &chosen.candidate.embedding))
                .fold(None, |max: Option<f32>, sim| Some(max.map_or(sim, |m| m.max(sim))))
                .unwrap_or(0.0);

            let score = lambda.mul_add(entry.relevance, -(1.0 - lambda) * redundancy);
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((index, score));
            }
        }

        let Some((index, _)) = best else {
            break;
        };
        if let Some(entry) = entries.get_mut(index) {
            entry.selected = true;
        }
        order.push(index);
    }

    let mut slots: Vec<Option<Candidate>> = entries
        .into_iter()
        .map(|entry| Some(entry.candidate))
        .collect();

    order
        .into_iter()
        .filter_map(|index| slots.get_mut(index).and_then(Option::take))
        .collect()
}
