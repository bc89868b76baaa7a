use serde::{Deserialize, Serialize};
use std::fmt;

use crate::scoring::FusionWeights;

/// Retrieval strategies in the order the fallback chain attempts them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalTier {
    /// Fused semantic+lexical search on the raw question, then rerank
    Hybrid,
    /// Query expansion and HyDE fan-out, diversity selection, then rerank
    Enhanced,
    /// Single semantic search at a looser threshold, no rerank
    Basic,
}

impl RetrievalTier {
    pub const ALL: [Self; 3] = [Self::Hybrid, Self::Enhanced, Self::Basic];

    /// Tiers from `self` to the end of the chain.
    pub fn chain_from(self) -> impl Iterator<Item = Self> {
        Self::ALL.into_iter().filter(move |tier| *tier >= self)
    }
}

impl Default for RetrievalTier {
    fn default() -> Self {
        Self::Hybrid
    }
}

impl std::str::FromStr for RetrievalTier {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "hybrid" => Ok(Self::Hybrid),
            "enhanced" => Ok(Self::Enhanced),
            "basic" => Ok(Self::Basic),
            other => Err(format!("unknown retrieval tier '{other}'")),
        }
    }
}

impl fmt::Display for RetrievalTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RetrievalTier::Hybrid => "hybrid",
            RetrievalTier::Enhanced => "enhanced",
            RetrievalTier::Basic => "basic",
        };
        f.write_str(label)
    }
}

/// Tunable parameters that govern each retrieval stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalTuning {
    pub fusion_weights: FusionWeights,
    /// Citations handed to the synthesizer.
    pub final_limit: usize,
    pub limit_per_query: usize,
    pub hybrid_threshold: f32,
    pub enhanced_threshold: f32,
    /// Looser than the other tiers so the last resort still finds something.
    pub basic_threshold: f32,
    pub mmr_top_k: usize,
    pub mmr_lambda: f32,
    pub max_expansions: usize,
    pub context_messages: usize,
    /// Citations kept for the fast-model synthesis retry.
    pub retry_citation_limit: usize,
    /// Restricts every search to one guide category.
    pub category: Option<String>,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self {
            fusion_weights: FusionWeights::default(),
            final_limit: 8,
            limit_per_query: 12,
            hybrid_threshold: 0.0,
            enhanced_threshold: 0.12,
            basic_threshold: 0.1,
            mmr_top_k: 16,
            mmr_lambda: crate::mmr::DEFAULT_LAMBDA,
            max_expansions: crate::query_expansion::MAX_EXPANDED_QUERIES,
            context_messages: 5,
            retry_citation_limit: 4,
            category: None,
        }
    }
}

impl RetrievalTuning {
    /// Reads the `retrieval` table of the loaded settings. Missing keys keep
    /// their defaults and a missing table yields `RetrievalTuning::default()`.
    pub fn from_settings(settings: &::config::Config) -> Result<Self, ::config::ConfigError> {
        match settings.get::<Self>("retrieval") {
            Err(::config::ConfigError::NotFound(_)) => Ok(Self::default()),
            loaded => loaded,
        }
    }
}

/// Wrapper containing tuning plus the tier the chain starts at.
#[derive(Debug, Clone, Default)]
pub struct RetrievalConfig {
    pub start_tier: RetrievalTier,
    pub tuning: RetrievalTuning,
}

impl RetrievalConfig {
    pub fn new(tuning: RetrievalTuning) -> Self {
        Self {
            start_tier: RetrievalTier::default(),
            tuning,
        }
    }

    #[must_use]
    pub fn starting_at(mut self, tier: RetrievalTier) -> Self {
        self.start_tier = tier;
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.tuning.category = category;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_runs_in_quality_order() {
        let chain: Vec<_> = RetrievalTier::Hybrid.chain_from().collect();
        assert_eq!(
            chain,
            vec![RetrievalTier::Hybrid, RetrievalTier::Enhanced, RetrievalTier::Basic]
        );
        let tail: Vec<_> = RetrievalTier::Enhanced.chain_from().collect();
        assert_eq!(tail, vec![RetrievalTier::Enhanced, RetrievalTier::Basic]);
    }

    #[test]
    fn tiers_parse_and_display() {
        for tier in RetrievalTier::ALL {
            assert_eq!(tier.to_string().parse::<RetrievalTier>(), Ok(tier));
        }
        assert!("semantic".parse::<RetrievalTier>().is_err());
    }

    #[test]
    fn tuning_deserializes_partial_overrides() {
        let tuning: RetrievalTuning =
            serde_json::from_str(r#"{"final_limit": 4, "category": "homecare"}"#)
                .expect("partial tuning parses");
        assert_eq!(tuning.final_limit, 4);
        assert_eq!(tuning.category.as_deref(), Some("homecare"));
        assert_eq!(tuning.mmr_top_k, 16);
        assert!((tuning.fusion_weights.semantic - 0.7).abs() < f32::EPSILON);
        assert!(tuning.basic_threshold < tuning.enhanced_threshold);
    }

    #[test]
    fn tuning_loads_from_retrieval_table() {
        let settings = ::config::Config::builder()
            .set_override("retrieval.final_limit", 5)
            .and_then(|b| b.set_override("retrieval.basic_threshold", 0.2))
            .and_then(|b| b.set_override("retrieval.mmr_lambda", 0.5))
            .and_then(|b| b.set_override("chat_model", "unrelated"))
            .and_then(|b| b.build())
            .expect("settings build");

        let tuning = RetrievalTuning::from_settings(&settings).expect("tuning loads");
        assert_eq!(tuning.final_limit, 5);
        assert!((tuning.basic_threshold - 0.2).abs() < f32::EPSILON);
        assert!((tuning.mmr_lambda - 0.5).abs() < f32::EPSILON);
        assert_eq!(tuning.mmr_top_k, 16);
    }

    #[test]
    fn missing_retrieval_table_uses_defaults() {
        let settings = ::config::Config::builder().build().expect("empty settings");
        assert_eq!(
            RetrievalTuning::from_settings(&settings).expect("defaults"),
            RetrievalTuning::default()
        );
    }
}
