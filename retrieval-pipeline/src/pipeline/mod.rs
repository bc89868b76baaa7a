mod config;

pub use config::{RetrievalConfig, RetrievalTier, RetrievalTuning};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{error::AppError, storage::types::citation::Citation, utils::llm::TextGenerator};
use tracing::{debug, info, instrument, warn};

use crate::{
    hyde::hypothetical_answer,
    mmr,
    query_expansion::expand_queries,
    reranking::LlmReranker,
    scoring::{dedup_by_content, sort_by_similarity_desc},
    search::{HybridSearchClient, SearchParams},
    Candidate,
};

/// Result of one tier. Finding nothing is not an error.
#[derive(Debug)]
pub enum TierOutcome {
    Hit(Vec<Citation>),
    Empty,
    Failed(AppError),
}

impl TierOutcome {
    fn from_citations(citations: Vec<Citation>) -> Self {
        if citations.is_empty() {
            Self::Empty
        } else {
            Self::Hit(citations)
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct TierTimings {
    timings: Vec<(RetrievalTier, Duration)>,
}

impl TierTimings {
    pub fn record(&mut self, tier: RetrievalTier, duration: Duration) {
        self.timings.push((tier, duration));
    }

    pub fn attempted(&self) -> Vec<RetrievalTier> {
        self.timings.iter().map(|(tier, _)| *tier).collect()
    }

    pub fn into_vec(self) -> Vec<(RetrievalTier, Duration)> {
        self.timings
    }
}

#[derive(Debug, Default)]
pub struct RetrievalOutcome {
    /// Deduplicated, best first. Empty when no tier found anything.
    pub citations: Vec<Citation>,
    /// Tier that produced `citations`.
    pub tier: Option<RetrievalTier>,
    pub timings: TierTimings,
}

/// Runs retrieval tiers in order until one returns citations.
#[derive(Clone)]
pub struct FallbackController {
    search: HybridSearchClient,
    generator: Arc<dyn TextGenerator>,
}

impl FallbackController {
    pub fn new(search: HybridSearchClient, generator: Arc<dyn TextGenerator>) -> Self {
        Self { search, generator }
    }

    /// Walks the tier chain from `config.start_tier`.
    ///
    /// A tier that errors or finds nothing advances the chain. Exhausting the
    /// chain yields an empty outcome, unless the last tier failed with a
    /// retryable transport error, which is returned.
    #[instrument(skip_all, fields(start_tier = %config.start_tier))]
    pub async fn retrieve(
        &self,
        question: &str,
        config: &RetrievalConfig,
    ) -> Result<RetrievalOutcome, AppError> {
        let mut timings = TierTimings::default();
        let mut last_failure = None;

        for tier in config.start_tier.chain_from() {
            let started = Instant::now();
            let outcome = self.run_tier(tier, question, &config.tuning).await;
            timings.record(tier, started.elapsed());

            match outcome {
                TierOutcome::Hit(citations) => {
                    info!(%tier, citations = citations.len(), "Retrieval tier succeeded");
                    return Ok(RetrievalOutcome {
                        citations,
                        tier: Some(tier),
                        timings,
                    });
                }
                TierOutcome::Empty => {
                    info!(%tier, "Retrieval tier found nothing; advancing");
                    last_failure = None;
                }
                TierOutcome::Failed(err) => {
                    warn!(%tier, error = %err, "Retrieval tier failed; advancing");
                    last_failure = Some(err);
                }
            }
        }

        match last_failure {
            Some(err) if err.is_retryable() => Err(err),
            _ => {
                info!("No relevant content found in any retrieval tier");
                Ok(RetrievalOutcome {
                    citations: Vec::new(),
                    tier: None,
                    timings,
                })
            }
        }
    }

    pub async fn run_tier(
        &self,
        tier: RetrievalTier,
        question: &str,
        tuning: &RetrievalTuning,
    ) -> TierOutcome {
        let result = match tier {
            RetrievalTier::Hybrid => self.hybrid_tier(question, tuning).await,
            RetrievalTier::Enhanced => self.enhanced_tier(question, tuning).await,
            RetrievalTier::Basic => self.basic_tier(question, tuning).await,
        };

        match result {
            Ok(citations) => TierOutcome::from_citations(citations),
            Err(err) => TierOutcome::Failed(err),
        }
    }

    async fn hybrid_tier(
        &self,
        question: &str,
        tuning: &RetrievalTuning,
    ) -> Result<Vec<Citation>, AppError> {
        let params = SearchParams {
            limit_per_query: tuning.final_limit * 2,
            similarity_threshold: tuning.hybrid_threshold,
            weights: tuning.fusion_weights,
            category: tuning.category.clone(),
        };

        let candidates = dedup_candidates(self.search.search(question, &params).await?);
        debug!(candidates = candidates.len(), "Hybrid tier candidates");
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let reranked = LlmReranker::new(self.generator.as_ref())
            .rerank(question, candidates, tuning.final_limit)
            .await;
        Ok(to_citations(&reranked))
    }

    async fn enhanced_tier(
        &self,
        question: &str,
        tuning: &RetrievalTuning,
    ) -> Result<Vec<Citation>, AppError> {
        let generator = self.generator.as_ref();
        let (mut queries, synthetic, question_embedding) = tokio::join!(
            expand_queries(generator, question, tuning.max_expansions),
            hypothetical_answer(generator, question),
            self.search.embed(question),
        );
        let question_embedding = question_embedding?;

        if !queries.contains(&synthetic) {
            queries.push(synthetic);
        }

        let params = SearchParams {
            limit_per_query: tuning.limit_per_query,
            similarity_threshold: tuning.enhanced_threshold,
            weights: tuning.fusion_weights,
            category: tuning.category.clone(),
        };

        let pool = dedup_candidates(self.search.search_many(&queries, &params).await?);
        debug!(queries = queries.len(), pool = pool.len(), "Enhanced tier candidate pool");
        if pool.is_empty() {
            return Ok(Vec::new());
        }

        let diversified = mmr::select(&question_embedding, pool, tuning.mmr_top_k, tuning.mmr_lambda);
        let reranked = LlmReranker::new(generator)
            .rerank(question, diversified, tuning.final_limit)
            .await;
        Ok(to_citations(&reranked))
    }

    async fn basic_tier(
        &self,
        question: &str,
        tuning: &RetrievalTuning,
    ) -> Result<Vec<Citation>, AppError> {
        let params = SearchParams {
            limit_per_query: tuning.final_limit,
            similarity_threshold: tuning.basic_threshold,
            weights: tuning.fusion_weights,
            category: tuning.category.clone(),
        };

        let candidates = dedup_candidates(self.search.basic_search(question, &params).await?);
        let mut citations = to_citations(&candidates);
        sort_by_similarity_desc(&mut citations);
        Ok(citations)
    }
}

fn dedup_candidates(candidates: Vec<Candidate>) -> Vec<Candidate> {
    dedup_by_content(candidates, |candidate| candidate.content.as_str())
}

fn to_citations(candidates: &[Candidate]) -> Vec<Citation> {
    candidates.iter().map(Candidate::to_citation).collect()
}
