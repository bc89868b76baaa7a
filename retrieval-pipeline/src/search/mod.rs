pub mod surreal;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::types::document_chunk::DocumentChunk,
    utils::embedding::Embedder,
};
use futures::future::join_all;
use tracing::{debug, warn};

use crate::{scoring::FusionWeights, Candidate};

pub use surreal::SurrealSearchIndex;

#[derive(Debug, Clone, PartialEq)]
pub struct HybridSearchRequest {
    pub query_embedding: Vec<f32>,
    pub lexical_query: String,
    pub match_count: usize,
    pub weights: FusionWeights,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SemanticSearchRequest {
    pub query_embedding: Vec<f32>,
    pub match_count: usize,
    pub threshold: f32,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HybridHit {
    pub chunk: DocumentChunk,
    pub semantic_score: f32,
    pub lexical_score: f32,
    pub hybrid_score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicHit {
    pub chunk: DocumentChunk,
    pub similarity: f32,
}

/// Raw index result, one variant per search contract.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexHit {
    Hybrid(HybridHit),
    Basic(BasicHit),
}

impl IndexHit {
    pub fn score(&self) -> f32 {
        match self {
            Self::Hybrid(hit) => hit.hybrid_score,
            Self::Basic(hit) => hit.similarity,
        }
    }

    pub fn into_candidate(self, query: &str, query_embedding: &[f32]) -> Candidate {
        match self {
            Self::Hybrid(hit) => {
                Candidate::from_chunk(hit.chunk, hit.hybrid_score, query, query_embedding)
            }
            Self::Basic(hit) => {
                Candidate::from_chunk(hit.chunk, hit.similarity, query, query_embedding)
            }
        }
    }
}

/// Corpus index offering fused semantic+lexical search and plain semantic search.
#[async_trait]
pub trait HybridSearchIndex: Send + Sync {
    async fn hybrid_search(&self, request: HybridSearchRequest) -> Result<Vec<IndexHit>, AppError>;

    async fn semantic_search(
        &self,
        request: SemanticSearchRequest,
    ) -> Result<Vec<IndexHit>, AppError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub limit_per_query: usize,
    pub similarity_threshold: f32,
    pub weights: FusionWeights,
    pub category: Option<String>,
}

/// Embeds queries and runs them against a [`HybridSearchIndex`].
#[derive(Clone)]
pub struct HybridSearchClient {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn HybridSearchIndex>,
    timeout: Duration,
}

impl HybridSearchClient {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn HybridSearchIndex>,
        timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            index,
            timeout,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        tokio::time::timeout(self.timeout, self.embedder.embed(text))
            .await
            .map_err(|_| AppError::Embedding(format!("timed out after {:?}", self.timeout)))?
    }

    /// Embeds `query` and runs one hybrid search call for it.
    pub async fn search(
        &self,
        query: &str,
        params: &SearchParams,
    ) -> Result<Vec<Candidate>, AppError> {
        let embedding = self.embed(query).await?;
        self.search_with_embedding(query, &embedding, params).await
    }

    pub async fn search_with_embedding(
        &self,
        query: &str,
        embedding: &[f32],
        params: &SearchParams,
    ) -> Result<Vec<Candidate>, AppError> {
        let request = HybridSearchRequest {
            query_embedding: embedding.to_vec(),
            lexical_query: query.to_owned(),
            match_count: params.limit_per_query,
            weights: params.weights,
            category: params.category.clone(),
        };

        let hits = tokio::time::timeout(self.timeout, self.index.hybrid_search(request))
            .await
            .map_err(|_| AppError::Search(format!("timed out after {:?}", self.timeout)))??;

        let candidates: Vec<Candidate> = hits
            .into_iter()
            .filter(|hit| hit.score() >= params.similarity_threshold)
            .take(params.limit_per_query)
            .map(|hit| hit.into_candidate(query, embedding))
            .collect();

        debug!(query, results = candidates.len(), "Hybrid search completed");
        Ok(candidates)
    }

    /// Runs every query concurrently and concatenates the results in query order.
    ///
    /// A failing query only loses its own results; the call errors only when every query failed.
    pub async fn search_many(
        &self,
        queries: &[String],
        params: &SearchParams,
    ) -> Result<Vec<Candidate>, AppError> {
        let settled = join_all(queries.iter().map(|query| self.search(query, params))).await;

        let mut candidates = Vec::new();
        let mut first_error = None;
        let mut failures = 0usize;

        for (query, outcome) in queries.iter().zip(settled) {
            match outcome {
                Ok(mut found) => candidates.append(&mut found),
                Err(err) => {
                    failures += 1;
                    warn!(query = %query, error = %err, "Query failed during fan-out search");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) if failures == queries.len() => Err(err),
            _ => Ok(candidates),
        }
    }

    /// Single semantic search at the given threshold, with no lexical channel.
    pub async fn basic_search(
        &self,
        query: &str,
        params: &SearchParams,
    ) -> Result<Vec<Candidate>, AppError> {
        let embedding = self.embed(query).await?;
        let request = SemanticSearchRequest {
            query_embedding: embedding.clone(),
            match_count: params.limit_per_query,
            threshold: params.similarity_threshold,
            category: params.category.clone(),
        };

        let hits = tokio::time::timeout(self.timeout, self.index.semantic_search(request))
            .await
            .map_err(|_| AppError::Search(format!("timed out after {:?}", self.timeout)))??;

        Ok(hits
            .into_iter()
            .filter(|hit| hit.score() >= params.similarity_threshold)
            .take(params.limit_per_query)
            .map(|hit| hit.into_candidate(query, &embedding))
            .collect())
    }
}
