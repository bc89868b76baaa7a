use std::collections::HashMap;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{deserialize_flexible_id, document_chunk::DocumentChunk, StoredObject},
    },
};
use serde::Deserialize;
use surrealdb::sql::Thing;
use tracing::debug;

use crate::scoring::{cosine_similarity, min_max_normalize};

use super::{
    BasicHit, HybridHit, HybridSearchIndex, HybridSearchRequest, IndexHit, SemanticSearchRequest,
};

#[derive(Debug, Deserialize)]
struct ScoreRow {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    id: String,
    score: Option<f32>,
}

/// [`HybridSearchIndex`] over the `document_chunk` table.
///
/// Both channels are queried separately and fused here: cosine similarity on
/// the stored embedding plus min-max normalised BM25 from the full-text index.
#[derive(Clone)]
pub struct SurrealSearchIndex {
    db: SurrealDbClient,
}

impl SurrealSearchIndex {
    pub fn new(db: SurrealDbClient) -> Self {
        Self { db }
    }

    fn category_clause(category: Option<&str>, leading: &str) -> String {
        category
            .map(|_| format!(" {leading} category = $category"))
            .unwrap_or_default()
    }

    async fn semantic_rows(
        &self,
        embedding: &[f32],
        take: usize,
        threshold: Option<f32>,
        category: Option<&str>,
    ) -> Result<Vec<ScoreRow>, AppError> {
        let mut conditions = vec!["array::len(embedding) = $dimension".to_string()];
        if threshold.is_some() {
            conditions
                .push("vector::similarity::cosine(embedding, $embedding) >= $threshold".to_string());
        }
        if category.is_some() {
            conditions.push("category = $category".to_string());
        }

        let sql = format!(
            "SELECT id, vector::similarity::cosine(embedding, $embedding) AS score \
             FROM type::table($table) \
             WHERE {conditions} \
             ORDER BY score DESC \
             LIMIT $limit",
            conditions = conditions.join(" AND ")
        );

        let mut response = self
            .db
            .query(sql)
            .bind(("table", DocumentChunk::table_name()))
            .bind(("embedding", embedding.to_vec()))
            .bind(("dimension", embedding.len() as i64))
            .bind(("threshold", threshold.unwrap_or_default()))
            .bind(("category", category.map(str::to_owned)))
            .bind(("limit", take as i64))
            .await
            .map_err(search_error)?;

        response.take(0).map_err(search_error)
    }

    async fn lexical_rows(
        &self,
        terms: &str,
        take: usize,
        category: Option<&str>,
    ) -> Result<Vec<ScoreRow>, AppError> {
        if terms.trim().is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, (IF search::score(0) != NONE THEN search::score(0) ELSE 0 END) AS score \
             FROM type::table($table) \
             WHERE content @0@ $terms{category_clause} \
             ORDER BY score DESC \
             LIMIT $limit",
            category_clause = Self::category_clause(category, "AND")
        );

        let mut response = self
            .db
            .query(sql)
            .bind(("table", DocumentChunk::table_name()))
            .bind(("terms", terms.to_owned()))
            .bind(("category", category.map(str::to_owned)))
            .bind(("limit", take as i64))
            .await
            .map_err(search_error)?;

        response.take(0).map_err(search_error)
    }

    async fn load_chunks(&self, ids: &[String]) -> Result<HashMap<String, DocumentChunk>, AppError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let things: Vec<Thing> = ids
            .iter()
            .map(|id| Thing::from((DocumentChunk::table_name(), id.as_str())))
            .collect();

        let mut response = self
            .db
            .query("SELECT * FROM type::table($table) WHERE id IN $things")
            .bind(("table", DocumentChunk::table_name()))
            .bind(("things", things))
            .await
            .map_err(search_error)?;

        let chunks: Vec<DocumentChunk> = response.take(0).map_err(search_error)?;
        Ok(chunks
            .into_iter()
            .map(|chunk| (chunk.get_id().to_owned(), chunk))
            .collect())
    }
}

fn search_error(err: surrealdb::Error) -> AppError {
    AppError::Search(err.to_string())
}

#[async_trait]
impl HybridSearchIndex for SurrealSearchIndex {
    async fn hybrid_search(&self, request: HybridSearchRequest) -> Result<Vec<IndexHit>, AppError> {
        let category = request.category.as_deref();
        let semantic = self
            .semantic_rows(&request.query_embedding, request.match_count, None, category)
            .await?;
        let lexical = self
            .lexical_rows(&request.lexical_query, request.match_count, category)
            .await?;

        let raw_lexical: Vec<f32> = lexical
            .iter()
            .map(|row| row.score.unwrap_or_default())
            .collect();
        let lexical_scores: HashMap<&str, f32> = lexical
            .iter()
            .map(|row| row.id.as_str())
            .zip(min_max_normalize(&raw_lexical))
            .collect();

        let mut ids: Vec<String> = semantic.iter().map(|row| row.id.clone()).collect();
        for row in &lexical {
            if !ids.contains(&row.id) {
                ids.push(row.id.clone());
            }
        }

        let mut chunks = self.load_chunks(&ids).await?;

        let mut hits: Vec<HybridHit> = ids
            .iter()
            .filter_map(|id| {
                let chunk = chunks.remove(id)?;
                let semantic_score = cosine_similarity(&request.query_embedding, &chunk.embedding);
                let lexical_score = lexical_scores.get(id.as_str()).copied().unwrap_or(0.0);
                let hybrid_score = request.weights.fuse(semantic_score, lexical_score);
                Some(HybridHit {
                    chunk,
                    semantic_score,
                    lexical_score,
                    hybrid_score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.hybrid_score.total_cmp(&a.hybrid_score));
        hits.truncate(request.match_count);

        debug!(
            semantic = semantic.len(),
            lexical = lexical.len(),
            fused = hits.len(),
            "Fused hybrid search channels"
        );

        Ok(hits.into_iter().map(IndexHit::Hybrid).collect())
    }

    async fn semantic_search(
        &self,
        request: SemanticSearchRequest,
    ) -> Result<Vec<IndexHit>, AppError> {
        let rows = self
            .semantic_rows(
                &request.query_embedding,
                request.match_count,
                Some(request.threshold),
                request.category.as_deref(),
            )
            .await?;

        let ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
        let mut chunks = self.load_chunks(&ids).await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let chunk = chunks.remove(&row.id)?;
                Some(IndexHit::Basic(BasicHit {
                    chunk,
                    similarity: row.score.unwrap_or_default(),
                }))
            })
            .collect())
    }
}
