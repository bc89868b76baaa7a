pub mod answer_retrieval;
pub mod cache;
pub mod hyde;
pub mod markdown;
pub mod mmr;
pub mod pipeline;
pub mod query_expansion;
pub mod rate_limit;
pub mod reranking;
pub mod scoring;
pub mod search;
pub mod service;
pub mod titles;

#[cfg(test)]
pub(crate) mod test_support;

use common::storage::types::{citation::Citation, document_chunk::DocumentChunk};

pub use pipeline::{FallbackController, RetrievalConfig, RetrievalOutcome, RetrievalTier, RetrievalTuning};
pub use service::{AnswerService, AskRequest, ChatResponse};

/// A corpus chunk annotated with the relevance signal of the query that found it.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub chunk_id: String,
    pub document_name: String,
    pub section_title: Option<String>,
    pub category: String,
    pub page_number: Option<u32>,
    pub chunk_index: u32,
    pub content: String,
    pub similarity: f32,
    pub query: String,
    /// Vector used for diversity selection: the chunk's own embedding when the
    /// index returned one, otherwise the embedding of `query`.
    pub embedding: Vec<f32>,
}

impl Candidate {
    pub fn from_chunk(
        chunk: DocumentChunk,
        similarity: f32,
        query: &str,
        query_embedding: &[f32],
    ) -> Self {
        let embedding = if chunk.embedding.is_empty() {
            query_embedding.to_vec()
        } else {
            chunk.embedding
        };

        Self {
            chunk_id: chunk.id,
            document_name: chunk.document_name,
            section_title: chunk.section_title,
            category: chunk.category,
            page_number: chunk.page_number,
            chunk_index: chunk.chunk_index,
            content: chunk.content,
            similarity,
            query: query.to_owned(),
            embedding,
        }
    }

    pub fn to_citation(&self) -> Citation {
        Citation {
            document_name: self.document_name.clone(),
            section_title: self.section_title.clone(),
            category: self.category.clone(),
            page_number: self.page_number,
            chunk_index: self.chunk_index,
            similarity: self.similarity,
            content_preview: self.content.clone(),
        }
    }
}
