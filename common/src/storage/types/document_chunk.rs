use uuid::Uuid;

use crate::{error::AppError, stored_object};

stored_object!(DocumentChunk, "document_chunk", {
    document_name: String,
    section_title: Option<String>,
    category: String,
    page_number: Option<u32>,
    chunk_index: u32,
    content: String,
    embedding: Vec<f32>
});

impl DocumentChunk {
    pub fn new(
        document_name: String,
        section_title: Option<String>,
        category: String,
        page_number: Option<u32>,
        chunk_index: u32,
        content: String,
        embedding: Vec<f32>,
    ) -> Result<Self, AppError> {
        if content.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "chunk {chunk_index} of {document_name} has no content"
            )));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_name,
            section_title,
            category,
            page_number,
            chunk_index,
            content,
            embedding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::SurrealDbClient;

    #[test]
    fn rejects_blank_content() {
        let result = DocumentChunk::new(
            "homecare_userguide.docx".into(),
            None,
            "homecare".into(),
            None,
            0,
            "   ".into(),
            vec![0.1, 0.2],
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn persists_and_reads_back() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let chunk = DocumentChunk::new(
            "homecare_userguide.docx".into(),
            Some("Comparison Feature".into()),
            "homecare".into(),
            Some(4),
            2,
            "Open /homecare/compare to compare providers.".into(),
            vec![0.5, 0.5, 0.0],
        )
        .expect("valid chunk");

        db.store_item(chunk.clone()).await.expect("store chunk");

        let fetched: Option<DocumentChunk> = db.get_item(&chunk.id).await.expect("fetch chunk");
        let fetched = fetched.expect("chunk present");
        assert_eq!(fetched.section_title.as_deref(), Some("Comparison Feature"));
        assert_eq!(fetched.page_number, Some(4));
        assert_eq!(fetched.embedding, chunk.embedding);
    }
}
