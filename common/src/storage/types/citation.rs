use serde::{Deserialize, Serialize};

/// Minimal projection of a retrieved chunk used to ground an answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub document_name: String,
    pub section_title: Option<String>,
    pub category: String,
    pub page_number: Option<u32>,
    pub chunk_index: u32,
    pub similarity: f32,
    pub content_preview: String,
}
