use async_openai::error::OpenAIError;
use thiserror::Error;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Embedding service error: {0}")]
    Embedding(String),
    #[error("Search service error: {0}")]
    Search(String),
    #[error("Generation service error: {0}")]
    Generation(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Timed out after {0}ms: {1}")]
    Timeout(u128, String),
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Rate limit exceeded for {0}")]
    RateLimited(String),
}

impl AppError {
    /// Transport-class failures: the caller may retry the same request later.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Embedding(_)
                | Self::Search(_)
                | Self::Generation(_)
                | Self::Timeout(..)
                | Self::Database(_)
                | Self::OpenAI(_)
        )
    }
}
