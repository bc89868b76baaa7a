//! Hand-written fakes for the pipeline's external collaborators.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::missing_panics_doc)]

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        conversation_store::ConversationStore,
        types::{
            citation::Citation,
            conversation::{Conversation, ConversationStatus},
            document_chunk::DocumentChunk,
            message::{Message, MessageRole},
        },
    },
    utils::{
        embedding::{Embedder, EmbeddingProvider},
        llm::{Generation, GenerationRequest, TextGenerator},
    },
};

use crate::search::{
    BasicHit, HybridHit, HybridSearchIndex, HybridSearchRequest, IndexHit, SemanticSearchRequest,
};

pub const TEST_DIMENSION: usize = 32;

pub fn chunk(document_name: &str, chunk_index: u32, content: &str) -> DocumentChunk {
    let embedding = futures::executor::block_on(
        EmbeddingProvider::new_hashed(TEST_DIMENSION).embed(content),
    )
    .expect("hashed embeddings never fail");

    DocumentChunk::new(
        document_name.to_string(),
        None,
        "homecare".to_string(),
        None,
        chunk_index,
        content.to_string(),
        embedding,
    )
    .expect("valid chunk")
}

pub fn hybrid_hit(chunk: DocumentChunk, score: f32) -> IndexHit {
    IndexHit::Hybrid(HybridHit {
        chunk,
        semantic_score: score,
        lexical_score: 0.0,
        hybrid_score: score,
    })
}

pub fn basic_hit(chunk: DocumentChunk, similarity: f32) -> IndexHit {
    IndexHit::Basic(BasicHit { chunk, similarity })
}

#[derive(Default)]
pub struct FakeEmbedder {
    failing: HashSet<String>,
    fail_all: bool,
    calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn failing_on(texts: &[&str]) -> Self {
        Self {
            failing: texts.iter().map(|t| (*t).to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn always_failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all || self.failing.contains(text) {
            return Err(AppError::Embedding(format!("quota exceeded for {text}")));
        }
        EmbeddingProvider::new_hashed(TEST_DIMENSION).embed(text).await
    }
}

type HybridScript = Box<dyn Fn(&HybridSearchRequest) -> Result<Vec<IndexHit>, AppError> + Send + Sync>;
type SemanticScript =
    Box<dyn Fn(&SemanticSearchRequest) -> Result<Vec<IndexHit>, AppError> + Send + Sync>;

pub struct FakeIndex {
    hybrid: HybridScript,
    semantic: SemanticScript,
    hybrid_calls: AtomicUsize,
    semantic_calls: AtomicUsize,
    hybrid_requests: Mutex<Vec<HybridSearchRequest>>,
}

impl FakeIndex {
    pub fn new(
        hybrid: impl Fn(&HybridSearchRequest) -> Result<Vec<IndexHit>, AppError> + Send + Sync + 'static,
        semantic: impl Fn(&SemanticSearchRequest) -> Result<Vec<IndexHit>, AppError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            hybrid: Box::new(hybrid),
            semantic: Box::new(semantic),
            hybrid_calls: AtomicUsize::new(0),
            semantic_calls: AtomicUsize::new(0),
            hybrid_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn hybrid_returning(hits: Vec<IndexHit>) -> Self {
        Self::new(move |_| Ok(hits.clone()), |_| Ok(Vec::new()))
    }

    pub fn empty() -> Self {
        Self::new(|_| Ok(Vec::new()), |_| Ok(Vec::new()))
    }

    pub fn hybrid_calls(&self) -> usize {
        self.hybrid_calls.load(Ordering::SeqCst)
    }

    pub fn semantic_calls(&self) -> usize {
        self.semantic_calls.load(Ordering::SeqCst)
    }

    pub fn hybrid_requests(&self) -> Vec<HybridSearchRequest> {
        self.hybrid_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HybridSearchIndex for FakeIndex {
    async fn hybrid_search(&self, request: HybridSearchRequest) -> Result<Vec<IndexHit>, AppError> {
        self.hybrid_calls.fetch_add(1, Ordering::SeqCst);
        let result = (self.hybrid)(&request);
        self.hybrid_requests.lock().unwrap().push(request);
        result
    }

    async fn semantic_search(
        &self,
        request: SemanticSearchRequest,
    ) -> Result<Vec<IndexHit>, AppError> {
        self.semantic_calls.fetch_add(1, Ordering::SeqCst);
        (self.semantic)(&request)
    }
}

type GeneratorScript = Box<dyn Fn(&GenerationRequest) -> Result<Generation, AppError> + Send + Sync>;

pub struct ScriptedGenerator {
    script: GeneratorScript,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(
        script: impl Fn(&GenerationRequest) -> Result<Generation, AppError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(Generation::from_text(text.clone())))
    }

    pub fn failing() -> Self {
        Self::new(|_| Err(AppError::Generation("model unavailable".into())))
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn prompts_containing(&self, needle: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.prompt.contains(needle))
            .count()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, AppError> {
        let result = (self.script)(&request);
        self.requests.lock().unwrap().push(request);
        result
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub conversations: Mutex<Vec<Conversation>>,
    pub messages: Mutex<Vec<Message>>,
    pub fail_appends: bool,
}

impl MemoryStore {
    pub fn failing_appends() -> Self {
        Self {
            fail_appends: true,
            ..Self::default()
        }
    }

    pub fn stored_messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_conversation(&self, user_id: &str, title: &str) -> Result<String, AppError> {
        let conversation = Conversation::new(user_id.to_string(), title.to_string());
        let id = conversation.id.clone();
        self.conversations.lock().unwrap().push(conversation);
        Ok(id)
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        citations: Vec<Citation>,
        processing_time_ms: Option<u64>,
    ) -> Result<String, AppError> {
        if self.fail_appends {
            return Err(AppError::Persistence("disk full".into()));
        }
        let mut messages = self.messages.lock().unwrap();
        let mut message = Message::new(
            conversation_id.to_string(),
            role,
            content.to_string(),
            citations,
            processing_time_ms,
        );
        message.message_index = messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .count() as u64;
        let id = message.id.clone();
        messages.push(message);
        Ok(id)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, AppError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn list_conversations(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Conversation>, AppError> {
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|c| c.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn archive_conversation(&self, conversation_id: &str) -> Result<(), AppError> {
        let mut conversations = self.conversations.lock().unwrap();
        let conversation = conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| AppError::NotFound(conversation_id.to_string()))?;
        conversation.status = ConversationStatus::Archived;
        Ok(())
    }
}
