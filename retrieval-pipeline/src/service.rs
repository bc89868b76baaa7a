use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::{
        conversation_store::ConversationStore,
        types::{
            citation::Citation,
            conversation::derive_title,
            message::{format_history, Message, MessageRole},
        },
    },
    utils::llm::TextGenerator,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::{
    answer_retrieval::{AnswerSynthesizer, SynthesisParams, APOLOGY_MESSAGE},
    cache::{cache_key, CacheStats, ResponseCache},
    pipeline::{FallbackController, RetrievalConfig, RetrievalTier},
    rate_limit::RateLimiter,
};

pub const NO_RELEVANT_CONTENT_MESSAGE: &str = "I couldn't find any relevant information in the FAQ user guides to answer your question. Please try asking about specific features like homecare provider search, residential facility comparison, maps navigation, news reading, or SA2 analysis.";

const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub user_id: String,
    /// Continue an existing conversation; a new one is created when absent.
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Response shape shared by answers, "nothing found" and apologies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: String,
    /// Always empty; citations only ground the answer.
    pub citations: Vec<Citation>,
    /// Whether earlier turns were passed to the model.
    pub context_used: bool,
    pub processing_time_ms: u64,
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
    pub tier: Option<RetrievalTier>,
    pub cached: bool,
}

impl ChatResponse {
    fn with_message(message: &str) -> Self {
        Self {
            message: message.to_string(),
            citations: Vec::new(),
            context_used: false,
            processing_time_ms: 0,
            conversation_id: None,
            message_id: None,
            tier: None,
            cached: false,
        }
    }

    pub fn apology() -> Self {
        Self::with_message(APOLOGY_MESSAGE)
    }

    pub fn no_content() -> Self {
        Self::with_message(NO_RELEVANT_CONTENT_MESSAGE)
    }
}

#[derive(Debug, Clone)]
pub struct CachedAnswer {
    pub message: String,
    pub tier: Option<RetrievalTier>,
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Question-in, answer-out entry point tying retrieval, synthesis, caching and
/// conversation persistence together.
///
/// The response cache and the rate limiter are opt-in and live as long as the
/// service does.
pub struct AnswerService {
    controller: FallbackController,
    synthesizer: AnswerSynthesizer,
    store: Arc<dyn ConversationStore>,
    cache: Option<ResponseCache<CachedAnswer>>,
    rate_limiter: Option<RateLimiter>,
    config: RetrievalConfig,
    store_timeout: Duration,
}

impl AnswerService {
    pub fn new(
        controller: FallbackController,
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn ConversationStore>,
        config: RetrievalConfig,
    ) -> Self {
        let synthesizer = AnswerSynthesizer::new(
            generator,
            SynthesisParams::default(),
            config.tuning.retry_citation_limit,
        );
        Self {
            controller,
            synthesizer,
            store,
            cache: None,
            rate_limiter: None,
            config,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_synthesis(mut self, params: SynthesisParams) -> Self {
        self.synthesizer = self.synthesizer.with_params(params);
        self
    }

    #[must_use]
    pub fn with_cache(mut self, capacity: usize, ttl: Duration) -> Self {
        self.cache = Some(ResponseCache::new(capacity, ttl));
        self
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// `None` when the service runs without a cache.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(ResponseCache::stats)
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    fn cached(&self, key: &str) -> Option<CachedAnswer> {
        self.cache.as_ref().and_then(|cache| cache.get(key))
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        tokio::time::timeout(self.store_timeout, call)
            .await
            .map_err(|_| {
                AppError::Timeout(self.store_timeout.as_millis(), operation.to_string())
            })?
    }

    async fn start_conversation(&self, user_id: &str, question: &str) -> Option<String> {
        let title = derive_title(question);
        match self
            .bounded(
                "create conversation",
                self.store.create_conversation(user_id, &title),
            )
            .await
        {
            Ok(id) => {
                debug!(conversation_id = %id, %title, "Conversation created");
                Some(id)
            }
            Err(err) => {
                warn!(error = %err, "Could not create conversation; answering without one");
                None
            }
        }
    }

    async fn load_history(&self, conversation_id: &str) -> Vec<Message> {
        self.bounded("list messages", self.store.list_messages(conversation_id))
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, conversation_id, "Could not load conversation history");
                Vec::new()
            })
    }

    /// Best-effort append. Citations are never persisted.
    async fn record_turn(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        processing_time_ms: Option<u64>,
    ) -> Option<String> {
        match self
            .bounded(
                "append message",
                self.store.append_message(
                    conversation_id,
                    role,
                    content,
                    Vec::new(),
                    processing_time_ms,
                ),
            )
            .await
        {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(error = %err, conversation_id, %role, "Could not persist message");
                None
            }
        }
    }

    async fn respond(
        &self,
        conversation_id: Option<String>,
        message: String,
        tier: Option<RetrievalTier>,
        context_used: bool,
        cached: bool,
        started: Instant,
    ) -> ChatResponse {
        let processing_time_ms = elapsed_ms(started);
        let message_id = match &conversation_id {
            Some(id) => {
                self.record_turn(id, MessageRole::Assistant, &message, Some(processing_time_ms))
                    .await
            }
            None => None,
        };

        ChatResponse {
            message,
            citations: Vec::new(),
            context_used,
            processing_time_ms,
            conversation_id,
            message_id,
            tier,
            cached,
        }
    }

    /// Answers one question within a conversation.
    ///
    /// Persistence failures are logged and never fail the call. An error is
    /// returned for an empty question, for a user over the rate limit, or when
    /// retrieval fails with a transport error and no cached answer exists.
    #[instrument(skip_all, fields(user_id = %request.user_id))]
    pub async fn ask(&self, request: AskRequest) -> Result<ChatResponse, AppError> {
        let started = Instant::now();
        let question = request.question.trim();
        if question.is_empty() {
            return Err(AppError::Validation("question must not be empty".into()));
        }
        if let Some(limiter) = &self.rate_limiter {
            let status = limiter.check(&request.user_id)?;
            debug!(remaining = status.remaining, "Rate limit checked");
        }

        let conversation_id = match request.conversation_id {
            Some(id) => Some(id),
            None => self.start_conversation(&request.user_id, question).await,
        };

        let history = match &conversation_id {
            Some(id) => self.load_history(id).await,
            None => Vec::new(),
        };
        if let Some(id) = &conversation_id {
            self.record_turn(id, MessageRole::User, question, None).await;
        }

        let first_turn = history.is_empty();
        let context = format_history(&history, self.config.tuning.context_messages);
        let key = cache_key(question, self.config.tuning.category.as_deref());

        if first_turn {
            if let Some(hit) = self.cached(&key) {
                info!("Serving cached answer");
                return Ok(self
                    .respond(conversation_id, hit.message, hit.tier, false, true, started)
                    .await);
            }
        }

        let outcome = match self.controller.retrieve(question, &self.config).await {
            Ok(outcome) => outcome,
            Err(err) => {
                if let Some(hit) = self.cached(&key) {
                    warn!(error = %err, "Retrieval failed; serving cached answer");
                    return Ok(self
                        .respond(conversation_id, hit.message, hit.tier, false, true, started)
                        .await);
                }
                return Err(err);
            }
        };

        if outcome.citations.is_empty() {
            info!("No relevant content for question");
            return Ok(self
                .respond(
                    conversation_id,
                    NO_RELEVANT_CONTENT_MESSAGE.to_string(),
                    None,
                    !first_turn,
                    false,
                    started,
                )
                .await);
        }

        let synthesis = self
            .synthesizer
            .synthesize(question, &outcome.citations, &context)
            .await;
        info!(
            tier = ?outcome.tier,
            step = ?synthesis.step,
            citations = outcome.citations.len(),
            "Answer ready"
        );

        if let Some(cache) = self.cache.as_ref().filter(|_| first_turn) {
            cache.insert(
                key,
                CachedAnswer {
                    message: synthesis.text.clone(),
                    tier: outcome.tier,
                },
            );
        }

        Ok(self
            .respond(
                conversation_id,
                synthesis.text,
                outcome.tier,
                !first_turn,
                false,
                started,
            )
            .await)
    }
}

#[cfg(test)]
mod tests {
    use common::utils::llm::Generation;

    use super::*;
    use crate::{
        search::{HybridSearchClient, IndexHit},
        test_support::{hybrid_hit, FakeEmbedder, FakeIndex, MemoryStore, ScriptedGenerator},
    };

    const QUESTION: &str = "How do I compare two home care providers?";

    fn compare_hits() -> Vec<IndexHit> {
        let mut chunk = crate::test_support::chunk(
            "homecare_userguide.docx",
            3,
            "Open /homecare/compare, tick up to five providers and press Compare to see fees side by side.",
        );
        chunk.section_title = Some("Comparing providers".into());
        vec![hybrid_hit(chunk, 0.86)]
    }

    fn answering_generator() -> ScriptedGenerator {
        ScriptedGenerator::new(|request| {
            let text = if request.prompt.contains("USER QUESTION") {
                "## Comparing providers\nTo compare providers [Home Care User Guide - Comparing providers]: 1. Go to /homecare/compare. 2. Tick up to five providers. 3. Press Compare."
            } else {
                r#"[{"index": 0, "score": 95}]"#
            };
            Ok(Generation::from_text(text))
        })
    }

    struct Harness {
        service: AnswerService,
        index: Arc<FakeIndex>,
        generator: Arc<ScriptedGenerator>,
        store: Arc<MemoryStore>,
    }

    fn harness(index: FakeIndex, generator: ScriptedGenerator, store: MemoryStore) -> Harness {
        let index = Arc::new(index);
        let generator = Arc::new(generator);
        let store = Arc::new(store);
        let controller = FallbackController::new(
            HybridSearchClient::new(
                Arc::new(FakeEmbedder::default()),
                index.clone(),
                Duration::from_secs(1),
            ),
            generator.clone(),
        );
        let service = AnswerService::new(
            controller,
            generator.clone(),
            store.clone(),
            RetrievalConfig::default(),
        )
        .with_cache(16, Duration::from_secs(600));
        Harness {
            service,
            index,
            generator,
            store,
        }
    }

    fn ask(question: &str) -> AskRequest {
        AskRequest {
            question: question.to_string(),
            user_id: "user-1".to_string(),
            conversation_id: None,
        }
    }

    #[tokio::test]
    async fn answers_compare_question_without_inline_references() {
        let h = harness(
            FakeIndex::hybrid_returning(compare_hits()),
            answering_generator(),
            MemoryStore::default(),
        );

        let response = h.service.ask(ask(QUESTION)).await.expect("answer");

        assert!(response.citations.is_empty());
        assert!(!response.message.contains('['));
        assert!(response
            .message
            .lines()
            .any(|line| line.starts_with("1. ")));
        assert!(response.message.starts_with("## Comparing providers\n\n"));
        assert_eq!(response.tier, Some(RetrievalTier::Hybrid));
        assert!(!response.cached);
        assert!(!response.context_used);

        // The chunk grounded the answer even though no citation is returned.
        assert_eq!(h.generator.prompts_containing("/homecare/compare, tick up"), 2);
        assert!(response.conversation_id.is_some());
        assert!(response.message_id.is_some());
    }

    #[tokio::test]
    async fn persists_both_turns_with_empty_citations() {
        let h = harness(
            FakeIndex::hybrid_returning(compare_hits()),
            answering_generator(),
            MemoryStore::default(),
        );

        let response = h.service.ask(ask(QUESTION)).await.expect("answer");

        let messages = h.store.stored_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content, QUESTION);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, response.message);
        assert!(messages.iter().all(|m| m.citations.is_empty()));
        assert!(messages[1].processing_time_ms.is_some());

        let conversations = h.store.conversations.lock().unwrap();
        assert_eq!(conversations[0].title, QUESTION);
    }

    #[tokio::test]
    async fn persistence_failure_still_answers() {
        let h = harness(
            FakeIndex::hybrid_returning(compare_hits()),
            answering_generator(),
            MemoryStore::failing_appends(),
        );

        let response = h.service.ask(ask(QUESTION)).await.expect("answer");

        assert!(response.message.contains("1. Go to /homecare/compare."));
        assert!(response.message_id.is_none());
        assert!(h.store.stored_messages().is_empty());
    }

    #[tokio::test]
    async fn repeated_first_turn_is_served_from_cache() {
        let h = harness(
            FakeIndex::hybrid_returning(compare_hits()),
            answering_generator(),
            MemoryStore::default(),
        );

        let first = h.service.ask(ask(QUESTION)).await.expect("answer");
        let calls_after_first = h.generator.calls();
        let second = h
            .service
            .ask(ask("how do I compare two home-care providers"))
            .await
            .expect("answer");

        assert!(second.cached);
        assert_eq!(second.message, first.message);
        assert_eq!(h.index.hybrid_calls(), 1);
        assert_eq!(h.generator.calls(), calls_after_first);
        assert_eq!(h.service.cache_stats().map(|stats| stats.hits), Some(1));
    }

    #[tokio::test]
    async fn service_without_cache_always_retrieves() {
        let index = Arc::new(FakeIndex::hybrid_returning(compare_hits()));
        let generator = Arc::new(answering_generator());
        let controller = FallbackController::new(
            HybridSearchClient::new(
                Arc::new(FakeEmbedder::default()),
                index.clone(),
                Duration::from_secs(1),
            ),
            generator.clone(),
        );
        let service = AnswerService::new(
            controller,
            generator,
            Arc::new(MemoryStore::default()),
            RetrievalConfig::default(),
        );

        service.ask(ask(QUESTION)).await.expect("answer");
        let second = service.ask(ask(QUESTION)).await.expect("answer");

        assert!(!second.cached);
        assert_eq!(index.hybrid_calls(), 2);
        assert!(service.cache_stats().is_none());
    }

    #[tokio::test]
    async fn second_request_over_the_limit_is_rejected() {
        let h = harness(
            FakeIndex::hybrid_returning(compare_hits()),
            answering_generator(),
            MemoryStore::default(),
        );
        let service = h
            .service
            .with_rate_limiter(RateLimiter::new(1, Duration::from_secs(60), 10));

        service.ask(ask(QUESTION)).await.expect("first answer");
        let err = service.ask(ask("Where is the news page?")).await.unwrap_err();

        assert!(matches!(err, AppError::RateLimited(ref user) if user == "user-1"));
        assert!(!err.is_retryable());
        assert_eq!(h.index.hybrid_calls(), 1);
        assert_eq!(h.store.stored_messages().len(), 2);

        let other_user = service
            .ask(AskRequest {
                user_id: "user-2".to_string(),
                ..ask(QUESTION)
            })
            .await
            .expect("other user answered");
        assert!(other_user.cached);
    }

    #[tokio::test]
    async fn follow_up_turn_uses_history_and_skips_cache() {
        let h = harness(
            FakeIndex::hybrid_returning(compare_hits()),
            answering_generator(),
            MemoryStore::default(),
        );

        let first = h.service.ask(ask(QUESTION)).await.expect("answer");
        let follow_up = h
            .service
            .ask(AskRequest {
                conversation_id: first.conversation_id.clone(),
                ..ask(QUESTION)
            })
            .await
            .expect("answer");

        assert!(!follow_up.cached);
        assert!(follow_up.context_used);
        assert_eq!(h.index.hybrid_calls(), 2);
        assert_eq!(h.generator.prompts_containing("CONVERSATION CONTEXT:\nUSER: "), 1);
        assert_eq!(h.store.stored_messages().len(), 4);
    }

    #[tokio::test]
    async fn nothing_found_is_a_normal_response() {
        let h = harness(
            FakeIndex::empty(),
            ScriptedGenerator::replying(""),
            MemoryStore::default(),
        );

        let response = h.service.ask(ask(QUESTION)).await.expect("answer");

        assert_eq!(response.message, ChatResponse::no_content().message);
        assert_eq!(response.tier, None);
        assert!(response.citations.is_empty());
        assert_eq!(h.generator.prompts_containing("USER QUESTION"), 0);
    }

    #[tokio::test]
    async fn final_tier_transport_failure_is_returned() {
        let h = harness(
            FakeIndex::new(
                |_| Err(AppError::Search("index offline".into())),
                |_| Err(AppError::Search("index offline".into())),
            ),
            ScriptedGenerator::failing(),
            MemoryStore::default(),
        );

        let err = h.service.ask(ask(QUESTION)).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(ChatResponse::apology().message, APOLOGY_MESSAGE);
    }

    #[tokio::test]
    async fn synthesis_params_reach_the_model() {
        let h = harness(
            FakeIndex::hybrid_returning(compare_hits()),
            answering_generator(),
            MemoryStore::default(),
        );
        let service = h.service.with_synthesis(SynthesisParams {
            max_tokens: 300,
            ..SynthesisParams::default()
        });

        service.ask(ask(QUESTION)).await.expect("answer");

        let answer_request = h
            .generator
            .requests()
            .into_iter()
            .find(|request| request.prompt.contains("USER QUESTION"))
            .expect("answer request");
        assert_eq!(answer_request.max_tokens, Some(300));
        assert_eq!(answer_request.temperature, Some(0.3));
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        let h = harness(FakeIndex::empty(), ScriptedGenerator::failing(), MemoryStore::default());

        let err = h.service.ask(ask("   ")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(h.store.conversations.lock().unwrap().is_empty());
    }
}
