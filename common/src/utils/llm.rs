use std::{sync::Arc, time::Duration};

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestUserMessage, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
    Client,
};
use async_trait::async_trait;
use tracing::debug;

use crate::{error::AppError, utils::config::AppConfig};

/// Which configured model a request should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelTier {
    #[default]
    Primary,
    /// Smaller, faster variant used for retries.
    Fast,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: ModelTier,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    /// Not every backend honours `top_k`; OpenAI-compatible ones ignore it.
    pub top_k: Option<u32>,
    pub candidate_count: u8,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: ModelTier::Primary,
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            candidate_count: 1,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: ModelTier) -> Self {
        self.model = model;
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    #[must_use]
    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    #[must_use]
    pub fn with_candidate_count(mut self, count: u8) -> Self {
        self.candidate_count = count.max(1);
        self
    }
}

/// Model output. `text` may be empty while `candidates` still carry usable content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub candidates: Vec<String>,
}

impl Generation {
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            candidates: vec![text.clone()],
            text,
        }
    }

    /// First non-blank text, looking at `text` and then at each candidate.
    pub fn salvage(&self) -> Option<&str> {
        std::iter::once(self.text.as_str())
            .chain(self.candidates.iter().map(String::as_str))
            .map(str::trim)
            .find(|text| !text.is_empty())
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, AppError>;
}

#[derive(Clone)]
pub struct OpenAiGenerator {
    client: Arc<Client<OpenAIConfig>>,
    primary_model: String,
    fast_model: String,
    timeout: Duration,
}

impl OpenAiGenerator {
    pub fn new(
        client: Arc<Client<OpenAIConfig>>,
        primary_model: String,
        fast_model: String,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            primary_model,
            fast_model,
            timeout,
        }
    }

    pub fn from_config(config: &AppConfig, client: Arc<Client<OpenAIConfig>>) -> Self {
        Self::new(
            client,
            config.chat_model.clone(),
            config.fallback_chat_model.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Primary => &self.primary_model,
            ModelTier::Fast => &self.fast_model,
        }
    }

    pub fn create_chat_request(
        &self,
        request: &GenerationRequest,
    ) -> Result<CreateChatCompletionRequest, AppError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model_for(request.model))
            .messages([ChatCompletionRequestUserMessage::from(request.prompt.clone()).into()])
            .n(request.candidate_count);

        if let Some(max_tokens) = request.max_tokens {
            args.max_completion_tokens(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            args.temperature(temperature);
        }
        if let Some(top_p) = request.top_p {
            args.top_p(top_p);
        }

        args.build()
            .map_err(|err| AppError::Generation(err.to_string()))
    }
}

pub fn process_llm_response(response: CreateChatCompletionResponse) -> Generation {
    let candidates: Vec<String> = response
        .choices
        .into_iter()
        .filter_map(|choice| choice.message.content)
        .collect();
    let text = candidates.first().cloned().unwrap_or_default();

    Generation { text, candidates }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, AppError> {
        let chat_request = self.create_chat_request(&request)?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(chat_request))
            .await
            .map_err(|_| AppError::Generation(format!("timed out after {:?}", self.timeout)))?
            .map_err(|err| AppError::Generation(err.to_string()))?;

        let generation = process_llm_response(response);
        debug!(
            model = self.model_for(request.model),
            candidates = generation.candidates.len(),
            chars = generation.text.len(),
            "Generation completed"
        );

        Ok(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> OpenAiGenerator {
        OpenAiGenerator::new(
            Arc::new(Client::new()),
            "primary-model".into(),
            "fast-model".into(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn chat_request_uses_tier_model_and_sampling() {
        let request = GenerationRequest::new("Explain the compare page")
            .with_model(ModelTier::Fast)
            .with_max_tokens(200)
            .with_temperature(0.3)
            .with_top_p(0.9)
            .with_top_k(40);

        let chat = generator()
            .create_chat_request(&request)
            .expect("request builds");

        assert_eq!(chat.model, "fast-model");
        assert_eq!(chat.max_completion_tokens, Some(200));
        assert_eq!(chat.temperature, Some(0.3));
        assert_eq!(chat.top_p, Some(0.9));
        assert_eq!(chat.n, Some(1));
        assert_eq!(chat.messages.len(), 1);
    }

    #[test]
    fn salvage_prefers_text_then_candidates() {
        let generation = Generation {
            text: "  ".into(),
            candidates: vec![String::new(), "  recovered answer ".into()],
        };
        assert_eq!(generation.salvage(), Some("recovered answer"));

        let empty = Generation::default();
        assert_eq!(empty.salvage(), None);

        assert_eq!(Generation::from_text("direct").salvage(), Some("direct"));
    }
}
