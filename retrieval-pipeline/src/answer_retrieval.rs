use std::{fmt::Write as _, sync::Arc};

use common::{
    error::AppError,
    storage::types::citation::Citation,
    utils::llm::{GenerationRequest, ModelTier, TextGenerator},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::{markdown::post_process, scoring::sort_by_similarity_desc, titles::document_title};

pub const APOLOGY_MESSAGE: &str = "I'm sorry, I encountered an error while processing your question. Please try again or rephrase your question.";

const EXTRACTIVE_CITATIONS: usize = 3;
const EXTRACTIVE_SNIPPET_CHARS: usize = 300;

/// Sampling parameters for the answer call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            temperature: 0.3,
            top_p: 0.9,
            top_k: 40,
        }
    }
}

/// Which rung of the ladder produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisStep {
    Primary,
    FastRetry,
    Extractive,
    Apology,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesis {
    pub text: String,
    pub step: SynthesisStep,
}

pub fn relevance_band(similarity: f32) -> &'static str {
    if similarity > 0.8 {
        "HIGH RELEVANCE"
    } else if similarity > 0.6 {
        "MEDIUM RELEVANCE"
    } else {
        "LOWER RELEVANCE"
    }
}

fn citation_block(index: usize, citation: &Citation) -> String {
    let mut block = format!(
        "[USER GUIDE {}] {}\nGuide: \"{}\"\nCategory: {}\n",
        index + 1,
        relevance_band(citation.similarity),
        document_title(&citation.document_name),
        citation.category,
    );
    if let Some(section) = &citation.section_title {
        let _ = writeln!(block, "Section: {section}");
    }
    let _ = write!(
        block,
        "Relevance: {:.1}%\n\nCONTENT:\n{}\n\n{}",
        f64::from(citation.similarity) * 100.0,
        citation.content_preview.trim(),
        "=".repeat(80)
    );
    block
}

/// Grounding prompt: guide excerpts, optional conversation context, then the question.
pub fn build_prompt(question: &str, citations: &[Citation], conversation_context: &str) -> String {
    let context = citations
        .iter()
        .enumerate()
        .map(|(index, citation)| citation_block(index, citation))
        .collect::<Vec<_>>()
        .join("\n\n");

    let conversation = if conversation_context.trim().is_empty() {
        String::new()
    } else {
        format!(
            "CONVERSATION CONTEXT:\n{}\n\nConsider this conversation history to keep continuity and avoid repeating earlier answers.\n\n",
            conversation_context.trim()
        )
    };

    format!(
        r"You are a helpful assistant that explains how to use an aged care analytics platform. You give clear, step-by-step guidance based only on the official user guides below.

RESPONSE REQUIREMENTS:
1. Give step-by-step instructions when explaining how to use a feature.
2. Use friendly, accessible language while staying accurate.
3. Prioritize information marked HIGH RELEVANCE and combine guides when helpful.
4. If the guides do not cover the question, say so briefly.

FORMATTING:
- Use `##` for section headings and `###` for sub-headings, never deeper.
- Use `1.` numbered lists for ordered steps and `- ` bullets for everything else.
- Leave a blank line before and after every heading and list.
- Do not mention guide names, section names or sources inline, and never write bracketed references such as [Guide Name].

{conversation}USER GUIDE CONTENT:
{context}

USER QUESTION: {question}

Answer the question using the user guide content above."
    )
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn snippet(text: &str, max_chars: usize) -> String {
    let collapsed = collapse_whitespace(text);
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let truncated: String = collapsed.chars().take(max_chars).collect();
    format!("{}...", truncated.trim_end())
}

/// Bulleted digest of the top citations, used when the model produced nothing.
pub fn extractive_answer(citations: &[Citation], limit: usize) -> String {
    let bullets = citations
        .iter()
        .take(limit.max(1))
        .map(|citation| {
            let title = document_title(&citation.document_name);
            let heading = match &citation.section_title {
                Some(section) => format!("{title}, {section}"),
                None => title,
            };
            format!(
                "- **{heading}**: {}",
                snippet(&citation.content_preview, EXTRACTIVE_SNIPPET_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!("Here is what the user guides say about this:\n\n{bullets}")
}

/// Produces the final answer text, degrading through retries so it is never empty.
#[derive(Clone)]
pub struct AnswerSynthesizer {
    generator: Arc<dyn TextGenerator>,
    params: SynthesisParams,
    retry_citation_limit: usize,
}

impl AnswerSynthesizer {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        params: SynthesisParams,
        retry_citation_limit: usize,
    ) -> Self {
        Self {
            generator,
            params,
            retry_citation_limit: retry_citation_limit.max(1),
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: SynthesisParams) -> Self {
        self.params = params;
        self
    }

    fn request(&self, prompt: String, model: ModelTier) -> GenerationRequest {
        GenerationRequest::new(prompt)
            .with_model(model)
            .with_max_tokens(self.params.max_tokens)
            .with_temperature(self.params.temperature)
            .with_top_p(self.params.top_p)
            .with_top_k(self.params.top_k)
    }

    async fn attempt(&self, prompt: String, model: ModelTier) -> Result<Option<String>, AppError> {
        let generation = self.generator.generate(self.request(prompt, model)).await?;
        Ok(generation
            .salvage()
            .map(post_process)
            .filter(|text| !text.trim().is_empty()))
    }

    #[instrument(skip_all, fields(citations = citations.len()))]
    pub async fn synthesize(
        &self,
        question: &str,
        citations: &[Citation],
        conversation_context: &str,
    ) -> Synthesis {
        if citations.is_empty() {
            warn!("No citations to ground an answer on, returning apology");
            return Synthesis {
                text: APOLOGY_MESSAGE.to_string(),
                step: SynthesisStep::Apology,
            };
        }

        let mut ordered = citations.to_vec();
        sort_by_similarity_desc(&mut ordered);

        let prompt = build_prompt(question, &ordered, conversation_context);
        match self.attempt(prompt, ModelTier::Primary).await {
            Ok(Some(text)) => {
                info!(chars = text.len(), "Answer generated");
                return Synthesis {
                    text,
                    step: SynthesisStep::Primary,
                };
            }
            Ok(None) => warn!("Primary model returned no usable text, retrying on fast model"),
            Err(err) => warn!(error = %err, "Primary model call failed, retrying on fast model"),
        }

        let shortened: Vec<Citation> = ordered
            .iter()
            .take(self.retry_citation_limit)
            .cloned()
            .collect();
        let retry_prompt = build_prompt(question, &shortened, conversation_context);
        match self.attempt(retry_prompt, ModelTier::Fast).await {
            Ok(Some(text)) => {
                info!(chars = text.len(), "Answer generated on retry");
                return Synthesis {
                    text,
                    step: SynthesisStep::FastRetry,
                };
            }
            Ok(None) => warn!("Fast model returned no usable text, using extractive answer"),
            Err(err) => warn!(error = %err, "Fast model call failed, using extractive answer"),
        }

        let text = post_process(&extractive_answer(&ordered, EXTRACTIVE_CITATIONS));
        debug!(chars = text.len(), "Extractive answer built");
        Synthesis {
            text,
            step: SynthesisStep::Extractive,
        }
    }
}
