use common::utils::llm::{GenerationRequest, TextGenerator};
use tracing::{debug, warn};

pub fn hyde_prompt(question: &str) -> String {
    format!(
        "Write a short, plausible answer (120-180 words) to this question as it might appear in a \
         generic user guide. It will not be shown to anyone and is not fact-checked: it is a \
         synthetic draft used only to improve search.\nQ: {question}"
    )
}

/// Drafts a hypothetical answer to use as an extra search probe.
///
/// The draft is never shown to the user. On any failure, or an empty draft,
/// the original question is returned so the stage becomes a no-op.
pub async fn hypothetical_answer(generator: &dyn TextGenerator, question: &str) -> String {
    let request = GenerationRequest::new(hyde_prompt(question))
        .with_temperature(0.5)
        .with_max_tokens(320);

    match generator.generate(request).await {
        Ok(generation) => match generation.salvage() {
            Some(draft) => {
                debug!(chars = draft.len(), "Generated hypothetical answer");
                draft.to_string()
            }
            None => {
                warn!("Hypothetical answer was empty; using the question instead");
                question.to_string()
            }
        },
        Err(err) => {
            warn!(error = %err, "Hypothetical answer generation failed");
            question.to_string()
        }
    }
}
