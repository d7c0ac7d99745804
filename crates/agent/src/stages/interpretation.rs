use openrag_core::domain::state::{SharedState, StateUpdate};
use openrag_core::errors::PipelineError;
use tracing::debug;

use crate::llm::LlmClient;
use crate::prompts;

/// One model call, no retry. On the web-only route there is no executed chart yet, so the
/// final response is created here with null `json_data`.
pub async fn run(state: &SharedState, llm: &dyn LlmClient) -> Result<StateUpdate, PipelineError> {
    let image = state.final_response.as_ref().and_then(|response| response.image.as_deref());
    let messages =
        prompts::interpretation(state.question(), state.search_results(), &state.language, image);

    let text = llm
        .complete(&messages)
        .await
        .map_err(|error| PipelineError::InterpretationFailed(error.to_string()))?;

    debug!(
        event_name = "stage.interpretation.answered",
        chars = text.chars().count(),
        language = %state.language,
        "interpretation produced"
    );

    let mut final_response = state.final_response.clone().unwrap_or_default();
    final_response.text_response = Some(text);

    Ok(StateUpdate::new().with_final_response(final_response))
}
