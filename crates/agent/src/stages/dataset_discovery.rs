use openrag_core::domain::dataset::{DatasetCatalog, DatasetRecord};
use openrag_core::domain::state::{SharedState, StageResponse, StateUpdate};
use openrag_core::errors::{PipelineError, ValidationError};
use openrag_core::flows::PipelineStage;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

use crate::extraction::{extract, sync_validator, AttemptError, ExtractionRequest};
use crate::prompts;
use crate::stages::{collaborator_error, output_schema, StageContext};

const STAGE: PipelineStage = PipelineStage::DatasetDiscovery;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DatasetSelection {
    #[schemars(description = "Keys of the candidate datasets that can answer the question")]
    pub dataset_key: Vec<String>,
}

pub async fn run(state: &SharedState, ctx: StageContext<'_>) -> Result<StateUpdate, PipelineError> {
    let catalog = ctx
        .analytics
        .search_tool(state.question())
        .await
        .map_err(|error| collaborator_error(STAGE, error))?;

    if catalog.is_empty() {
        return Err(PipelineError::NoDatasetMatched {
            attempts: 0,
            reason: "the dataset catalog returned no candidates".to_string(),
        });
    }

    let request = ExtractionRequest::structured(
        STAGE,
        prompts::dataset_selection(state.question(), &catalog),
        output_schema::<DatasetSelection>(STAGE, "datasets_extract_output")?,
    );

    let selected = extract(
        ctx.llm,
        &request,
        sync_validator(|selection: DatasetSelection| {
            select(&catalog, selection).map_err(AttemptError::from)
        }),
    )
    .await
    .map_err(|exhausted| PipelineError::NoDatasetMatched {
        attempts: exhausted.attempts,
        reason: exhausted.last_error.to_string(),
    })?;

    debug!(
        event_name = "stage.dataset_discovery.selected",
        candidates = ?catalog.values().map(|dataset| dataset.name.as_str()).collect::<Vec<_>>(),
        selected = ?selected.iter().map(|dataset| dataset.name.as_str()).collect::<Vec<_>>(),
        "datasets selected"
    );

    Ok(StateUpdate::new().with_response(StageResponse::Datasets(selected)))
}

/// Every selected key must exist in the catalog; an empty selection is rejected.
pub fn select(
    catalog: &DatasetCatalog,
    selection: DatasetSelection,
) -> Result<Vec<DatasetRecord>, ValidationError> {
    if selection.dataset_key.is_empty() {
        return Err(ValidationError::EmptySelection);
    }

    selection
        .dataset_key
        .into_iter()
        .map(|key| catalog.get(&key).cloned().ok_or(ValidationError::UnknownDatasetKey(key)))
        .collect()
}
