//! The six pipeline stages. Each reads [`SharedState`](openrag_core::domain::state::SharedState)
//! and returns a partial update for the driver to merge.

pub mod dataset_discovery;
pub mod filter_resolution;
pub mod interpretation;
pub mod query_execution;
pub mod query_planning;
pub mod source_discovery;

use std::collections::BTreeMap;
use std::fmt::Display;

use openrag_core::domain::chart::ChartQuery;
use openrag_core::errors::{PipelineError, ValidationError};
use openrag_core::flows::PipelineStage;
use openrag_core::formats::AdminLevelTable;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::llm::{LlmClient, OutputSchema};
use crate::tools::AnalyticsClient;

/// Borrowed collaborators and lookup tables shared by the analytics stages.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub llm: &'a dyn LlmClient,
    pub analytics: &'a dyn AnalyticsClient,
    pub admin_levels: &'a AdminLevelTable,
}

/// Structured answer shape for every filter-resolution prompt.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct QueryList {
    #[schemars(description = "The complete list of chart queries, one per input chart")]
    pub querys: Vec<ChartQuery>,
}

pub(crate) fn output_schema<T: JsonSchema>(
    stage: PipelineStage,
    name: &str,
) -> Result<OutputSchema, PipelineError> {
    OutputSchema::of::<T>(name).map_err(|error| collaborator_error(stage, error))
}

pub(crate) fn collaborator_error(stage: PipelineStage, error: impl Display) -> PipelineError {
    PipelineError::Collaborator { stage, message: error.to_string() }
}

/// Re-binds model-echoed charts to the records they came from. Dataset identity and column
/// name and type are never taken from the model, and an `admin_level` the model dropped is
/// restored. An echoed column the original does not carry is rejected.
pub(crate) fn carry_identity(
    returned: Vec<ChartQuery>,
    originals: &[ChartQuery],
) -> Result<Vec<ChartQuery>, ValidationError> {
    if returned.is_empty() && !originals.is_empty() {
        return Err(ValidationError::EmptyPlan);
    }

    let by_id: BTreeMap<&str, &ChartQuery> =
        originals.iter().map(|chart| (chart.id(), chart)).collect();

    returned
        .into_iter()
        .map(|mut chart| {
            let original = by_id
                .get(chart.id())
                .ok_or_else(|| ValidationError::UnknownChart(chart.id().to_string()))?;
            chart.dataset = original.dataset.clone();
            chart.rebind_columns(original)?;
            if chart.admin_level.is_none() {
                chart.admin_level = original.admin_level.clone();
            }
            Ok(chart)
        })
        .collect()
}
