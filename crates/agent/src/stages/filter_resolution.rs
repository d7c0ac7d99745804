use openrag_core::domain::chart::ChartQuery;
use openrag_core::domain::state::{SharedState, StageResponse, StateUpdate};
use openrag_core::errors::{PipelineError, ValidationError};
use openrag_core::flows::PipelineStage;
use tracing::debug;

use crate::extraction::{extract, sync_validator, AttemptError, ExtractionRequest};
use crate::prompts;
use crate::stages::{carry_identity, collaborator_error, output_schema, QueryList, StageContext};

const STAGE: PipelineStage = PipelineStage::FilterResolution;

pub async fn run(state: &SharedState, ctx: StageContext<'_>) -> Result<StateUpdate, PipelineError> {
    let mut charts = state.chart_queries(STAGE)?.to_vec();
    ctx.analytics
        .filter_option_tool(&mut charts)
        .await
        .map_err(|error| collaborator_error(STAGE, error))?;

    let request = ExtractionRequest::structured(
        STAGE,
        prompts::query_generation(state.question(), &charts),
        output_schema::<QueryList>(STAGE, "query_list")?,
    );

    let resolved = extract(
        ctx.llm,
        &request,
        sync_validator(|list: QueryList| {
            normalize_selection(list.querys, &charts).map_err(AttemptError::from)
        }),
    )
    .await
    .map_err(|exhausted| PipelineError::FilterSelectionFailed {
        attempts: exhausted.attempts,
        reason: exhausted.last_error.to_string(),
    })?;

    debug!(
        event_name = "stage.filter_resolution.resolved",
        charts = resolved.len(),
        filters = resolved.iter().map(|chart| chart.filter.len()).sum::<usize>(),
        "filters resolved"
    );

    Ok(StateUpdate::new().with_response(StageResponse::ChartQueries(resolved)))
}

/// Drops formats from columns that do not take one and wraps each chart's filters as one
/// AND-group.
pub fn normalize_selection(
    returned: Vec<ChartQuery>,
    originals: &[ChartQuery],
) -> Result<Vec<ChartQuery>, ValidationError> {
    let mut charts = carry_identity(returned, originals)?;
    for chart in &mut charts {
        chart.strip_axis_formats();
        chart.strip_filter_formats();
        chart.group_filters();
    }
    Ok(charts)
}
