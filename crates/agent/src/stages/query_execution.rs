//! Admin-level resolution, two filter-value passes, then backend execution.

use std::collections::BTreeMap;

use openrag_core::domain::chart::ChartQuery;
use openrag_core::domain::state::{ContentBlock, FinalResponse, SharedState, StageResponse, StateUpdate};
use openrag_core::errors::{PipelineError, ValidationError};
use openrag_core::flows::PipelineStage;
use openrag_core::formats::AdminLevelTable;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::extraction::{extract, sync_validator, AttemptError, ExtractionExhausted, ExtractionRequest};
use crate::prompts;
use crate::stages::{carry_identity, collaborator_error, output_schema, QueryList, StageContext};

const STAGE: PipelineStage = PipelineStage::QueryExecution;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SpaceInfoList {
    pub datasets: Vec<SpaceInfo>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SpaceInfo {
    #[schemars(description = "Dataset id, copied verbatim")]
    pub id: String,
    #[schemars(description = "Region code the dataset covers")]
    pub region: String,
    #[schemars(description = "Language the dataset is written in")]
    pub language: String,
}

pub async fn run(state: &SharedState, ctx: StageContext<'_>) -> Result<StateUpdate, PipelineError> {
    let charts = state.chart_queries(STAGE)?;
    let annotated = resolve_admin_levels(state, ctx, charts).await?;
    let with_options = resolve_filter_options(state, ctx, &annotated).await?;
    let finalized = finalize_filter_values(state, ctx, &annotated, &with_options).await?;

    let mut executed = finalized;
    ctx.analytics
        .explore_tool(&mut executed)
        .await
        .map_err(|error| collaborator_error(STAGE, error))?;

    let first = executed.first_mut().ok_or(PipelineError::EmptyExecutionResult)?;
    let final_response = FinalResponse {
        json_data: first.json_data.clone().unwrap_or(Value::Null),
        image: first.image.take(),
        text_response: None,
    };

    debug!(
        event_name = "stage.query_execution.executed",
        charts = executed.len(),
        has_image = final_response.image.is_some(),
        "charts executed"
    );

    Ok(StateUpdate::new()
        .with_response(StageResponse::ChartQueries(executed.clone()))
        .with_search_result(ContentBlock::ExecutedQueries(executed))
        .with_final_response(final_response))
}

async fn resolve_admin_levels(
    state: &SharedState,
    ctx: StageContext<'_>,
    charts: &[ChartQuery],
) -> Result<Vec<ChartQuery>, PipelineError> {
    let summaries = charts.iter().map(ChartQuery::summary).collect::<Vec<_>>();
    let request = ExtractionRequest::structured(
        STAGE,
        prompts::space_classification(&summaries, ctx.admin_levels),
        output_schema::<SpaceInfoList>(STAGE, "dataset_space_info_list")?,
    );

    let levels = extract(
        ctx.llm,
        &request,
        sync_validator(|info: SpaceInfoList| {
            admin_levels_for(info, charts, ctx.admin_levels).map_err(AttemptError::from)
        }),
    )
    .await
    .map_err(|exhausted| PipelineError::AdminLevelResolutionFailed {
        attempts: exhausted.attempts,
        reason: exhausted.last_error.to_string(),
    })?;

    debug!(
        event_name = "stage.query_execution.admin_levels",
        question = %state.question(),
        levels = ?levels,
        "admin levels resolved"
    );

    Ok(charts
        .iter()
        .zip(levels)
        .map(|(chart, level)| ChartQuery { admin_level: Some(level), ..chart.clone() })
        .collect())
}

/// Looks up the admin level for every chart from the model's region/language classification.
pub fn admin_levels_for(
    info: SpaceInfoList,
    charts: &[ChartQuery],
    table: &AdminLevelTable,
) -> Result<Vec<String>, ValidationError> {
    let classified: BTreeMap<String, SpaceInfo> =
        info.datasets.into_iter().map(|entry| (entry.id.clone(), entry)).collect();

    charts
        .iter()
        .map(|chart| {
            let entry = classified
                .get(chart.id())
                .ok_or_else(|| ValidationError::UnclassifiedDataset(chart.id().to_string()))?;
            table.lookup(&entry.region, &entry.language).map(str::to_string).ok_or_else(|| {
                ValidationError::AdminLevelLookup {
                    region: entry.region.clone(),
                    language: entry.language.clone(),
                }
            })
        })
        .collect()
}

async fn resolve_filter_options(
    state: &SharedState,
    ctx: StageContext<'_>,
    annotated: &[ChartQuery],
) -> Result<Vec<ChartQuery>, PipelineError> {
    let request = ExtractionRequest::structured(
        STAGE,
        prompts::query_generation(state.question(), annotated),
        output_schema::<QueryList>(STAGE, "query_list")?,
    );
    let analytics = ctx.analytics;

    // Each attempt that passes validation hits the backend; nothing is rolled back on retry.
    extract(ctx.llm, &request, move |list: QueryList| async move {
        let mut charts = prepare_option_lookup(list.querys, annotated)?;
        analytics.filter_option_tool(&mut charts).await?;
        Ok::<Vec<ChartQuery>, AttemptError>(charts)
    })
    .await
    .map_err(parameters_invalid)
}

async fn finalize_filter_values(
    state: &SharedState,
    ctx: StageContext<'_>,
    annotated: &[ChartQuery],
    with_options: &[ChartQuery],
) -> Result<Vec<ChartQuery>, PipelineError> {
    let request = ExtractionRequest::structured(
        STAGE,
        prompts::query_refinement(state.question(), with_options),
        output_schema::<QueryList>(STAGE, "query_list")?,
    );

    extract(
        ctx.llm,
        &request,
        sync_validator(|list: QueryList| {
            finalize_filters(list.querys, annotated).map_err(AttemptError::from)
        }),
    )
    .await
    .map_err(parameters_invalid)
}

/// First pass: keep only what the backend needs to list filter options.
pub fn prepare_option_lookup(
    returned: Vec<ChartQuery>,
    originals: &[ChartQuery],
) -> Result<Vec<ChartQuery>, ValidationError> {
    let mut charts = carry_identity(returned, originals)?;
    for chart in &mut charts {
        chart.strip_filter_formats();
        chart.check_filter_admin_levels()?;
        chart.strip_filter_resolution_fields();
    }
    Ok(charts)
}

/// Second pass: the executable shape sent to the backend.
pub fn finalize_filters(
    returned: Vec<ChartQuery>,
    originals: &[ChartQuery],
) -> Result<Vec<ChartQuery>, ValidationError> {
    let mut charts = carry_identity(returned, originals)?;
    for chart in &mut charts {
        chart.strip_axis_formats();
        chart.strip_filter_formats();
        chart.check_filter_admin_levels()?;
        chart.group_filters();
    }
    Ok(charts)
}

fn parameters_invalid(exhausted: ExtractionExhausted) -> PipelineError {
    PipelineError::ExecutionParametersInvalid {
        attempts: exhausted.attempts,
        reason: exhausted.last_error.to_string(),
    }
}
