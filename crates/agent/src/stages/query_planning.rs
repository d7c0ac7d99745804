use openrag_core::domain::chart::{AxisSpec, ChartQuery, FilterSet, FilterSpec, MeasureSpec};
use openrag_core::domain::dataset::{ColumnCatalog, ColumnMeta, DatasetColumns};
use openrag_core::domain::state::{SharedState, StageResponse, StateUpdate};
use openrag_core::errors::{PipelineError, ValidationError};
use openrag_core::flows::PipelineStage;
use openrag_core::formats::is_valid_calculation;
use serde::Deserialize;
use tracing::debug;

use crate::extraction::{extract, sync_validator, AttemptError, ExtractionRequest};
use crate::prompts;
use crate::stages::{collaborator_error, StageContext};

const STAGE: PipelineStage = PipelineStage::QueryPlanning;

/// The model's free-text plan, parsed from its last fenced JSON block.
#[derive(Debug, Deserialize)]
pub struct ChartPlan {
    pub charts: Vec<PlannedChart>,
}

#[derive(Debug, Deserialize)]
pub struct PlannedChart {
    pub id: String,
    #[serde(default)]
    pub x: Vec<PlannedColumn>,
    #[serde(default)]
    pub y: Vec<PlannedMeasure>,
    #[serde(default)]
    pub filter: Vec<PlannedColumn>,
}

#[derive(Debug, Deserialize)]
pub struct PlannedColumn {
    #[serde(rename = "columnID")]
    pub column_id: String,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlannedMeasure {
    #[serde(rename = "columnID")]
    pub column_id: String,
    #[serde(default)]
    pub calculation: Option<String>,
}

pub async fn run(state: &SharedState, ctx: StageContext<'_>) -> Result<StateUpdate, PipelineError> {
    let datasets = state.datasets(STAGE)?;
    let columns = ctx
        .analytics
        .column_metadata_tool(datasets)
        .await
        .map_err(|error| collaborator_error(STAGE, error))?;

    if columns.is_empty() {
        return Err(PipelineError::ColumnMetadataUnavailable);
    }

    let request = ExtractionRequest::fenced_json(
        STAGE,
        prompts::chart_planning(state.question(), &columns, ctx.admin_levels),
    );

    let charts = extract(
        ctx.llm,
        &request,
        sync_validator(|plan: ChartPlan| bind_plan(plan, &columns).map_err(AttemptError::from)),
    )
    .await
    .map_err(|exhausted| PipelineError::QueryPlanningFailed {
        attempts: exhausted.attempts,
        reason: exhausted.last_error.to_string(),
    })?;

    debug!(
        event_name = "stage.query_planning.planned",
        charts = charts.len(),
        plan = %serde_json::to_string(&charts).unwrap_or_default(),
        "chart queries planned"
    );

    Ok(StateUpdate::new().with_response(StageResponse::ChartQueries(charts)))
}

/// Binds the model's column picks to authoritative metadata.
///
/// Unknown charts or columns and out-of-whitelist formats reject the plan. Measures that are
/// not numeric, or whose calculation is missing or unsupported, are dropped without rejecting it.
pub fn bind_plan(plan: ChartPlan, catalog: &ColumnCatalog) -> Result<Vec<ChartQuery>, ValidationError> {
    if plan.charts.is_empty() {
        return Err(ValidationError::EmptyPlan);
    }

    plan.charts.into_iter().map(|chart| bind_chart(chart, catalog)).collect()
}

fn bind_chart(chart: PlannedChart, catalog: &ColumnCatalog) -> Result<ChartQuery, ValidationError> {
    let dataset =
        catalog.get(&chart.id).ok_or_else(|| ValidationError::UnknownChart(chart.id.clone()))?;

    let x = chart
        .x
        .into_iter()
        .map(|pick| {
            let column = resolve(dataset, &chart.id, &pick.column_id)?;
            let axis = AxisSpec { column, format: pick.format };
            axis.check_format()?;
            Ok(axis)
        })
        .collect::<Result<Vec<_>, ValidationError>>()?;

    let mut y = Vec::with_capacity(chart.y.len());
    for pick in chart.y {
        let column = resolve(dataset, &chart.id, &pick.column_id)?;
        let keep = column.kind().is_numeric()
            && pick.calculation.as_deref().is_some_and(is_valid_calculation);
        if keep {
            y.push(MeasureSpec { column, calculation: pick.calculation });
        } else {
            debug!(
                event_name = "stage.query_planning.measure_dropped",
                chart_id = %chart.id,
                column = %column.label(),
                column_type = column.kind().as_str(),
                calculation = pick.calculation.as_deref().unwrap_or("<missing>"),
                "dropping measure"
            );
        }
    }

    let filter = chart
        .filter
        .into_iter()
        .map(|pick| {
            let spec = FilterSpec {
                column: resolve(dataset, &chart.id, &pick.column_id)?,
                format: pick.format,
                ..FilterSpec::default()
            };
            spec.check_format()?;
            Ok(spec)
        })
        .collect::<Result<Vec<_>, ValidationError>>()?;

    Ok(ChartQuery {
        dataset: dataset.dataset.clone(),
        x,
        y,
        filter: FilterSet::Flat(filter),
        ..ChartQuery::default()
    })
}

fn resolve(
    dataset: &DatasetColumns,
    chart_id: &str,
    column_id: &str,
) -> Result<ColumnMeta, ValidationError> {
    dataset.resolve(column_id).ok_or_else(|| ValidationError::UnknownColumn {
        chart_id: chart_id.to_string(),
        column_id: column_id.to_string(),
    })
}
