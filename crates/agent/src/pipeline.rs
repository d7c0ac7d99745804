use std::sync::Arc;

use openrag_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use openrag_core::config::AppConfig;
use openrag_core::domain::state::{Answer, SharedState, StateUpdate};
use openrag_core::errors::PipelineError;
use openrag_core::flows::{AnalyticsFlow, FlowEngine, PipelineStage, Route};
use tracing::{info, info_span, warn, Instrument};

use crate::html::ContentExtractor;
use crate::stages::{
    dataset_discovery, filter_resolution, interpretation, query_execution, query_planning,
    source_discovery, StageContext,
};
use crate::tools::Collaborators;

const ACTOR: &str = "pipeline";

/// Emits audit events as structured `tracing` records.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        info!(
            event_name = %event.event_type,
            correlation_id = %event.correlation_id,
            category = ?event.category,
            outcome = ?event.outcome,
            metadata = ?event.metadata,
            "audit event"
        );
    }
}

/// Runs one question through the stages its route selects, merging each update into the state.
pub struct Pipeline {
    config: AppConfig,
    collaborators: Collaborators,
    extractor: ContentExtractor,
    audit: Arc<dyn AuditSink>,
}

impl Pipeline {
    pub fn new(config: AppConfig, collaborators: Collaborators) -> Result<Self, PipelineError> {
        let extractor = ContentExtractor::new().map_err(|error| PipelineError::Collaborator {
            stage: PipelineStage::SourceDiscovery,
            message: error.to_string(),
        })?;
        Ok(Self { config, collaborators, extractor, audit: Arc::new(TracingAuditSink) })
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Initial state for `question`, falling back to the configured language.
    pub fn new_state(
        &self,
        question: impl Into<String>,
        language: Option<&str>,
        condition: Option<&str>,
    ) -> SharedState {
        let language = language.unwrap_or(self.config.pipeline.default_language.as_str());
        let state = SharedState::new(question, language);
        match condition {
            Some(condition) => state.with_condition(condition),
            None => state,
        }
    }

    pub fn route_for(&self, state: &SharedState) -> Route {
        Route::from_condition(state.condition.as_deref())
            .with_web_search(self.collaborators.web.is_some())
    }

    pub async fn ask(
        &self,
        question: impl Into<String>,
        language: Option<&str>,
        condition: Option<&str>,
        audit: &AuditContext,
    ) -> Result<Answer, PipelineError> {
        let state = self.run(self.new_state(question, language, condition), audit).await?;
        state.answer().ok_or_else(|| {
            PipelineError::InterpretationFailed("pipeline finished without an answer".to_string())
        })
    }

    /// Drives `state` to completion. Fatal stage errors abort the run and are returned as-is.
    pub async fn run(
        &self,
        state: SharedState,
        audit: &AuditContext,
    ) -> Result<SharedState, PipelineError> {
        let route = self.route_for(&state);
        let span = info_span!(
            "pipeline",
            correlation_id = %audit.correlation_id,
            route = route.as_str()
        );
        self.drive(state, route, audit).instrument(span).await
    }

    async fn drive(
        &self,
        mut state: SharedState,
        route: Route,
        audit: &AuditContext,
    ) -> Result<SharedState, PipelineError> {
        let engine = FlowEngine::new(AnalyticsFlow::new(route));
        let mut current = engine.initial_stage();

        info!(
            event_name = "pipeline.started",
            correlation_id = %audit.correlation_id,
            route = route.as_str(),
            language = %state.language,
            "pipeline started"
        );

        loop {
            let outcome = engine.apply_with_audit(&current, self.audit.as_ref(), audit)?;
            if outcome.to == PipelineStage::Done {
                break;
            }
            self.run_stage(outcome.to, &mut state, audit).await?;
            current = outcome.to;
        }

        info!(
            event_name = "pipeline.finished",
            correlation_id = %audit.correlation_id,
            route = route.as_str(),
            search_results = state.search_results().len(),
            "pipeline finished"
        );

        Ok(state)
    }

    async fn run_stage(
        &self,
        stage: PipelineStage,
        state: &mut SharedState,
        audit: &AuditContext,
    ) -> Result<(), PipelineError> {
        let ctx = StageContext {
            llm: self.collaborators.llm.as_ref(),
            analytics: self.collaborators.analytics.as_ref(),
            admin_levels: &self.config.admin_levels,
        };

        let result = match stage {
            PipelineStage::SourceDiscovery => {
                self.discover_sources(state, audit).await;
                return Ok(());
            }
            PipelineStage::DatasetDiscovery => dataset_discovery::run(state, ctx).await,
            PipelineStage::QueryPlanning => query_planning::run(state, ctx).await,
            PipelineStage::FilterResolution => filter_resolution::run(state, ctx).await,
            PipelineStage::QueryExecution => query_execution::run(state, ctx).await,
            PipelineStage::Interpretation => interpretation::run(state, ctx.llm).await,
            PipelineStage::Start | PipelineStage::Done => return Ok(()),
        };

        match result {
            Ok(update) => {
                self.complete(stage, state, update, audit);
                Ok(())
            }
            Err(error) => {
                warn!(
                    event_name = "pipeline.stage_failed",
                    correlation_id = %audit.correlation_id,
                    stage = stage.as_str(),
                    error_class = error.error_class(),
                    error = %error,
                    "stage failed"
                );
                self.audit.emit(
                    self.event(audit, "pipeline.stage_failed", AuditOutcome::Failed, stage)
                        .with_category(failure_category(&error))
                        .with_metadata("error_class", error.error_class())
                        .with_metadata("error", error.to_string()),
                );
                Err(error)
            }
        }
    }

    /// Best effort: a failed web lookup is logged and the run continues without it.
    async fn discover_sources(&self, state: &mut SharedState, audit: &AuditContext) {
        let stage = PipelineStage::SourceDiscovery;
        let Some(web) = &self.collaborators.web else {
            self.audit.emit(
                self.event(audit, "pipeline.stage_skipped", AuditOutcome::Skipped, stage)
                    .with_metadata("reason", "web search is not configured"),
            );
            return;
        };

        let result = source_discovery::run(
            state.question(),
            web.search.as_ref(),
            web.fetcher.as_ref(),
            &self.extractor,
            self.config.search.result_count,
        )
        .await;

        match result {
            Ok(block) => {
                self.complete(stage, state, StateUpdate::new().with_search_result(block), audit)
            }
            Err(error) => {
                warn!(
                    event_name = "pipeline.stage_skipped",
                    correlation_id = %audit.correlation_id,
                    stage = stage.as_str(),
                    error = %error,
                    "web source discovery failed; continuing without it"
                );
                self.audit.emit(
                    self.event(audit, "pipeline.stage_skipped", AuditOutcome::Skipped, stage)
                        .with_category(AuditCategory::Collaborator)
                        .with_metadata("error", error.to_string()),
                );
            }
        }
    }

    fn complete(
        &self,
        stage: PipelineStage,
        state: &mut SharedState,
        update: StateUpdate,
        audit: &AuditContext,
    ) {
        let response = update.response.as_ref().map(|response| response.variant_name());
        state.merge(update);

        info!(
            event_name = "pipeline.stage_completed",
            correlation_id = %audit.correlation_id,
            stage = stage.as_str(),
            response = response.unwrap_or("unchanged"),
            search_results = state.search_results().len(),
            "stage completed"
        );
        self.audit.emit(
            self.event(audit, "pipeline.stage_completed", AuditOutcome::Success, stage)
                .with_metadata("response", response.unwrap_or("unchanged"))
                .with_metadata("search_results", state.search_results().len().to_string()),
        );
    }

    fn event(
        &self,
        audit: &AuditContext,
        event_type: &str,
        outcome: AuditOutcome,
        stage: PipelineStage,
    ) -> AuditEvent {
        AuditEvent::new(
            audit.correlation_id.clone(),
            event_type,
            AuditCategory::Stage,
            ACTOR,
            outcome,
        )
        .with_metadata("stage", stage.as_str())
    }
}

fn failure_category(error: &PipelineError) -> AuditCategory {
    match error {
        PipelineError::NoDatasetMatched { .. }
        | PipelineError::QueryPlanningFailed { .. }
        | PipelineError::FilterSelectionFailed { .. }
        | PipelineError::AdminLevelResolutionFailed { .. }
        | PipelineError::ExecutionParametersInvalid { .. } => AuditCategory::Extraction,
        PipelineError::Collaborator { .. } => AuditCategory::Collaborator,
        _ => AuditCategory::Stage,
    }
}
