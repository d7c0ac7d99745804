use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{PipelineStage, Route, TransitionOutcome};

pub trait FlowDefinition {
    fn route(&self) -> Route;
    fn initial_stage(&self) -> PipelineStage;
    fn transition(&self, current: &PipelineStage) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Stage ordering for one question along a chosen [`Route`].
#[derive(Clone, Debug, Default)]
pub struct AnalyticsFlow {
    route: Route,
}

impl AnalyticsFlow {
    pub fn new(route: Route) -> Self {
        Self { route }
    }
}

impl FlowDefinition for AnalyticsFlow {
    fn route(&self) -> Route {
        self.route
    }

    fn initial_stage(&self) -> PipelineStage {
        PipelineStage::Start
    }

    fn transition(&self, current: &PipelineStage) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_for_route(self.route, current)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn route(&self) -> Route {
        self.flow.route()
    }

    pub fn initial_stage(&self) -> PipelineStage {
        self.flow.initial_stage()
    }

    pub fn apply(&self, current: &PipelineStage) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &PipelineStage,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit.correlation_id.clone(),
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("route", outcome.route.as_str()),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.correlation_id.clone(),
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }

    /// The full stage sequence this flow will visit, excluding `Start` and `Done`.
    pub fn plan(&self) -> Result<Vec<PipelineStage>, FlowTransitionError> {
        let mut stages = Vec::new();
        let mut current = self.initial_stage();
        loop {
            let outcome = self.apply(&current)?;
            if outcome.to == PipelineStage::Done {
                return Ok(stages);
            }
            stages.push(outcome.to);
            current = outcome.to;
        }
    }
}

impl Default for FlowEngine<AnalyticsFlow> {
    fn default() -> Self {
        Self::new(AnalyticsFlow::default())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("no transition from {stage} on the {route:?} route")]
    InvalidTransition { stage: PipelineStage, route: Route },
}

fn transition_for_route(
    route: Route,
    current: &PipelineStage,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use PipelineStage::{
        DatasetDiscovery, Done, FilterResolution, Interpretation, QueryExecution, QueryPlanning,
        SourceDiscovery, Start,
    };
    use Route::{AnalyticsOnly, Full, WebOnly};

    let to = match (route, current) {
        (Full, Start) | (WebOnly, Start) => SourceDiscovery,
        (AnalyticsOnly, Start) | (Full, SourceDiscovery) => DatasetDiscovery,
        (Full, DatasetDiscovery) | (AnalyticsOnly, DatasetDiscovery) => QueryPlanning,
        (Full, QueryPlanning) | (AnalyticsOnly, QueryPlanning) => FilterResolution,
        (Full, FilterResolution) | (AnalyticsOnly, FilterResolution) => QueryExecution,
        (Full, QueryExecution) | (AnalyticsOnly, QueryExecution) => Interpretation,
        (WebOnly, SourceDiscovery) => Interpretation,
        (_, Interpretation) => Done,
        _ => {
            return Err(FlowTransitionError::InvalidTransition { stage: *current, route });
        }
    };

    Ok(TransitionOutcome { from: *current, to, route })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::flows::engine::{AnalyticsFlow, FlowEngine, FlowTransitionError};
    use crate::flows::states::{PipelineStage, Route};

    #[test]
    fn full_route_visits_every_stage_in_order() {
        let engine = FlowEngine::default();
        let plan = engine.plan().expect("full route plans");

        assert_eq!(
            plan,
            vec![
                PipelineStage::SourceDiscovery,
                PipelineStage::DatasetDiscovery,
                PipelineStage::QueryPlanning,
                PipelineStage::FilterResolution,
                PipelineStage::QueryExecution,
                PipelineStage::Interpretation,
            ]
        );
    }

    #[test]
    fn analytics_route_skips_source_discovery() {
        let engine = FlowEngine::new(AnalyticsFlow::new(Route::AnalyticsOnly));
        let plan = engine.plan().expect("analytics route plans");

        assert_eq!(plan.first(), Some(&PipelineStage::DatasetDiscovery));
        assert!(!plan.contains(&PipelineStage::SourceDiscovery));
        assert_eq!(plan.len(), 5);
    }

    #[test]
    fn web_route_goes_straight_to_interpretation() {
        let engine = FlowEngine::new(AnalyticsFlow::new(Route::WebOnly));
        let plan = engine.plan().expect("web route plans");

        assert_eq!(plan, vec![PipelineStage::SourceDiscovery, PipelineStage::Interpretation]);
    }

    #[test]
    fn done_has_no_successor() {
        let engine = FlowEngine::default();
        let error = engine.apply(&PipelineStage::Done).expect_err("done is terminal");

        assert_eq!(
            error,
            FlowTransitionError::InvalidTransition { stage: PipelineStage::Done, route: Route::Full }
        );
    }

    #[test]
    fn web_route_rejects_analytics_stages() {
        let engine = FlowEngine::new(AnalyticsFlow::new(Route::WebOnly));
        assert!(engine.apply(&PipelineStage::QueryPlanning).is_err());
    }

    #[test]
    fn condition_hint_selects_route() {
        assert_eq!(Route::from_condition(Some("analytics")), Route::AnalyticsOnly);
        assert_eq!(Route::from_condition(Some(" WEB ")), Route::WebOnly);
        assert_eq!(Route::from_condition(Some("unknown")), Route::Full);
        assert_eq!(Route::from_condition(None), Route::Full);
        assert_eq!(Route::Full.with_web_search(false), Route::AnalyticsOnly);
        assert_eq!(Route::WebOnly.with_web_search(false), Route::WebOnly);
    }

    #[test]
    fn transition_emits_audit_event() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();

        let outcome = engine
            .apply_with_audit(
                &PipelineStage::Start,
                &sink,
                &AuditContext::new("req-42", "pipeline"),
            )
            .expect("start has a successor");

        assert_eq!(outcome.to, PipelineStage::SourceDiscovery);
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-42");
        assert_eq!(events[0].event_type, "flow.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("source_discovery"));
    }
}
