pub mod engine;
pub mod states;

pub use engine::{AnalyticsFlow, FlowDefinition, FlowEngine, FlowTransitionError};
pub use states::{PipelineStage, Route, TransitionOutcome};
