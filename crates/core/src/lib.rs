pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod formats;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};
pub use domain::chart::{AxisSpec, ChartQuery, FilterSet, FilterSpec, MeasureSpec};
pub use domain::dataset::{
    ColumnCatalog, ColumnMeta, DatasetCatalog, DatasetColumns, DatasetRecord, DatasetSummary,
};
pub use domain::state::{
    Answer, ContentBlock, FinalResponse, SharedState, StageResponse, StateUpdate,
};
pub use errors::{InterfaceError, PipelineError, ValidationError};
pub use flows::{AnalyticsFlow, FlowDefinition, FlowEngine, PipelineStage, Route};
pub use formats::{AdminLevelTable, ColumnKind};
