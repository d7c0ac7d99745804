use thiserror::Error;

use crate::flows::{FlowTransitionError, PipelineStage};

/// Why a single model answer was rejected. Always retryable inside a bounded extraction.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("dataset key `{0}` is not in the catalog")]
    UnknownDatasetKey(String),
    #[error("no dataset was selected")]
    EmptySelection,
    #[error("no chart query was returned")]
    EmptyPlan,
    #[error("chart `{0}` does not match any selected dataset")]
    UnknownChart(String),
    #[error("column `{column_id}` does not exist in dataset `{chart_id}`")]
    UnknownColumn { chart_id: String, column_id: String },
    #[error("format `{format}` is not allowed for {kind} column `{column}`")]
    InvalidFormat { column: String, kind: String, format: String },
    #[error("{kind} column `{column}` requires a format")]
    MissingFormat { column: String, kind: String },
    #[error("filter `{column}` uses `{format}`, which is not a recognized admin level")]
    UnknownAdminLevel { column: String, format: String },
    #[error("dataset `{0}` was not classified by region and language")]
    UnclassifiedDataset(String),
    #[error("no admin level is defined for region `{region}` and language `{language}`")]
    AdminLevelLookup { region: String, language: String },
    #[error("answer did not contain a fenced json block")]
    MissingJsonBlock,
}

/// Fatal outcomes that abort the whole question.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("no dataset matched the question after {attempts} attempts: {reason}")]
    NoDatasetMatched { attempts: u32, reason: String },
    #[error("column metadata is unavailable for the selected datasets")]
    ColumnMetadataUnavailable,
    #[error("model could not produce a valid query after {attempts} attempts: {reason}")]
    QueryPlanningFailed { attempts: u32, reason: String },
    #[error("model could not select valid filter values after {attempts} attempts: {reason}")]
    FilterSelectionFailed { attempts: u32, reason: String },
    #[error("admin-level resolution failed after {attempts} attempts: {reason}")]
    AdminLevelResolutionFailed { attempts: u32, reason: String },
    #[error("backend query parameters invalid after {attempts} attempts: {reason}")]
    ExecutionParametersInvalid { attempts: u32, reason: String },
    #[error("{stage} expected a {expected} response but found {found}")]
    ResponseVariantMismatch { stage: PipelineStage, expected: &'static str, found: &'static str },
    #[error("analytics backend returned no executed chart")]
    EmptyExecutionResult,
    #[error("{stage} collaborator call failed: {message}")]
    Collaborator { stage: PipelineStage, message: String },
    #[error("interpretation failed: {0}")]
    InterpretationFailed(String),
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
}

impl PipelineError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::NoDatasetMatched { .. } => "no_dataset_matched",
            Self::ColumnMetadataUnavailable => "column_metadata_unavailable",
            Self::QueryPlanningFailed { .. } => "query_planning_failed",
            Self::FilterSelectionFailed { .. } => "filter_selection_failed",
            Self::AdminLevelResolutionFailed { .. } => "admin_level_resolution_failed",
            Self::ExecutionParametersInvalid { .. } => "execution_parameters_invalid",
            Self::ResponseVariantMismatch { .. } => "response_variant_mismatch",
            Self::EmptyExecutionResult => "empty_execution_result",
            Self::Collaborator { .. } => "collaborator_failure",
            Self::InterpretationFailed(_) => "interpretation_failed",
            Self::FlowTransition(_) => "flow_transition",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("unanswerable: {message}")]
    Unanswerable { message: String, error_class: &'static str, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, error_class: &'static str, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, error_class: &'static str, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unanswerable { .. } => {
                "The question could not be turned into a valid analytics query. Try rephrasing it."
            }
            Self::ServiceUnavailable { .. } => {
                "An upstream service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Unanswerable { .. } => 3,
            Self::ServiceUnavailable { .. } => 4,
            Self::Internal { .. } => 5,
        }
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Unanswerable { error_class, .. }
            | Self::ServiceUnavailable { error_class, .. }
            | Self::Internal { error_class, .. } => error_class,
        }
    }
}

impl PipelineError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::Unanswerable { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<PipelineError> for InterfaceError {
    fn from(value: PipelineError) -> Self {
        let error_class = value.error_class();
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match value {
            PipelineError::NoDatasetMatched { .. }
            | PipelineError::ColumnMetadataUnavailable
            | PipelineError::QueryPlanningFailed { .. }
            | PipelineError::FilterSelectionFailed { .. }
            | PipelineError::AdminLevelResolutionFailed { .. }
            | PipelineError::ExecutionParametersInvalid { .. }
            | PipelineError::EmptyExecutionResult => {
                Self::Unanswerable { message, error_class, correlation_id }
            }
            PipelineError::Collaborator { .. } | PipelineError::InterpretationFailed(_) => {
                Self::ServiceUnavailable { message, error_class, correlation_id }
            }
            PipelineError::ResponseVariantMismatch { .. } | PipelineError::FlowTransition(_) => {
                Self::Internal { message, error_class, correlation_id }
            }
        }
    }
}
