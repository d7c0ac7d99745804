use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::chart::ChartQuery;
use crate::domain::dataset::DatasetRecord;
use crate::errors::PipelineError;
use crate::flows::PipelineStage;

/// The stage-dependent payload carried in `response`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum StageResponse {
    Datasets(Vec<DatasetRecord>),
    ChartQueries(Vec<ChartQuery>),
}

impl StageResponse {
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Datasets(_) => "datasets",
            Self::ChartQueries(_) => "chart_queries",
        }
    }
}

/// One entry in the append-only `search_results` log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentBlock {
    Text(String),
    ExecutedQueries(Vec<ChartQuery>),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalResponse {
    pub json_data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_response: Option<String>,
}

/// What the caller gets back once the pipeline finishes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub json_data: Value,
    pub text_response: String,
}

/// Per-question state. `search_results` can only grow; everything else is replaced on merge.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SharedState {
    question: String,
    pub language: String,
    pub condition: Option<String>,
    pub response: Option<StageResponse>,
    search_results: Vec<ContentBlock>,
    pub final_response: Option<FinalResponse>,
}

impl SharedState {
    pub fn new(question: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            language: language.into(),
            condition: None,
            response: None,
            search_results: Vec::new(),
            final_response: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn search_results(&self) -> &[ContentBlock] {
        &self.search_results
    }

    pub fn merge(&mut self, update: StateUpdate) {
        if let Some(condition) = update.condition {
            self.condition = Some(condition);
        }
        if let Some(response) = update.response {
            self.response = Some(response);
        }
        self.search_results.extend(update.search_results);
        if let Some(final_response) = update.final_response {
            self.final_response = Some(final_response);
        }
    }

    pub fn datasets(&self, stage: PipelineStage) -> Result<&[DatasetRecord], PipelineError> {
        match &self.response {
            Some(StageResponse::Datasets(datasets)) => Ok(datasets),
            other => Err(variant_mismatch(stage, "datasets", other.as_ref())),
        }
    }

    pub fn chart_queries(&self, stage: PipelineStage) -> Result<&[ChartQuery], PipelineError> {
        match &self.response {
            Some(StageResponse::ChartQueries(charts)) => Ok(charts),
            other => Err(variant_mismatch(stage, "chart_queries", other.as_ref())),
        }
    }

    pub fn answer(&self) -> Option<Answer> {
        let final_response = self.final_response.as_ref()?;
        Some(Answer {
            json_data: final_response.json_data.clone(),
            text_response: final_response.text_response.clone()?,
        })
    }
}

fn variant_mismatch(
    stage: PipelineStage,
    expected: &'static str,
    found: Option<&StageResponse>,
) -> PipelineError {
    PipelineError::ResponseVariantMismatch {
        stage,
        expected,
        found: found.map(StageResponse::variant_name).unwrap_or("nothing"),
    }
}

/// A stage's partial contribution to [`SharedState`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateUpdate {
    pub condition: Option<String>,
    pub response: Option<StageResponse>,
    pub search_results: Vec<ContentBlock>,
    pub final_response: Option<FinalResponse>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, response: StageResponse) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_search_result(mut self, block: ContentBlock) -> Self {
        self.search_results.push(block);
        self
    }

    pub fn with_final_response(mut self, final_response: FinalResponse) -> Self {
        self.final_response = Some(final_response);
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}
