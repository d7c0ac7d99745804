use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Start,
    SourceDiscovery,
    DatasetDiscovery,
    QueryPlanning,
    FilterResolution,
    QueryExecution,
    Interpretation,
    Done,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::SourceDiscovery => "source_discovery",
            Self::DatasetDiscovery => "dataset_discovery",
            Self::QueryPlanning => "query_planning",
            Self::FilterResolution => "filter_resolution",
            Self::QueryExecution => "query_execution",
            Self::Interpretation => "interpretation",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which subset of stages a question goes through, derived from the `condition` hint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    #[default]
    Full,
    AnalyticsOnly,
    WebOnly,
}

impl Route {
    /// Unknown or empty hints fall back to the full route.
    pub fn from_condition(condition: Option<&str>) -> Self {
        match condition.map(|value| value.trim().to_ascii_lowercase()) {
            Some(value) if value == "analytics" || value == "analytics_only" => {
                Self::AnalyticsOnly
            }
            Some(value) if value == "web" || value == "web_only" => Self::WebOnly,
            _ => Self::Full,
        }
    }

    /// With web search switched off the full route degrades to the analytics path.
    pub fn with_web_search(self, enabled: bool) -> Self {
        match self {
            Self::Full if !enabled => Self::AnalyticsOnly,
            route => route,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::AnalyticsOnly => "analytics",
            Self::WebOnly => "web",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: PipelineStage,
    pub to: PipelineStage,
    pub route: Route,
}
