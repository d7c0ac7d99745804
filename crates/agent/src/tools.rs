use std::sync::Arc;

use async_trait::async_trait;
use openrag_core::domain::chart::ChartQuery;
use openrag_core::domain::dataset::{ColumnCatalog, DatasetCatalog, DatasetRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmClient;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    pub link: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// PDFs and other non-text payloads carry nothing the extractor can read.
    pub fn is_binary(&self) -> bool {
        let Some(content_type) = self.content_type.as_deref() else {
            return false;
        };
        let content_type = content_type.to_ascii_lowercase();
        content_type.contains("application/pdf")
            || content_type.contains("application/octet-stream")
            || content_type.starts_with("image/")
            || content_type.starts_with("audio/")
            || content_type.starts_with("video/")
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("web search failed: {0}")]
    Search(String),
    #[error("page fetch failed for `{url}`: {message}")]
    Transport { url: String, message: String },
    #[error("content extractor could not be built: {0}")]
    Extractor(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AnalyticsError {
    #[error("analytics transport failed: {0}")]
    Transport(String),
    #[error("analytics endpoint `{endpoint}` returned HTTP {status}: {body}")]
    Http { endpoint: &'static str, status: u16, body: String },
    #[error("analytics response from `{endpoint}` could not be decoded: {message}")]
    Decode { endpoint: &'static str, message: String },
    #[error("analytics backend rejected the request: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str, count: u8) -> Result<Vec<SearchHit>, FetchError>;
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// Gateway to the analytics backend's dataset catalog and query engine.
#[async_trait]
pub trait AnalyticsClient: Send + Sync {
    /// Datasets relevant to `question`, keyed by the identifier the model selects with.
    async fn search_tool(&self, question: &str) -> Result<DatasetCatalog, AnalyticsError>;

    /// Column definitions for each dataset, keyed by chart id.
    async fn column_metadata_tool(
        &self,
        datasets: &[DatasetRecord],
    ) -> Result<ColumnCatalog, AnalyticsError>;

    /// Annotates filters with the values the backend accepts. Replaces `charts` in place.
    async fn filter_option_tool(&self, charts: &mut Vec<ChartQuery>) -> Result<(), AnalyticsError>;

    /// Executes each chart, attaching `json_data` and `image`. Replaces `charts` in place.
    async fn explore_tool(&self, charts: &mut Vec<ChartQuery>) -> Result<(), AnalyticsError>;
}

#[derive(Clone)]
pub struct WebTools {
    pub search: Arc<dyn SearchClient>,
    pub fetcher: Arc<dyn PageFetcher>,
}

/// External handles the pipeline driver is built with.
#[derive(Clone)]
pub struct Collaborators {
    pub llm: Arc<dyn LlmClient>,
    pub analytics: Arc<dyn AnalyticsClient>,
    pub web: Option<WebTools>,
}

impl Collaborators {
    pub fn new(llm: Arc<dyn LlmClient>, analytics: Arc<dyn AnalyticsClient>) -> Self {
        Self { llm, analytics, web: None }
    }

    pub fn with_web(mut self, search: Arc<dyn SearchClient>, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.web = Some(WebTools { search, fetcher });
        self
    }
}
