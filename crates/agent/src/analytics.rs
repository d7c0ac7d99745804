use std::time::Duration;

use async_trait::async_trait;
use openrag_core::config::AnalyticsConfig;
use openrag_core::domain::chart::ChartQuery;
use openrag_core::domain::dataset::{ColumnCatalog, DatasetCatalog, DatasetRecord};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::tools::{AnalyticsClient, AnalyticsError};

/// JSON-over-HTTP gateway to the analytics backend.
pub struct HttpAnalyticsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpAnalyticsClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, AnalyticsError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| AnalyticsError::Transport(error.to_string()))?;
        Ok(Self { client, base_url: base_url.into(), api_key })
    }

    pub fn from_config(config: &AnalyticsConfig) -> Result<Self, AnalyticsError> {
        Self::new(
            config.base_url.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post<B, R>(&self, endpoint: &'static str, body: &B) -> Result<R, AnalyticsError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self.client.post(self.url(endpoint)).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response =
            request.send().await.map_err(|error| AnalyticsError::Transport(error.to_string()))?;
        let status = response.status().as_u16();
        let text =
            response.text().await.map_err(|error| AnalyticsError::Transport(error.to_string()))?;

        match status {
            200..=299 => serde_json::from_str(&text)
                .map_err(|error| AnalyticsError::Decode { endpoint, message: error.to_string() }),
            400 | 422 => Err(AnalyticsError::Rejected(text)),
            _ => Err(AnalyticsError::Http { endpoint, status, body: text }),
        }
    }
}

#[async_trait]
impl AnalyticsClient for HttpAnalyticsClient {
    async fn search_tool(&self, question: &str) -> Result<DatasetCatalog, AnalyticsError> {
        self.post("search", &json!({ "question": question })).await
    }

    async fn column_metadata_tool(
        &self,
        datasets: &[DatasetRecord],
    ) -> Result<ColumnCatalog, AnalyticsError> {
        self.post("columns", &json!({ "datasets": datasets })).await
    }

    async fn filter_option_tool(&self, charts: &mut Vec<ChartQuery>) -> Result<(), AnalyticsError> {
        let annotated: Vec<ChartQuery> =
            self.post("filter-options", &json!({ "charts": charts })).await?;
        *charts = annotated;
        Ok(())
    }

    async fn explore_tool(&self, charts: &mut Vec<ChartQuery>) -> Result<(), AnalyticsError> {
        let executed: Vec<ChartQuery> = self.post("explore", &json!({ "charts": charts })).await?;
        *charts = executed;
        Ok(())
    }
}
