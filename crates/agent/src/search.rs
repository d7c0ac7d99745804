use std::time::Duration;

use async_trait::async_trait;
use openrag_core::config::SearchConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::tools::{FetchError, FetchedPage, PageFetcher, SearchClient, SearchHit};

const USER_AGENT: &str = concat!("openrag/", env!("CARGO_PKG_VERSION"));

/// Google Custom Search JSON API client.
pub struct GoogleSearchClient {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    engine_id: String,
}

impl GoogleSearchClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        engine_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|error| FetchError::Search(error.to_string()))?;
        Ok(Self { client, base_url: base_url.into(), api_key, engine_id: engine_id.into() })
    }

    /// `None` when search is disabled or its credentials are absent.
    pub fn from_config(config: &SearchConfig) -> Result<Option<Self>, FetchError> {
        if !config.enabled {
            return Ok(None);
        }
        let (Some(api_key), Some(engine_id)) = (&config.api_key, &config.engine_id) else {
            return Ok(None);
        };
        Self::new(
            config.base_url.clone(),
            api_key.clone(),
            engine_id.clone(),
            Duration::from_secs(config.fetch_timeout_secs),
        )
        .map(Some)
    }
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
    link: String,
}

#[async_trait]
impl SearchClient for GoogleSearchClient {
    async fn search(&self, query: &str, count: u8) -> Result<Vec<SearchHit>, FetchError> {
        let num = count.to_string();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("key", self.api_key.expose_secret()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ])
            .send()
            .await
            .map_err(|error| FetchError::Search(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Search(format!("search endpoint returned HTTP {status}")));
        }

        let body: SearchResponse =
            response.json().await.map_err(|error| FetchError::Search(error.to_string()))?;

        Ok(body
            .items
            .into_iter()
            .take(usize::from(count))
            .map(|item| SearchHit { title: item.title, snippet: item.snippet, link: item.link })
            .collect())
    }
}

pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|error| FetchError::Transport {
                url: "<client>".to_string(),
                message: error.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let transport = |error: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            message: error.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let page = FetchedPage { status, content_type, body: String::new() };
        if !page.is_success() || page.is_binary() {
            return Ok(page);
        }

        let body = response.text().await.map_err(transport)?;
        Ok(FetchedPage { body, ..page })
    }
}
