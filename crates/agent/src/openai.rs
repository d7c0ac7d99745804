//! OpenAI-compatible chat completions client. Ollama exposes the same surface under `/v1`.

use std::time::Duration;

use async_trait::async_trait;
use openrag_core::config::{LlmConfig, LlmProvider};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{ChatMessage, ChatRole, LlmClient, LlmError, OutputSchema};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| LlmError::Transport(error.to_string()))?;
        Ok(Self { client, base_url: base_url.into(), api_key, model: model.into() })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = match (&config.base_url, config.provider) {
            (Some(base_url), _) => base_url.clone(),
            (None, LlmProvider::OpenAi) => OPENAI_BASE_URL.to_string(),
            (None, LlmProvider::Ollama) => "http://localhost:11434/v1".to_string(),
        };
        Self::new(
            base_url,
            config.api_key.clone(),
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, messages: &[ChatMessage], schema: Option<&OutputSchema>) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(message_to_openai).collect::<Vec<_>>(),
        });
        if let Some(schema) = schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                    "strict": false,
                },
            });
        }
        body
    }

    async fn send(&self, body: Value) -> Result<String, LlmError> {
        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response =
            request.send().await.map_err(|error| LlmError::Transport(error.to_string()))?;
        let status = response.status().as_u16();
        let body_text =
            response.text().await.map_err(|error| LlmError::Transport(error.to_string()))?;

        if status != 200 {
            return Err(parse_http_error(status, body_text));
        }

        let parsed: CompletionResponse = serde_json::from_str(&body_text)
            .map_err(|error| LlmError::Parse(format!("failed to parse completion: {error}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::EmptyAnswer)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.send(self.request_body(messages, None)).await
    }

    async fn complete_structured(
        &self,
        messages: &[ChatMessage],
        schema: &OutputSchema,
    ) -> Result<Value, LlmError> {
        let content = self.send(self.request_body(messages, Some(schema))).await?;
        serde_json::from_str(&content)
            .map_err(|error| LlmError::Parse(format!("structured answer is not JSON: {error}")))
    }
}

fn message_to_openai(message: &ChatMessage) -> Value {
    let role = match message.role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    };

    if message.images.is_empty() {
        return json!({ "role": role, "content": message.content });
    }

    let mut parts = vec![json!({ "type": "text", "text": message.content })];
    parts.extend(message.images.iter().map(|image| {
        json!({
            "type": "image_url",
            "image_url": { "url": format!("data:image/png;base64,{image}") },
        })
    }));
    json!({ "role": role, "content": parts })
}

fn parse_http_error(status: u16, body: String) -> LlmError {
    match status {
        401 | 403 => LlmError::Authentication(body),
        429 => LlmError::RateLimited(body),
        _ => LlmError::Http { status, body },
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}
