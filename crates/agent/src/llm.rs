use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One chat turn. `images` holds base64-encoded PNG payloads attached to user turns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into(), images: Vec::new() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into(), images: Vec::new() }
    }

    pub fn with_image(mut self, base64_png: impl Into<String>) -> Self {
        self.images.push(base64_png.into());
        self
    }
}

/// A named JSON schema the model's answer must conform to.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputSchema {
    pub name: String,
    pub schema: Value,
}

impl OutputSchema {
    pub fn of<T: JsonSchema>(name: impl Into<String>) -> Result<Self, LlmError> {
        let schema = serde_json::to_value(schemars::schema_for!(T))
            .map_err(|error| LlmError::Schema(error.to_string()))?;
        Ok(Self { name: name.into(), schema })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("model transport failed: {0}")]
    Transport(String),
    #[error("model endpoint rejected credentials: {0}")]
    Authentication(String),
    #[error("model endpoint is rate limiting: {0}")]
    RateLimited(String),
    #[error("model endpoint returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("model answer could not be parsed: {0}")]
    Parse(String),
    #[error("output schema could not be generated: {0}")]
    Schema(String),
    #[error("model returned an empty answer")]
    EmptyAnswer,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Free-text completion.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// Completion constrained to `schema`; returns the parsed JSON object.
    async fn complete_structured(
        &self,
        messages: &[ChatMessage],
        schema: &OutputSchema,
    ) -> Result<Value, LlmError>;
}

/// Returns the body of the last ```json fenced block in `text`, if any.
pub fn last_fenced_json(text: &str) -> Option<&str> {
    const OPEN: &str = "```json";
    const CLOSE: &str = "```";

    let mut cursor = 0;
    let mut last = None;
    while let Some(start) = text[cursor..].find(OPEN) {
        let body_start = cursor + start + OPEN.len();
        let Some(end) = text[body_start..].find(CLOSE) else {
            break;
        };
        let body_end = body_start + end;
        last = Some(&text[body_start..body_end]);
        cursor = body_end + CLOSE.len();
    }
    last
}

#[cfg(test)]
mod tests {
    use schemars::JsonSchema;
    use serde::Deserialize;

    use super::{last_fenced_json, ChatMessage, ChatRole, OutputSchema};

    #[test]
    fn last_fenced_block_wins() {
        let text = "draft:\n```json\n{\"charts\": []}\n```\nfinal:\n```json\n{\"charts\": [1]}\n```";
        assert_eq!(last_fenced_json(text).map(str::trim), Some("{\"charts\": [1]}"));
    }

    #[test]
    fn unterminated_or_missing_blocks_yield_nothing() {
        assert_eq!(last_fenced_json("no code here"), None);
        assert_eq!(last_fenced_json("```json\n{\"open\": true}"), None);
        assert_eq!(last_fenced_json("```python\nprint(1)\n```"), None);
    }

    #[test]
    fn unterminated_trailing_block_keeps_previous_match() {
        let text = "```json\n{\"a\": 1}\n```\n```json\n{\"b\": 2}";
        assert_eq!(last_fenced_json(text).map(str::trim), Some("{\"a\": 1}"));
    }

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Selection {
        dataset_key: Vec<String>,
    }

    #[test]
    fn output_schema_describes_fields() {
        let schema = OutputSchema::of::<Selection>("selection").expect("schema generates");
        assert_eq!(schema.name, "selection");
        assert!(schema.schema["properties"]["dataset_key"].is_object());
    }

    #[test]
    fn message_builders_set_roles() {
        let message = ChatMessage::user("hi").with_image("aGVsbG8=");
        assert_eq!(message.role, ChatRole::User);
        assert_eq!(message.images.len(), 1);
        assert_eq!(ChatMessage::system("sys").role, ChatRole::System);
    }
}
