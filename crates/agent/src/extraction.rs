//! Bounded retry loop that turns unreliable model answers into validated values.
//!
//! Every attempt is a fresh model call. Any failure along the way (transport, missing or
//! malformed JSON, schema mismatch, validator rejection, a failed collaborator call made by the
//! validator) discards the attempt. After [`MAX_ATTEMPTS`] failures the caller receives
//! [`ExtractionExhausted`] carrying the last error.

use std::future::Future;

use openrag_core::errors::ValidationError;
use openrag_core::flows::PipelineStage;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::llm::{last_fenced_json, ChatMessage, LlmClient, LlmError, OutputSchema};
use crate::tools::AnalyticsError;

pub const MAX_ATTEMPTS: u32 = 5;

#[derive(Clone, Debug)]
pub enum ResponseMode {
    /// The model is constrained to the schema and returns a JSON object.
    Structured(OutputSchema),
    /// The model answers freely; the last ```json block is parsed.
    FencedJson,
}

#[derive(Clone, Debug)]
pub struct ExtractionRequest {
    pub stage: PipelineStage,
    pub messages: Vec<ChatMessage>,
    pub mode: ResponseMode,
}

impl ExtractionRequest {
    pub fn structured(stage: PipelineStage, messages: Vec<ChatMessage>, schema: OutputSchema) -> Self {
        Self { stage, messages, mode: ResponseMode::Structured(schema) }
    }

    pub fn fenced_json(stage: PipelineStage, messages: Vec<ChatMessage>) -> Self {
        Self { stage, messages, mode: ResponseMode::FencedJson }
    }
}

/// Why one attempt was discarded.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AttemptError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("answer does not match the expected shape: {0}")]
    Shape(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("collaborator call failed: {0}")]
    Collaborator(#[from] AnalyticsError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("gave up after {attempts} attempts: {last_error}")]
pub struct ExtractionExhausted {
    pub attempts: u32,
    pub last_error: AttemptError,
}

/// Runs up to [`MAX_ATTEMPTS`] model calls, feeding each decoded answer to `validate`.
pub async fn extract<T, O, V, Fut>(
    llm: &dyn LlmClient,
    request: &ExtractionRequest,
    mut validate: V,
) -> Result<O, ExtractionExhausted>
where
    T: DeserializeOwned,
    V: FnMut(T) -> Fut,
    Fut: Future<Output = Result<O, AttemptError>>,
{
    let mut last_error = AttemptError::Shape("no attempt was made".to_string());

    for attempt in 1..=MAX_ATTEMPTS {
        let outcome = match request_once::<T>(llm, request).await {
            Ok(decoded) => validate(decoded).await,
            Err(error) => Err(error),
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        event_name = "extraction.recovered",
                        stage = %request.stage,
                        attempt,
                        "extraction succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(error) => {
                debug!(
                    event_name = "extraction.attempt_failed",
                    stage = %request.stage,
                    attempt,
                    error = %error,
                    "discarding model answer"
                );
                last_error = error;
            }
        }
    }

    Err(ExtractionExhausted { attempts: MAX_ATTEMPTS, last_error })
}

async fn request_once<T: DeserializeOwned>(
    llm: &dyn LlmClient,
    request: &ExtractionRequest,
) -> Result<T, AttemptError> {
    let raw: Value = match &request.mode {
        ResponseMode::Structured(schema) => llm.complete_structured(&request.messages, schema).await?,
        ResponseMode::FencedJson => {
            let text = llm.complete(&request.messages).await?;
            let block = last_fenced_json(&text).ok_or(ValidationError::MissingJsonBlock)?;
            serde_json::from_str(block).map_err(|error| AttemptError::Shape(error.to_string()))?
        }
    };

    serde_json::from_value(raw).map_err(|error| AttemptError::Shape(error.to_string()))
}

/// Adapts a synchronous validator to the shape [`extract`] expects.
pub fn sync_validator<T, O, F>(
    mut validate: F,
) -> impl FnMut(T) -> std::future::Ready<Result<O, AttemptError>>
where
    F: FnMut(T) -> Result<O, AttemptError>,
{
    move |value| std::future::ready(validate(value))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use openrag_core::errors::ValidationError;
    use openrag_core::flows::PipelineStage;
    use serde::Deserialize;
    use serde_json::{json, Value};

    use super::{extract, sync_validator, AttemptError, ExtractionRequest, MAX_ATTEMPTS};
    use crate::llm::{ChatMessage, LlmClient, LlmError, OutputSchema};

    struct Scripted {
        text: Mutex<VecDeque<Result<String, LlmError>>>,
        structured: Mutex<VecDeque<Result<Value, LlmError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn text(answers: Vec<Result<String, LlmError>>) -> Self {
            Self {
                text: Mutex::new(answers.into()),
                structured: Mutex::new(VecDeque::new()),
                calls: Mutex::new(0),
            }
        }

        fn structured(answers: Vec<Result<Value, LlmError>>) -> Self {
            Self {
                text: Mutex::new(VecDeque::new()),
                structured: Mutex::new(answers.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().expect("calls lock")
        }
    }

    #[async_trait]
    impl LlmClient for Scripted {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
            *self.calls.lock().expect("calls lock") += 1;
            self.text.lock().expect("text lock").pop_front().unwrap_or(Err(LlmError::EmptyAnswer))
        }

        async fn complete_structured(
            &self,
            _messages: &[ChatMessage],
            _schema: &OutputSchema,
        ) -> Result<Value, LlmError> {
            *self.calls.lock().expect("calls lock") += 1;
            self.structured
                .lock()
                .expect("structured lock")
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyAnswer))
        }
    }

    #[derive(Deserialize, schemars::JsonSchema)]
    struct Pick {
        key: String,
    }

    fn structured_request() -> ExtractionRequest {
        ExtractionRequest::structured(
            PipelineStage::DatasetDiscovery,
            vec![ChatMessage::user("pick")],
            OutputSchema::of::<Pick>("pick").expect("schema"),
        )
    }

    fn only_b(pick: Pick) -> Result<String, AttemptError> {
        if pick.key == "b" {
            Ok(pick.key)
        } else {
            Err(ValidationError::UnknownDatasetKey(pick.key).into())
        }
    }

    #[tokio::test]
    async fn fifth_attempt_success_is_returned() {
        let llm = Scripted::structured(vec![
            Err(LlmError::Transport("reset".to_string())),
            Ok(json!({"key": "a"})),
            Ok(json!({"wrong": true})),
            Ok(json!({"key": "z"})),
            Ok(json!({"key": "b"})),
        ]);

        let value = extract(&llm, &structured_request(), sync_validator(only_b))
            .await
            .expect("fifth attempt validates");

        assert_eq!(value, "b");
        assert_eq!(llm.calls(), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn exhaustion_reports_last_error_after_five_calls() {
        let llm = Scripted::structured((0..7).map(|_| Ok(json!({"key": "a"}))).collect());

        let exhausted = extract(&llm, &structured_request(), sync_validator(only_b))
            .await
            .expect_err("never validates");

        assert_eq!(exhausted.attempts, MAX_ATTEMPTS);
        assert_eq!(
            exhausted.last_error,
            AttemptError::Validation(ValidationError::UnknownDatasetKey("a".to_string()))
        );
        assert_eq!(llm.calls(), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn fenced_mode_parses_last_block_and_retries_without_one() {
        let llm = Scripted::text(vec![
            Ok("I think the answer is b".to_string()),
            Ok("```json\n{\"key\": \"a\"}\n```\nactually:\n```json\n{\"key\": \"b\"}\n```".to_string()),
        ]);
        let request = ExtractionRequest::fenced_json(
            PipelineStage::QueryPlanning,
            vec![ChatMessage::user("plan")],
        );

        let value = extract(&llm, &request, sync_validator(only_b)).await.expect("second answer");

        assert_eq!(value, "b");
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn async_validators_can_fail_attempts() {
        let llm = Scripted::structured(vec![Ok(json!({"key": "b"})), Ok(json!({"key": "b"}))]);
        let mut seen = 0;

        let value = extract(&llm, &structured_request(), |pick: Pick| {
            seen += 1;
            let first = seen == 1;
            async move {
                if first {
                    Err(AttemptError::Shape("backend rejected".to_string()))
                } else {
                    Ok(pick.key)
                }
            }
        })
        .await
        .expect("second attempt");

        assert_eq!(value, "b");
        assert_eq!(llm.calls(), 2);
    }
}
