//! Agent runtime for the OpenRAG analytics pipeline.
//!
//! A question flows through up to six stages (web source discovery, dataset discovery, query
//! planning, filter resolution, query execution, interpretation). Each model-facing step goes
//! through [`extraction::extract`], which bounds retries and validates every answer before it
//! reaches the analytics backend.
//!
//! The model is only a translator: dataset identity, column types and admin levels always come
//! from the backend catalog or configuration, never from model output.

pub mod analytics;
pub mod extraction;
pub mod html;
pub mod llm;
pub mod openai;
pub mod pipeline;
pub mod prompts;
pub mod search;
pub mod stages;
pub mod tools;

pub use extraction::{AttemptError, ExtractionExhausted, ExtractionRequest, MAX_ATTEMPTS};
pub use llm::{ChatMessage, ChatRole, LlmClient, LlmError, OutputSchema};
pub use pipeline::{Pipeline, TracingAuditSink};
pub use tools::{
    AnalyticsClient, AnalyticsError, Collaborators, FetchError, FetchedPage, PageFetcher,
    SearchClient, SearchHit, WebTools,
};
