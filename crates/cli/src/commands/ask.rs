use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use openrag_agent::analytics::HttpAnalyticsClient;
use openrag_agent::openai::OpenAiClient;
use openrag_agent::search::{GoogleSearchClient, HttpPageFetcher};
use openrag_agent::tools::Collaborators;
use openrag_agent::Pipeline;
use openrag_core::audit::AuditContext;
use openrag_core::config::{AppConfig, LoadOptions};
use openrag_core::domain::state::Answer;
use serde::Serialize;
use serde_json::Value;

use crate::commands::{serialize_payload, CommandResult};

const COMMAND: &str = "ask";

#[derive(Debug, Clone)]
pub struct AskArgs {
    pub question: String,
    pub language: Option<String>,
    pub condition: Option<String>,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct AskOutcome<'a> {
    command: &'static str,
    status: &'static str,
    correlation_id: &'a str,
    json_data: &'a Value,
    text_response: &'a str,
}

pub fn run(args: AskArgs) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };
    crate::init_logging(&config);

    let collaborators = match build_collaborators(&config) {
        Ok(collaborators) => collaborators,
        Err(error) => {
            return CommandResult::failure(COMMAND, "collaborator_init", format!("{error:#}"), 2);
        }
    };

    let audit = AuditContext::generate("cli");
    let pipeline = match Pipeline::new(config, collaborators) {
        Ok(pipeline) => pipeline,
        Err(error) => return pipeline_failure(error, &audit),
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                5,
            );
        }
    };

    let result = runtime.block_on(pipeline.ask(
        args.question,
        args.language.as_deref(),
        args.condition.as_deref(),
        &audit,
    ));

    match result {
        Ok(answer) => render_answer(&answer, args.json, &audit.correlation_id),
        Err(error) => pipeline_failure(error, &audit),
    }
}

/// Builds the concrete HTTP collaborators. Web tools are attached only when search is enabled.
pub fn build_collaborators(config: &AppConfig) -> Result<Collaborators> {
    let llm = OpenAiClient::from_config(&config.llm).context("language model client")?;
    let analytics =
        HttpAnalyticsClient::from_config(&config.analytics).context("analytics client")?;
    let collaborators = Collaborators::new(Arc::new(llm), Arc::new(analytics));

    let search = GoogleSearchClient::from_config(&config.search).context("web search client")?;
    let Some(search) = search else {
        return Ok(collaborators);
    };

    let fetcher = HttpPageFetcher::new(Duration::from_secs(config.search.fetch_timeout_secs))
        .context("page fetcher")?;
    Ok(collaborators.with_web(Arc::new(search), Arc::new(fetcher)))
}

fn pipeline_failure(
    error: openrag_core::errors::PipelineError,
    audit: &AuditContext,
) -> CommandResult {
    tracing::error!(
        event_name = "cli.ask.failed",
        correlation_id = %audit.correlation_id,
        error_class = error.error_class(),
        error = %error,
        "question could not be answered"
    );

    let interface = error.into_interface(audit.correlation_id.clone());
    CommandResult::failure(
        COMMAND,
        interface.error_class(),
        format!("{} (correlation_id: {})", interface.user_message(), audit.correlation_id),
        interface.exit_code(),
    )
}

fn render_answer(answer: &Answer, json_output: bool, correlation_id: &str) -> CommandResult {
    if json_output {
        let payload = AskOutcome {
            command: COMMAND,
            status: "ok",
            correlation_id,
            json_data: &answer.json_data,
            text_response: &answer.text_response,
        };
        return CommandResult { exit_code: 0, output: serialize_payload(&payload) };
    }

    let mut output = answer.text_response.clone();
    if !answer.json_data.is_null() {
        if let Ok(data) = serde_json::to_string_pretty(&answer.json_data) {
            output.push_str("\n\n");
            output.push_str(&data);
        }
    }
    CommandResult { exit_code: 0, output }
}
