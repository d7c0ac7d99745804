use std::time::Duration;

use openrag_agent::analytics::HttpAnalyticsClient;
use openrag_agent::html::ContentExtractor;
use openrag_agent::openai::OpenAiClient;
use openrag_agent::search::{GoogleSearchClient, HttpPageFetcher};
use openrag_core::config::{AppConfig, LoadOptions};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 4] =
    ["llm_client", "analytics_client", "web_search", "content_extractor"];

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_llm_client(&config));
            checks.push(check_analytics_client(&config));
            checks.push(check_web_search(&config));
            checks.push(check_content_extractor());
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(DEPENDENT_CHECKS.into_iter().map(|name| DoctorCheck {
                name,
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            }));
        }
    }

    // A disabled web search is not a readiness failure.
    let all_pass = checks.iter().all(|check| check.status != CheckStatus::Fail);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm_client(config: &AppConfig) -> DoctorCheck {
    match OpenAiClient::from_config(&config.llm) {
        Ok(_) => DoctorCheck {
            name: "llm_client",
            status: CheckStatus::Pass,
            details: format!("{:?} client ready for model `{}`", config.llm.provider, config.llm.model),
        },
        Err(error) => {
            DoctorCheck { name: "llm_client", status: CheckStatus::Fail, details: error.to_string() }
        }
    }
}

fn check_analytics_client(config: &AppConfig) -> DoctorCheck {
    match HttpAnalyticsClient::from_config(&config.analytics) {
        Ok(_) => DoctorCheck {
            name: "analytics_client",
            status: CheckStatus::Pass,
            details: format!("gateway configured at `{}`", config.analytics.base_url),
        },
        Err(error) => DoctorCheck {
            name: "analytics_client",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_web_search(config: &AppConfig) -> DoctorCheck {
    match GoogleSearchClient::from_config(&config.search) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return DoctorCheck {
                name: "web_search",
                status: CheckStatus::Skipped,
                details: "web search is disabled; the full route runs analytics only".to_string(),
            };
        }
        Err(error) => {
            return DoctorCheck {
                name: "web_search",
                status: CheckStatus::Fail,
                details: error.to_string(),
            };
        }
    }

    match HttpPageFetcher::new(Duration::from_secs(config.search.fetch_timeout_secs)) {
        Ok(_) => DoctorCheck {
            name: "web_search",
            status: CheckStatus::Pass,
            details: format!("search returns top {} results", config.search.result_count),
        },
        Err(error) => {
            DoctorCheck { name: "web_search", status: CheckStatus::Fail, details: error.to_string() }
        }
    }
}

fn check_content_extractor() -> DoctorCheck {
    match ContentExtractor::new() {
        Ok(_) => DoctorCheck {
            name: "content_extractor",
            status: CheckStatus::Pass,
            details: "html extraction patterns compiled".to_string(),
        },
        Err(error) => DoctorCheck {
            name: "content_extractor",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
