use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use openrag_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

/// One rendered config key: dotted path, primary env var, display value.
struct Field {
    key_path: &'static str,
    env_key: &'static str,
    value: String,
}

impl Field {
    fn new(key_path: &'static str, env_key: &'static str, value: impl Into<String>) -> Self {
        Self { key_path, env_key, value: value.into() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key_path,
            Some(field.env_key),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key_path, &field.value, source));
    }

    let source = field_source(
        "admin_levels",
        None,
        config_file_doc.as_ref(),
        config_file_path.as_deref(),
    );
    lines.push(format!("- admin_levels (source: {source}):"));
    for (region, language, level) in config.admin_levels.entries() {
        lines.push(format!("  - {region}/{language} = {level}"));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    vec![
        Field::new("llm.provider", "OPENRAG_LLM_PROVIDER", format!("{:?}", config.llm.provider)),
        Field::new("llm.model", "OPENRAG_LLM_MODEL", config.llm.model.as_str()),
        Field::new(
            "llm.base_url",
            "OPENRAG_LLM_BASE_URL",
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
        ),
        Field::new("llm.api_key", "OPENRAG_LLM_API_KEY", redact_secret(config.llm.api_key.as_ref())),
        Field::new("llm.timeout_secs", "OPENRAG_LLM_TIMEOUT_SECS", config.llm.timeout_secs.to_string()),
        Field::new("search.enabled", "OPENRAG_SEARCH_ENABLED", config.search.enabled.to_string()),
        Field::new(
            "search.api_key",
            "OPENRAG_SEARCH_API_KEY",
            redact_secret(config.search.api_key.as_ref()),
        ),
        Field::new(
            "search.engine_id",
            "OPENRAG_SEARCH_ENGINE_ID",
            config.search.engine_id.as_deref().unwrap_or("<unset>"),
        ),
        Field::new("search.base_url", "OPENRAG_SEARCH_BASE_URL", config.search.base_url.as_str()),
        Field::new(
            "search.result_count",
            "OPENRAG_SEARCH_RESULT_COUNT",
            config.search.result_count.to_string(),
        ),
        Field::new(
            "search.fetch_timeout_secs",
            "OPENRAG_SEARCH_FETCH_TIMEOUT_SECS",
            config.search.fetch_timeout_secs.to_string(),
        ),
        Field::new(
            "analytics.base_url",
            "OPENRAG_ANALYTICS_BASE_URL",
            config.analytics.base_url.as_str(),
        ),
        Field::new(
            "analytics.api_key",
            "OPENRAG_ANALYTICS_API_KEY",
            redact_secret(config.analytics.api_key.as_ref()),
        ),
        Field::new(
            "analytics.timeout_secs",
            "OPENRAG_ANALYTICS_TIMEOUT_SECS",
            config.analytics.timeout_secs.to_string(),
        ),
        Field::new(
            "pipeline.default_language",
            "OPENRAG_PIPELINE_LANGUAGE",
            config.pipeline.default_language.as_str(),
        ),
        Field::new("logging.level", "OPENRAG_LOGGING_LEVEL", config.logging.level.as_str()),
        Field::new("logging.format", "OPENRAG_LOGGING_FORMAT", format!("{:?}", config.logging.format)),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("openrag.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/openrag.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if let Some(active) = active_env_key(env_key) {
            return format!("env ({active})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

/// Logging keys also accept the shorter `OPENRAG_LOG_*` aliases.
fn active_env_key(env_key: &str) -> Option<String> {
    if env::var_os(env_key).is_some() {
        return Some(env_key.to_string());
    }
    let alias = env_key.replace("OPENRAG_LOGGING_", "OPENRAG_LOG_");
    (alias != env_key && env::var_os(&alias).is_some()).then_some(alias)
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    match secret {
        None => "<unset>".to_string(),
        Some(secret) if secret.expose_secret().trim().is_empty() => "<empty>".to_string(),
        Some(_) => "<redacted>".to_string(),
    }
}
