use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::formats::{is_admin_level_token, AdminLevelTable};

/// Read-only settings handed to the pipeline driver at construction.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub analytics: AnalyticsConfig,
    pub pipeline: PipelineConfig,
    pub admin_levels: AdminLevelTable,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub enabled: bool,
    pub api_key: Option<SecretString>,
    pub engine_id: Option<String>,
    pub base_url: String,
    pub result_count: u8,
    pub fetch_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AnalyticsConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub default_language: String,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub search_enabled: Option<bool>,
    pub analytics_base_url: Option<String>,
    pub default_language: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434/v1".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 120,
            },
            search: SearchConfig {
                enabled: false,
                api_key: None,
                engine_id: None,
                base_url: "https://www.googleapis.com/customsearch/v1".to_string(),
                result_count: 3,
                fetch_timeout_secs: 15,
            },
            analytics: AnalyticsConfig {
                base_url: "http://127.0.0.1:8700".to_string(),
                api_key: None,
                timeout_secs: 60,
            },
            pipeline: PipelineConfig { default_language: "zh-TW".to_string() },
            admin_levels: AdminLevelTable::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("openrag.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(search) = patch.search {
            if let Some(enabled) = search.enabled {
                self.search.enabled = enabled;
            }
            if let Some(search_api_key_value) = search.api_key {
                self.search.api_key = Some(secret_value(search_api_key_value));
            }
            if let Some(engine_id) = search.engine_id {
                self.search.engine_id = Some(engine_id);
            }
            if let Some(base_url) = search.base_url {
                self.search.base_url = base_url;
            }
            if let Some(result_count) = search.result_count {
                self.search.result_count = result_count;
            }
            if let Some(fetch_timeout_secs) = search.fetch_timeout_secs {
                self.search.fetch_timeout_secs = fetch_timeout_secs;
            }
        }

        if let Some(analytics) = patch.analytics {
            if let Some(base_url) = analytics.base_url {
                self.analytics.base_url = base_url;
            }
            if let Some(analytics_api_key_value) = analytics.api_key {
                self.analytics.api_key = Some(secret_value(analytics_api_key_value));
            }
            if let Some(timeout_secs) = analytics.timeout_secs {
                self.analytics.timeout_secs = timeout_secs;
            }
        }

        if let Some(pipeline) = patch.pipeline {
            if let Some(default_language) = pipeline.default_language {
                self.pipeline.default_language = default_language;
            }
        }

        if let Some(admin_levels) = patch.admin_levels {
            self.admin_levels.merge(admin_levels);
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("OPENRAG_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("OPENRAG_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("OPENRAG_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("OPENRAG_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("OPENRAG_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("OPENRAG_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("OPENRAG_SEARCH_ENABLED") {
            self.search.enabled = parse_bool("OPENRAG_SEARCH_ENABLED", &value)?;
        }
        if let Some(value) = read_env("OPENRAG_SEARCH_API_KEY") {
            self.search.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("OPENRAG_SEARCH_ENGINE_ID") {
            self.search.engine_id = Some(value);
        }
        if let Some(value) = read_env("OPENRAG_SEARCH_BASE_URL") {
            self.search.base_url = value;
        }
        if let Some(value) = read_env("OPENRAG_SEARCH_RESULT_COUNT") {
            self.search.result_count = parse_u8("OPENRAG_SEARCH_RESULT_COUNT", &value)?;
        }
        if let Some(value) = read_env("OPENRAG_SEARCH_FETCH_TIMEOUT_SECS") {
            self.search.fetch_timeout_secs =
                parse_u64("OPENRAG_SEARCH_FETCH_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("OPENRAG_ANALYTICS_BASE_URL") {
            self.analytics.base_url = value;
        }
        if let Some(value) = read_env("OPENRAG_ANALYTICS_API_KEY") {
            self.analytics.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("OPENRAG_ANALYTICS_TIMEOUT_SECS") {
            self.analytics.timeout_secs = parse_u64("OPENRAG_ANALYTICS_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("OPENRAG_PIPELINE_LANGUAGE") {
            self.pipeline.default_language = value;
        }

        let log_level =
            read_env("OPENRAG_LOGGING_LEVEL").or_else(|| read_env("OPENRAG_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("OPENRAG_LOGGING_FORMAT").or_else(|| read_env("OPENRAG_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(enabled) = overrides.search_enabled {
            self.search.enabled = enabled;
        }
        if let Some(base_url) = overrides.analytics_base_url {
            self.analytics.base_url = base_url;
        }
        if let Some(language) = overrides.default_language {
            self.pipeline.default_language = language;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_search(&self.search)?;
        validate_analytics(&self.analytics)?;
        validate_pipeline(&self.pipeline)?;
        validate_admin_levels(&self.admin_levels)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("openrag.toml"), PathBuf::from("config/openrag.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for the ollama provider".to_string(),
                ));
            }
        }
    }

    if let Some(base_url) = &llm.base_url {
        require_http_url("llm.base_url", base_url)?;
    }

    Ok(())
}

fn validate_search(search: &SearchConfig) -> Result<(), ConfigError> {
    if search.result_count == 0 || search.result_count > 10 {
        return Err(ConfigError::Validation(
            "search.result_count must be in range 1..=10".to_string(),
        ));
    }

    if search.fetch_timeout_secs == 0 || search.fetch_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "search.fetch_timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    require_http_url("search.base_url", &search.base_url)?;

    if search.enabled {
        let missing_key = search
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing_key {
            return Err(ConfigError::Validation(
                "search.enabled is true but search.api_key is missing".to_string(),
            ));
        }
        let missing_engine =
            search.engine_id.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
        if missing_engine {
            return Err(ConfigError::Validation(
                "search.enabled is true but search.engine_id is missing".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_analytics(analytics: &AnalyticsConfig) -> Result<(), ConfigError> {
    require_http_url("analytics.base_url", &analytics.base_url)?;

    if analytics.timeout_secs == 0 || analytics.timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "analytics.timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    Ok(())
}

fn validate_pipeline(pipeline: &PipelineConfig) -> Result<(), ConfigError> {
    if pipeline.default_language.trim().is_empty() {
        return Err(ConfigError::Validation(
            "pipeline.default_language must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_admin_levels(admin_levels: &AdminLevelTable) -> Result<(), ConfigError> {
    if admin_levels.is_empty() {
        return Err(ConfigError::Validation(
            "admin_levels must define at least one region".to_string(),
        ));
    }

    for (region, language, level) in admin_levels.entries() {
        if !is_admin_level_token(level) {
            return Err(ConfigError::Validation(format!(
                "admin_levels.{region}.{language} = `{level}` is not a recognized admin level"
            )));
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn require_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{key} must start with http:// or https://")))
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u8(key: &str, value: &str) -> Result<u8, ConfigError> {
    value.parse::<u8>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    search: Option<SearchPatch>,
    analytics: Option<AnalyticsPatch>,
    pipeline: Option<PipelinePatch>,
    admin_levels: Option<AdminLevelTable>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchPatch {
    enabled: Option<bool>,
    api_key: Option<String>,
    engine_id: Option<String>,
    base_url: Option<String>,
    result_count: Option<u8>,
    fetch_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalyticsPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelinePatch {
    default_language: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

/// Environment keys read by [`AppConfig::load`], in the order they are applied.
pub const ENV_KEYS: &[&str] = &[
    "OPENRAG_LLM_PROVIDER",
    "OPENRAG_LLM_API_KEY",
    "OPENRAG_LLM_BASE_URL",
    "OPENRAG_LLM_MODEL",
    "OPENRAG_LLM_TIMEOUT_SECS",
    "OPENRAG_SEARCH_ENABLED",
    "OPENRAG_SEARCH_API_KEY",
    "OPENRAG_SEARCH_ENGINE_ID",
    "OPENRAG_SEARCH_BASE_URL",
    "OPENRAG_SEARCH_RESULT_COUNT",
    "OPENRAG_SEARCH_FETCH_TIMEOUT_SECS",
    "OPENRAG_ANALYTICS_BASE_URL",
    "OPENRAG_ANALYTICS_API_KEY",
    "OPENRAG_ANALYTICS_TIMEOUT_SECS",
    "OPENRAG_PIPELINE_LANGUAGE",
    "OPENRAG_LOGGING_LEVEL",
    "OPENRAG_LOG_LEVEL",
    "OPENRAG_LOGGING_FORMAT",
    "OPENRAG_LOG_FORMAT",
];
