//! Configuration management for Lambda functions.
//!
//! Every setting comes from the environment. Problems surface as
//! [`Error::Config`] so that an endpoint can keep answering with a
//! configuration error instead of crashing the runtime.

use std::env;

use crate::{Error, Result};

/// Which text-generation backend to call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationProvider {
    /// OpenAI-compatible chat completions over HTTP.
    OpenAi,
    /// Amazon Bedrock Converse API.
    Bedrock,
}

/// Where the API key for an HTTP provider comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiKeySource {
    Plain(String),
    Secret(String),
}

/// Settings for the Generation Endpoint.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub provider: GenerationProvider,
    pub api_key: Option<ApiKeySource>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_retries: u32,
}

/// Which chart store backs the Persistence Endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Local,
}

/// Settings for the Persistence Endpoint.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Database host
    pub db_host: Option<String>,
    /// Database name
    pub db_name: String,
    /// ARN of the secret containing database credentials
    pub db_secret_arn: Option<String>,
    /// JSON file for the local backend
    pub local_path: Option<String>,
    /// Deployment base URL used for share links
    pub share_base_url: String,
    /// Allow deleting anonymous charts by id alone
    pub allow_bare_id_delete: bool,
}

/// Region used for AWS clients.
pub fn aws_region() -> String {
    env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string())
}

/// Shared AWS SDK configuration for the configured region.
pub async fn load_aws_config() -> aws_config::SdkConfig {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(aws_region()))
        .load()
        .await
}

impl GenerationConfig {
    /// Load the generation settings from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let provider = match var("GENERATION_PROVIDER").as_deref().map(str::trim) {
            None | Some("") | Some("openai") => GenerationProvider::OpenAi,
            Some("bedrock") => GenerationProvider::Bedrock,
            Some(other) => {
                return Err(Error::Config(format!("Unknown GENERATION_PROVIDER: {}", other)))
            }
        };

        let api_key = non_empty(var("OPENAI_API_KEY"))
            .map(ApiKeySource::Plain)
            .or_else(|| non_empty(var("OPENAI_API_KEY_SECRET_ARN")).map(ApiKeySource::Secret));

        if provider == GenerationProvider::OpenAi && api_key.is_none() {
            return Err(Error::Config(
                "OPENAI_API_KEY or OPENAI_API_KEY_SECRET_ARN must be set".to_string(),
            ));
        }

        let default_model = match provider {
            GenerationProvider::OpenAi => "gpt-4o-mini",
            GenerationProvider::Bedrock => "anthropic.claude-3-haiku-20240307-v1:0",
        };

        Ok(GenerationConfig {
            provider,
            api_key,
            base_url: non_empty(var("OPENAI_BASE_URL"))
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: non_empty(var("GENERATION_MODEL")).unwrap_or_else(|| default_model.to_string()),
            temperature: parse_or(var("GENERATION_TEMPERATURE"), "GENERATION_TEMPERATURE", 0.7)?,
            max_retries: parse_or(var("GENERATION_MAX_RETRIES"), "GENERATION_MAX_RETRIES", 0)?,
        })
    }
}

impl StoreConfig {
    /// Load the store settings from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let backend = match var("STORE_BACKEND").as_deref().map(str::trim) {
            None | Some("") | Some("postgres") => StoreBackend::Postgres,
            Some("local") => StoreBackend::Local,
            Some(other) => return Err(Error::Config(format!("Unknown STORE_BACKEND: {}", other))),
        };

        let db_host = non_empty(var("DATABASE_HOST"));
        let db_secret_arn = non_empty(var("DATABASE_URL_SECRET_ARN"));
        if backend == StoreBackend::Postgres && (db_host.is_none() || db_secret_arn.is_none()) {
            return Err(Error::Config(
                "DATABASE_HOST and DATABASE_URL_SECRET_ARN must be set".to_string(),
            ));
        }

        let share_base_url = non_empty(var("SHARE_BASE_URL"))
            .ok_or_else(|| Error::Config("SHARE_BASE_URL must be set".to_string()))?
            .trim_end_matches('/')
            .to_string();

        Ok(StoreConfig {
            backend,
            db_host,
            db_name: non_empty(var("DATABASE_NAME")).unwrap_or_else(|| "charts".to_string()),
            db_secret_arn,
            local_path: non_empty(var("LOCAL_STORE_PATH")),
            share_base_url,
            allow_bare_id_delete: parse_or(var("ALLOW_BARE_ID_DELETE"), "ALLOW_BARE_ID_DELETE", false)?,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, name: &str, default: T) -> Result<T> {
    match non_empty(value) {
        Some(v) => v
            .parse()
            .map_err(|_| Error::Config(format!("{} has an invalid value: {}", name, v))),
        None => Ok(default),
    }
}
