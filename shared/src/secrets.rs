//! AWS Secrets Manager integration.

use aws_sdk_secretsmanager::Client as SecretsClient;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::RwLock;

use crate::config::ApiKeySource;
use crate::{Error, Result};

/// Secret strings already fetched by this process, keyed by ARN.
static SECRET_VALUES: OnceLock<RwLock<HashMap<String, String>>> = OnceLock::new();

fn secret_values() -> &'static RwLock<HashMap<String, String>> {
    SECRET_VALUES.get_or_init(Default::default)
}

/// Login for the chart database. Host, port and name are optional; the
/// environment fills in what the secret leaves out.
#[derive(Debug, Deserialize)]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub dbname: Option<String>,
}

/// Read a secret string, fetching it at most once per process.
///
/// Failures are configuration errors: the endpoint cannot work until the
/// secret exists and holds a string.
pub async fn get_secret(client: &SecretsClient, secret_arn: &str) -> Result<String> {
    if let Some(value) = secret_values().read().await.get(secret_arn) {
        return Ok(value.clone());
    }

    let output = client
        .get_secret_value()
        .secret_id(secret_arn)
        .send()
        .await
        .map_err(|e| Error::Config(format!("Failed to read secret {}: {}", secret_arn, e)))?;
    let value = output
        .secret_string()
        .map(str::to_string)
        .ok_or_else(|| Error::Config(format!("Secret {} has no string value", secret_arn)))?;

    secret_values()
        .write()
        .await
        .insert(secret_arn.to_string(), value.clone());
    Ok(value)
}

/// Get database credentials from Secrets Manager.
pub async fn get_database_credentials(
    client: &SecretsClient,
    secret_arn: &str,
) -> Result<DatabaseCredentials> {
    let secret_string = get_secret(client, secret_arn).await?;
    parse_database_credentials(&secret_string)
}

fn parse_database_credentials(secret_string: &str) -> Result<DatabaseCredentials> {
    serde_json::from_str(secret_string)
        .map_err(|e| Error::Config(format!("Failed to parse database credentials: {}", e)))
}

/// Resolve the generation API key, reading it from Secrets Manager when needed.
///
/// The secret may hold the bare key or a JSON object with an `api_key` field.
pub async fn resolve_api_key(client: &SecretsClient, source: &ApiKeySource) -> Result<String> {
    match source {
        ApiKeySource::Plain(key) => Ok(key.clone()),
        ApiKeySource::Secret(arn) => {
            let secret = get_secret(client, arn).await?;
            Ok(api_key_from_secret(&secret))
        }
    }
}

fn api_key_from_secret(secret: &str) -> String {
    serde_json::from_str::<serde_json::Value>(secret)
        .ok()
        .and_then(|v| v.get("api_key").and_then(|k| k.as_str()).map(String::from))
        .unwrap_or_else(|| secret.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rds_style_credentials() {
        let creds = parse_database_credentials(
            r#"{"username":"charts_app","password":"pw","host":"charts.cluster.local","port":5433,"engine":"postgres"}"#,
        )
        .unwrap();
        assert_eq!(creds.username, "charts_app");
        assert_eq!(creds.port, Some(5433));
        assert!(creds.dbname.is_none());

        let minimal = parse_database_credentials(r#"{"username":"u","password":"p"}"#).unwrap();
        assert!(minimal.host.is_none());
    }

    #[test]
    fn test_malformed_credentials_are_config_errors() {
        assert!(matches!(parse_database_credentials("{}"), Err(Error::Config(_))));
    }

    #[test]
    fn test_api_key_from_secret() {
        assert_eq!(api_key_from_secret(r#"{"api_key":"sk-json"}"#), "sk-json");
        assert_eq!(api_key_from_secret("sk-plain\n"), "sk-plain");
    }
}
