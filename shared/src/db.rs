//! Database connection management.

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::StoreConfig;
use crate::secrets::DatabaseCredentials;
use crate::{Error, Result};

/// Connection settings from config plus credentials.
///
/// Built field by field so passwords never pass through URL parsing.
pub fn connect_options(config: &StoreConfig, credentials: &DatabaseCredentials) -> Result<PgConnectOptions> {
    let host = config
        .db_host
        .as_deref()
        .or(credentials.host.as_deref())
        .ok_or_else(|| Error::Config("No database host configured".to_string()))?;

    Ok(PgConnectOptions::new()
        .host(host)
        .port(credentials.port.unwrap_or(5432))
        .username(&credentials.username)
        .password(&credentials.password)
        .database(credentials.dbname.as_deref().unwrap_or(&config.db_name)))
}

/// Create a database connection pool.
pub async fn create_pool(config: &StoreConfig, credentials: &DatabaseCredentials) -> Result<PgPool> {
    let options = connect_options(config, credentials)?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(3))
        .connect_with(options)
        .await
        .map_err(Error::Database)?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreBackend;

    fn store_config(db_host: Option<&str>) -> StoreConfig {
        StoreConfig {
            backend: StoreBackend::Postgres,
            db_host: db_host.map(String::from),
            db_name: "charts".to_string(),
            db_secret_arn: Some("arn:aws:secretsmanager:us-east-1:123:secret:db".to_string()),
            local_path: None,
            share_base_url: "https://charts.example.com".to_string(),
            allow_bare_id_delete: false,
        }
    }

    fn credentials(password: &str) -> DatabaseCredentials {
        DatabaseCredentials {
            username: "charts_app".to_string(),
            password: password.to_string(),
            host: Some("secret-host.internal".to_string()),
            port: None,
            dbname: None,
        }
    }

    #[test]
    fn test_password_with_url_delimiters() {
        let options = connect_options(&store_config(Some("db.internal")), &credentials("ab#cd@x/y?z%")).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 5432);
        assert_eq!(options.get_username(), "charts_app");
        assert_eq!(options.get_database(), Some("charts"));
    }

    #[test]
    fn test_host_falls_back_to_secret() {
        let options = connect_options(&store_config(None), &credentials("pw")).unwrap();
        assert_eq!(options.get_host(), "secret-host.internal");

        let mut no_host = credentials("pw");
        no_host.host = None;
        assert!(matches!(
            connect_options(&store_config(None), &no_host),
            Err(Error::Config(_))
        ));
    }
}
