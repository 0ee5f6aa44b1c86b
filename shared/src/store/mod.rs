//! Chart persistence.
//!
//! [`ChartStore`] is implemented by the hosted Postgres store and by a
//! local store with identical semantics, used when no database is
//! configured and in tests.

pub mod local;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::config::{StoreBackend, StoreConfig};
use crate::db::create_pool;
use crate::models::{ChartLookup, NewChart, Owner, StoredChart};
use crate::secrets::get_database_credentials;
use crate::{Error, Result};

pub use local::LocalChartStore;
pub use postgres::PgChartStore;

#[async_trait]
pub trait ChartStore: Send + Sync {
    /// Number of charts currently owned by `owner`.
    async fn count_charts(&self, owner: &Owner) -> Result<i64>;

    /// Whether the user has a pro subscription.
    async fn is_pro(&self, user_id: &str) -> Result<bool>;

    /// Insert a chart owned by `chart.owner`.
    ///
    /// With a `limit`, the owner's count is checked and the row inserted
    /// atomically with respect to other inserts for the same owner; a full
    /// quota yields [`Error::QuotaExceeded`](crate::Error::QuotaExceeded).
    /// A taken share id yields [`Error::ShareIdConflict`](crate::Error::ShareIdConflict).
    async fn insert_chart(&self, chart: NewChart, limit: Option<i64>) -> Result<StoredChart>;

    /// All charts of `owner`, newest first.
    async fn list_charts(&self, owner: &Owner) -> Result<Vec<StoredChart>>;

    async fn get_chart(&self, lookup: &ChartLookup) -> Result<Option<StoredChart>>;

    /// Returns whether a row was deleted.
    async fn delete_chart(&self, id: Uuid) -> Result<bool>;

    /// Reassign every chart owned by `anonymous_id` (and no user) to `user_id`.
    /// Returns the number of rows moved.
    async fn migrate_charts(&self, anonymous_id: &str, user_id: &str) -> Result<u64>;
}

/// Open the store selected by `config`.
pub async fn open(config: &StoreConfig, aws_config: &aws_config::SdkConfig) -> Result<Arc<dyn ChartStore>> {
    match config.backend {
        StoreBackend::Postgres => {
            let secret_arn = config
                .db_secret_arn
                .as_deref()
                .ok_or_else(|| Error::Config("DATABASE_URL_SECRET_ARN must be set".to_string()))?;
            let secrets_client = aws_sdk_secretsmanager::Client::new(aws_config);
            let credentials = get_database_credentials(&secrets_client, secret_arn).await?;
            let pool = create_pool(config, &credentials).await?;
            info!("Connected to chart database {}", config.db_name);
            Ok(Arc::new(PgChartStore::new(pool)))
        }
        StoreBackend::Local => {
            let store = match &config.local_path {
                Some(path) => LocalChartStore::open(path).await?,
                None => LocalChartStore::new(),
            };
            info!("Using local chart store");
            Ok(Arc::new(store))
        }
    }
}
