//! Hosted chart store on Postgres.
//!
//! Quota checks and inserts for one owner are serialized with a
//! transaction-scoped advisory lock keyed on the owner, so concurrent saves
//! cannot overshoot the limit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use super::ChartStore;
use crate::models::{ChartData, ChartLookup, ChartType, NewChart, Owner, StoredChart};
use crate::{Error, Result};

const COLUMNS: &str = r#"id, user_id, anonymous_id, title, chart_type, labels, "values", data,
    unit, description, sources, insights, trend, highlight_index,
    is_public, share_id, created_at, updated_at"#;

/// Row as stored in the `charts` table.
#[derive(Debug, sqlx::FromRow)]
struct ChartRow {
    id: Uuid,
    user_id: Option<String>,
    anonymous_id: Option<String>,
    title: String,
    chart_type: String,
    labels: Vec<String>,
    values: Option<Vec<f64>>,
    /// Legacy copy of `values` as a JSON array
    data: Option<serde_json::Value>,
    unit: Option<String>,
    description: Option<String>,
    sources: Option<Vec<String>>,
    insights: Option<Vec<String>>,
    trend: Option<String>,
    highlight_index: Option<i32>,
    is_public: bool,
    share_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ChartRow> for StoredChart {
    type Error = Error;

    fn try_from(row: ChartRow) -> Result<Self> {
        let values = match (row.values, row.data) {
            (Some(values), _) => values,
            (None, Some(data)) => legacy_values(&data).ok_or_else(|| {
                Error::Internal(format!("Chart {} has malformed legacy data", row.id))
            })?,
            (None, None) => {
                return Err(Error::Internal(format!("Chart {} has no values", row.id)))
            }
        };

        let chart_type: ChartType = row
            .chart_type
            .parse()
            .map_err(|_| Error::Internal(format!("Chart {} has chart type {}", row.id, row.chart_type)))?;

        Ok(StoredChart {
            id: row.id,
            user_id: row.user_id,
            anonymous_id: row.anonymous_id,
            chart: ChartData {
                title: row.title,
                chart_type,
                labels: row.labels,
                values,
                unit: row.unit,
                description: row.description,
                sources: row.sources,
                insights: row.insights,
                trend: row.trend.and_then(|t| t.parse().ok()),
                highlight_index: row
                    .highlight_index
                    .and_then(|i| usize::try_from(i).ok()),
            },
            is_public: row.is_public,
            share_id: row.share_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn legacy_values(data: &serde_json::Value) -> Option<Vec<f64>> {
    data.as_array()?.iter().map(|v| v.as_f64()).collect()
}

fn into_charts(rows: Vec<ChartRow>) -> Result<Vec<StoredChart>> {
    rows.into_iter().map(StoredChart::try_from).collect()
}

/// Chart store backed by a Postgres pool.
pub struct PgChartStore {
    pool: PgPool,
}

impl PgChartStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChartStore for PgChartStore {
    async fn count_charts(&self, owner: &Owner) -> Result<i64> {
        let count: i64 = match owner {
            Owner::User(user_id) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM charts WHERE user_id = $1")
                    .bind(user_id)
                    .fetch_one(&self.pool)
                    .await?
            }
            Owner::Anonymous(anonymous_id) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM charts WHERE anonymous_id = $1 AND user_id IS NULL",
                )
                .bind(anonymous_id)
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(count)
    }

    async fn is_pro(&self, user_id: &str) -> Result<bool> {
        let is_pro: Option<bool> =
            sqlx::query_scalar("SELECT is_pro FROM profiles WHERE id::text = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(is_pro.unwrap_or(false))
    }

    async fn insert_chart(&self, chart: NewChart, limit: Option<i64>) -> Result<StoredChart> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(chart.owner.lock_key())
            .execute(&mut *tx)
            .await?;

        if let Some(limit) = limit {
            let current: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM charts
                WHERE ($1::text IS NOT NULL AND user_id = $1)
                   OR ($2::text IS NOT NULL AND anonymous_id = $2 AND user_id IS NULL)
                "#,
            )
            .bind(chart.owner.user_id())
            .bind(chart.owner.anonymous_id())
            .fetch_one(&mut *tx)
            .await?;

            if current >= limit {
                return Err(Error::QuotaExceeded { current, limit });
            }
        }

        let data = &chart.chart;
        let sql = format!(
            r#"
            INSERT INTO charts (
                user_id, anonymous_id, title, chart_type, labels, "values", data,
                unit, description, sources, insights, trend, highlight_index,
                is_public, share_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, FALSE, $14)
            RETURNING {}
            "#,
            COLUMNS
        );

        let row: ChartRow = sqlx::query_as(&sql)
            .bind(chart.owner.user_id())
            .bind(chart.owner.anonymous_id())
            .bind(&data.title)
            .bind(data.chart_type.as_str())
            .bind(&data.labels)
            .bind(&data.values)
            .bind(serde_json::json!(data.values))
            .bind(&data.unit)
            .bind(&data.description)
            .bind(&data.sources)
            .bind(&data.insights)
            .bind(data.trend.map(|t| t.as_str()))
            .bind(data.highlight_index.map(|i| i as i32))
            .bind(&chart.share_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(db) = &e {
                    if db.is_unique_violation() {
                        warn!("Share id {} collided", chart.share_id);
                        return Error::ShareIdConflict(chart.share_id.clone());
                    }
                }
                Error::Database(e)
            })?;

        tx.commit().await?;

        info!("Inserted chart {} for {}", row.id, chart.owner.lock_key());

        StoredChart::try_from(row)
    }

    async fn list_charts(&self, owner: &Owner) -> Result<Vec<StoredChart>> {
        let rows: Vec<ChartRow> = match owner {
            Owner::User(user_id) => {
                let sql = format!(
                    "SELECT {} FROM charts WHERE user_id = $1 ORDER BY created_at DESC",
                    COLUMNS
                );
                sqlx::query_as(&sql).bind(user_id).fetch_all(&self.pool).await?
            }
            Owner::Anonymous(anonymous_id) => {
                let sql = format!(
                    "SELECT {} FROM charts WHERE anonymous_id = $1 AND user_id IS NULL ORDER BY created_at DESC",
                    COLUMNS
                );
                sqlx::query_as(&sql)
                    .bind(anonymous_id)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        into_charts(rows)
    }

    async fn get_chart(&self, lookup: &ChartLookup) -> Result<Option<StoredChart>> {
        let row: Option<ChartRow> = match lookup {
            ChartLookup::Id(id) => {
                let sql = format!("SELECT {} FROM charts WHERE id = $1", COLUMNS);
                sqlx::query_as(&sql).bind(id).fetch_optional(&self.pool).await?
            }
            ChartLookup::ShareId(share_id) => {
                let sql = format!("SELECT {} FROM charts WHERE share_id = $1", COLUMNS);
                sqlx::query_as(&sql)
                    .bind(share_id)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };
        row.map(StoredChart::try_from).transpose()
    }

    async fn delete_chart(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM charts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn migrate_charts(&self, anonymous_id: &str, user_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE charts
            SET user_id = $1, anonymous_id = NULL
            WHERE anonymous_id = $2 AND user_id IS NULL
            "#,
        )
        .bind(user_id)
        .bind(anonymous_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Trend;

    fn row() -> ChartRow {
        let now = Utc::now();
        ChartRow {
            id: Uuid::new_v4(),
            user_id: Some("u1".to_string()),
            anonymous_id: None,
            title: "Sales".to_string(),
            chart_type: "area".to_string(),
            labels: vec!["Q1".to_string(), "Q2".to_string()],
            values: Some(vec![10.0, 12.5]),
            data: None,
            unit: Some("EUR".to_string()),
            description: None,
            sources: None,
            insights: Some(vec!["Growing".to_string()]),
            trend: Some("up".to_string()),
            highlight_index: Some(1),
            is_public: false,
            share_id: "Qx7Lm2Pa".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_row_conversion() {
        let stored = StoredChart::try_from(row()).unwrap();
        assert_eq!(stored.chart.chart_type, ChartType::Area);
        assert_eq!(stored.chart.trend, Some(Trend::Up));
        assert_eq!(stored.chart.highlight_index, Some(1));
        assert_eq!(stored.chart.values, vec![10.0, 12.5]);
    }

    #[test]
    fn test_legacy_data_column_is_read() {
        let mut legacy = row();
        legacy.values = None;
        legacy.data = Some(serde_json::json!([4, 5.5]));
        let stored = StoredChart::try_from(legacy).unwrap();
        assert_eq!(stored.chart.values, vec![4.0, 5.5]);
    }

    #[test]
    fn test_row_without_values_is_rejected() {
        let mut broken = row();
        broken.values = None;
        assert!(StoredChart::try_from(broken).is_err());
    }

    #[test]
    fn test_unknown_trend_is_dropped() {
        let mut odd = row();
        odd.trend = Some("sideways".to_string());
        assert_eq!(StoredChart::try_from(odd).unwrap().chart.trend, None);
    }
}
