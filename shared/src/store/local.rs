//! Local chart store.
//!
//! Keeps charts in memory and, when given a path, mirrors them to a JSON
//! file after every write.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use super::ChartStore;
use crate::models::{ChartLookup, NewChart, Owner, StoredChart};
use crate::{Error, Result};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalState {
    charts: Vec<StoredChart>,
    #[serde(default)]
    pro_users: HashSet<String>,
}

impl LocalState {
    fn count(&self, owner: &Owner) -> i64 {
        self.charts.iter().filter(|c| c.is_owned_by(owner)).count() as i64
    }
}

/// In-process chart store with optional JSON file persistence.
#[derive(Debug, Default)]
pub struct LocalChartStore {
    state: Mutex<LocalState>,
    path: Option<PathBuf>,
}

impl LocalChartStore {
    /// Create an empty, memory-only store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by a JSON file, loading it if it exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LocalState::default(),
            Err(e) => {
                return Err(Error::Config(format!(
                    "Cannot read local store {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        info!("Opened local chart store at {}", path.display());

        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
        })
    }

    /// Flag a user as pro.
    pub async fn set_pro(&self, user_id: &str) {
        let mut state = self.state.lock().await;
        state.pro_users.insert(user_id.to_string());
    }

    async fn persist(&self, state: &LocalState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| Error::Internal(format!("Cannot write {}: {}", path.display(), e)))
    }

    /// Write `next` out, then make it the live state. A failed write leaves
    /// `state` untouched.
    async fn commit(&self, state: &mut LocalState, next: LocalState) -> Result<()> {
        self.persist(&next).await?;
        *state = next;
        Ok(())
    }
}

#[async_trait]
impl ChartStore for LocalChartStore {
    async fn count_charts(&self, owner: &Owner) -> Result<i64> {
        Ok(self.state.lock().await.count(owner))
    }

    async fn is_pro(&self, user_id: &str) -> Result<bool> {
        Ok(self.state.lock().await.pro_users.contains(user_id))
    }

    async fn insert_chart(&self, chart: NewChart, limit: Option<i64>) -> Result<StoredChart> {
        let mut state = self.state.lock().await;

        if let Some(limit) = limit {
            let current = state.count(&chart.owner);
            if current >= limit {
                return Err(Error::QuotaExceeded { current, limit });
            }
        }

        if state.charts.iter().any(|c| c.share_id == chart.share_id) {
            return Err(Error::ShareIdConflict(chart.share_id));
        }

        let now = Utc::now();
        let stored = StoredChart {
            id: Uuid::new_v4(),
            user_id: chart.owner.user_id().map(String::from),
            anonymous_id: chart.owner.anonymous_id().map(String::from),
            chart: chart.chart,
            is_public: false,
            share_id: chart.share_id,
            created_at: now,
            updated_at: now,
        };
        let mut next = state.clone();
        next.charts.push(stored.clone());
        self.commit(&mut state, next).await?;

        Ok(stored)
    }

    async fn list_charts(&self, owner: &Owner) -> Result<Vec<StoredChart>> {
        let state = self.state.lock().await;
        let mut charts: Vec<StoredChart> = state
            .charts
            .iter()
            .rev()
            .filter(|c| c.is_owned_by(owner))
            .cloned()
            .collect();
        charts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(charts)
    }

    async fn get_chart(&self, lookup: &ChartLookup) -> Result<Option<StoredChart>> {
        let state = self.state.lock().await;
        Ok(state
            .charts
            .iter()
            .find(|c| match lookup {
                ChartLookup::Id(id) => c.id == *id,
                ChartLookup::ShareId(share_id) => c.share_id == *share_id,
            })
            .cloned())
    }

    async fn delete_chart(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.charts.iter().any(|c| c.id == id) {
            return Ok(false);
        }

        let mut next = state.clone();
        next.charts.retain(|c| c.id != id);
        self.commit(&mut state, next).await?;
        Ok(true)
    }

    async fn migrate_charts(&self, anonymous_id: &str, user_id: &str) -> Result<u64> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut next = state.clone();
        let mut moved = 0;
        for chart in next
            .charts
            .iter_mut()
            .filter(|c| c.user_id.is_none() && c.anonymous_id.as_deref() == Some(anonymous_id))
        {
            chart.user_id = Some(user_id.to_string());
            chart.anonymous_id = None;
            chart.updated_at = now;
            moved += 1;
        }
        if moved > 0 {
            self.commit(&mut state, next).await?;
        }
        Ok(moved)
    }
}
