//! Chart persistence operations behind the charts endpoint.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{ChartData, ChartLookup, NewChart, Owner, QuotaState, SaveResponse, StoredChart};
use crate::quota;
use crate::share::{generate_share_id, share_url};
use crate::store::ChartStore;
use crate::{Error, Result};

/// Attempts at finding a free share id before giving up.
const MAX_SHARE_ID_ATTEMPTS: usize = 5;

/// Identity presented by the caller of a delete.
#[derive(Debug, Default, Clone)]
pub struct DeleteCaller {
    pub user_id: Option<String>,
    pub anonymous_id: Option<String>,
}

/// Save, list, fetch, delete and migrate charts.
#[derive(Clone)]
pub struct ChartService {
    store: Arc<dyn ChartStore>,
    share_base_url: String,
    allow_bare_id_delete: bool,
}

impl ChartService {
    pub fn new(store: Arc<dyn ChartStore>, share_base_url: impl Into<String>) -> Self {
        Self {
            store,
            share_base_url: share_base_url.into(),
            allow_bare_id_delete: false,
        }
    }

    /// Let anyone holding a chart id delete an anonymous chart.
    pub fn with_bare_id_delete(mut self, allow: bool) -> Self {
        self.allow_bare_id_delete = allow;
        self
    }

    pub fn share_url(&self, share_id: &str) -> String {
        share_url(&self.share_base_url, share_id)
    }

    pub async fn check_limit(&self, owner: Option<&Owner>) -> Result<QuotaState> {
        quota::evaluate(self.store.as_ref(), owner).await
    }

    /// Store a chart for `owner` if its quota allows another one.
    pub async fn save(&self, owner: Option<&Owner>, chart: ChartData) -> Result<SaveResponse> {
        chart.check()?;

        let state = self.check_limit(owner).await?;
        let Some(owner) = owner.filter(|_| state.allowed) else {
            return Err(Error::QuotaExceeded {
                current: state.current,
                limit: state.limit.unwrap_or(0),
            });
        };

        for attempt in 1..=MAX_SHARE_ID_ATTEMPTS {
            let new_chart = NewChart {
                owner: owner.clone(),
                chart: chart.clone(),
                share_id: generate_share_id(),
            };

            match self.store.insert_chart(new_chart, state.limit).await {
                Ok(stored) => {
                    info!(
                        "Saved chart {} ({}) for {}",
                        stored.id,
                        stored.share_id,
                        owner.lock_key()
                    );
                    let share_url = self.share_url(&stored.share_id);
                    return Ok(SaveResponse {
                        success: true,
                        chart: stored,
                        share_url,
                    });
                }
                Err(Error::ShareIdConflict(share_id)) => {
                    warn!("Share id {} taken (attempt {})", share_id, attempt);
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Internal("Could not allocate a unique share id".to_string()))
    }

    pub async fn list(&self, owner: Option<&Owner>) -> Result<Vec<StoredChart>> {
        let owner = owner
            .ok_or_else(|| Error::Validation("userId or anonymousId is required".to_string()))?;
        self.store.list_charts(owner).await
    }

    pub async fn get(&self, lookup: &ChartLookup) -> Result<StoredChart> {
        self.store
            .get_chart(lookup)
            .await?
            .ok_or_else(|| Error::NotFound("Chart not found".to_string()))
    }

    /// Delete a chart the caller is allowed to remove.
    ///
    /// User-owned charts need the owning user. Anonymous charts need the
    /// owning session unless bare-id deletes are enabled. Charts without any
    /// owner can be deleted by id.
    pub async fn delete(&self, chart_id: &str, caller: &DeleteCaller) -> Result<()> {
        let id = parse_chart_id(chart_id)?;
        let chart = self.get(&ChartLookup::Id(id)).await?;

        if let Some(owner_id) = chart.user_id.as_deref() {
            if caller.user_id.as_deref() != Some(owner_id) {
                return Err(Error::Unauthorized("Not authorized to delete this chart".to_string()));
            }
        } else if let Some(anonymous_id) = chart.anonymous_id.as_deref() {
            if !self.allow_bare_id_delete && caller.anonymous_id.as_deref() != Some(anonymous_id) {
                return Err(Error::Unauthorized("Not authorized to delete this chart".to_string()));
            }
        }

        if !self.store.delete_chart(id).await? {
            return Err(Error::NotFound("Chart not found".to_string()));
        }

        info!("Deleted chart {}", id);
        Ok(())
    }

    /// Hand the charts of an anonymous session over to a signed-in user.
    pub async fn migrate(&self, user_id: &str, anonymous_id: &str) -> Result<u64> {
        let (user_id, anonymous_id) = (user_id.trim(), anonymous_id.trim());
        if user_id.is_empty() || anonymous_id.is_empty() {
            return Err(Error::Validation(
                "userId and anonymousId are required".to_string(),
            ));
        }

        let moved = self.store.migrate_charts(anonymous_id, user_id).await?;
        info!("Migrated {} charts from {} to {}", moved, anonymous_id, user_id);
        Ok(moved)
    }
}

/// Build a lookup from request ids; `chartId` wins when both are given.
pub fn lookup_from(chart_id: Option<&str>, share_id: Option<&str>) -> Result<ChartLookup> {
    let chart_id = chart_id.map(str::trim).filter(|s| !s.is_empty());
    let share_id = share_id.map(str::trim).filter(|s| !s.is_empty());
    match (chart_id, share_id) {
        (Some(id), _) => parse_chart_id(id).map(ChartLookup::Id),
        (None, Some(share_id)) => Ok(ChartLookup::ShareId(share_id.to_string())),
        (None, None) => Err(Error::Validation("chartId or shareId is required".to_string())),
    }
}

fn parse_chart_id(chart_id: &str) -> Result<Uuid> {
    Uuid::parse_str(chart_id.trim())
        .map_err(|_| Error::Validation(format!("Invalid chartId: {}", chart_id)))
}
