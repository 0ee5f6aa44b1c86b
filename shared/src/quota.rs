//! Chart quotas per caller tier.

use tracing::info;

use crate::models::{Owner, QuotaState};
use crate::store::ChartStore;
use crate::Result;

/// Charts an anonymous session may keep.
pub const ANONYMOUS_LIMIT: i64 = 3;
/// Charts a signed-in user without a subscription may keep.
pub const FREE_LIMIT: i64 = 8;

/// Pricing tier of a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Anonymous,
    Free,
    Pro,
}

impl Tier {
    /// `None` is unbounded.
    pub fn limit(&self) -> Option<i64> {
        match self {
            Tier::Anonymous => Some(ANONYMOUS_LIMIT),
            Tier::Free => Some(FREE_LIMIT),
            Tier::Pro => None,
        }
    }
}

/// Determine the tier of an owner.
pub async fn tier_for(store: &dyn ChartStore, owner: &Owner) -> Result<Tier> {
    match owner {
        Owner::Anonymous(_) => Ok(Tier::Anonymous),
        Owner::User(user_id) => {
            if store.is_pro(user_id).await? {
                Ok(Tier::Pro)
            } else {
                Ok(Tier::Free)
            }
        }
    }
}

/// Evaluate whether `owner` may create another chart.
///
/// A request without any identity is never allowed to create charts.
pub async fn evaluate(store: &dyn ChartStore, owner: Option<&Owner>) -> Result<QuotaState> {
    let Some(owner) = owner else {
        return Ok(QuotaState::new(0, Some(0), false));
    };

    let tier = tier_for(store, owner).await?;
    let current = store.count_charts(owner).await?;
    let state = QuotaState::new(current, tier.limit(), tier == Tier::Pro);

    info!(
        "Quota for {}: {}/{:?} (allowed: {})",
        owner.lock_key(),
        state.current,
        state.limit,
        state.allowed
    );

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::local::LocalChartStore;
    use crate::test_support::{new_chart, sample_chart};

    #[tokio::test]
    async fn test_tier_limits() {
        let store = LocalChartStore::new();
        store.set_pro("pro-user").await;

        let anon = Owner::Anonymous("anon".to_string());
        let free = Owner::User("free-user".to_string());
        let pro = Owner::User("pro-user".to_string());

        assert_eq!(evaluate(&store, Some(&anon)).await.unwrap().limit, Some(3));
        assert_eq!(evaluate(&store, Some(&free)).await.unwrap().limit, Some(8));

        let pro_state = evaluate(&store, Some(&pro)).await.unwrap();
        assert_eq!(pro_state.limit, None);
        assert!(pro_state.is_pro);
        assert!(pro_state.allowed);
    }

    #[tokio::test]
    async fn test_no_identity_is_not_allowed() {
        let store = LocalChartStore::new();
        let state = evaluate(&store, None).await.unwrap();
        assert!(!state.allowed);
        assert_eq!(state.current, 0);
    }

    #[tokio::test]
    async fn test_anonymous_boundary() {
        let store = LocalChartStore::new();
        let anon = Owner::Anonymous("anon-full".to_string());
        for _ in 0..3 {
            store
                .insert_chart(new_chart(&anon, sample_chart()), None)
                .await
                .unwrap();
        }

        let state = evaluate(&store, Some(&anon)).await.unwrap();
        assert_eq!(state.current, 3);
        assert_eq!(state.limit, Some(3));
        assert!(!state.allowed);
        assert_eq!(state.allowed, state.current < state.limit.unwrap());
    }
}
