//! Vote reward engine.

use chrono::Utc;

use realmshop_core::{ShopError, SiteId, Username, VoteClaim};
use realmshop_store::Store;

use crate::error::ApiError;

/// Grant a vote reward if the site is off cooldown for this account.
///
/// The cooldown is checked again inside the store's balance lock, so two
/// concurrent claims for the same site grant at most once.
pub async fn claim(store: &dyn Store, username: &Username, site_id: SiteId) -> Result<VoteClaim, ApiError> {
    let receipt = store.claim_vote(username, site_id, Utc::now()).await?;

    tracing::info!(
        username = %username,
        site_id = %site_id,
        points = receipt.log.claimed_points,
        next_available_at = %receipt.log.next_available_at,
        "Vote reward claimed"
    );

    Ok(VoteClaim {
        reward: receipt.log.claimed_points,
        next_available_at: receipt.log.next_available_at,
        total_vote_points: receipt.balance.vote_points,
        site_url: receipt.site.url,
    })
}

/// Claim, then return the URL to send the voter to.
///
/// A site that is still cooling down is opened anyway, without a reward.
pub async fn redirect_target(store: &dyn Store, username: &Username, site_id: SiteId) -> Result<String, ApiError> {
    match claim(store, username, site_id).await {
        Ok(claimed) => Ok(claimed.site_url),
        Err(ApiError::Rejected(ShopError::CooldownActive { .. })) => {
            tracing::debug!(username = %username, site_id = %site_id, "Cooldown active, redirecting without reward");
            store
                .get_vote_site(site_id)
                .await?
                .map(|site| site.url)
                .ok_or_else(|| ApiError::NotFound(format!("vote site not found: {site_id}")))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use realmshop_core::NewVoteSite;
    use realmshop_store::MemoryStore;

    async fn site(store: &MemoryStore) -> SiteId {
        let site: NewVoteSite = serde_json::from_value(serde_json::json!({
            "name": "TopG",
            "url": "https://topg.example/vote/1",
            "cooldown_minutes": 720,
            "points_reward": 2,
        }))
        .unwrap();
        store.create_vote_site(&site).await.unwrap().id
    }

    #[tokio::test]
    async fn second_claim_hits_cooldown() {
        let store = MemoryStore::new();
        let id = site(&store).await;
        let user: Username = "sylvanas".parse().unwrap();

        let first = claim(&store, &user, id).await.unwrap();
        assert_eq!(first.reward, 2);
        assert_eq!(first.total_vote_points, 2);

        let err = claim(&store, &user, id).await.unwrap_err();
        assert!(matches!(err, ApiError::Rejected(ShopError::CooldownActive { .. })));
        assert_eq!(store.get_balance(&user).await.unwrap().vote_points, 2);
    }

    #[tokio::test]
    async fn redirect_ignores_cooldown() {
        let store = MemoryStore::new();
        let id = site(&store).await;
        let user: Username = "sylvanas".parse().unwrap();

        assert_eq!(redirect_target(&store, &user, id).await.unwrap(), "https://topg.example/vote/1");
        assert_eq!(redirect_target(&store, &user, id).await.unwrap(), "https://topg.example/vote/1");
        assert_eq!(store.get_balance(&user).await.unwrap().vote_points, 2);

        let missing = redirect_target(&store, &user, SiteId::new(999)).await;
        assert!(matches!(missing, Err(ApiError::NotFound(_))));
    }
}
