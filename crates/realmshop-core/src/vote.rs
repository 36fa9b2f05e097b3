//! Vote reward cooldowns.
//!
//! The latest log row for an (account, site) pair decides whether the site is
//! available. Logs are append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::VoteSite;
use crate::error::{Result, ShopError};
use crate::ids::{SiteId, Username};

/// A recorded vote reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteLog {
    /// Log row id.
    pub id: i64,
    /// Account that claimed.
    pub username: Username,
    /// Vote site.
    pub site_id: SiteId,
    /// Points granted.
    pub claimed_points: i64,
    /// When the claim happened.
    pub claimed_at: DateTime<Utc>,
    /// When the site may be claimed again.
    pub next_available_at: DateTime<Utc>,
}

/// A log row to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVoteLog {
    /// Account that claims.
    pub username: Username,
    /// Vote site.
    pub site_id: SiteId,
    /// Points to grant.
    pub claimed_points: i64,
    /// Claim time.
    pub claimed_at: DateTime<Utc>,
    /// End of the new cooldown window.
    pub next_available_at: DateTime<Utc>,
}

/// Per-(account, site) state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VoteAvailability {
    /// A claim would succeed now.
    Available,
    /// Claims are rejected until `next_available_at`.
    CoolingDown {
        /// End of the cooldown window.
        next_available_at: DateTime<Utc>,
    },
}

/// Derive availability from the latest log row.
#[must_use]
pub fn availability(latest: Option<&VoteLog>, now: DateTime<Utc>) -> VoteAvailability {
    match latest {
        Some(log) if now < log.next_available_at => VoteAvailability::CoolingDown {
            next_available_at: log.next_available_at,
        },
        _ => VoteAvailability::Available,
    }
}

/// Plan a claim against the latest log row.
///
/// # Errors
///
/// - [`ShopError::SiteDisabled`] for a disabled site.
/// - [`ShopError::SiteMisconfigured`] for a non-positive cooldown or reward, or a
///   cooldown too long to schedule.
/// - [`ShopError::CooldownActive`] while the previous window is still open.
pub fn plan_claim(
    username: &Username,
    site: &VoteSite,
    latest: Option<&VoteLog>,
    now: DateTime<Utc>,
) -> Result<NewVoteLog> {
    if !site.enabled {
        return Err(ShopError::SiteDisabled(site.id));
    }
    if site.cooldown_minutes < 1 || site.points_reward < 1 {
        return Err(ShopError::SiteMisconfigured(site.id));
    }
    if let VoteAvailability::CoolingDown { next_available_at } = availability(latest, now) {
        return Err(ShopError::CooldownActive {
            site_id: site.id,
            next_available_at,
        });
    }
    let next_available_at = site
        .cooldown()
        .and_then(|cooldown| now.checked_add_signed(cooldown))
        .ok_or(ShopError::SiteMisconfigured(site.id))?;
    Ok(NewVoteLog {
        username: username.clone(),
        site_id: site.id,
        claimed_points: site.points_reward,
        claimed_at: now,
        next_available_at,
    })
}

/// The result of a successful claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteClaim {
    /// Points granted.
    pub reward: i64,
    /// End of the new cooldown window.
    pub next_available_at: DateTime<Utc>,
    /// Vote point balance after the grant.
    pub total_vote_points: i64,
    /// Where the voter should be sent.
    pub site_url: String,
}

/// Filter for vote log listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteLogFilter {
    /// Restrict to one account.
    pub username: Option<Username>,
    /// Restrict to one site.
    pub site_id: Option<SiteId>,
}

impl VoteLogFilter {
    /// Whether a log row passes this filter.
    #[must_use]
    pub fn matches(&self, log: &VoteLog) -> bool {
        self.username.as_ref().map_or(true, |u| &log.username == u)
            && self.site_id.map_or(true, |s| log.site_id == s)
    }
}
