//! Catalog reference data: categories, shop items, vote sites and realms.
//!
//! Catalog rows are read-mostly. Readers never lock them, so a price or enabled
//! flag read during validation may be slightly stale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::Cost;
use crate::error::{Result, ShopError};
use crate::ids::{CategoryId, ItemEntry, ItemId, RealmId, SiteId};

/// Maximum slug length.
const MAX_SLUG_LEN: usize = 140;

/// Longest accepted vote cooldown: one year.
pub const MAX_COOLDOWN_MINUTES: i64 = 365 * 24 * 60;

/// A shop category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Category ID.
    pub id: CategoryId,
    /// Display name.
    pub name: String,
    /// URL slug, unique across categories.
    pub slug: String,
    /// Optional description.
    pub description: Option<String>,
    /// Sort position (ascending).
    pub position: i32,
}

/// Input for creating a category.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCategory {
    /// Display name (at least two characters).
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Sort position.
    #[serde(default)]
    pub position: i32,
}

impl NewCategory {
    /// Validate the input.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidInput`] if the name is too short.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)
    }
}

/// An item for sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopItem {
    /// Item ID.
    pub id: ItemId,
    /// Owning category.
    pub category_id: CategoryId,
    /// Display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Optional icon name.
    pub icon: Option<String>,
    /// The world item delivered for each unit.
    pub world_entry: ItemEntry,
    /// Realm scope; `None` means purchasable for any realm.
    pub realm_id: Option<RealmId>,
    /// Unit price in credits.
    pub price_credits: i64,
    /// Unit price in vote points.
    pub price_vote_points: i64,
    /// Maximum units a single account may ever buy.
    pub limit_per_account: Option<i64>,
    /// Whether the item is for sale.
    pub enabled: bool,
    /// When the item was created.
    pub created_at: DateTime<Utc>,
}

impl ShopItem {
    /// The unit price in both currencies.
    #[must_use]
    pub const fn unit_price(&self) -> Cost {
        Cost {
            credits: self.price_credits,
            vote_points: self.price_vote_points,
        }
    }

    /// Whether the item can be bought for the given realm.
    #[must_use]
    pub fn available_on(&self, realm: Option<RealmId>) -> bool {
        match (self.realm_id, realm) {
            (Some(own), Some(requested)) => own == requested,
            _ => true,
        }
    }
}

/// Input for creating a shop item.
#[derive(Debug, Clone, Deserialize)]
pub struct NewShopItem {
    /// Owning category.
    pub category_id: CategoryId,
    /// Display name.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Optional icon.
    #[serde(default)]
    pub icon: Option<String>,
    /// World item reference.
    pub world_entry: ItemEntry,
    /// Optional realm scope.
    #[serde(default)]
    pub realm_id: Option<RealmId>,
    /// Unit price in credits.
    #[serde(default)]
    pub price_credits: i64,
    /// Unit price in vote points.
    #[serde(default)]
    pub price_vote_points: i64,
    /// Optional per-account limit.
    #[serde(default)]
    pub limit_per_account: Option<i64>,
}

impl NewShopItem {
    /// Validate the input.
    ///
    /// # Errors
    ///
    /// Returns an error for short names, negative prices or a non-positive limit.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        validate_prices(Some(self.price_credits), Some(self.price_vote_points))?;
        validate_limit(self.limit_per_account)
    }
}

/// Partial update of a shop item; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShopItemUpdate {
    /// New category.
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// New name.
    #[serde(default)]
    pub name: Option<String>,
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
    /// New icon.
    #[serde(default)]
    pub icon: Option<String>,
    /// New world item reference.
    #[serde(default)]
    pub world_entry: Option<ItemEntry>,
    /// New realm scope.
    #[serde(default)]
    pub realm_id: Option<RealmId>,
    /// New credits price.
    #[serde(default)]
    pub price_credits: Option<i64>,
    /// New vote point price.
    #[serde(default)]
    pub price_vote_points: Option<i64>,
    /// New per-account limit.
    #[serde(default)]
    pub limit_per_account: Option<i64>,
    /// Enable or disable the item.
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl ShopItemUpdate {
    /// Validate the update.
    ///
    /// # Errors
    ///
    /// Returns an error for short names, negative prices or a non-positive limit.
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        validate_prices(self.price_credits, self.price_vote_points)?;
        validate_limit(self.limit_per_account)
    }

    /// Apply the update to an item in place.
    pub fn apply_to(&self, item: &mut ShopItem) {
        if let Some(v) = self.category_id {
            item.category_id = v;
        }
        if let Some(v) = &self.name {
            item.name = v.trim().to_string();
        }
        if let Some(v) = &self.description {
            item.description = Some(v.clone());
        }
        if let Some(v) = &self.icon {
            item.icon = Some(v.clone());
        }
        if let Some(v) = self.world_entry {
            item.world_entry = v;
        }
        if let Some(v) = self.realm_id {
            item.realm_id = Some(v);
        }
        if let Some(v) = self.price_credits {
            item.price_credits = v;
        }
        if let Some(v) = self.price_vote_points {
            item.price_vote_points = v;
        }
        if let Some(v) = self.limit_per_account {
            item.limit_per_account = Some(v);
        }
        if let Some(v) = self.enabled {
            item.enabled = v;
        }
    }
}

/// Filter for listing enabled items.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ItemFilter {
    /// Only items in this category.
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// Only items purchasable on this realm (global items included).
    #[serde(default)]
    pub realm_id: Option<RealmId>,
}

impl ItemFilter {
    /// Whether an item passes the filter. Disabled items never pass.
    #[must_use]
    pub fn matches(&self, item: &ShopItem) -> bool {
        item.enabled
            && self.category_id.map_or(true, |c| item.category_id == c)
            && item.available_on(self.realm_id)
    }
}

/// A vote site that rewards vote points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteSite {
    /// Site ID.
    pub id: SiteId,
    /// Display name.
    pub name: String,
    /// Voting URL.
    pub url: String,
    /// Optional banner.
    pub image_url: Option<String>,
    /// Minutes between claims.
    pub cooldown_minutes: i64,
    /// Vote points granted per claim.
    pub points_reward: i64,
    /// Sort position (ascending).
    pub position: i32,
    /// Whether the site accepts claims.
    pub enabled: bool,
}

impl VoteSite {
    /// The cooldown as a duration, if it is representable.
    #[must_use]
    pub fn cooldown(&self) -> Option<chrono::Duration> {
        chrono::Duration::try_minutes(self.cooldown_minutes)
    }
}

/// Input for creating a vote site.
#[derive(Debug, Clone, Deserialize)]
pub struct NewVoteSite {
    /// Display name.
    pub name: String,
    /// Voting URL.
    pub url: String,
    /// Optional banner.
    #[serde(default)]
    pub image_url: Option<String>,
    /// Minutes between claims (default 720).
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
    /// Points per claim (default 1).
    #[serde(default = "default_points_reward")]
    pub points_reward: i64,
    /// Sort position.
    #[serde(default)]
    pub position: i32,
}

fn default_cooldown_minutes() -> i64 {
    720
}

fn default_points_reward() -> i64 {
    1
}

impl NewVoteSite {
    /// Validate the input.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidInput`] for a blank name/URL or non-positive
    /// cooldown/reward.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() || self.url.trim().is_empty() {
            return Err(ShopError::InvalidInput("name and url are required".into()));
        }
        validate_site_numbers(Some(self.cooldown_minutes), Some(self.points_reward))
    }
}

/// Partial update of a vote site.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VoteSiteUpdate {
    /// New name.
    #[serde(default)]
    pub name: Option<String>,
    /// New URL.
    #[serde(default)]
    pub url: Option<String>,
    /// New banner.
    #[serde(default)]
    pub image_url: Option<String>,
    /// New cooldown.
    #[serde(default)]
    pub cooldown_minutes: Option<i64>,
    /// New reward.
    #[serde(default)]
    pub points_reward: Option<i64>,
    /// New position.
    #[serde(default)]
    pub position: Option<i32>,
    /// Enable or disable the site.
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl VoteSiteUpdate {
    /// Validate the update.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidInput`] for non-positive cooldown/reward.
    pub fn validate(&self) -> Result<()> {
        validate_site_numbers(self.cooldown_minutes, self.points_reward)
    }

    /// Apply the update to a site in place.
    pub fn apply_to(&self, site: &mut VoteSite) {
        if let Some(v) = &self.name {
            site.name = v.trim().to_string();
        }
        if let Some(v) = &self.url {
            site.url = v.trim().to_string();
        }
        if let Some(v) = &self.image_url {
            site.image_url = Some(v.trim().to_string()).filter(|s| !s.is_empty());
        }
        if let Some(v) = self.cooldown_minutes {
            site.cooldown_minutes = v;
        }
        if let Some(v) = self.points_reward {
            site.points_reward = v;
        }
        if let Some(v) = self.position {
            site.position = v;
        }
        if let Some(v) = self.enabled {
            site.enabled = v;
        }
    }
}

/// Remote command channel settings stored per realm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmChannel {
    /// The realm.
    pub realm_id: RealmId,
    /// Whether remote delivery is enabled for this realm.
    pub enabled: bool,
    /// Endpoint URL of the remote command service.
    pub endpoint: String,
    /// Basic-auth user.
    pub user: Option<String>,
    /// Basic-auth password.
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

/// Turn a display name into a URL slug.
///
/// Lowercases, collapses runs of non-alphanumerics into `-`, trims dashes and
/// caps the length. Empty results fall back to `"cat"`.
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for ch in text.trim().to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        return "cat".to_string();
    }
    slug.truncate(MAX_SLUG_LEN);
    slug.trim_end_matches('-').to_string()
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().chars().count() < 2 {
        return Err(ShopError::InvalidInput(
            "name must be at least 2 characters".into(),
        ));
    }
    Ok(())
}

fn validate_prices(credits: Option<i64>, vote_points: Option<i64>) -> Result<()> {
    if credits.is_some_and(|p| p < 0) || vote_points.is_some_and(|p| p < 0) {
        return Err(ShopError::InvalidInput("prices cannot be negative".into()));
    }
    Ok(())
}

fn validate_limit(limit: Option<i64>) -> Result<()> {
    if limit.is_some_and(|l| l < 1) {
        return Err(ShopError::InvalidInput(
            "limit_per_account must be at least 1".into(),
        ));
    }
    Ok(())
}

fn validate_site_numbers(cooldown: Option<i64>, reward: Option<i64>) -> Result<()> {
    if cooldown.is_some_and(|c| c < 1) || reward.is_some_and(|r| r < 1) {
        return Err(ShopError::InvalidInput(
            "cooldown_minutes and points_reward must be at least 1".into(),
        ));
    }
    if cooldown.is_some_and(|c| c > MAX_COOLDOWN_MINUTES) {
        return Err(ShopError::InvalidInput(format!(
            "cooldown_minutes must be at most {MAX_COOLDOWN_MINUTES}"
        )));
    }
    Ok(())
}
