//! Order validation and pricing.
//!
//! An order is checked against a catalog snapshot before any lock is taken:
//! items must exist and be enabled, quantities must be positive, and realm-scoped
//! items must agree on a single realm. The result is a [`ValidatedOrder`] carrying
//! a price snapshot. Funds and per-account limits are checked again inside the
//! buyer's balance lock using [`ValidatedOrder::check_funds`] and
//! [`ValidatedOrder::check_limits`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::account::{AccountBalance, Cost};
use crate::catalog::ShopItem;
use crate::error::{Result, ShopError};
use crate::ids::{ItemEntry, ItemId, RealmId};

/// Maximum number of lines accepted in a single order.
pub const MAX_ORDER_LINES: usize = 50;

/// Maximum units of one item per order line.
pub const MAX_QUANTITY: i64 = 1000;

/// A requested (item, quantity) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// The requested item.
    #[serde(alias = "shop_item_id")]
    pub item_id: ItemId,
    /// Units requested (at least one).
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

/// A validated line with its price snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    /// The item bought.
    pub item_id: ItemId,
    /// The world item delivered per unit.
    pub world_entry: ItemEntry,
    /// Units bought.
    pub quantity: i64,
    /// Unit price at validation time.
    pub unit_price: Cost,
    /// Per-account limit at validation time.
    pub limit_per_account: Option<i64>,
}

/// An order that passed catalog validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedOrder {
    /// Lines in submission order.
    pub lines: Vec<PricedLine>,
    /// The realm the order is delivered to, if any.
    pub realm_id: Option<RealmId>,
    /// Total cost snapshot.
    pub total: Cost,
}

/// Validate an order against a catalog snapshot.
///
/// `requested_realm` is the realm chosen by the buyer; it only fills in when every
/// item is global, and must agree with any realm-scoped item.
///
/// # Errors
///
/// - [`ShopError::EmptyOrder`] for an empty order.
/// - [`ShopError::InvalidQuantity`] for quantities below one or above [`MAX_QUANTITY`].
/// - [`ShopError::ItemUnavailable`] for unknown or disabled items.
/// - [`ShopError::MixedRealms`] when items name different realms.
/// - [`ShopError::RealmMismatch`] when the requested realm conflicts with an item.
pub fn validate_order<S: std::hash::BuildHasher>(
    lines: &[OrderLine],
    catalog: &HashMap<ItemId, ShopItem, S>,
    requested_realm: Option<RealmId>,
) -> Result<ValidatedOrder> {
    if lines.is_empty() {
        return Err(ShopError::EmptyOrder);
    }
    if lines.len() > MAX_ORDER_LINES {
        return Err(ShopError::InvalidInput(format!(
            "an order may contain at most {MAX_ORDER_LINES} lines"
        )));
    }

    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        if !(1..=MAX_QUANTITY).contains(&line.quantity) {
            return Err(ShopError::InvalidQuantity {
                item_id: line.item_id,
                quantity: line.quantity,
            });
        }
        let item = catalog
            .get(&line.item_id)
            .filter(|item| item.enabled)
            .ok_or(ShopError::ItemUnavailable(line.item_id))?;
        items.push((item, line.quantity));
    }

    let scoped: BTreeSet<RealmId> = items.iter().filter_map(|(item, _)| item.realm_id).collect();
    if scoped.len() > 1 {
        return Err(ShopError::MixedRealms(scoped.into_iter().collect()));
    }
    let item_realm = scoped.into_iter().next();

    if let (Some(item_realm), Some(requested)) = (item_realm, requested_realm) {
        if item_realm != requested {
            let (item, _) = items
                .iter()
                .find(|(item, _)| item.realm_id == Some(item_realm))
                .ok_or(ShopError::MixedRealms(vec![item_realm, requested]))?;
            return Err(ShopError::RealmMismatch {
                item_id: item.id,
                item_realm,
                requested,
            });
        }
    }
    let realm_id = requested_realm.or(item_realm);

    let mut total = Cost::default();
    let lines = items
        .into_iter()
        .map(|(item, quantity)| {
            let unit_price = item.unit_price();
            total = total.plus(&unit_price.times(quantity));
            PricedLine {
                item_id: item.id,
                world_entry: item.world_entry,
                quantity,
                unit_price,
                limit_per_account: item.limit_per_account,
            }
        })
        .collect();

    Ok(ValidatedOrder {
        lines,
        realm_id,
        total,
    })
}

impl ValidatedOrder {
    /// Units requested per item, merging repeated lines.
    #[must_use]
    pub fn units_by_item(&self) -> BTreeMap<ItemId, i64> {
        let mut units = BTreeMap::new();
        for line in &self.lines {
            *units.entry(line.item_id).or_insert(0) += line.quantity;
        }
        units
    }

    /// Items in this order that carry a per-account limit.
    #[must_use]
    pub fn limited_items(&self) -> Vec<ItemId> {
        let limited: BTreeSet<ItemId> = self
            .lines
            .iter()
            .filter(|line| line.limit_per_account.is_some())
            .map(|line| line.item_id)
            .collect();
        limited.into_iter().collect()
    }

    /// Check per-account limits against units the buyer already bought.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::LimitReached`] if already-bought plus requested units
    /// would exceed an item's limit.
    pub fn check_limits(&self, bought: impl Fn(ItemId) -> i64) -> Result<()> {
        let units = self.units_by_item();
        for line in &self.lines {
            let Some(limit) = line.limit_per_account else {
                continue;
            };
            let already = bought(line.item_id);
            let requested = units.get(&line.item_id).copied().unwrap_or(0);
            if already.saturating_add(requested) > limit {
                return Err(ShopError::LimitReached {
                    item_id: line.item_id,
                    limit,
                    bought: already,
                });
            }
        }
        Ok(())
    }

    /// Check that a balance covers the order total.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InsufficientFunds`] if either currency is short.
    pub fn check_funds(&self, balance: &AccountBalance) -> Result<()> {
        if balance.covers(&self.total) {
            return Ok(());
        }
        Err(ShopError::InsufficientFunds {
            credits_balance: balance.credits,
            credits_required: self.total.credits,
            vote_points_balance: balance.vote_points,
            vote_points_required: self.total.vote_points,
        })
    }
}
