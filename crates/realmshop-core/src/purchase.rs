//! Purchase records.
//!
//! A purchase is written once, in the same transaction as the debit, and only its
//! delivery fields change afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::account::Cost;
use crate::error::ShopError;
use crate::ids::{CharacterGuid, ItemEntry, ItemId, PurchaseId, RealmId, Username};
use crate::order::{PricedLine, ValidatedOrder};

/// Maximum stored length (in characters) of a delivery diagnostic.
pub const MAX_DIAGNOSTIC_LEN: usize = 2000;

/// Delivery state of a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Not yet delivered (queued, or waiting for a recipient or channel).
    #[default]
    Pending,
    /// Batches are being dispatched by a worker.
    Sending,
    /// Every batch was accepted by the remote channel.
    Sent,
    /// At least one batch failed.
    Failed,
}

impl DeliveryStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// Whether a delivery attempt may start from this status.
    ///
    /// A sent purchase needs `force`. A purchase another worker is dispatching
    /// needs `force` and a lapsed lease (`stale`); it is never picked up again
    /// on its own, since some of its batches may already be in the mailbox.
    #[must_use]
    pub const fn may_dispatch(self, force: bool, stale: bool) -> bool {
        match self {
            Self::Pending | Self::Failed => true,
            Self::Sent => force,
            Self::Sending => force && stale,
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = ShopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(ShopError::InvalidStatus(other.to_string())),
        }
    }
}

/// The in-game character that receives a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Character guid, when known.
    pub guid: Option<CharacterGuid>,
    /// Character name used in the remote command.
    pub name: String,
}

/// A character owned by a game account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    /// Character guid.
    pub guid: CharacterGuid,
    /// Character name.
    pub name: String,
    /// Owning account.
    pub username: Username,
    /// Realm the character lives on.
    pub realm_id: Option<RealmId>,
}

impl From<Character> for Recipient {
    fn from(c: Character) -> Self {
        Self {
            guid: Some(c.guid),
            name: c.name,
        }
    }
}

/// How a caller names the recipient character.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientRequest {
    /// Select by guid.
    #[serde(default)]
    pub character_guid: Option<CharacterGuid>,
    /// Select by name.
    #[serde(default)]
    pub character_name: Option<String>,
}

impl RecipientRequest {
    /// Whether the request names no character.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.character_guid.is_none()
            && self
                .character_name
                .as_deref()
                .map_or(true, |n| n.trim().is_empty())
    }

    /// Whether a character satisfies this request.
    #[must_use]
    pub fn matches(&self, character: &Character) -> bool {
        if let Some(guid) = self.character_guid {
            return character.guid == guid;
        }
        self.character_name
            .as_deref()
            .is_some_and(|n| n.trim().eq_ignore_ascii_case(&character.name))
    }
}

/// A purchase line with its price snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLine {
    /// Item bought.
    pub item_id: ItemId,
    /// World item delivered per unit.
    pub world_entry: ItemEntry,
    /// Units bought.
    pub quantity: i64,
    /// Unit price paid.
    pub unit_price: Cost,
}

impl From<&PricedLine> for PurchaseLine {
    fn from(line: &PricedLine) -> Self {
        Self {
            item_id: line.item_id,
            world_entry: line.world_entry,
            quantity: line.quantity,
            unit_price: line.unit_price,
        }
    }
}

/// A committed purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    /// Purchase id.
    pub id: PurchaseId,
    /// Buyer.
    pub username: Username,
    /// Delivery realm.
    pub realm_id: Option<RealmId>,
    /// Lines in submission order.
    pub lines: Vec<PurchaseLine>,
    /// Total paid.
    pub total: Cost,
    /// Delivery target.
    pub recipient: Option<Recipient>,
    /// Delivery state.
    pub delivery_status: DeliveryStatus,
    /// Bounded diagnostic from the last delivery attempt.
    pub delivery_diagnostic: Option<String>,
    /// When the purchase was committed.
    pub created_at: DateTime<Utc>,
    /// When the delivery state last changed.
    pub updated_at: DateTime<Utc>,
}

/// Input for committing a purchase.
#[derive(Debug, Clone)]
pub struct NewPurchase {
    /// Buyer.
    pub username: Username,
    /// Validated order with its price snapshot.
    pub order: ValidatedOrder,
    /// Resolved recipient, if any.
    pub recipient: Option<Recipient>,
}

impl NewPurchase {
    /// Materialize the purchase once the store has assigned an id.
    #[must_use]
    pub fn into_purchase(self, id: PurchaseId, now: DateTime<Utc>) -> Purchase {
        Purchase {
            id,
            username: self.username,
            realm_id: self.order.realm_id,
            lines: self.order.lines.iter().map(PurchaseLine::from).collect(),
            total: self.order.total,
            recipient: self.recipient,
            delivery_status: DeliveryStatus::Pending,
            delivery_diagnostic: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The result of one delivery attempt, as recorded on the purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// New delivery state.
    pub status: DeliveryStatus,
    /// Bounded diagnostic.
    pub diagnostic: String,
}

impl DeliveryRecord {
    /// A record with its diagnostic truncated to [`MAX_DIAGNOSTIC_LEN`].
    #[must_use]
    pub fn new(status: DeliveryStatus, diagnostic: impl AsRef<str>) -> Self {
        Self {
            status,
            diagnostic: truncate_chars(diagnostic.as_ref(), MAX_DIAGNOSTIC_LEN).to_string(),
        }
    }
}

/// Filter for purchase listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseFilter {
    /// Restrict to one buyer.
    pub username: Option<Username>,
    /// Restrict to one delivery state.
    pub delivery_status: Option<DeliveryStatus>,
}

impl PurchaseFilter {
    /// Whether a purchase passes this filter.
    #[must_use]
    pub fn matches(&self, purchase: &Purchase) -> bool {
        self.username.as_ref().map_or(true, |u| &purchase.username == u)
            && self
                .delivery_status
                .map_or(true, |s| purchase.delivery_status == s)
    }
}

/// Truncate to at most `max` characters without splitting a code point.
#[must_use]
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
