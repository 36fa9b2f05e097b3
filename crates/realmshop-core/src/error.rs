//! Error types for realmshop.
//!
//! `ShopError` covers validation failures raised by the pure ledger logic. Every
//! variant describes a terminal, caller-visible rejection with zero state change;
//! infrastructure failures live in the storage layer.

use chrono::{DateTime, Utc};

use crate::ids::{IdError, ItemId, RealmId, SiteId};

/// Result type for realmshop domain operations.
pub type Result<T> = std::result::Result<T, ShopError>;

/// Validation errors raised by domain logic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShopError {
    /// An order was submitted without any lines.
    #[error("order has no items")]
    EmptyOrder,

    /// An order line carried a quantity below one or above the per-line cap.
    #[error("invalid quantity {quantity} for item {item_id}")]
    InvalidQuantity {
        /// The offending item.
        item_id: ItemId,
        /// The submitted quantity.
        quantity: i64,
    },

    /// An item does not exist or is disabled.
    #[error("item {0} does not exist or is disabled")]
    ItemUnavailable(ItemId),

    /// Realm-scoped items in one order name different realms.
    #[error("items from different realms cannot be combined: {0:?}")]
    MixedRealms(Vec<RealmId>),

    /// A realm-scoped item does not match the realm requested for the order.
    #[error("item {item_id} is only available on realm {item_realm}, not {requested}")]
    RealmMismatch {
        /// The offending item.
        item_id: ItemId,
        /// The realm the item is scoped to.
        item_realm: RealmId,
        /// The realm requested for the order.
        requested: RealmId,
    },

    /// The per-account purchase limit for an item would be exceeded.
    #[error("purchase limit reached for item {item_id}: limit={limit}, already bought={bought}")]
    LimitReached {
        /// The limited item.
        item_id: ItemId,
        /// The per-account limit.
        limit: i64,
        /// Units already bought by the account.
        bought: i64,
    },

    /// The account cannot cover the debit.
    #[error("insufficient funds: credits {credits_balance}/{credits_required}, vote points {vote_points_balance}/{vote_points_required}")]
    InsufficientFunds {
        /// Current credits balance.
        credits_balance: i64,
        /// Credits required.
        credits_required: i64,
        /// Current vote point balance.
        vote_points_balance: i64,
        /// Vote points required.
        vote_points_required: i64,
    },

    /// The vote site is still cooling down for this account.
    #[error("vote site {site_id} is cooling down until {next_available_at}")]
    CooldownActive {
        /// The vote site.
        site_id: SiteId,
        /// When the next claim becomes available.
        next_available_at: DateTime<Utc>,
    },

    /// A vote site is disabled.
    #[error("vote site {0} is disabled")]
    SiteDisabled(SiteId),

    /// A vote site is misconfigured (non-positive cooldown or reward).
    #[error("vote site {0} is misconfigured")]
    SiteMisconfigured(SiteId),

    /// An amount was zero, negative or unparseable.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A currency is not accepted by the gateway.
    #[error("currency not allowed: {0}")]
    CurrencyNotAllowed(String),

    /// A status string could not be mapped.
    #[error("invalid payment status: {0}")]
    InvalidStatus(String),

    /// Generic input validation failure.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
