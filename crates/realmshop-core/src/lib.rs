//! Core types and ledger logic for realmshop.
//!
//! This crate holds the pure, I/O-free part of the shop:
//!
//! - **Identifiers**: `Username`, `ItemId`, `PurchaseId`, `PaymentId`, `SiteId`, `RealmId`
//! - **Balances**: `AccountBalance`, `BalanceDelta`, `Cost`
//! - **Catalog**: `ShopItem`, `Category`, `VoteSite`, `RealmChannel`
//! - **Orders**: `validate_order`, `ValidatedOrder`
//! - **Purchases**: `Purchase`, `DeliveryStatus`, `Recipient`
//! - **Donations**: `DonationPayment`, `PaymentStatus`, `plan_transition`
//! - **Delivery**: `DeliveryPlan`, `render_command`, `summarize`
//! - **Votes**: `VoteLog`, `plan_claim`
//!
//! # Currencies
//!
//! Accounts hold two spendable currencies, credits and vote points, both stored
//! as `i64`. Donation amounts are stored in minor units (cents) and converted to
//! credits with `floor(amount * rate)`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod catalog;
pub mod delivery;
pub mod donation;
pub mod error;
pub mod ids;
pub mod order;
pub mod paging;
pub mod purchase;
pub mod vote;

pub use account::{AccountBalance, BalanceDelta, Cost};
pub use catalog::{
    slugify, Category, ItemFilter, NewCategory, NewShopItem, NewVoteSite, RealmChannel, ShopItem,
    ShopItemUpdate, VoteSite, VoteSiteUpdate, MAX_COOLDOWN_MINUTES,
};
pub use delivery::{
    render_command, summarize, BatchOutcome, DeliveryPlan, MailTemplate, Stack, BATCH_CAPACITY,
    REASON_CHANNEL_DISABLED, REASON_NO_RECIPIENT,
};
pub use donation::{
    credits_for, format_amount, normalize_currency, parse_amount, plan_transition, DonationFilter,
    DonationPayment, Gateway, NewDonation, PaymentStatus, Reconciled, Transition,
};
pub use error::{Result, ShopError};
pub use ids::{
    CategoryId, CharacterGuid, DeliveryJobId, IdError, ItemEntry, ItemId, PaymentId, PurchaseId,
    RealmId, SiteId, Username,
};
pub use order::{validate_order, OrderLine, PricedLine, ValidatedOrder, MAX_ORDER_LINES, MAX_QUANTITY};
pub use paging::{Page, PageRequest};
pub use purchase::{
    Character, DeliveryRecord, DeliveryStatus, NewPurchase, Purchase, PurchaseFilter,
    PurchaseLine, Recipient, RecipientRequest,
};
pub use vote::{plan_claim, NewVoteLog, VoteAvailability, VoteClaim, VoteLog, VoteLogFilter};
