//! Storage layer for realmshop.
//!
//! This crate persists balances, catalog rows, purchases, donation payments and
//! vote logs behind the [`Store`] trait.
//!
//! # Backends
//!
//! - [`PgStore`]: PostgreSQL. Every balance mutation runs in one transaction that
//!   takes `SELECT ... FOR UPDATE` on the account row before reading it, so
//!   correctness holds across any number of service instances.
//! - [`MemoryStore`]: in-process, for tests and local runs. A single async mutex
//!   stands in for the row locks.
//!
//! # Locking discipline
//!
//! Compound operations ([`Store::execute_purchase`], [`Store::reconcile_donation`],
//! [`Store::claim_vote`]) re-read every value they check after taking the lock.
//! Reads outside those operations are lock-free and may be stale.
//!
//! # Example
//!
//! ```no_run
//! use realmshop_store::{MemoryStore, Store};
//! use realmshop_core::{BalanceDelta, Username};
//!
//! # async fn demo() -> realmshop_store::Result<()> {
//! let store = MemoryStore::new();
//! let user: Username = "thrall".parse()?;
//! store.apply_delta(&user, BalanceDelta::credits(500)).await?;
//! let balance = store.get_balance(&user).await?;
//! assert_eq!(balance.credits, 500);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use realmshop_core::{
    AccountBalance, BalanceDelta, Category, Character, DeliveryJobId, DeliveryRecord,
    DonationFilter, DonationPayment, Gateway, ItemEntry, ItemFilter, ItemId, NewCategory,
    NewDonation, NewPurchase, NewShopItem, NewVoteSite, Page, PageRequest, PaymentStatus,
    Purchase, PurchaseFilter, PurchaseId, RealmChannel, RealmId, Recipient, Reconciled, ShopItem,
    ShopItemUpdate, SiteId, Username, VoteLog, VoteLogFilter, VoteSite, VoteSiteUpdate,
};

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// How long a claimed delivery job stays invisible to other workers.
pub const DELIVERY_LEASE_SECONDS: i64 = 300;

/// A durable delivery work item, written in the same transaction as its purchase
/// (or by a resend) and consumed by the delivery worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryJob {
    /// Job id.
    pub id: DeliveryJobId,
    /// Purchase to deliver.
    pub purchase_id: PurchaseId,
    /// Re-dispatch even if the purchase is already sent.
    pub force: bool,
    /// Times the job has been claimed.
    pub attempts: i32,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
}

/// The committed result of a purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    /// The stored purchase.
    pub purchase: Purchase,
    /// The buyer's balance after the debit.
    pub balance: AccountBalance,
    /// The delivery job enqueued with the purchase.
    pub job_id: DeliveryJobId,
}

/// The committed result of a vote claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    /// The appended log row.
    pub log: VoteLog,
    /// The voter's balance after the grant.
    pub balance: AccountBalance,
    /// The site that was claimed.
    pub site: VoteSite,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., PostgreSQL, in-memory for testing).
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Balance Operations
    // =========================================================================

    /// Get an account balance, creating an empty one on first touch.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_balance(&self, username: &Username) -> Result<AccountBalance>;

    /// Apply a signed delta under the account row lock.
    ///
    /// Returns the balance after the update.
    ///
    /// # Errors
    ///
    /// - `StoreError::Rejected(InsufficientFunds)` if either currency would go negative.
    async fn apply_delta(&self, username: &Username, delta: BalanceDelta) -> Result<AccountBalance>;

    // =========================================================================
    // Catalog Operations
    // =========================================================================

    /// List categories ordered by position, then name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_categories(&self) -> Result<Vec<Category>>;

    /// Create a category with a slug derived from its name.
    ///
    /// # Errors
    ///
    /// - `StoreError::Conflict` if the slug is taken.
    async fn create_category(&self, category: &NewCategory) -> Result<Category>;

    /// List enabled items matching a filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<ShopItem>>;

    /// Fetch items by id, including disabled ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_items(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, ShopItem>>;

    /// Create an item.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the category does not exist.
    async fn create_item(&self, item: &NewShopItem) -> Result<ShopItem>;

    /// Apply a partial update to an item.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the item does not exist.
    async fn update_item(&self, id: ItemId, update: &ShopItemUpdate) -> Result<ShopItem>;

    /// Maximum stack sizes for world items; missing entries are absent from the map.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn stack_sizes(&self, entries: &[ItemEntry]) -> Result<HashMap<ItemEntry, i64>>;

    /// Set the maximum stack size of a world item.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_stack_size(&self, entry: ItemEntry, max_stack: i64) -> Result<()>;

    /// List vote sites ordered by position.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_vote_sites(&self, include_disabled: bool) -> Result<Vec<VoteSite>>;

    /// Get a vote site by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_vote_site(&self, id: SiteId) -> Result<Option<VoteSite>>;

    /// Create a vote site.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn create_vote_site(&self, site: &NewVoteSite) -> Result<VoteSite>;

    /// Apply a partial update to a vote site.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the site does not exist.
    async fn update_vote_site(&self, id: SiteId, update: &VoteSiteUpdate) -> Result<VoteSite>;

    /// Delete a vote site and its logs.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the site does not exist.
    async fn delete_vote_site(&self, id: SiteId) -> Result<()>;

    /// Remote channel settings for a realm.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn realm_channel(&self, realm_id: RealmId) -> Result<Option<RealmChannel>>;

    /// Insert or replace a realm's remote channel settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_realm_channel(&self, channel: &RealmChannel) -> Result<()>;

    // =========================================================================
    // Account Directory
    // =========================================================================

    /// Characters owned by an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_characters(&self, username: &Username) -> Result<Vec<Character>>;

    /// Insert or replace a character.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_character(&self, character: &Character) -> Result<()>;

    // =========================================================================
    // Purchase Operations
    // =========================================================================

    /// Units of each item the account has already bought.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn bought_units(&self, username: &Username, items: &[ItemId]) -> Result<HashMap<ItemId, i64>>;

    /// Debit the buyer and record the purchase, its lines and a delivery job atomically.
    ///
    /// Limits and funds are re-checked after the account row is locked.
    ///
    /// # Errors
    ///
    /// - `StoreError::Rejected(LimitReached)` if a per-account limit would be exceeded.
    /// - `StoreError::Rejected(InsufficientFunds)` if the balance is too low.
    async fn execute_purchase(&self, purchase: NewPurchase) -> Result<PurchaseReceipt>;

    /// Get a purchase by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_purchase(&self, id: PurchaseId) -> Result<Option<Purchase>>;

    /// List purchases, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_purchases(&self, filter: &PurchaseFilter, page: PageRequest) -> Result<Page<Purchase>>;

    /// Record the outcome of a delivery attempt.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the purchase does not exist.
    async fn record_delivery(&self, id: PurchaseId, record: &DeliveryRecord) -> Result<Purchase>;

    /// Move a purchase to `sending` if a delivery attempt may start, as decided by
    /// [`realmshop_core::DeliveryStatus::may_dispatch`] with a lease of [`DELIVERY_LEASE_SECONDS`].
    ///
    /// Returns `None` when the purchase is sent (without `force`) or another
    /// attempt holds it. At most one caller wins for a given state.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the purchase does not exist.
    async fn begin_delivery(&self, id: PurchaseId, force: bool) -> Result<Option<Purchase>>;

    /// Set the recipient of a purchase.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the purchase does not exist.
    async fn set_recipient(&self, id: PurchaseId, recipient: &Recipient) -> Result<Purchase>;

    // =========================================================================
    // Delivery Outbox
    // =========================================================================

    /// Enqueue a delivery job for an existing purchase.
    ///
    /// Without `force`, an open job already queued for the purchase is reused
    /// and its id returned.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the purchase does not exist.
    async fn enqueue_delivery(&self, purchase_id: PurchaseId, force: bool) -> Result<DeliveryJobId>;

    /// Claim up to `limit` open jobs whose lease has lapsed, oldest first.
    ///
    /// At most one job per purchase is claimed, and none for a purchase that
    /// already has a job under a live lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn claim_delivery_jobs(&self, limit: u32) -> Result<Vec<DeliveryJob>>;

    /// Mark a job done.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn complete_delivery_job(&self, id: DeliveryJobId) -> Result<()>;

    // =========================================================================
    // Donation Operations
    // =========================================================================

    /// Record a freshly opened gateway order.
    ///
    /// # Errors
    ///
    /// - `StoreError::Conflict` if the external id is already known for the gateway.
    async fn create_donation(&self, donation: &NewDonation) -> Result<DonationPayment>;

    /// Get a payment by gateway and external order id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_donation(&self, gateway: Gateway, external_id: &str) -> Result<Option<DonationPayment>>;

    /// Apply an incoming status under the payment row lock, granting credits at
    /// most once.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the payment does not exist.
    async fn reconcile_donation(
        &self,
        gateway: Gateway,
        external_id: &str,
        status: PaymentStatus,
    ) -> Result<Reconciled>;

    /// List payments, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_donations(&self, filter: &DonationFilter, page: PageRequest) -> Result<Page<DonationPayment>>;

    // =========================================================================
    // Vote Operations
    // =========================================================================

    /// The latest log row for an (account, site) pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn latest_vote_log(&self, username: &Username, site_id: SiteId) -> Result<Option<VoteLog>>;

    /// Grant a vote reward and append its log row atomically.
    ///
    /// The cooldown is re-checked after the account row is locked.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the site does not exist.
    /// - `StoreError::Rejected(CooldownActive)` while the site is cooling down.
    async fn claim_vote(&self, username: &Username, site_id: SiteId, now: DateTime<Utc>) -> Result<VoteReceipt>;

    /// List vote logs, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_vote_logs(&self, filter: &VoteLogFilter, page: PageRequest) -> Result<Page<VoteLog>>;

    // =========================================================================
    // Health
    // =========================================================================

    /// Check that the backend answers.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable.
    async fn ping(&self) -> Result<()>;
}
