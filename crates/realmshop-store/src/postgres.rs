//! PostgreSQL storage implementation.
//!
//! Rows are read into private `*Row` structs with `sqlx::FromRow` and converted
//! into the typed records of `realmshop-core` at this boundary. Every balance
//! mutation runs in one transaction that first makes sure the account row exists
//! and then locks it with `SELECT ... FOR UPDATE`; the checks that guard the
//! mutation are evaluated after that lock is held.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::PgConnection;

use realmshop_core::{
    plan_claim, plan_transition, slugify, AccountBalance, BalanceDelta, Category, CategoryId,
    Character, CharacterGuid, Cost, DeliveryJobId, DeliveryRecord, DeliveryStatus, DonationFilter,
    DonationPayment, Gateway, ItemEntry, ItemFilter, ItemId, NewCategory, NewDonation,
    NewPurchase, NewShopItem, NewVoteSite, Page, PageRequest, PaymentId, PaymentStatus, Purchase,
    PurchaseFilter, PurchaseId, PurchaseLine, RealmChannel, RealmId, Recipient, Reconciled,
    ShopItem, ShopItemUpdate, SiteId, Transition, Username, VoteLog, VoteLogFilter, VoteSite,
    VoteSiteUpdate,
};

use crate::error::{Result, StoreError};
use crate::{DeliveryJob, PurchaseReceipt, Store, VoteReceipt, DELIVERY_LEASE_SECONDS};

macro_rules! item_columns {
    () => {
        "id, category_id, name, description, icon, world_item_entry, realm_id, \
         price_credits, price_vote_points, limit_per_account, enabled, created_at"
    };
}

macro_rules! site_columns {
    () => {
        "id, name, url, image_url, cooldown_minutes, points_reward, position, enabled"
    };
}

macro_rules! purchase_columns {
    () => {
        "id, username, realm_id, total_credits, total_vote_points, character_guid, \
         character_name, delivery_status, delivery_diagnostic, created_at, updated_at"
    };
}

macro_rules! donation_columns {
    () => {
        "id, username, gateway, external_id, status, amount_cents, currency, credits_rate, \
         credits_granted, created_at, updated_at, granted_at"
    };
}

macro_rules! vote_log_columns {
    () => {
        "id, username, site_id, claimed_points, claimed_at, next_available_at"
    };
}

// ============================================================================
// Row types
// ============================================================================

fn username(raw: String) -> Result<Username> {
    Ok(raw.parse()?)
}

#[derive(sqlx::FromRow)]
struct BalanceRow {
    username: String,
    credits: i64,
    vote_points: i64,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BalanceRow> for AccountBalance {
    type Error = StoreError;

    fn try_from(row: BalanceRow) -> Result<Self> {
        Ok(Self {
            username: username(row.username)?,
            credits: row.credits,
            vote_points: row.vote_points,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CategoryRow {
    id: i64,
    name: String,
    slug: String,
    description: Option<String>,
    position: i32,
}

impl From<CategoryRow> for Category {
    fn from(row: CategoryRow) -> Self {
        Self {
            id: CategoryId::new(row.id),
            name: row.name,
            slug: row.slug,
            description: row.description,
            position: row.position,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: i64,
    category_id: i64,
    name: String,
    description: Option<String>,
    icon: Option<String>,
    world_item_entry: i64,
    realm_id: Option<i64>,
    price_credits: i64,
    price_vote_points: i64,
    limit_per_account: Option<i64>,
    enabled: bool,
    created_at: DateTime<Utc>,
}

impl From<ItemRow> for ShopItem {
    fn from(row: ItemRow) -> Self {
        Self {
            id: ItemId::new(row.id),
            category_id: CategoryId::new(row.category_id),
            name: row.name,
            description: row.description,
            icon: row.icon,
            world_entry: ItemEntry::new(row.world_item_entry),
            realm_id: row.realm_id.map(RealmId::new),
            price_credits: row.price_credits,
            price_vote_points: row.price_vote_points,
            limit_per_account: row.limit_per_account,
            enabled: row.enabled,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SiteRow {
    id: i64,
    name: String,
    url: String,
    image_url: Option<String>,
    cooldown_minutes: i64,
    points_reward: i64,
    position: i32,
    enabled: bool,
}

impl From<SiteRow> for VoteSite {
    fn from(row: SiteRow) -> Self {
        Self {
            id: SiteId::new(row.id),
            name: row.name,
            url: row.url,
            image_url: row.image_url,
            cooldown_minutes: row.cooldown_minutes,
            points_reward: row.points_reward,
            position: row.position,
            enabled: row.enabled,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ChannelRow {
    realm_id: i64,
    enabled: bool,
    endpoint: String,
    auth_user: Option<String>,
    auth_password: Option<String>,
    timeout_seconds: i64,
}

impl From<ChannelRow> for RealmChannel {
    fn from(row: ChannelRow) -> Self {
        Self {
            realm_id: RealmId::new(row.realm_id),
            enabled: row.enabled,
            endpoint: row.endpoint,
            user: row.auth_user,
            password: row.auth_password,
            timeout_seconds: u64::try_from(row.timeout_seconds).unwrap_or(15),
        }
    }
}

#[derive(sqlx::FromRow)]
struct CharacterRow {
    guid: i64,
    name: String,
    username: String,
    realm_id: Option<i64>,
}

impl TryFrom<CharacterRow> for Character {
    type Error = StoreError;

    fn try_from(row: CharacterRow) -> Result<Self> {
        Ok(Self {
            guid: CharacterGuid::new(row.guid),
            name: row.name,
            username: username(row.username)?,
            realm_id: row.realm_id.map(RealmId::new),
        })
    }
}

#[derive(sqlx::FromRow)]
struct PurchaseRow {
    id: i64,
    username: String,
    realm_id: Option<i64>,
    total_credits: i64,
    total_vote_points: i64,
    character_guid: Option<i64>,
    character_name: Option<String>,
    delivery_status: String,
    delivery_diagnostic: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PurchaseRow {
    fn into_purchase(self, lines: Vec<PurchaseLine>) -> Result<Purchase> {
        let recipient = self.character_name.map(|name| Recipient {
            guid: self.character_guid.map(CharacterGuid::new),
            name,
        });
        Ok(Purchase {
            id: PurchaseId::new(self.id),
            username: username(self.username)?,
            realm_id: self.realm_id.map(RealmId::new),
            lines,
            total: Cost {
                credits: self.total_credits,
                vote_points: self.total_vote_points,
            },
            recipient,
            delivery_status: self
                .delivery_status
                .parse()
                .map_err(|e: realmshop_core::ShopError| StoreError::Serialization(e.to_string()))?,
            delivery_diagnostic: self.delivery_diagnostic,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LineRow {
    purchase_id: i64,
    item_id: i64,
    world_item_entry: i64,
    quantity: i64,
    price_credits: i64,
    price_vote_points: i64,
}

impl From<&LineRow> for PurchaseLine {
    fn from(row: &LineRow) -> Self {
        Self {
            item_id: ItemId::new(row.item_id),
            world_entry: ItemEntry::new(row.world_item_entry),
            quantity: row.quantity,
            unit_price: Cost {
                credits: row.price_credits,
                vote_points: row.price_vote_points,
            },
        }
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: uuid::Uuid,
    purchase_id: i64,
    force: bool,
    attempts: i32,
    created_at: DateTime<Utc>,
}

impl From<JobRow> for DeliveryJob {
    fn from(row: JobRow) -> Self {
        Self {
            id: DeliveryJobId::from_uuid(row.id),
            purchase_id: PurchaseId::new(row.purchase_id),
            force: row.force,
            attempts: row.attempts,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DonationRow {
    id: i64,
    username: String,
    gateway: String,
    external_id: String,
    status: String,
    amount_cents: i64,
    currency: String,
    credits_rate: i64,
    credits_granted: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    granted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DonationRow> for DonationPayment {
    type Error = StoreError;

    fn try_from(row: DonationRow) -> Result<Self> {
        let decode = |e: realmshop_core::ShopError| StoreError::Serialization(e.to_string());
        Ok(Self {
            id: PaymentId::new(row.id),
            username: username(row.username)?,
            gateway: row.gateway.parse().map_err(decode)?,
            external_id: row.external_id,
            status: row.status.parse().map_err(decode)?,
            amount_cents: row.amount_cents,
            currency: row.currency,
            credits_rate: row.credits_rate,
            credits_granted: row.credits_granted,
            created_at: row.created_at,
            updated_at: row.updated_at,
            granted_at: row.granted_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct VoteLogRow {
    id: i64,
    username: String,
    site_id: i64,
    claimed_points: i64,
    claimed_at: DateTime<Utc>,
    next_available_at: DateTime<Utc>,
}

impl TryFrom<VoteLogRow> for VoteLog {
    type Error = StoreError;

    fn try_from(row: VoteLogRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            username: username(row.username)?,
            site_id: SiteId::new(row.site_id),
            claimed_points: row.claimed_points,
            claimed_at: row.claimed_at,
            next_available_at: row.next_available_at,
        })
    }
}

// ============================================================================
// Store
// ============================================================================

/// PostgreSQL-backed storage implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with a bounded pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Apply the bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn attach_lines(conn: &mut PgConnection, rows: Vec<PurchaseRow>) -> Result<Vec<Purchase>> {
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let lines: Vec<LineRow> = sqlx::query_as(
            "SELECT purchase_id, item_id, world_item_entry, quantity, price_credits, price_vote_points \
             FROM shop_purchase_items WHERE purchase_id = ANY($1) ORDER BY purchase_id, line_no",
        )
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await?;

        let mut by_purchase: HashMap<i64, Vec<PurchaseLine>> = HashMap::new();
        for line in &lines {
            by_purchase
                .entry(line.purchase_id)
                .or_default()
                .push(PurchaseLine::from(line));
        }
        rows.into_iter()
            .map(|row| {
                let lines = by_purchase.remove(&row.id).unwrap_or_default();
                row.into_purchase(lines)
            })
            .collect()
    }

    async fn fetch_purchase(conn: &mut PgConnection, id: PurchaseId) -> Result<Option<Purchase>> {
        let row: Option<PurchaseRow> = sqlx::query_as(concat!(
            "SELECT ",
            purchase_columns!(),
            " FROM shop_purchases WHERE id = $1"
        ))
        .bind(id.get())
        .fetch_optional(&mut *conn)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Self::attach_lines(conn, vec![row]).await?.pop())
    }
}

/// Make sure the account row exists, then lock and read it.
async fn lock_balance(conn: &mut PgConnection, user: &Username) -> Result<AccountBalance> {
    sqlx::query("INSERT INTO accounts (username) VALUES ($1) ON CONFLICT (username) DO NOTHING")
        .bind(user.as_str())
        .execute(&mut *conn)
        .await?;
    let row: BalanceRow = sqlx::query_as(
        "SELECT username, credits, vote_points, updated_at FROM accounts WHERE username = $1 FOR UPDATE",
    )
    .bind(user.as_str())
    .fetch_one(&mut *conn)
    .await?;
    row.try_into()
}

async fn write_balance(conn: &mut PgConnection, balance: &AccountBalance) -> Result<()> {
    sqlx::query("UPDATE accounts SET credits = $2, vote_points = $3, updated_at = $4 WHERE username = $1")
        .bind(balance.username.as_str())
        .bind(balance.credits)
        .bind(balance.vote_points)
        .bind(balance.updated_at)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn bought_units_in(
    conn: &mut PgConnection,
    user: &Username,
    items: &[ItemId],
) -> Result<HashMap<ItemId, i64>> {
    let ids: Vec<i64> = items.iter().map(|i| i.get()).collect();
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT pi.item_id, COALESCE(SUM(pi.quantity), 0)::BIGINT \
         FROM shop_purchase_items pi JOIN shop_purchases p ON p.id = pi.purchase_id \
         WHERE p.username = $1 AND pi.item_id = ANY($2) GROUP BY pi.item_id",
    )
    .bind(user.as_str())
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(item, units)| (ItemId::new(item), units))
        .collect())
}

async fn insert_job(
    conn: &mut PgConnection,
    purchase_id: PurchaseId,
    force: bool,
) -> Result<DeliveryJobId> {
    let id = DeliveryJobId::generate();
    sqlx::query("INSERT INTO delivery_jobs (id, purchase_id, force) VALUES ($1, $2, $3)")
        .bind(id.as_uuid())
        .bind(purchase_id.get())
        .bind(force)
        .execute(&mut *conn)
        .await?;
    Ok(id)
}

fn row_count(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

fn page_bounds(page: PageRequest) -> (i64, i64) {
    (
        i64::from(page.page_size),
        i64::try_from(page.offset()).unwrap_or(i64::MAX),
    )
}

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // Balance Operations
    // =========================================================================

    async fn get_balance(&self, user: &Username) -> Result<AccountBalance> {
        let row: BalanceRow = sqlx::query_as(
            "INSERT INTO accounts (username) VALUES ($1) \
             ON CONFLICT (username) DO UPDATE SET username = EXCLUDED.username \
             RETURNING username, credits, vote_points, updated_at",
        )
        .bind(user.as_str())
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn apply_delta(&self, user: &Username, delta: BalanceDelta) -> Result<AccountBalance> {
        let mut tx = self.pool.begin().await?;
        let current = lock_balance(&mut tx, user).await?;
        let updated = current.apply(delta)?;
        write_balance(&mut tx, &updated).await?;
        tx.commit().await?;
        Ok(updated)
    }

    // =========================================================================
    // Catalog Operations
    // =========================================================================

    async fn list_categories(&self) -> Result<Vec<Category>> {
        let rows: Vec<CategoryRow> = sqlx::query_as(
            "SELECT id, name, slug, description, position FROM shop_categories ORDER BY position, name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Category::from).collect())
    }

    async fn create_category(&self, category: &NewCategory) -> Result<Category> {
        let row: CategoryRow = sqlx::query_as(
            "INSERT INTO shop_categories (name, slug, description, position) VALUES ($1, $2, $3, $4) \
             RETURNING id, name, slug, description, position",
        )
        .bind(category.name.trim())
        .bind(slugify(&category.name))
        .bind(&category.description)
        .bind(category.position)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<ShopItem>> {
        let rows: Vec<ItemRow> = sqlx::query_as(concat!(
            "SELECT ",
            item_columns!(),
            " FROM shop_items WHERE enabled \
              AND ($1::BIGINT IS NULL OR category_id = $1) \
              AND ($2::BIGINT IS NULL OR realm_id IS NULL OR realm_id = $2) \
              ORDER BY id"
        ))
        .bind(filter.category_id.map(CategoryId::get))
        .bind(filter.realm_id.map(RealmId::get))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ShopItem::from).collect())
    }

    async fn get_items(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, ShopItem>> {
        let raw: Vec<i64> = ids.iter().map(|i| i.get()).collect();
        let rows: Vec<ItemRow> = sqlx::query_as(concat!(
            "SELECT ",
            item_columns!(),
            " FROM shop_items WHERE id = ANY($1)"
        ))
        .bind(&raw)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let item = ShopItem::from(r);
                (item.id, item)
            })
            .collect())
    }

    async fn create_item(&self, item: &NewShopItem) -> Result<ShopItem> {
        let mut tx = self.pool.begin().await?;
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM shop_categories WHERE id = $1)")
            .bind(item.category_id.get())
            .fetch_one(&mut *tx)
            .await?;
        if !exists {
            return Err(StoreError::not_found("category", item.category_id));
        }
        let row: ItemRow = sqlx::query_as(concat!(
            "INSERT INTO shop_items (category_id, name, description, icon, world_item_entry, realm_id, \
             price_credits, price_vote_points, limit_per_account) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING ",
            item_columns!()
        ))
        .bind(item.category_id.get())
        .bind(item.name.trim())
        .bind(&item.description)
        .bind(&item.icon)
        .bind(item.world_entry.get())
        .bind(item.realm_id.map(RealmId::get))
        .bind(item.price_credits)
        .bind(item.price_vote_points)
        .bind(item.limit_per_account)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row.into())
    }

    async fn update_item(&self, id: ItemId, update: &ShopItemUpdate) -> Result<ShopItem> {
        let mut tx = self.pool.begin().await?;
        let row: Option<ItemRow> = sqlx::query_as(concat!(
            "SELECT ",
            item_columns!(),
            " FROM shop_items WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await?;
        let mut item = ShopItem::from(row.ok_or_else(|| StoreError::not_found("item", id))?);

        if let Some(category) = update.category_id {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM shop_categories WHERE id = $1)")
                    .bind(category.get())
                    .fetch_one(&mut *tx)
                    .await?;
            if !exists {
                return Err(StoreError::not_found("category", category));
            }
        }
        update.apply_to(&mut item);

        sqlx::query(
            "UPDATE shop_items SET category_id = $2, name = $3, description = $4, icon = $5, \
             world_item_entry = $6, realm_id = $7, price_credits = $8, price_vote_points = $9, \
             limit_per_account = $10, enabled = $11 WHERE id = $1",
        )
        .bind(id.get())
        .bind(item.category_id.get())
        .bind(&item.name)
        .bind(&item.description)
        .bind(&item.icon)
        .bind(item.world_entry.get())
        .bind(item.realm_id.map(RealmId::get))
        .bind(item.price_credits)
        .bind(item.price_vote_points)
        .bind(item.limit_per_account)
        .bind(item.enabled)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(item)
    }

    async fn stack_sizes(&self, entries: &[ItemEntry]) -> Result<HashMap<ItemEntry, i64>> {
        let raw: Vec<i64> = entries.iter().map(|e| e.get()).collect();
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT world_item_entry, max_stack FROM item_stack_sizes WHERE world_item_entry = ANY($1)",
        )
        .bind(&raw)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(entry, size)| (ItemEntry::new(entry), size))
            .collect())
    }

    async fn put_stack_size(&self, entry: ItemEntry, max_stack: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO item_stack_sizes (world_item_entry, max_stack) VALUES ($1, $2) \
             ON CONFLICT (world_item_entry) DO UPDATE SET max_stack = EXCLUDED.max_stack",
        )
        .bind(entry.get())
        .bind(max_stack.max(1))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_vote_sites(&self, include_disabled: bool) -> Result<Vec<VoteSite>> {
        let rows: Vec<SiteRow> = sqlx::query_as(concat!(
            "SELECT ",
            site_columns!(),
            " FROM vote_sites WHERE ($1 OR enabled) ORDER BY position, id"
        ))
        .bind(include_disabled)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(VoteSite::from).collect())
    }

    async fn get_vote_site(&self, id: SiteId) -> Result<Option<VoteSite>> {
        let row: Option<SiteRow> = sqlx::query_as(concat!(
            "SELECT ",
            site_columns!(),
            " FROM vote_sites WHERE id = $1"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(VoteSite::from))
    }

    async fn create_vote_site(&self, site: &NewVoteSite) -> Result<VoteSite> {
        let image_url = site
            .image_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let row: SiteRow = sqlx::query_as(concat!(
            "INSERT INTO vote_sites (name, url, image_url, cooldown_minutes, points_reward, position) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING ",
            site_columns!()
        ))
        .bind(site.name.trim())
        .bind(site.url.trim())
        .bind(image_url)
        .bind(site.cooldown_minutes)
        .bind(site.points_reward)
        .bind(site.position)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn update_vote_site(&self, id: SiteId, update: &VoteSiteUpdate) -> Result<VoteSite> {
        let mut tx = self.pool.begin().await?;
        let row: Option<SiteRow> = sqlx::query_as(concat!(
            "SELECT ",
            site_columns!(),
            " FROM vote_sites WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await?;
        let mut site = VoteSite::from(row.ok_or_else(|| StoreError::not_found("vote site", id))?);
        update.apply_to(&mut site);

        sqlx::query(
            "UPDATE vote_sites SET name = $2, url = $3, image_url = $4, cooldown_minutes = $5, \
             points_reward = $6, position = $7, enabled = $8 WHERE id = $1",
        )
        .bind(id.get())
        .bind(&site.name)
        .bind(&site.url)
        .bind(&site.image_url)
        .bind(site.cooldown_minutes)
        .bind(site.points_reward)
        .bind(site.position)
        .bind(site.enabled)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(site)
    }

    async fn delete_vote_site(&self, id: SiteId) -> Result<()> {
        let result = sqlx::query("DELETE FROM vote_sites WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("vote site", id));
        }
        Ok(())
    }

    async fn realm_channel(&self, realm_id: RealmId) -> Result<Option<RealmChannel>> {
        let row: Option<ChannelRow> = sqlx::query_as(
            "SELECT realm_id, enabled, endpoint, auth_user, auth_password, timeout_seconds \
             FROM realm_channels WHERE realm_id = $1",
        )
        .bind(realm_id.get())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(RealmChannel::from))
    }

    async fn put_realm_channel(&self, channel: &RealmChannel) -> Result<()> {
        sqlx::query(
            "INSERT INTO realm_channels (realm_id, enabled, endpoint, auth_user, auth_password, timeout_seconds) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (realm_id) DO UPDATE SET enabled = EXCLUDED.enabled, endpoint = EXCLUDED.endpoint, \
             auth_user = EXCLUDED.auth_user, auth_password = EXCLUDED.auth_password, \
             timeout_seconds = EXCLUDED.timeout_seconds",
        )
        .bind(channel.realm_id.get())
        .bind(channel.enabled)
        .bind(&channel.endpoint)
        .bind(&channel.user)
        .bind(&channel.password)
        .bind(i64::try_from(channel.timeout_seconds).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Account Directory
    // =========================================================================

    async fn list_characters(&self, user: &Username) -> Result<Vec<Character>> {
        let rows: Vec<CharacterRow> = sqlx::query_as(
            "SELECT guid, name, username, realm_id FROM characters WHERE username = $1 ORDER BY guid",
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Character::try_from).collect()
    }

    async fn put_character(&self, character: &Character) -> Result<()> {
        sqlx::query(
            "INSERT INTO characters (guid, name, username, realm_id) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (guid) DO UPDATE SET name = EXCLUDED.name, username = EXCLUDED.username, \
             realm_id = EXCLUDED.realm_id",
        )
        .bind(character.guid.get())
        .bind(&character.name)
        .bind(character.username.as_str())
        .bind(character.realm_id.map(RealmId::get))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Purchase Operations
    // =========================================================================

    async fn bought_units(&self, user: &Username, items: &[ItemId]) -> Result<HashMap<ItemId, i64>> {
        let mut conn = self.pool.acquire().await?;
        bought_units_in(&mut conn, user, items).await
    }

    async fn execute_purchase(&self, purchase: NewPurchase) -> Result<PurchaseReceipt> {
        let mut tx = self.pool.begin().await?;

        let current = lock_balance(&mut tx, &purchase.username).await?;

        let limited = purchase.order.limited_items();
        if !limited.is_empty() {
            let bought = bought_units_in(&mut tx, &purchase.username, &limited).await?;
            purchase
                .order
                .check_limits(|item| bought.get(&item).copied().unwrap_or(0))?;
        }

        purchase.order.check_funds(&current)?;
        let balance = current.apply(BalanceDelta::debit(&purchase.order.total))?;
        write_balance(&mut tx, &balance).await?;

        let (guid, name) = match &purchase.recipient {
            Some(r) => (r.guid.map(CharacterGuid::get), Some(r.name.as_str())),
            None => (None, None),
        };
        let (id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO shop_purchases (username, realm_id, total_credits, total_vote_points, \
             character_guid, character_name) VALUES ($1, $2, $3, $4, $5, $6) RETURNING id, created_at",
        )
        .bind(purchase.username.as_str())
        .bind(purchase.order.realm_id.map(RealmId::get))
        .bind(purchase.order.total.credits)
        .bind(purchase.order.total.vote_points)
        .bind(guid)
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;

        for (line_no, line) in purchase.order.lines.iter().enumerate() {
            sqlx::query(
                "INSERT INTO shop_purchase_items (purchase_id, line_no, item_id, world_item_entry, \
                 quantity, price_credits, price_vote_points) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(id)
            .bind(i32::try_from(line_no).unwrap_or(i32::MAX))
            .bind(line.item_id.get())
            .bind(line.world_entry.get())
            .bind(line.quantity)
            .bind(line.unit_price.credits)
            .bind(line.unit_price.vote_points)
            .execute(&mut *tx)
            .await?;
        }

        let purchase_id = PurchaseId::new(id);
        let job_id = insert_job(&mut tx, purchase_id, false).await?;
        tx.commit().await?;

        Ok(PurchaseReceipt {
            purchase: purchase.into_purchase(purchase_id, created_at),
            balance,
            job_id,
        })
    }

    async fn get_purchase(&self, id: PurchaseId) -> Result<Option<Purchase>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_purchase(&mut conn, id).await
    }

    async fn list_purchases(&self, filter: &PurchaseFilter, page: PageRequest) -> Result<Page<Purchase>> {
        let (limit, offset) = page_bounds(page);
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<PurchaseRow> = sqlx::query_as(concat!(
            "SELECT ",
            purchase_columns!(),
            " FROM shop_purchases \
              WHERE ($1::TEXT IS NULL OR username = $1) AND ($2::TEXT IS NULL OR delivery_status = $2) \
              ORDER BY id DESC LIMIT $3 OFFSET $4"
        ))
        .bind(filter.username.as_ref().map(Username::as_str))
        .bind(filter.delivery_status.map(|s| s.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *conn)
        .await?;
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM shop_purchases \
             WHERE ($1::TEXT IS NULL OR username = $1) AND ($2::TEXT IS NULL OR delivery_status = $2)",
        )
        .bind(filter.username.as_ref().map(Username::as_str))
        .bind(filter.delivery_status.map(|s| s.as_str()))
        .fetch_one(&mut *conn)
        .await?;
        let items = Self::attach_lines(&mut conn, rows).await?;
        Ok(Page::new(items, page, row_count(total)))
    }

    async fn record_delivery(&self, id: PurchaseId, record: &DeliveryRecord) -> Result<Purchase> {
        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query(
            "UPDATE shop_purchases SET delivery_status = $2, delivery_diagnostic = $3, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id.get())
        .bind(record.status.as_str())
        .bind(&record.diagnostic)
        .execute(&mut *conn)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("purchase", id));
        }
        Self::fetch_purchase(&mut conn, id)
            .await?
            .ok_or_else(|| StoreError::not_found("purchase", id))
    }

    async fn begin_delivery(&self, id: PurchaseId, force: bool) -> Result<Option<Purchase>> {
        let mut tx = self.pool.begin().await?;
        let locked: Option<(String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT delivery_status, updated_at FROM shop_purchases WHERE id = $1 FOR UPDATE",
        )
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await?;
        let Some((status, updated_at)) = locked else {
            return Err(StoreError::not_found("purchase", id));
        };
        let status: DeliveryStatus = status
            .parse()
            .map_err(|e: realmshop_core::ShopError| StoreError::Serialization(e.to_string()))?;
        let stale = updated_at < Utc::now() - Duration::seconds(DELIVERY_LEASE_SECONDS);
        if !status.may_dispatch(force, stale) {
            return Ok(None);
        }

        sqlx::query("UPDATE shop_purchases SET delivery_status = $2, updated_at = now() WHERE id = $1")
            .bind(id.get())
            .bind(DeliveryStatus::Sending.as_str())
            .execute(&mut *tx)
            .await?;
        let purchase = Self::fetch_purchase(&mut tx, id).await?;
        tx.commit().await?;
        Ok(purchase)
    }

    async fn set_recipient(&self, id: PurchaseId, recipient: &Recipient) -> Result<Purchase> {
        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query(
            "UPDATE shop_purchases SET character_guid = $2, character_name = $3, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id.get())
        .bind(recipient.guid.map(CharacterGuid::get))
        .bind(&recipient.name)
        .execute(&mut *conn)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("purchase", id));
        }
        Self::fetch_purchase(&mut conn, id)
            .await?
            .ok_or_else(|| StoreError::not_found("purchase", id))
    }

    // =========================================================================
    // Delivery Outbox
    // =========================================================================

    async fn enqueue_delivery(&self, purchase_id: PurchaseId, force: bool) -> Result<DeliveryJobId> {
        let mut conn = self.pool.acquire().await?;
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM shop_purchases WHERE id = $1)")
            .bind(purchase_id.get())
            .fetch_one(&mut *conn)
            .await?;
        if !exists {
            return Err(StoreError::not_found("purchase", purchase_id));
        }
        if !force {
            let open: Option<uuid::Uuid> = sqlx::query_scalar(
                "SELECT id FROM delivery_jobs WHERE purchase_id = $1 AND completed_at IS NULL \
                 ORDER BY created_at LIMIT 1",
            )
            .bind(purchase_id.get())
            .fetch_optional(&mut *conn)
            .await?;
            if let Some(open) = open {
                return Ok(DeliveryJobId::from_uuid(open));
            }
        }
        insert_job(&mut conn, purchase_id, force).await
    }

    async fn claim_delivery_jobs(&self, limit: u32) -> Result<Vec<DeliveryJob>> {
        let cutoff = Utc::now() - Duration::seconds(DELIVERY_LEASE_SECONDS);
        let rows: Vec<JobRow> = sqlx::query_as(
            "UPDATE delivery_jobs SET claimed_at = now(), attempts = attempts + 1 \
             WHERE id IN ( \
                 SELECT j.id FROM delivery_jobs j \
                 WHERE j.completed_at IS NULL AND (j.claimed_at IS NULL OR j.claimed_at < $2) \
                   AND NOT EXISTS ( \
                       SELECT 1 FROM delivery_jobs o \
                       WHERE o.purchase_id = j.purchase_id AND o.id <> j.id AND o.completed_at IS NULL \
                         AND (o.claimed_at >= $2 OR ((o.claimed_at IS NULL OR o.claimed_at < $2) \
                              AND (o.created_at, o.id) < (j.created_at, j.id)))) \
                 ORDER BY j.created_at LIMIT $1 FOR UPDATE SKIP LOCKED) \
             RETURNING id, purchase_id, force, attempts, created_at",
        )
        .bind(i64::from(limit))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        let mut jobs: Vec<DeliveryJob> = rows.into_iter().map(DeliveryJob::from).collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn complete_delivery_job(&self, id: DeliveryJobId) -> Result<()> {
        sqlx::query("UPDATE delivery_jobs SET completed_at = now() WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Donation Operations
    // =========================================================================

    async fn create_donation(&self, donation: &NewDonation) -> Result<DonationPayment> {
        let row: DonationRow = sqlx::query_as(concat!(
            "INSERT INTO donation_payments (username, gateway, external_id, status, amount_cents, \
             currency, credits_rate) VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING ",
            donation_columns!()
        ))
        .bind(donation.username.as_str())
        .bind(donation.gateway.as_str())
        .bind(&donation.external_id)
        .bind(donation.status.as_str())
        .bind(donation.amount_cents)
        .bind(&donation.currency)
        .bind(donation.credits_rate)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get_donation(&self, gateway: Gateway, external_id: &str) -> Result<Option<DonationPayment>> {
        let row: Option<DonationRow> = sqlx::query_as(concat!(
            "SELECT ",
            donation_columns!(),
            " FROM donation_payments WHERE gateway = $1 AND external_id = $2"
        ))
        .bind(gateway.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DonationPayment::try_from).transpose()
    }

    async fn reconcile_donation(
        &self,
        gateway: Gateway,
        external_id: &str,
        status: PaymentStatus,
    ) -> Result<Reconciled> {
        let mut tx = self.pool.begin().await?;
        let row: Option<DonationRow> = sqlx::query_as(concat!(
            "SELECT ",
            donation_columns!(),
            " FROM donation_payments WHERE gateway = $1 AND external_id = $2 FOR UPDATE"
        ))
        .bind(gateway.as_str())
        .bind(external_id)
        .fetch_optional(&mut *tx)
        .await?;
        let current = DonationPayment::try_from(
            row.ok_or_else(|| StoreError::not_found("payment", external_id))?,
        )?;

        let Transition::Advance { status, grant } = plan_transition(&current, status) else {
            tx.commit().await?;
            return Ok(Reconciled {
                payment: current,
                granted_now: 0,
                changed: false,
            });
        };

        if grant > 0 {
            let balance = lock_balance(&mut tx, &current.username).await?;
            let updated = balance.apply(BalanceDelta::credits(grant))?;
            write_balance(&mut tx, &updated).await?;
        }

        let row: DonationRow = sqlx::query_as(concat!(
            "UPDATE donation_payments SET status = $2, updated_at = now(), \
             credits_granted = CASE WHEN $3 > 0 THEN $3 ELSE credits_granted END, \
             granted_at = CASE WHEN $3 > 0 THEN now() ELSE granted_at END \
             WHERE id = $1 RETURNING ",
            donation_columns!()
        ))
        .bind(current.id.get())
        .bind(status.as_str())
        .bind(grant)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Reconciled {
            payment: row.try_into()?,
            granted_now: grant,
            changed: true,
        })
    }

    async fn list_donations(&self, filter: &DonationFilter, page: PageRequest) -> Result<Page<DonationPayment>> {
        let (limit, offset) = page_bounds(page);
        let rows: Vec<DonationRow> = sqlx::query_as(concat!(
            "SELECT ",
            donation_columns!(),
            " FROM donation_payments \
              WHERE ($1::TEXT IS NULL OR username = $1) AND ($2::TEXT IS NULL OR status = $2) \
              AND ($3::TEXT IS NULL OR gateway = $3) \
              ORDER BY id DESC LIMIT $4 OFFSET $5"
        ))
        .bind(filter.username.as_ref().map(Username::as_str))
        .bind(filter.status.map(PaymentStatus::as_str))
        .bind(filter.gateway.map(Gateway::as_str))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM donation_payments \
             WHERE ($1::TEXT IS NULL OR username = $1) AND ($2::TEXT IS NULL OR status = $2) \
             AND ($3::TEXT IS NULL OR gateway = $3)",
        )
        .bind(filter.username.as_ref().map(Username::as_str))
        .bind(filter.status.map(PaymentStatus::as_str))
        .bind(filter.gateway.map(Gateway::as_str))
        .fetch_one(&self.pool)
        .await?;
        let items = rows
            .into_iter()
            .map(DonationPayment::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::new(items, page, row_count(total)))
    }

    // =========================================================================
    // Vote Operations
    // =========================================================================

    async fn latest_vote_log(&self, user: &Username, site_id: SiteId) -> Result<Option<VoteLog>> {
        let row: Option<VoteLogRow> = sqlx::query_as(concat!(
            "SELECT ",
            vote_log_columns!(),
            " FROM vote_logs WHERE username = $1 AND site_id = $2 ORDER BY id DESC LIMIT 1"
        ))
        .bind(user.as_str())
        .bind(site_id.get())
        .fetch_optional(&self.pool)
        .await?;
        row.map(VoteLog::try_from).transpose()
    }

    async fn claim_vote(&self, user: &Username, site_id: SiteId, now: DateTime<Utc>) -> Result<VoteReceipt> {
        let mut tx = self.pool.begin().await?;
        let current = lock_balance(&mut tx, user).await?;

        let site: Option<SiteRow> = sqlx::query_as(concat!(
            "SELECT ",
            site_columns!(),
            " FROM vote_sites WHERE id = $1"
        ))
        .bind(site_id.get())
        .fetch_optional(&mut *tx)
        .await?;
        let site = VoteSite::from(site.ok_or_else(|| StoreError::not_found("vote site", site_id))?);

        let latest: Option<VoteLogRow> = sqlx::query_as(concat!(
            "SELECT ",
            vote_log_columns!(),
            " FROM vote_logs WHERE username = $1 AND site_id = $2 ORDER BY id DESC LIMIT 1"
        ))
        .bind(user.as_str())
        .bind(site_id.get())
        .fetch_optional(&mut *tx)
        .await?;
        let latest = latest.map(VoteLog::try_from).transpose()?;

        let planned = plan_claim(user, &site, latest.as_ref(), now)?;
        let balance = current.apply(BalanceDelta::vote_points(planned.claimed_points))?;
        write_balance(&mut tx, &balance).await?;

        let row: VoteLogRow = sqlx::query_as(concat!(
            "INSERT INTO vote_logs (username, site_id, claimed_points, claimed_at, next_available_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING ",
            vote_log_columns!()
        ))
        .bind(planned.username.as_str())
        .bind(planned.site_id.get())
        .bind(planned.claimed_points)
        .bind(planned.claimed_at)
        .bind(planned.next_available_at)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(VoteReceipt {
            log: row.try_into()?,
            balance,
            site,
        })
    }

    async fn list_vote_logs(&self, filter: &VoteLogFilter, page: PageRequest) -> Result<Page<VoteLog>> {
        let (limit, offset) = page_bounds(page);
        let rows: Vec<VoteLogRow> = sqlx::query_as(concat!(
            "SELECT ",
            vote_log_columns!(),
            " FROM vote_logs WHERE ($1::TEXT IS NULL OR username = $1) \
              AND ($2::BIGINT IS NULL OR site_id = $2) ORDER BY id DESC LIMIT $3 OFFSET $4"
        ))
        .bind(filter.username.as_ref().map(Username::as_str))
        .bind(filter.site_id.map(SiteId::get))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM vote_logs WHERE ($1::TEXT IS NULL OR username = $1) \
             AND ($2::BIGINT IS NULL OR site_id = $2)",
        )
        .bind(filter.username.as_ref().map(Username::as_str))
        .bind(filter.site_id.map(SiteId::get))
        .fetch_one(&self.pool)
        .await?;
        let items = rows
            .into_iter()
            .map(VoteLog::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::new(items, page, row_count(total)))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
