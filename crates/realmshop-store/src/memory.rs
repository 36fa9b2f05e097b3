//! In-memory storage implementation.
//!
//! All state lives behind one `tokio::sync::Mutex`. Holding it for the whole of a
//! compound operation gives the same all-or-nothing behaviour the PostgreSQL
//! backend gets from its row locks, which is what the concurrency tests rely on.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use realmshop_core::{
    plan_claim, plan_transition, slugify, AccountBalance, BalanceDelta, Category, CategoryId,
    Character, CharacterGuid, DeliveryJobId, DeliveryRecord, DeliveryStatus, DonationFilter, DonationPayment,
    Gateway, ItemEntry, ItemFilter, ItemId, NewCategory, NewDonation, NewPurchase, NewShopItem,
    NewVoteSite, Page, PageRequest, PaymentId, PaymentStatus, Purchase, PurchaseFilter,
    PurchaseId, RealmChannel, RealmId, Recipient, Reconciled, ShopItem, ShopItemUpdate, SiteId,
    Transition, Username, VoteLog, VoteLogFilter, VoteSite, VoteSiteUpdate,
};

use crate::error::{Result, StoreError};
use crate::{DeliveryJob, PurchaseReceipt, Store, VoteReceipt, DELIVERY_LEASE_SECONDS};

struct JobRow {
    job: DeliveryJob,
    claimed_at: Option<DateTime<Utc>>,
    completed: bool,
}

#[derive(Default)]
struct State {
    next_id: i64,
    balances: HashMap<Username, AccountBalance>,
    categories: BTreeMap<CategoryId, Category>,
    items: BTreeMap<ItemId, ShopItem>,
    stack_sizes: HashMap<ItemEntry, i64>,
    vote_sites: BTreeMap<SiteId, VoteSite>,
    realm_channels: HashMap<RealmId, RealmChannel>,
    characters: BTreeMap<CharacterGuid, Character>,
    purchases: BTreeMap<PurchaseId, Purchase>,
    jobs: Vec<JobRow>,
    donations: BTreeMap<PaymentId, DonationPayment>,
    vote_logs: Vec<VoteLog>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn balance(&mut self, username: &Username) -> &mut AccountBalance {
        self.balances
            .entry(username.clone())
            .or_insert_with(|| AccountBalance::new(username.clone()))
    }

    fn bought_units(&self, username: &Username, item: ItemId) -> i64 {
        self.purchases
            .values()
            .filter(|p| &p.username == username)
            .flat_map(|p| p.lines.iter())
            .filter(|l| l.item_id == item)
            .map(|l| l.quantity)
            .sum()
    }

    fn enqueue(&mut self, purchase_id: PurchaseId, force: bool, now: DateTime<Utc>) -> DeliveryJobId {
        let id = DeliveryJobId::generate();
        self.jobs.push(JobRow {
            job: DeliveryJob {
                id,
                purchase_id,
                force,
                attempts: 0,
                created_at: now,
            },
            claimed_at: None,
            completed: false,
        });
        id
    }

    fn latest_vote_log(&self, username: &Username, site_id: SiteId) -> Option<&VoteLog> {
        self.vote_logs
            .iter()
            .rev()
            .find(|l| &l.username == username && l.site_id == site_id)
    }
}

/// In-memory storage backend.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T: Clone>(rows: Vec<T>, page: PageRequest) -> Page<T> {
    let rows: Vec<T> = rows.into_iter().rev().collect();
    Page::new(page.slice(&rows), page, rows.len() as u64)
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Balance Operations
    // =========================================================================

    async fn get_balance(&self, username: &Username) -> Result<AccountBalance> {
        let mut state = self.state.lock().await;
        Ok(state.balance(username).clone())
    }

    async fn apply_delta(&self, username: &Username, delta: BalanceDelta) -> Result<AccountBalance> {
        let mut state = self.state.lock().await;
        let balance = state.balance(username);
        let updated = balance.apply(delta)?;
        *balance = updated.clone();
        Ok(updated)
    }

    // =========================================================================
    // Catalog Operations
    // =========================================================================

    async fn list_categories(&self) -> Result<Vec<Category>> {
        let state = self.state.lock().await;
        let mut categories: Vec<Category> = state.categories.values().cloned().collect();
        categories.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.name.cmp(&b.name)));
        Ok(categories)
    }

    async fn create_category(&self, category: &NewCategory) -> Result<Category> {
        let mut state = self.state.lock().await;
        let slug = slugify(&category.name);
        if state.categories.values().any(|c| c.slug == slug) {
            return Err(StoreError::Conflict(format!("category slug {slug} already exists")));
        }
        let id = CategoryId::new(state.next_id());
        let created = Category {
            id,
            name: category.name.trim().to_string(),
            slug,
            description: category.description.clone(),
            position: category.position,
        };
        state.categories.insert(id, created.clone());
        Ok(created)
    }

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<ShopItem>> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect())
    }

    async fn get_items(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, ShopItem>> {
        let state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.items.get(id).map(|i| (*id, i.clone())))
            .collect())
    }

    async fn create_item(&self, item: &NewShopItem) -> Result<ShopItem> {
        let mut state = self.state.lock().await;
        if !state.categories.contains_key(&item.category_id) {
            return Err(StoreError::not_found("category", item.category_id));
        }
        let id = ItemId::new(state.next_id());
        let created = ShopItem {
            id,
            category_id: item.category_id,
            name: item.name.trim().to_string(),
            description: item.description.clone(),
            icon: item.icon.clone(),
            world_entry: item.world_entry,
            realm_id: item.realm_id,
            price_credits: item.price_credits,
            price_vote_points: item.price_vote_points,
            limit_per_account: item.limit_per_account,
            enabled: true,
            created_at: Utc::now(),
        };
        state.items.insert(id, created.clone());
        Ok(created)
    }

    async fn update_item(&self, id: ItemId, update: &ShopItemUpdate) -> Result<ShopItem> {
        let mut state = self.state.lock().await;
        if let Some(category) = update.category_id {
            if !state.categories.contains_key(&category) {
                return Err(StoreError::not_found("category", category));
            }
        }
        let item = state
            .items
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("item", id))?;
        update.apply_to(item);
        Ok(item.clone())
    }

    async fn stack_sizes(&self, entries: &[ItemEntry]) -> Result<HashMap<ItemEntry, i64>> {
        let state = self.state.lock().await;
        Ok(entries
            .iter()
            .filter_map(|e| state.stack_sizes.get(e).map(|s| (*e, *s)))
            .collect())
    }

    async fn put_stack_size(&self, entry: ItemEntry, max_stack: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.stack_sizes.insert(entry, max_stack.max(1));
        Ok(())
    }

    async fn list_vote_sites(&self, include_disabled: bool) -> Result<Vec<VoteSite>> {
        let state = self.state.lock().await;
        let mut sites: Vec<VoteSite> = state
            .vote_sites
            .values()
            .filter(|s| include_disabled || s.enabled)
            .cloned()
            .collect();
        sites.sort_by_key(|s| (s.position, s.id));
        Ok(sites)
    }

    async fn get_vote_site(&self, id: SiteId) -> Result<Option<VoteSite>> {
        let state = self.state.lock().await;
        Ok(state.vote_sites.get(&id).cloned())
    }

    async fn create_vote_site(&self, site: &NewVoteSite) -> Result<VoteSite> {
        let mut state = self.state.lock().await;
        let id = SiteId::new(state.next_id());
        let created = VoteSite {
            id,
            name: site.name.trim().to_string(),
            url: site.url.trim().to_string(),
            image_url: site
                .image_url
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            cooldown_minutes: site.cooldown_minutes,
            points_reward: site.points_reward,
            position: site.position,
            enabled: true,
        };
        state.vote_sites.insert(id, created.clone());
        Ok(created)
    }

    async fn update_vote_site(&self, id: SiteId, update: &VoteSiteUpdate) -> Result<VoteSite> {
        let mut state = self.state.lock().await;
        let site = state
            .vote_sites
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("vote site", id))?;
        update.apply_to(site);
        Ok(site.clone())
    }

    async fn delete_vote_site(&self, id: SiteId) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.vote_sites.remove(&id).is_none() {
            return Err(StoreError::not_found("vote site", id));
        }
        state.vote_logs.retain(|l| l.site_id != id);
        Ok(())
    }

    async fn realm_channel(&self, realm_id: RealmId) -> Result<Option<RealmChannel>> {
        let state = self.state.lock().await;
        Ok(state.realm_channels.get(&realm_id).cloned())
    }

    async fn put_realm_channel(&self, channel: &RealmChannel) -> Result<()> {
        let mut state = self.state.lock().await;
        state.realm_channels.insert(channel.realm_id, channel.clone());
        Ok(())
    }

    // =========================================================================
    // Account Directory
    // =========================================================================

    async fn list_characters(&self, username: &Username) -> Result<Vec<Character>> {
        let state = self.state.lock().await;
        Ok(state
            .characters
            .values()
            .filter(|c| &c.username == username)
            .cloned()
            .collect())
    }

    async fn put_character(&self, character: &Character) -> Result<()> {
        let mut state = self.state.lock().await;
        state.characters.insert(character.guid, character.clone());
        Ok(())
    }

    // =========================================================================
    // Purchase Operations
    // =========================================================================

    async fn bought_units(&self, username: &Username, items: &[ItemId]) -> Result<HashMap<ItemId, i64>> {
        let state = self.state.lock().await;
        Ok(items
            .iter()
            .map(|id| (*id, state.bought_units(username, *id)))
            .collect())
    }

    async fn execute_purchase(&self, purchase: NewPurchase) -> Result<PurchaseReceipt> {
        let mut state = self.state.lock().await;

        purchase
            .order
            .check_limits(|item| state.bought_units(&purchase.username, item))?;

        let current = state.balance(&purchase.username).clone();
        purchase.order.check_funds(&current)?;
        let balance = current.apply(BalanceDelta::debit(&purchase.order.total))?;

        let now = Utc::now();
        let id = PurchaseId::new(state.next_id());
        let stored = purchase.into_purchase(id, now);
        state.balances.insert(stored.username.clone(), balance.clone());
        state.purchases.insert(id, stored.clone());
        let job_id = state.enqueue(id, false, now);

        Ok(PurchaseReceipt {
            purchase: stored,
            balance,
            job_id,
        })
    }

    async fn get_purchase(&self, id: PurchaseId) -> Result<Option<Purchase>> {
        let state = self.state.lock().await;
        Ok(state.purchases.get(&id).cloned())
    }

    async fn list_purchases(&self, filter: &PurchaseFilter, page: PageRequest) -> Result<Page<Purchase>> {
        let state = self.state.lock().await;
        let rows: Vec<Purchase> = state
            .purchases
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        Ok(newest_first(rows, page))
    }

    async fn record_delivery(&self, id: PurchaseId, record: &DeliveryRecord) -> Result<Purchase> {
        let mut state = self.state.lock().await;
        let purchase = state
            .purchases
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("purchase", id))?;
        purchase.delivery_status = record.status;
        purchase.delivery_diagnostic = Some(record.diagnostic.clone());
        purchase.updated_at = Utc::now();
        Ok(purchase.clone())
    }

    async fn begin_delivery(&self, id: PurchaseId, force: bool) -> Result<Option<Purchase>> {
        let mut state = self.state.lock().await;
        let purchase = state
            .purchases
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("purchase", id))?;
        let now = Utc::now();
        let stale = purchase.updated_at < now - Duration::seconds(DELIVERY_LEASE_SECONDS);
        if !purchase.delivery_status.may_dispatch(force, stale) {
            return Ok(None);
        }
        purchase.delivery_status = DeliveryStatus::Sending;
        purchase.updated_at = now;
        Ok(Some(purchase.clone()))
    }

    async fn set_recipient(&self, id: PurchaseId, recipient: &Recipient) -> Result<Purchase> {
        let mut state = self.state.lock().await;
        let purchase = state
            .purchases
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("purchase", id))?;
        purchase.recipient = Some(recipient.clone());
        purchase.updated_at = Utc::now();
        Ok(purchase.clone())
    }

    // =========================================================================
    // Delivery Outbox
    // =========================================================================

    async fn enqueue_delivery(&self, purchase_id: PurchaseId, force: bool) -> Result<DeliveryJobId> {
        let mut state = self.state.lock().await;
        if !state.purchases.contains_key(&purchase_id) {
            return Err(StoreError::not_found("purchase", purchase_id));
        }
        if !force {
            if let Some(open) = state
                .jobs
                .iter()
                .find(|r| !r.completed && r.job.purchase_id == purchase_id)
            {
                return Ok(open.job.id);
            }
        }
        Ok(state.enqueue(purchase_id, force, Utc::now()))
    }

    async fn claim_delivery_jobs(&self, limit: u32) -> Result<Vec<DeliveryJob>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let lease_cutoff = now - Duration::seconds(DELIVERY_LEASE_SECONDS);
        let mut busy: HashSet<PurchaseId> = state
            .jobs
            .iter()
            .filter(|r| !r.completed && r.claimed_at.is_some_and(|t| t >= lease_cutoff))
            .map(|r| r.job.purchase_id)
            .collect();
        let mut claimed = Vec::new();
        for row in &mut state.jobs {
            if claimed.len() >= limit as usize {
                break;
            }
            let open = !row.completed && row.claimed_at.map_or(true, |t| t < lease_cutoff);
            if open && busy.insert(row.job.purchase_id) {
                row.claimed_at = Some(now);
                row.job.attempts += 1;
                claimed.push(row.job.clone());
            }
        }
        Ok(claimed)
    }

    async fn complete_delivery_job(&self, id: DeliveryJobId) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(row) = state.jobs.iter_mut().find(|r| r.job.id == id) {
            row.completed = true;
        }
        Ok(())
    }

    // =========================================================================
    // Donation Operations
    // =========================================================================

    async fn create_donation(&self, donation: &NewDonation) -> Result<DonationPayment> {
        let mut state = self.state.lock().await;
        let exists = state
            .donations
            .values()
            .any(|d| d.gateway == donation.gateway && d.external_id == donation.external_id);
        if exists {
            return Err(StoreError::Conflict(format!(
                "{} order {} already recorded",
                donation.gateway, donation.external_id
            )));
        }
        let now = Utc::now();
        let id = PaymentId::new(state.next_id());
        let payment = DonationPayment {
            id,
            username: donation.username.clone(),
            gateway: donation.gateway,
            external_id: donation.external_id.clone(),
            status: donation.status,
            amount_cents: donation.amount_cents,
            currency: donation.currency.clone(),
            credits_rate: donation.credits_rate,
            credits_granted: 0,
            created_at: now,
            updated_at: now,
            granted_at: None,
        };
        state.donations.insert(id, payment.clone());
        Ok(payment)
    }

    async fn get_donation(&self, gateway: Gateway, external_id: &str) -> Result<Option<DonationPayment>> {
        let state = self.state.lock().await;
        Ok(state
            .donations
            .values()
            .find(|d| d.gateway == gateway && d.external_id == external_id)
            .cloned())
    }

    async fn reconcile_donation(
        &self,
        gateway: Gateway,
        external_id: &str,
        status: PaymentStatus,
    ) -> Result<Reconciled> {
        let mut state = self.state.lock().await;
        let current = state
            .donations
            .values()
            .find(|d| d.gateway == gateway && d.external_id == external_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("payment", external_id))?;

        let Transition::Advance { status, grant } = plan_transition(&current, status) else {
            return Ok(Reconciled {
                payment: current,
                granted_now: 0,
                changed: false,
            });
        };

        let now = Utc::now();
        if grant > 0 {
            let balance = state.balance(&current.username);
            *balance = balance.apply(BalanceDelta::credits(grant))?;
        }
        let mut payment = current;
        payment.status = status;
        payment.updated_at = now;
        if grant > 0 {
            payment.credits_granted = grant;
            payment.granted_at = Some(now);
        }
        state.donations.insert(payment.id, payment.clone());

        Ok(Reconciled {
            payment,
            granted_now: grant,
            changed: true,
        })
    }

    async fn list_donations(&self, filter: &DonationFilter, page: PageRequest) -> Result<Page<DonationPayment>> {
        let state = self.state.lock().await;
        let rows: Vec<DonationPayment> = state
            .donations
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        Ok(newest_first(rows, page))
    }

    // =========================================================================
    // Vote Operations
    // =========================================================================

    async fn latest_vote_log(&self, username: &Username, site_id: SiteId) -> Result<Option<VoteLog>> {
        let state = self.state.lock().await;
        Ok(state.latest_vote_log(username, site_id).cloned())
    }

    async fn claim_vote(&self, username: &Username, site_id: SiteId, now: DateTime<Utc>) -> Result<VoteReceipt> {
        let mut state = self.state.lock().await;
        let site = state
            .vote_sites
            .get(&site_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("vote site", site_id))?;

        let planned = plan_claim(username, &site, state.latest_vote_log(username, site_id), now)?;

        let balance = state.balance(username);
        *balance = balance.apply(BalanceDelta::vote_points(planned.claimed_points))?;
        let balance = balance.clone();

        let log = VoteLog {
            id: state.next_id(),
            username: planned.username,
            site_id: planned.site_id,
            claimed_points: planned.claimed_points,
            claimed_at: planned.claimed_at,
            next_available_at: planned.next_available_at,
        };
        state.vote_logs.push(log.clone());

        Ok(VoteReceipt { log, balance, site })
    }

    async fn list_vote_logs(&self, filter: &VoteLogFilter, page: PageRequest) -> Result<Page<VoteLog>> {
        let state = self.state.lock().await;
        let rows: Vec<VoteLog> = state
            .vote_logs
            .iter()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect();
        Ok(newest_first(rows, page))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use realmshop_core::{validate_order, Cost, OrderLine, ShopError};

    fn user(name: &str) -> Username {
        name.parse().unwrap()
    }

    async fn seed_item(store: &MemoryStore, credits: i64, limit: Option<i64>) -> ShopItem {
        let category = store
            .create_category(&NewCategory {
                name: format!("Category {}", uuid::Uuid::new_v4()),
                description: None,
                position: 0,
            })
            .await
            .unwrap();
        store
            .create_item(&NewShopItem {
                category_id: category.id,
                name: "Swift Zhevra".into(),
                description: None,
                icon: None,
                world_entry: ItemEntry::new(37719),
                realm_id: None,
                price_credits: credits,
                price_vote_points: 0,
                limit_per_account: limit,
            })
            .await
            .unwrap()
    }

    async fn order(store: &MemoryStore, buyer: &Username, lines: &[(ItemId, i64)]) -> NewPurchase {
        let lines: Vec<OrderLine> = lines
            .iter()
            .map(|(item_id, quantity)| OrderLine {
                item_id: *item_id,
                quantity: *quantity,
            })
            .collect();
        let ids: Vec<ItemId> = lines.iter().map(|l| l.item_id).collect();
        let catalog = store.get_items(&ids).await.unwrap();
        NewPurchase {
            username: buyer.clone(),
            order: validate_order(&lines, &catalog, None).unwrap(),
            recipient: None,
        }
    }

    #[tokio::test]
    async fn balances_start_empty_and_never_go_negative() {
        let store = MemoryStore::new();
        let u = user("thrall");
        assert_eq!(store.get_balance(&u).await.unwrap().credits, 0);

        store.apply_delta(&u, BalanceDelta::credits(100)).await.unwrap();
        let err = store
            .apply_delta(&u, BalanceDelta::credits(-101))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(ShopError::InsufficientFunds { .. })));
        assert_eq!(store.get_balance(&u).await.unwrap().credits, 100);
    }

    #[tokio::test]
    async fn purchase_debits_and_enqueues_delivery() {
        let store = MemoryStore::new();
        let buyer = user("jaina");
        let item = seed_item(&store, 300, None).await;
        store.apply_delta(&buyer, BalanceDelta::credits(1000)).await.unwrap();

        let receipt = store
            .execute_purchase(order(&store, &buyer, &[(item.id, 2)]).await)
            .await
            .unwrap();
        assert_eq!(receipt.balance.credits, 400);
        assert_eq!(receipt.purchase.total, Cost { credits: 600, vote_points: 0 });

        let jobs = store.claim_delivery_jobs(10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].purchase_id, receipt.purchase.id);
        assert!(store.claim_delivery_jobs(10).await.unwrap().is_empty());

        store.complete_delivery_job(jobs[0].id).await.unwrap();
    }

    #[tokio::test]
    async fn one_open_job_per_purchase() {
        let store = MemoryStore::new();
        let buyer = user("anduin");
        let item = seed_item(&store, 10, None).await;
        store.apply_delta(&buyer, BalanceDelta::credits(100)).await.unwrap();
        let receipt = store
            .execute_purchase(order(&store, &buyer, &[(item.id, 1)]).await)
            .await
            .unwrap();
        let id = receipt.purchase.id;

        // A plain resend reuses the queued job.
        assert_eq!(store.enqueue_delivery(id, false).await.unwrap(), receipt.job_id);

        // A forced one is queued, but never claimed next to a job under lease.
        let forced = store.enqueue_delivery(id, true).await.unwrap();
        assert_ne!(forced, receipt.job_id);
        let jobs = store.claim_delivery_jobs(10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, receipt.job_id);
        assert!(store.claim_delivery_jobs(10).await.unwrap().is_empty());

        store.complete_delivery_job(receipt.job_id).await.unwrap();
        let jobs = store.claim_delivery_jobs(10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, forced);
    }

    #[tokio::test]
    async fn begin_delivery_has_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let buyer = user("tyrande");
        let item = seed_item(&store, 10, None).await;
        store.apply_delta(&buyer, BalanceDelta::credits(100)).await.unwrap();
        let id = store
            .execute_purchase(order(&store, &buyer, &[(item.id, 1)]).await)
            .await
            .unwrap()
            .purchase
            .id;

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.begin_delivery(id, false).await }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        // Still held, even when forced.
        assert!(store.begin_delivery(id, true).await.unwrap().is_none());

        store
            .record_delivery(id, &DeliveryRecord::new(DeliveryStatus::Sent, "ok"))
            .await
            .unwrap();
        assert!(store.begin_delivery(id, false).await.unwrap().is_none());
        let forced = store.begin_delivery(id, true).await.unwrap().unwrap();
        assert_eq!(forced.delivery_status, DeliveryStatus::Sending);
    }

    #[tokio::test]
    async fn insufficient_funds_leaves_no_trace() {
        let store = MemoryStore::new();
        let buyer = user("garrosh");
        let a = seed_item(&store, 300, None).await;
        let b = seed_item(&store, 300, None).await;
        store.apply_delta(&buyer, BalanceDelta::credits(500)).await.unwrap();

        let err = store
            .execute_purchase(order(&store, &buyer, &[(a.id, 1), (b.id, 1)]).await)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(ShopError::InsufficientFunds { .. })));
        assert_eq!(store.get_balance(&buyer).await.unwrap().credits, 500);
        let page = store
            .list_purchases(&PurchaseFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert!(store.claim_delivery_jobs(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn limit_is_rechecked_inside_the_lock() {
        let store = MemoryStore::new();
        let buyer = user("sylvanas");
        let item = seed_item(&store, 10, Some(1)).await;
        store.apply_delta(&buyer, BalanceDelta::credits(100)).await.unwrap();

        let first = order(&store, &buyer, &[(item.id, 1)]).await;
        let second = order(&store, &buyer, &[(item.id, 1)]).await;
        store.execute_purchase(first).await.unwrap();
        let err = store.execute_purchase(second).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(ShopError::LimitReached { .. })));
        assert_eq!(store.get_balance(&buyer).await.unwrap().credits, 90);
    }

    #[tokio::test]
    async fn concurrent_purchases_never_overdraw() {
        let store = Arc::new(MemoryStore::new());
        let buyer = user("anduin");
        let item = seed_item(&store, 300, None).await;
        store.apply_delta(&buyer, BalanceDelta::credits(1000)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let purchase = order(&store, &buyer, &[(item.id, 1)]).await;
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.execute_purchase(purchase).await }));
        }
        let results = futures::future::join_all(handles).await;
        let succeeded = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();

        assert_eq!(succeeded, 3);
        assert_eq!(store.get_balance(&buyer).await.unwrap().credits, 100);
    }

    #[tokio::test]
    async fn donation_grants_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let donor = user("donor");
        store
            .create_donation(&NewDonation {
                username: donor.clone(),
                gateway: Gateway::PayPal,
                external_id: "5O190127TN364715T".into(),
                status: PaymentStatus::Created,
                amount_cents: 1000,
                currency: "USD".into(),
                credits_rate: 100,
            })
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .reconcile_donation(Gateway::PayPal, "5O190127TN364715T", PaymentStatus::Completed)
                    .await
            }));
        }
        let results: Vec<Reconciled> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        assert_eq!(results.iter().filter(|r| r.granted_now > 0).count(), 1);
        assert!(results.iter().all(|r| r.payment.credits_granted == 1000));
        assert_eq!(store.get_balance(&donor).await.unwrap().credits, 1000);
    }

    #[tokio::test]
    async fn duplicate_external_ids_conflict() {
        let store = MemoryStore::new();
        let donation = NewDonation {
            username: user("donor"),
            gateway: Gateway::Bold,
            external_id: "donor-1".into(),
            status: PaymentStatus::Created,
            amount_cents: 100,
            currency: "COP".into(),
            credits_rate: 100,
        };
        store.create_donation(&donation).await.unwrap();
        assert!(matches!(
            store.create_donation(&donation).await,
            Err(StoreError::Conflict(_))
        ));
        let other_gateway = NewDonation {
            gateway: Gateway::PayPal,
            ..donation
        };
        assert!(store.create_donation(&other_gateway).await.is_ok());
    }

    #[tokio::test]
    async fn vote_cooldown_is_enforced() {
        let store = MemoryStore::new();
        let voter = user("voter");
        let site = store
            .create_vote_site(&NewVoteSite {
                name: "TopG".into(),
                url: "https://topg.example/vote".into(),
                image_url: None,
                cooldown_minutes: 60,
                points_reward: 2,
                position: 0,
            })
            .await
            .unwrap();

        let now = Utc::now();
        let receipt = store.claim_vote(&voter, site.id, now).await.unwrap();
        assert_eq!(receipt.balance.vote_points, 2);

        let err = store
            .claim_vote(&voter, site.id, now + Duration::minutes(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(ShopError::CooldownActive { .. })));

        let later = receipt.log.next_available_at;
        let again = store.claim_vote(&voter, site.id, later).await.unwrap();
        assert_eq!(again.balance.vote_points, 4);
        assert_eq!(again.log.next_available_at, later + Duration::minutes(60));
    }

    #[tokio::test]
    async fn listings_are_newest_first() {
        let store = MemoryStore::new();
        let buyer = user("buyer");
        let item = seed_item(&store, 0, None).await;
        for _ in 0..3 {
            store
                .execute_purchase(order(&store, &buyer, &[(item.id, 1)]).await)
                .await
                .unwrap();
        }
        let page = store
            .list_purchases(
                &PurchaseFilter {
                    username: Some(buyer),
                    delivery_status: None,
                },
                PageRequest { page: 1, page_size: 2 },
            )
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.items[0].id > page.items[1].id);
    }
}
