//! Catalog handlers: categories, items, stack sizes, realm channels, characters.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use realmshop_core::{
    Category, Character, ItemEntry, ItemFilter, ItemId, NewCategory, NewShopItem, RealmChannel,
    RealmId, ShopItem, ShopItemUpdate,
};

use crate::auth::{AdminUser, AuthUser};
use crate::error::ApiError;
use crate::state::AppState;

/// List categories.
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Category>>, ApiError> {
    Ok(Json(state.store.list_categories().await?))
}

/// Create a category (admin).
pub async fn create_category(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(req): Json<NewCategory>,
) -> Result<(StatusCode, Json<Category>), ApiError> {
    req.validate()?;
    let category = state.store.create_category(&req).await?;
    tracing::info!(category_id = %category.id, slug = %category.slug, admin = %admin.username, "Category created");
    Ok((StatusCode::CREATED, Json(category)))
}

/// List enabled items, optionally by category and realm.
pub async fn list_items(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ItemFilter>,
) -> Result<Json<Vec<ShopItem>>, ApiError> {
    Ok(Json(state.store.list_items(&filter).await?))
}

/// Create an item (admin).
pub async fn create_item(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(req): Json<NewShopItem>,
) -> Result<(StatusCode, Json<ShopItem>), ApiError> {
    req.validate()?;
    let item = state.store.create_item(&req).await?;
    tracing::info!(item_id = %item.id, world_entry = %item.world_entry, admin = %admin.username, "Item created");
    Ok((StatusCode::CREATED, Json(item)))
}

/// Update an item (admin).
pub async fn update_item(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(item_id): Path<ItemId>,
    Json(req): Json<ShopItemUpdate>,
) -> Result<Json<ShopItem>, ApiError> {
    req.validate()?;
    let item = state.store.update_item(item_id, &req).await?;
    tracing::info!(item_id = %item_id, enabled = item.enabled, admin = %admin.username, "Item updated");
    Ok(Json(item))
}

/// Stack size request.
#[derive(Debug, Deserialize)]
pub struct StackSizeRequest {
    /// World item reference.
    pub world_entry: ItemEntry,
    /// Maximum units per stack (at least one).
    pub max_stack: i64,
}

/// Stack size response.
#[derive(Debug, Serialize)]
pub struct StackSizeResponse {
    /// World item reference.
    pub world_entry: ItemEntry,
    /// Maximum units per stack.
    pub max_stack: i64,
}

/// Set the maximum stack size of a world item (admin).
pub async fn put_stack_size(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Json(req): Json<StackSizeRequest>,
) -> Result<Json<StackSizeResponse>, ApiError> {
    if req.max_stack < 1 {
        return Err(ApiError::BadRequest("max_stack must be at least 1".into()));
    }
    state.store.put_stack_size(req.world_entry, req.max_stack).await?;
    Ok(Json(StackSizeResponse {
        world_entry: req.world_entry,
        max_stack: req.max_stack,
    }))
}

/// Remote channel settings for a realm.
#[derive(Debug, Deserialize)]
pub struct RealmChannelRequest {
    /// Whether deliveries may use the channel.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// SOAP endpoint URL.
    pub endpoint: String,
    /// Basic auth user.
    #[serde(default)]
    pub user: Option<String>,
    /// Basic auth password.
    #[serde(default)]
    pub password: Option<String>,
    /// Per-call timeout.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

/// Remote channel response; the password is never echoed.
#[derive(Debug, Serialize)]
pub struct RealmChannelResponse {
    /// Realm.
    pub realm_id: RealmId,
    /// Whether deliveries may use the channel.
    pub enabled: bool,
    /// SOAP endpoint URL.
    pub endpoint: String,
    /// Per-call timeout.
    pub timeout_seconds: u64,
}

/// Store a realm's remote channel settings (admin).
pub async fn put_realm_channel(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(realm_id): Path<RealmId>,
    Json(req): Json<RealmChannelRequest>,
) -> Result<Json<RealmChannelResponse>, ApiError> {
    let endpoint = req.endpoint.trim();
    if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
        return Err(ApiError::BadRequest("endpoint must be an http(s) URL".into()));
    }

    let channel = RealmChannel {
        realm_id,
        enabled: req.enabled,
        endpoint: endpoint.to_string(),
        user: req.user,
        password: req.password,
        timeout_seconds: req
            .timeout_seconds
            .unwrap_or(state.config.delivery.soap_timeout_seconds),
    };
    state.store.put_realm_channel(&channel).await?;
    tracing::info!(realm_id = %realm_id, enabled = channel.enabled, admin = %admin.username, "Realm channel updated");

    Ok(Json(RealmChannelResponse {
        realm_id,
        enabled: channel.enabled,
        endpoint: channel.endpoint,
        timeout_seconds: channel.timeout_seconds,
    }))
}

/// The caller's characters on a realm.
pub async fn list_characters(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(realm_id): Path<RealmId>,
) -> Result<Json<Vec<Character>>, ApiError> {
    let characters = state
        .store
        .list_characters(&user.username)
        .await?
        .into_iter()
        .filter(|c| c.realm_id.map_or(true, |r| r == realm_id))
        .collect();
    Ok(Json(characters))
}
