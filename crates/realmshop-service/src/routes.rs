//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{balances, catalog, donations, health, purchases, votes, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `GET /v1/shop/categories`, `GET /v1/shop/items` - Catalog
/// - `GET /v1/vote/sites` - Enabled vote sites
///
/// ## Shop (JWT auth)
/// - `GET /v1/shop/balance` - Current balance
/// - `POST /v1/shop/purchase` - Buy items
/// - `GET /v1/shop/purchases`, `GET /v1/shop/purchases/:purchase_id` - Purchase history
/// - `POST /v1/shop/purchases/:purchase_id/resend` - Re-queue delivery
/// - `GET /v1/shop/realms/:realm_id/characters` - Recipients on a realm
///
/// ## Donations (JWT auth)
/// - `POST /v1/donations/paypal/order`, `POST /v1/donations/paypal/capture`
/// - `POST /v1/donations/bold/create`, `POST /v1/donations/bold/hash`
/// - `POST /v1/donations/bold/:order_id/sync`
/// - `GET /v1/donations/mine`
///
/// ## Votes (JWT auth)
/// - `POST /v1/vote/sites/:site_id/claim`, `POST /v1/vote/sites/:site_id/click`
/// - `GET /v1/vote/sites/:site_id/redirect`
/// - `GET /v1/vote/logs`
///
/// ## Admin (JWT auth, admin role)
/// - `POST /v1/shop/categories`, `POST /v1/shop/items`, `PUT /v1/shop/items/:item_id`
/// - `PUT /v1/shop/stack-sizes`, `PUT /v1/shop/realms/:realm_id/channel`
/// - `POST /v1/shop/balance/adjust`
/// - `GET /v1/donations/admin`
/// - `POST /v1/vote/sites`, `PUT|DELETE /v1/vote/sites/:site_id`
///
/// ## Webhooks (Signature verification)
/// - `POST /webhooks/paypal` - PayPal webhooks
/// - `POST /webhooks/bold` - Bold webhooks
pub fn create_router(state: AppState) -> Router {
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let shop_routes = Router::new()
        .route(
            "/categories",
            get(catalog::list_categories).post(catalog::create_category),
        )
        .route("/items", get(catalog::list_items).post(catalog::create_item))
        .route("/items/:item_id", put(catalog::update_item))
        .route("/stack-sizes", put(catalog::put_stack_size))
        .route("/realms/:realm_id/channel", put(catalog::put_realm_channel))
        .route("/realms/:realm_id/characters", get(catalog::list_characters))
        .route("/balance", get(balances::get_balance))
        .route("/balance/adjust", post(balances::adjust_balance))
        .route("/purchase", post(purchases::purchase))
        .route("/purchases", get(purchases::list_purchases))
        .route("/purchases/:purchase_id", get(purchases::get_purchase))
        .route("/purchases/:purchase_id/resend", post(purchases::resend));

    let donation_routes = Router::new()
        .route("/paypal/order", post(donations::create_paypal_order))
        .route("/paypal/capture", post(donations::capture_paypal_order))
        .route("/bold/create", post(donations::bold_create))
        .route("/bold/hash", post(donations::bold_hash))
        .route("/bold/:order_id/sync", post(donations::bold_sync))
        .route("/mine", get(donations::list_my_donations))
        .route("/admin", get(donations::list_all_donations));

    let vote_routes = Router::new()
        .route("/sites", get(votes::list_sites).post(votes::create_site))
        .route(
            "/sites/:site_id",
            put(votes::update_site).delete(votes::delete_site),
        )
        .route("/sites/:site_id/claim", post(votes::claim))
        // Same as claim; kept for clients that post a click from the site list.
        .route("/sites/:site_id/click", post(votes::claim))
        .route("/sites/:site_id/redirect", get(votes::redirect))
        .route("/logs", get(votes::list_logs));

    let api_routes = Router::new()
        .nest("/shop", shop_routes)
        .nest("/donations", donation_routes)
        .nest("/vote", vote_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - controlled by the gateways)
        .route("/webhooks/paypal", post(webhooks::paypal_webhook))
        .route("/webhooks/bold", post(webhooks::bold_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
