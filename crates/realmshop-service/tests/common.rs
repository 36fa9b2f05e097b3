//! Common test utilities for realmshop integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;

use realmshop_core::{
    BalanceDelta, Character, CharacterGuid, ItemEntry, NewCategory, NewShopItem, RealmChannel,
    RealmId, ShopItem, Username,
};
use realmshop_service::auth::SessionClaims;
use realmshop_service::{create_router, AppState, ServiceConfig};
use realmshop_store::{MemoryStore, Store};

/// Shared secret used to mint test sessions.
pub const JWT_SECRET: &str = "test-jwt-secret";

/// The default buyer.
pub const USER: &str = "alice";

/// An admin account.
pub const ADMIN: &str = "gm";

/// Realm used by most tests.
pub const REALM: RealmId = RealmId::new(1);

/// The buyer's character on [`REALM`].
pub const CHARACTER_GUID: CharacterGuid = CharacterGuid::new(7);

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the server.
    pub store: Arc<MemoryStore>,
    /// A clone of the server's state, sharing its store and dispatcher.
    pub state: AppState,
}

impl TestHarness {
    /// Create a harness with no gateways or remote channel configured.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a harness, adjusting the default test config first.
    pub fn with_config(adjust: impl FnOnce(&mut ServiceConfig)) -> Self {
        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            jwt_secret: Some(JWT_SECRET.into()),
            ..ServiceConfig::default()
        };
        adjust(&mut config);

        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(store.clone(), config);
        let router: Router = create_router(state.clone());

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            state,
        }
    }

    /// Authorization header for the default buyer.
    pub fn user_auth_header(&self) -> String {
        auth_header(USER, 1)
    }

    /// Authorization header for another, unrelated account.
    pub fn other_user_auth_header(&self) -> String {
        auth_header("bob", 1)
    }

    /// Authorization header for an admin.
    pub fn admin_auth_header(&self) -> String {
        auth_header(ADMIN, self.state.config.admin_role_level)
    }

    /// Grant credits and vote points to an account.
    pub async fn fund(&self, username: &str, credits: i64, vote_points: i64) {
        self.store
            .apply_delta(&username.parse().unwrap(), BalanceDelta { credits, vote_points })
            .await
            .expect("Failed to fund account");
    }

    /// Current balance as `(credits, vote_points)`.
    pub async fn balance(&self, username: &str) -> (i64, i64) {
        let balance = self
            .store
            .get_balance(&username.parse().unwrap())
            .await
            .unwrap();
        (balance.credits, balance.vote_points)
    }

    /// Create an item in a fresh category.
    ///
    /// `overrides` is merged over a default unscoped item priced at 100 credits.
    pub async fn seed_item(&self, overrides: serde_json::Value) -> ShopItem {
        let name = format!("Mounts {}", uuid::Uuid::new_v4().simple());
        let category: NewCategory = serde_json::from_value(json!({ "name": name })).unwrap();
        let category = self.store.create_category(&category).await.unwrap();

        let mut item = json!({
            "category_id": category.id,
            "name": "Swift Gryphon",
            "world_entry": 9001,
            "price_credits": 100,
        });
        if let (Some(base), Some(extra)) = (item.as_object_mut(), overrides.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        let item: NewShopItem = serde_json::from_value(item).unwrap();
        self.store.create_item(&item).await.unwrap()
    }

    /// Give the default buyer a character on [`REALM`].
    pub async fn seed_character(&self) -> Character {
        let character = Character {
            guid: CHARACTER_GUID,
            name: "Jaina".into(),
            username: USER.parse::<Username>().unwrap(),
            realm_id: Some(REALM),
        };
        self.store.put_character(&character).await.unwrap();
        character
    }

    /// Point [`REALM`] at a remote command endpoint.
    pub async fn seed_channel(&self, endpoint: &str, enabled: bool) {
        self.store
            .put_realm_channel(&RealmChannel {
                realm_id: REALM,
                enabled,
                endpoint: endpoint.into(),
                user: Some("soap".into()),
                password: Some("secret".into()),
                timeout_seconds: 5,
            })
            .await
            .unwrap();
    }

    /// Set the maximum stack size of a world item.
    pub async fn seed_stack_size(&self, entry: i64, max_stack: i64) {
        self.store
            .put_stack_size(ItemEntry::new(entry), max_stack)
            .await
            .unwrap();
    }

    /// Run one delivery worker pass.
    pub async fn run_deliveries(&self) -> usize {
        self.state
            .delivery
            .run_pending()
            .await
            .expect("Delivery pass failed")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Mint a session token.
pub fn auth_header(username: &str, role: i32) -> String {
    let claims = SessionClaims {
        sub: username.into(),
        username: Some(username.into()),
        role: Some(role),
        exp: chrono::Utc::now().timestamp() + 3600,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("Failed to sign token");
    format!("Bearer {token}")
}

/// A SOAP success response.
pub fn soap_ok(result: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/" xmlns:ns1="urn:AC"><SOAP-ENV:Body><ns1:executeCommandResponse><result>{result}</result></ns1:executeCommandResponse></SOAP-ENV:Body></SOAP-ENV:Envelope>"#
    )
}
