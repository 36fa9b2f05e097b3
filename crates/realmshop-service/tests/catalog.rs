//! Catalog, realm channel and health integration tests.

mod common;

use common::{TestHarness, REALM};
use serde_json::json;

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn health_reports_integrations() {
    let harness = TestHarness::new();

    let response = harness.server.get("/health").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], true);
    assert_eq!(body["paypal"], false);
    assert_eq!(body["bold"], false);
}

// ============================================================================
// Categories and items
// ============================================================================

#[tokio::test]
async fn admin_builds_catalog() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/shop/categories")
        .add_header("authorization", harness.admin_auth_header())
        .json(&json!({ "name": "Flying Mounts" }))
        .await;
    response.assert_status(axum::http::StatusCode::CREATED);
    let category: serde_json::Value = response.json();
    assert_eq!(category["slug"], "flying-mounts");

    harness
        .server
        .post("/v1/shop/categories")
        .add_header("authorization", harness.admin_auth_header())
        .json(&json!({ "name": "Flying  Mounts" }))
        .await
        .assert_status(axum::http::StatusCode::CONFLICT);

    let response = harness
        .server
        .post("/v1/shop/items")
        .add_header("authorization", harness.admin_auth_header())
        .json(&json!({
            "category_id": category["id"],
            "name": "Swift Gryphon",
            "world_entry": 9001,
            "realm_id": 2,
            "price_credits": 250,
        }))
        .await;
    response.assert_status(axum::http::StatusCode::CREATED);
    let item: serde_json::Value = response.json();
    let item_id = item["id"].as_i64().unwrap();

    harness
        .server
        .post("/v1/shop/items")
        .add_header("authorization", harness.admin_auth_header())
        .json(&json!({
            "category_id": category["id"],
            "name": "Broken",
            "world_entry": 1,
            "price_credits": -1,
        }))
        .await
        .assert_status_bad_request();

    let response = harness.server.get("/v1/shop/items?realm_id=2").await;
    let body: serde_json::Value = response.json();
    assert_eq!(body.as_array().unwrap().len(), 1);

    let response = harness.server.get("/v1/shop/items?realm_id=1").await;
    let body: serde_json::Value = response.json();
    assert!(body.as_array().unwrap().is_empty());

    harness
        .server
        .put(&format!("/v1/shop/items/{item_id}"))
        .add_header("authorization", harness.admin_auth_header())
        .json(&json!({ "enabled": false }))
        .await
        .assert_status_ok();

    let response = harness.server.get("/v1/shop/items").await;
    let body: serde_json::Value = response.json();
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn catalog_writes_require_admin() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/shop/categories")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "name": "Pets" }))
        .await
        .assert_status_forbidden();

    harness
        .server
        .put("/v1/shop/stack-sizes")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "world_entry": 1, "max_stack": 20 }))
        .await
        .assert_status_forbidden();
}

// ============================================================================
// Realms
// ============================================================================

#[tokio::test]
async fn realm_channel_never_echoes_password() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .put(&format!("/v1/shop/realms/{REALM}/channel"))
        .add_header("authorization", harness.admin_auth_header())
        .json(&json!({
            "endpoint": "http://127.0.0.1:7878/",
            "user": "soap",
            "password": "hunter2",
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["enabled"], true);
    assert!(body.get("password").is_none());

    harness
        .server
        .put(&format!("/v1/shop/realms/{REALM}/channel"))
        .add_header("authorization", harness.admin_auth_header())
        .json(&json!({ "endpoint": "ftp://nope" }))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn characters_are_listed_per_realm() {
    let harness = TestHarness::new();
    harness.seed_character().await;

    let response = harness
        .server
        .get(&format!("/v1/shop/realms/{REALM}/characters"))
        .add_header("authorization", harness.user_auth_header())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body[0]["name"], "Jaina");

    let response = harness
        .server
        .get("/v1/shop/realms/2/characters")
        .add_header("authorization", harness.user_auth_header())
        .await;
    let body: serde_json::Value = response.json();
    assert!(body.as_array().unwrap().is_empty());
}
