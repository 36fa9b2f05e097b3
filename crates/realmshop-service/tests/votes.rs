//! Vote reward integration tests.

mod common;

use common::{TestHarness, USER};
use serde_json::json;

/// Create a vote site through the admin API and return its id.
async fn create_site(harness: &TestHarness, reward: i64) -> i64 {
    let response = harness
        .server
        .post("/v1/vote/sites")
        .add_header("authorization", harness.admin_auth_header())
        .json(&json!({
            "name": "TopG",
            "url": "https://topg.example/vote/42",
            "cooldown_minutes": 720,
            "points_reward": reward,
        }))
        .await;
    response.assert_status(axum::http::StatusCode::CREATED);
    let body: serde_json::Value = response.json();
    body["id"].as_i64().unwrap()
}

// ============================================================================
// Sites
// ============================================================================

#[tokio::test]
async fn site_admin_lifecycle() {
    let harness = TestHarness::new();
    let site_id = create_site(&harness, 2).await;

    let response = harness.server.get("/v1/vote/sites").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body.as_array().unwrap().len(), 1);

    let response = harness
        .server
        .put(&format!("/v1/vote/sites/{site_id}"))
        .add_header("authorization", harness.admin_auth_header())
        .json(&json!({ "enabled": false }))
        .await;
    response.assert_status_ok();

    let response = harness.server.get("/v1/vote/sites").await;
    let body: serde_json::Value = response.json();
    assert!(body.as_array().unwrap().is_empty());

    harness
        .server
        .delete(&format!("/v1/vote/sites/{site_id}"))
        .add_header("authorization", harness.admin_auth_header())
        .await
        .assert_status(axum::http::StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn site_validation_and_permissions() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/vote/sites")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "name": "TopG", "url": "https://topg.example" }))
        .await
        .assert_status_forbidden();

    harness
        .server
        .post("/v1/vote/sites")
        .add_header("authorization", harness.admin_auth_header())
        .json(&json!({ "name": "TopG", "url": "https://topg.example", "cooldown_minutes": 0 }))
        .await
        .assert_status_bad_request();

    harness
        .server
        .post("/v1/vote/sites")
        .add_header("authorization", harness.admin_auth_header())
        .json(&json!({
            "name": "TopG",
            "url": "https://topg.example",
            "cooldown_minutes": 1_000_000_000_000_i64,
        }))
        .await
        .assert_status_bad_request();
}

// ============================================================================
// Claims
// ============================================================================

#[tokio::test]
async fn claim_grants_points_then_cools_down() {
    let harness = TestHarness::new();
    let site_id = create_site(&harness, 2).await;
    let claim_path = format!("/v1/vote/sites/{site_id}/claim");

    let response = harness
        .server
        .post(&claim_path)
        .add_header("authorization", harness.user_auth_header())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["ok"], true);
    assert_eq!(body["site_id"], site_id);
    assert_eq!(body["reward"], 2);
    assert_eq!(body["total_vote_points"], 2);
    assert_eq!(body["site_url"], "https://topg.example/vote/42");

    let response = harness
        .server
        .post(&format!("/v1/vote/sites/{site_id}/click"))
        .add_header("authorization", harness.user_auth_header())
        .await;
    response.assert_status(axum::http::StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "cooldown_active");
    assert!(body["error"]["details"]["next_available_at"].is_string());

    assert_eq!(harness.balance(USER).await, (0, 2));

    // Cooldowns are per account.
    harness
        .server
        .post(&claim_path)
        .add_header("authorization", harness.other_user_auth_header())
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn concurrent_claims_grant_once() {
    let harness = TestHarness::new();
    let site_id = create_site(&harness, 1).await;

    let h = &harness;
    let claim = move || async move {
        h.server
            .post(&format!("/v1/vote/sites/{site_id}/claim"))
            .add_header("authorization", h.user_auth_header())
            .await
    };
    let (a, b, c) = tokio::join!(claim(), claim(), claim());

    let ok = [a.status_code(), b.status_code(), c.status_code()]
        .iter()
        .filter(|s| s.is_success())
        .count();
    assert_eq!(ok, 1);
    assert_eq!(harness.balance(USER).await, (0, 1));
}

#[tokio::test]
async fn unknown_site_is_not_found() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/vote/sites/404/claim")
        .add_header("authorization", harness.user_auth_header())
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn redirect_works_during_cooldown() {
    let harness = TestHarness::new();
    let site_id = create_site(&harness, 3).await;
    let path = format!("/v1/vote/sites/{site_id}/redirect");

    for _ in 0..2 {
        let response = harness
            .server
            .get(&path)
            .add_header("authorization", harness.user_auth_header())
            .await;
        response.assert_status(axum::http::StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.header("location"), "https://topg.example/vote/42");
    }

    // Only the first visit was rewarded.
    assert_eq!(harness.balance(USER).await, (0, 3));
}

// ============================================================================
// Logs
// ============================================================================

#[tokio::test]
async fn vote_logs_are_per_account() {
    let harness = TestHarness::new();
    let first = create_site(&harness, 1).await;
    let second = create_site(&harness, 1).await;

    for site_id in [first, second] {
        harness
            .server
            .post(&format!("/v1/vote/sites/{site_id}/claim"))
            .add_header("authorization", harness.user_auth_header())
            .await
            .assert_status_ok();
    }

    let response = harness
        .server
        .get("/v1/vote/logs")
        .add_header("authorization", harness.user_auth_header())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["items"].as_array().unwrap().len(), 2);

    let response = harness
        .server
        .get(&format!("/v1/vote/logs?site_id={second}"))
        .add_header("authorization", harness.user_auth_header())
        .await;
    let body: serde_json::Value = response.json();
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["site_id"], second);

    let response = harness
        .server
        .get("/v1/vote/logs")
        .add_header("authorization", harness.other_user_auth_header())
        .await;
    let body: serde_json::Value = response.json();
    assert!(body["items"].as_array().unwrap().is_empty());
}
