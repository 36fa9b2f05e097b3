//! Delivery integration tests against a mocked SOAP command endpoint.

mod common;

use common::{soap_ok, TestHarness, CHARACTER_GUID, REALM, USER};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header_exists, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Buy `quantity` of a fresh item for the default character; returns the purchase id.
async fn buy(harness: &TestHarness, quantity: i64) -> i64 {
    harness.fund(USER, 10_000, 0).await;
    let item = harness.seed_item(json!({ "price_credits": 1 })).await;

    let response = harness
        .server
        .post("/v1/shop/purchase")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({
            "item_id": item.id,
            "quantity": quantity,
            "realm_id": REALM,
            "character_guid": CHARACTER_GUID,
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    body["purchase"]["id"].as_i64().unwrap()
}

async fn fetch(harness: &TestHarness, purchase_id: i64) -> serde_json::Value {
    let response = harness
        .server
        .get(&format!("/v1/shop/purchases/{purchase_id}"))
        .add_header("authorization", harness.user_auth_header())
        .await;
    response.assert_status_ok();
    response.json()
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test]
async fn delivery_packs_stacks_into_one_command() {
    let soap = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header_exists("authorization"))
        .and(body_string_contains("send items Jaina"))
        .and(body_string_contains("9001:20 9001:10"))
        .respond_with(ResponseTemplate::new(200).set_body_string(soap_ok("Mail sent to Jaina")))
        .expect(1)
        .mount(&soap)
        .await;

    let harness = TestHarness::new();
    harness.seed_character().await;
    harness.seed_channel(&soap.uri(), true).await;
    harness.seed_stack_size(9001, 20).await;

    let purchase_id = buy(&harness, 30).await;
    assert_eq!(harness.run_deliveries().await, 1);

    let purchase = fetch(&harness, purchase_id).await;
    assert_eq!(purchase["delivery_status"], "sent");
    assert_eq!(purchase["delivery_diagnostic"], "Mail sent to Jaina");

    // The outbox job is done.
    assert_eq!(harness.run_deliveries().await, 0);
}

#[tokio::test]
async fn many_stacks_are_split_into_batches() {
    let soap = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(soap_ok("ok")))
        .expect(2)
        .mount(&soap)
        .await;

    let harness = TestHarness::new();
    harness.seed_character().await;
    harness.seed_channel(&soap.uri(), true).await;

    // No stack size known: one unit per stack, 13 stacks, two commands.
    let purchase_id = buy(&harness, 13).await;
    harness.run_deliveries().await;

    let purchase = fetch(&harness, purchase_id).await;
    assert_eq!(purchase["delivery_status"], "sent");
    assert_eq!(purchase["delivery_diagnostic"], "ok\n---\nok");
}

#[tokio::test]
async fn channel_error_marks_purchase_failed() {
    let soap = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&soap)
        .await;

    let harness = TestHarness::new();
    harness.seed_character().await;
    harness.seed_channel(&soap.uri(), true).await;

    let purchase_id = buy(&harness, 1).await;
    harness.run_deliveries().await;

    let purchase = fetch(&harness, purchase_id).await;
    assert_eq!(purchase["delivery_status"], "failed");
    assert!(purchase["delivery_diagnostic"]
        .as_str()
        .unwrap()
        .starts_with("Error: status 500"));

    // The debit stands.
    assert_eq!(harness.balance(USER).await, (9_999, 0));
}

#[tokio::test]
async fn soap_fault_marks_purchase_failed() {
    let soap = MockServer::start().await;
    let fault = r#"<?xml version="1.0"?><SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/"><SOAP-ENV:Body><SOAP-ENV:Fault><faultcode>SOAP-ENV:Client</faultcode><faultstring>Player not found</faultstring></SOAP-ENV:Fault></SOAP-ENV:Body></SOAP-ENV:Envelope>"#;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(fault))
        .mount(&soap)
        .await;

    let harness = TestHarness::new();
    harness.seed_character().await;
    harness.seed_channel(&soap.uri(), true).await;

    let purchase_id = buy(&harness, 1).await;
    harness.run_deliveries().await;

    let purchase = fetch(&harness, purchase_id).await;
    assert_eq!(purchase["delivery_status"], "failed");
    assert_eq!(purchase["delivery_diagnostic"], "Error: SOAP fault: Player not found");
}

#[tokio::test]
async fn env_channel_is_used_when_realm_has_none() {
    let soap = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(soap_ok("done")))
        .expect(1)
        .mount(&soap)
        .await;

    let uri = soap.uri();
    let harness = TestHarness::with_config(|config| {
        config.delivery.soap_endpoint = Some(uri);
    });
    harness.seed_character().await;

    let purchase_id = buy(&harness, 1).await;
    harness.run_deliveries().await;

    assert_eq!(fetch(&harness, purchase_id).await["delivery_status"], "sent");
}

// ============================================================================
// Pending
// ============================================================================

#[tokio::test]
async fn disabled_channel_leaves_purchase_pending() {
    let soap = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(soap_ok("ok")))
        .expect(0)
        .mount(&soap)
        .await;

    let harness = TestHarness::new();
    harness.seed_character().await;
    harness.seed_channel(&soap.uri(), false).await;

    let purchase_id = buy(&harness, 1).await;
    harness.run_deliveries().await;

    let purchase = fetch(&harness, purchase_id).await;
    assert_eq!(purchase["delivery_status"], "pending");
    assert!(purchase["delivery_diagnostic"].as_str().is_some());
}

#[tokio::test]
async fn resend_with_recipient_delivers_pending_purchase() {
    let soap = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(soap_ok("ok")))
        .mount(&soap)
        .await;

    let harness = TestHarness::new();
    harness.seed_character().await;
    harness.seed_channel(&soap.uri(), true).await;
    harness.fund(USER, 100, 0).await;
    let item = harness.seed_item(json!({ "realm_id": 1 })).await;

    let response = harness
        .server
        .post("/v1/shop/purchase")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "item_id": item.id }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let purchase_id = body["purchase"]["id"].as_i64().unwrap();

    harness.run_deliveries().await;
    assert_eq!(fetch(&harness, purchase_id).await["delivery_status"], "pending");

    let response = harness
        .server
        .post(&format!("/v1/shop/purchases/{purchase_id}/resend"))
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "character_name": "Jaina" }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["queued"], true);
    assert_eq!(body["forced"], false);

    harness.run_deliveries().await;
    let purchase = fetch(&harness, purchase_id).await;
    assert_eq!(purchase["delivery_status"], "sent");
    assert_eq!(purchase["recipient"]["name"], "Jaina");
}

#[tokio::test]
async fn resend_of_sent_purchase_needs_force() {
    let soap = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(soap_ok("ok")))
        .expect(2)
        .mount(&soap)
        .await;

    let harness = TestHarness::new();
    harness.seed_character().await;
    harness.seed_channel(&soap.uri(), true).await;

    let purchase_id = buy(&harness, 1).await;
    harness.run_deliveries().await;
    let path = format!("/v1/shop/purchases/{purchase_id}/resend");

    let response = harness
        .server
        .post(&path)
        .add_header("authorization", harness.user_auth_header())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["already_sent"], true);
    assert_eq!(harness.run_deliveries().await, 0);

    let response = harness
        .server
        .post(&format!("{path}?force=true"))
        .add_header("authorization", harness.user_auth_header())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["queued"], true);
    assert_eq!(body["forced"], true);
    assert_eq!(harness.run_deliveries().await, 1);
}

#[tokio::test]
async fn resend_of_queued_purchase_delivers_once() {
    let soap = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(soap_ok("ok")))
        .expect(1)
        .mount(&soap)
        .await;

    let harness = TestHarness::new();
    harness.seed_character().await;
    harness.seed_channel(&soap.uri(), true).await;

    let purchase_id = buy(&harness, 1).await;
    for _ in 0..2 {
        harness
            .server
            .post(&format!("/v1/shop/purchases/{purchase_id}/resend"))
            .add_header("authorization", harness.user_auth_header())
            .await
            .assert_status_ok();
    }

    // The resends reuse the job queued with the purchase.
    assert_eq!(harness.run_deliveries().await, 1);
    assert_eq!(harness.run_deliveries().await, 0);
    assert_eq!(fetch(&harness, purchase_id).await["delivery_status"], "sent");
}
