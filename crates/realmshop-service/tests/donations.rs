//! Donation integration tests with PayPal and Bold mocked by wiremock.

mod common;

use common::{TestHarness, USER};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use realmshop_service::crypto::{hmac_sha256_hex, sha256_hex};

const ORDER_ID: &str = "5O190127TN364715T";

/// A PayPal sandbox stand-in that issues tokens and creates `ORDER_ID`.
async fn paypal_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "A21AAF",
            "token_type": "Bearer",
            "expires_in": 32400,
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders"))
        .and(body_string_contains("\"reference_id\":\"alice\""))
        .and(body_string_contains("\"value\":\"10.00\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": ORDER_ID,
            "status": "CREATED",
            "links": [
                { "href": format!("https://www.sandbox.paypal.com/checkoutnow?token={ORDER_ID}"), "rel": "approve" },
            ],
        })))
        .mount(&server)
        .await;
    server
}

fn paypal_harness(server: &MockServer) -> TestHarness {
    let uri = server.uri();
    TestHarness::with_config(|config| {
        config.paypal.client_id = Some("client".into());
        config.paypal.client_secret = Some("secret".into());
        config.paypal.api_base = uri;
    })
}

async fn create_paypal_order(harness: &TestHarness) {
    let response = harness
        .server
        .post("/v1/donations/paypal/order")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "amount": "10.00", "currency": "usd" }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["order_id"], ORDER_ID);
    assert_eq!(body["status"], "created");
    assert!(body["approve_link"].as_str().unwrap().contains(ORDER_ID));
}

// ============================================================================
// PayPal
// ============================================================================

#[tokio::test]
async fn paypal_capture_grants_credits_once() {
    let server = paypal_server().await;
    Mock::given(method("POST"))
        .and(path(format!("/v2/checkout/orders/{ORDER_ID}/capture")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": ORDER_ID,
            "status": "COMPLETED",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let harness = paypal_harness(&server);
    create_paypal_order(&harness).await;

    let capture = || {
        harness
            .server
            .post("/v1/donations/paypal/capture")
            .add_header("authorization", harness.user_auth_header())
            .json(&json!({ "order_id": ORDER_ID }))
    };

    let response = capture().await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["amount"], "10.00");
    assert_eq!(body["credits_granted"], 1000);
    assert_eq!(body["granted_now"], 1000);

    // Completed payments short-circuit without calling PayPal again.
    let response = capture().await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["granted_now"], 0);

    assert_eq!(harness.balance(USER).await, (1000, 0));
}

#[tokio::test]
async fn paypal_capture_falls_back_to_order_query() {
    let server = paypal_server().await;
    Mock::given(method("POST"))
        .and(path(format!("/v2/checkout/orders/{ORDER_ID}/capture")))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "name": "UNPROCESSABLE_ENTITY",
            "message": "ORDER_ALREADY_CAPTURED",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/checkout/orders/{ORDER_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": ORDER_ID,
            "status": "COMPLETED",
        })))
        .mount(&server)
        .await;

    let harness = paypal_harness(&server);
    create_paypal_order(&harness).await;

    let response = harness
        .server
        .post("/v1/donations/paypal/capture")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "order_id": ORDER_ID }))
        .await;
    response.assert_status_ok();
    assert_eq!(harness.balance(USER).await, (1000, 0));
}

#[tokio::test]
async fn paypal_capture_is_owner_only() {
    let server = paypal_server().await;
    let harness = paypal_harness(&server);
    create_paypal_order(&harness).await;

    harness
        .server
        .post("/v1/donations/paypal/capture")
        .add_header("authorization", harness.other_user_auth_header())
        .json(&json!({ "order_id": ORDER_ID }))
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn paypal_webhook_and_capture_race_grants_once() {
    let server = paypal_server().await;
    Mock::given(method("POST"))
        .and(path(format!("/v2/checkout/orders/{ORDER_ID}/capture")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": ORDER_ID,
            "status": "COMPLETED",
        })))
        .mount(&server)
        .await;

    let harness = paypal_harness(&server);
    create_paypal_order(&harness).await;

    let webhook = json!({
        "id": "WH-1",
        "event_type": "PAYMENT.CAPTURE.COMPLETED",
        "resource": {
            "id": "CAPTURE-1",
            "status": "COMPLETED",
            "supplementary_data": { "related_ids": { "order_id": ORDER_ID } },
        },
    });

    let capture = async {
        harness
            .server
            .post("/v1/donations/paypal/capture")
            .add_header("authorization", harness.user_auth_header())
            .json(&json!({ "order_id": ORDER_ID }))
            .await
    };
    let h = &harness;
    let deliver = move |body: serde_json::Value| async move {
        h.server.post("/webhooks/paypal").json(&body).await
    };
    let (a, b, c) = tokio::join!(capture, deliver(webhook.clone()), deliver(webhook.clone()));

    a.assert_status_ok();
    b.assert_status_ok();
    c.assert_status_ok();
    assert_eq!(harness.balance(USER).await, (1000, 0));

    // A late duplicate still reports the original grant.
    let response = deliver(webhook).await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["granted"], 0);
    assert_eq!(body["credits_granted"], 1000);
    assert_eq!(harness.balance(USER).await, (1000, 0));
}

#[tokio::test]
async fn paypal_webhook_for_unknown_order_is_ignored() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/webhooks/paypal")
        .json(&json!({
            "event_type": "CHECKOUT.ORDER.APPROVED",
            "resource": { "id": "NOPE", "status": "APPROVED" },
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["ignored"], true);

    let response = harness
        .server
        .post("/webhooks/paypal")
        .json(&json!({ "event_type": "BILLING.PLAN.CREATED", "resource": {} }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["ignored"], true);
}

#[tokio::test]
async fn paypal_order_validates_amount_and_currency() {
    let server = paypal_server().await;
    let harness = paypal_harness(&server);

    for body in [
        json!({ "amount": "0" }),
        json!({ "amount": -5 }),
        json!({ "amount": "1.234" }),
        json!({ "amount": "abc" }),
    ] {
        let response = harness
            .server
            .post("/v1/donations/paypal/order")
            .add_header("authorization", harness.user_auth_header())
            .json(&body)
            .await;
        response.assert_status_bad_request();
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"]["code"], "invalid_amount");
    }

    let response = harness
        .server
        .post("/v1/donations/paypal/order")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "amount": 10, "currency": "JPY" }))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "currency_not_allowed");
}

#[tokio::test]
async fn unconfigured_gateway_is_unavailable() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/donations/paypal/order")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "amount": "10.00" }))
        .await
        .assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);
}

// ============================================================================
// Bold
// ============================================================================

const BOLD_SECRET: &str = "bold-secret";
const BOLD_WEBHOOK_SECRET: &str = "bold-webhook-secret";

fn bold_harness(api_base: Option<String>) -> TestHarness {
    TestHarness::with_config(|config| {
        config.bold.api_key = Some("bold-key".into());
        config.bold.secret_key = Some(BOLD_SECRET.into());
        config.bold.webhook_secret = Some(BOLD_WEBHOOK_SECRET.into());
        config.bold.default_redirect_url = Some("https://realm.example/thanks".into());
        if let Some(base) = api_base {
            config.bold.api_base = base;
        }
    })
}

async fn create_bold_order(harness: &TestHarness) -> String {
    let response = harness
        .server
        .post("/v1/donations/bold/create")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "amount": 20000, "description": "Donation" }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let order_id = body["order_id"].as_str().unwrap().to_string();

    assert!(order_id.starts_with("alice-"));
    assert_eq!(body["currency"], "COP");
    assert_eq!(body["api_key"], "bold-key");
    assert_eq!(body["redirection_url"], "https://realm.example/thanks");
    assert_eq!(
        body["integrity_signature"],
        sha256_hex(&format!("{order_id}20000COP{BOLD_SECRET}"))
    );
    order_id
}

async fn post_bold_webhook(harness: &TestHarness, order_id: &str, status: &str) -> axum_test::TestResponse {
    let body = json!({ "order_id": order_id, "payment_status": status }).to_string();
    let signature = hmac_sha256_hex(BOLD_WEBHOOK_SECRET, body.as_bytes());
    harness
        .server
        .post("/webhooks/bold")
        .add_header("x-bold-signature", signature)
        .text(body)
        .await
}

#[tokio::test]
async fn bold_webhook_grants_once() {
    let harness = bold_harness(None);
    let order_id = create_bold_order(&harness).await;

    let response = post_bold_webhook(&harness, &order_id, "pending").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "pending");
    assert_eq!(body["granted"], 0);

    let response = post_bold_webhook(&harness, &order_id, "approved").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["granted"], 20_000 * 100);

    let response = post_bold_webhook(&harness, &order_id, "approved").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["granted"], 0);
    assert_eq!(body["credits_granted"], 2_000_000);

    assert_eq!(harness.balance(USER).await, (2_000_000, 0));
}

#[tokio::test]
async fn bold_webhook_rejects_bad_input() {
    let harness = bold_harness(None);
    let order_id = create_bold_order(&harness).await;

    harness
        .server
        .post("/webhooks/bold")
        .add_header("x-bold-signature", "deadbeef")
        .text(json!({ "order_id": order_id, "payment_status": "approved" }).to_string())
        .await
        .assert_status_bad_request();

    post_bold_webhook(&harness, &order_id, "exploded")
        .await
        .assert_status_bad_request();

    post_bold_webhook(&harness, "alice-0", "approved")
        .await
        .assert_status_not_found();

    assert_eq!(harness.balance(USER).await, (0, 0));
}

#[tokio::test]
async fn bold_hash_matches_checkout_signature() {
    let harness = bold_harness(None);

    let response = harness
        .server
        .post("/v1/donations/bold/hash")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "order_id": "alice-1", "amount": 5000, "currency": "cop" }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(
        body["integrity_signature"],
        sha256_hex(&format!("alice-15000COP{BOLD_SECRET}"))
    );

    harness
        .server
        .post("/v1/donations/bold/create")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "amount": 0 }))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn bold_sync_queries_payment_voucher() {
    let server = MockServer::start().await;
    let harness = bold_harness(Some(server.uri()));
    let order_id = create_bold_order(&harness).await;

    Mock::given(method("GET"))
        .and(path(format!("/payment-voucher/{order_id}")))
        .and(header("authorization", "x-api-key bold-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "payment_status": "APPROVED",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = harness
        .server
        .post(&format!("/v1/donations/bold/{order_id}/sync"))
        .add_header("authorization", harness.user_auth_header())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["granted_now"], 2_000_000);
}

// ============================================================================
// Listings
// ============================================================================

#[tokio::test]
async fn donation_listings() {
    let harness = bold_harness(None);
    let order_id = create_bold_order(&harness).await;
    post_bold_webhook(&harness, &order_id, "approved")
        .await
        .assert_status_ok();
    // Order ids carry a millisecond timestamp.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    create_bold_order(&harness).await;

    let response = harness
        .server
        .get("/v1/donations/mine?page_size=1000")
        .add_header("authorization", harness.user_auth_header())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["page_size"], 200);
    assert_eq!(body["total"], 2);

    let response = harness
        .server
        .get("/v1/donations/mine?page_size=1")
        .add_header("authorization", harness.user_auth_header())
        .await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["total"], 2);

    harness
        .server
        .get("/v1/donations/admin")
        .add_header("authorization", harness.user_auth_header())
        .await
        .assert_status_forbidden();

    let response = harness
        .server
        .get("/v1/donations/admin?status=completed&gateway=bold")
        .add_header("authorization", harness.admin_auth_header())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["external_id"], order_id.as_str());
    assert_eq!(body["total"], 1);
}
