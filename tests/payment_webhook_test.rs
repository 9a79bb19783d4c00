//! Integration tests for the payment completion webhook.

mod common;

use std::sync::atomic::Ordering;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use common::{
    completed_session_event, decimal, paid_line, response_json, sign_now, test_config, TestApp,
    ADMIN_EMAIL, WEBHOOK_SECRET,
};
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::webhooks::signature;

#[tokio::test]
async fn completed_session_records_order_with_items_and_emails() {
    let app = TestApp::new().await;
    let mattress = app.seed_product("Ortho Mattress", dec!(500.00)).await;
    app.provider.set_line_items(vec![paid_line(
        "Ortho Mattress (King)",
        1,
        50_000,
        Some(mattress.id),
    )]);

    let response = app
        .deliver_event(&completed_session_event("pi_100", 50_000, "ada@example.com"))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["itemsCreated"], 1);
    assert_eq!(body["customerEmailSent"], true);
    assert_eq!(body["adminEmailSent"], true);
    assert!(body.get("duplicate").is_none());
    let order_id = body["orderId"].as_str().unwrap().to_string();

    let order = response_json(
        app.request(Method::GET, &format!("/orders/{order_id}"), None)
            .await,
    )
    .await;
    let order = &order["order"];
    assert_eq!(decimal(&order["total_amount"]), dec!(500.00));
    assert_eq!(order["status"], "pending");
    assert_eq!(order["currency"], "gbp");
    assert_eq!(order["customer_email"], "ada@example.com");
    assert_eq!(order["customer_name"], "Ada Lovelace");
    assert_eq!(order["stripe_payment_intent_id"], "pi_100");
    assert_eq!(order["stripe_session_id"], "cs_pi_100");
    assert_eq!(order["shipping_address"]["address"]["city"], "London");

    let items = order["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["product_id"], mattress.id);
    assert_eq!(items[0]["quantity"], 1);
    assert_eq!(items[0]["size"], "King");
    assert_eq!(decimal(&items[0]["price"]), dec!(500.00));
    assert_eq!(items[0]["product"]["name"], "Ortho Mattress");

    assert_eq!(app.mailer.sent_to("ada@example.com").len(), 1);
    assert_eq!(app.mailer.sent_to(ADMIN_EMAIL).len(), 1);
}

#[tokio::test]
async fn redelivery_does_not_create_a_second_order() {
    let app = TestApp::new().await;
    let pillow = app.seed_product("Memory Foam Pillow", dec!(20.00)).await;
    app.provider
        .set_line_items(vec![paid_line("Memory Foam Pillow", 2, 4_000, Some(pillow.id))]);
    let event = completed_session_event("pi_dup", 4_000, "ada@example.com");

    let first = response_json(app.deliver_event(&event).await).await;
    let second_response = app.deliver_event(&event).await;
    assert_eq!(second_response.status(), StatusCode::OK);
    let second = response_json(second_response).await;

    assert_eq!(first["orderId"], second["orderId"]);
    assert_eq!(second["duplicate"], true);
    assert_eq!(second["itemsCreated"], 0);
    assert_eq!(second["customerEmailSent"], false);

    let listed = response_json(app.request(Method::GET, "/admin/orders", None).await).await;
    let orders = listed["orders"].as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["items"].as_array().unwrap().len(), 1);
    assert_eq!(app.mailer.sent_to("ada@example.com").len(), 1);
}

#[tokio::test]
async fn session_id_is_the_reference_when_payment_intent_is_absent() {
    let app = TestApp::new().await;
    let mut event = completed_session_event("pi_x", 1_000, "ada@example.com");
    event["data"]["object"]["payment_intent"] = json!(null);
    event["data"]["object"]["id"] = json!("cs_only");

    let body = response_json(app.deliver_event(&event).await).await;
    let order_id = body["orderId"].as_str().unwrap().to_string();

    let order = response_json(
        app.request(Method::GET, &format!("/orders/{order_id}"), None)
            .await,
    )
    .await;
    assert_eq!(order["order"]["stripe_payment_intent_id"], "cs_only");
}

#[tokio::test]
async fn unknown_products_are_skipped_but_order_is_kept() {
    let app = TestApp::new().await;
    let pillow = app.seed_product("Memory Foam Pillow", dec!(20.00)).await;
    app.provider.set_line_items(vec![
        paid_line("Memory Foam Pillow (Standard)", 2, 4_000, None),
        paid_line("Discontinued Throw", 1, 3_500, None),
    ]);

    let response = app
        .deliver_event(&completed_session_event("pi_skip", 7_500, "ada@example.com"))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["itemsCreated"], 1);

    let order_id = body["orderId"].as_str().unwrap().to_string();
    let order = response_json(
        app.request(Method::GET, &format!("/orders/{order_id}"), None)
            .await,
    )
    .await;
    let items = order["order"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["product_id"], pillow.id);
    assert_eq!(decimal(&items[0]["price"]), dec!(20.00));
    assert_eq!(decimal(&order["order"]["total_amount"]), dec!(75.00));
}

#[tokio::test]
async fn line_item_listing_failure_keeps_the_order() {
    let app = TestApp::new().await;
    app.provider.fail_line_items.store(true, Ordering::SeqCst);

    let response = app
        .deliver_event(&completed_session_event("pi_nolines", 2_000, "ada@example.com"))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["itemsCreated"], 0);
}

#[tokio::test]
async fn slow_reconciliation_is_not_cut_off_by_the_request_timeout() {
    let mut cfg = test_config();
    cfg.request_timeout_secs = 1;
    let app = TestApp::with_config(cfg).await;
    let pillow = app.seed_product("Memory Foam Pillow", dec!(20.00)).await;
    app.provider
        .set_line_items(vec![paid_line("Memory Foam Pillow", 1, 2_000, Some(pillow.id))]);
    app.provider.delay_ms.store(1_500, Ordering::SeqCst);

    let response = app
        .deliver_event(&completed_session_event("pi_slow", 2_000, "ada@example.com"))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["itemsCreated"], 1);
    assert_eq!(body["customerEmailSent"], true);

    let checkout = app
        .request(
            Method::POST,
            "/checkout",
            Some(json!({
                "items": [{ "id": pillow.id, "name": "Memory Foam Pillow", "quantity": 1 }],
                "customer": { "email": "ada@example.com" }
            })),
        )
        .await;
    assert_eq!(checkout.status(), StatusCode::REQUEST_TIMEOUT);
}

#[tokio::test]
async fn email_failure_still_returns_success() {
    let app = TestApp::new().await;
    app.mailer.fail.store(true, Ordering::SeqCst);

    let response = app
        .deliver_event(&completed_session_event("pi_mailfail", 2_000, "ada@example.com"))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["customerEmailSent"], false);
    assert_eq!(body["adminEmailSent"], false);

    let listed = response_json(app.request(Method::GET, "/admin/orders", None).await).await;
    assert_eq!(listed["orders"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn tampered_body_is_rejected_and_nothing_is_written() {
    let app = TestApp::new().await;
    let event = completed_session_event("pi_tamper", 50_000, "ada@example.com");
    let payload = serde_json::to_vec(&event).unwrap();
    let header = sign_now(&payload);

    let mut tampered = event.clone();
    tampered["data"]["object"]["amount_total"] = json!(1);
    let tampered = serde_json::to_vec(&tampered).unwrap();

    let response = app.post_webhook(&tampered, Some(&header)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["error"], "Invalid signature");

    let listed = response_json(app.request(Method::GET, "/admin/orders", None).await).await;
    assert!(listed["orders"].as_array().unwrap().is_empty());
    assert_eq!(app.mailer.count(), 0);
}

#[tokio::test]
async fn missing_or_stale_signature_is_rejected() {
    let app = TestApp::new().await;
    let payload =
        serde_json::to_vec(&completed_session_event("pi_sig", 1_000, "ada@example.com")).unwrap();

    let response = app.post_webhook(&payload, None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let stale = signature::sign(WEBHOOK_SECRET, Utc::now().timestamp() - 3_600, &payload);
    let response = app.post_webhook(&payload, Some(&stale)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let wrong_secret = signature::sign("whsec_other", Utc::now().timestamp(), &payload);
    let response = app.post_webhook(&payload, Some(&wrong_secret)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unsigned_deliveries_are_rejected_when_no_secret_is_configured() {
    let mut cfg = common::test_config();
    cfg.payment_webhook_secret = None;
    let app = TestApp::with_config(cfg).await;

    let response = app
        .deliver_event(&completed_session_event("pi_nosecret", 1_000, "ada@example.com"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn other_event_types_are_acknowledged_without_side_effects() {
    let app = TestApp::new().await;
    let event = json!({
        "id": "evt_refund",
        "type": "charge.refunded",
        "data": { "object": { "id": "ch_1" } }
    });

    let response = app.deliver_event(&event).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["received"], true);

    let listed = response_json(app.request(Method::GET, "/admin/orders", None).await).await;
    assert!(listed["orders"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn persistence_failure_returns_500_so_the_provider_retries() {
    let app = TestApp::new().await;
    app.execute_sql("DROP TABLE order_items;").await;
    app.execute_sql("DROP TABLE orders;").await;

    let response = app
        .deliver_event(&completed_session_event("pi_dbdown", 1_000, "ada@example.com"))
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response_json(response).await;
    assert_eq!(body["error"], "Failed to create order");
    assert_eq!(app.mailer.count(), 0);
}

#[tokio::test]
async fn undecodable_completed_session_is_a_processing_failure() {
    let app = TestApp::new().await;
    let event = json!({
        "id": "evt_bad",
        "type": "checkout.session.completed",
        "data": { "object": { "amount_total": "lots" } }
    });

    let response = app.deliver_event(&event).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response_json(response).await;
    assert_eq!(body["error"], "Webhook processing failed");
}

#[tokio::test]
async fn checkout_then_completion_records_the_paid_cart() {
    let app = TestApp::new().await;
    let mattress = app.seed_product("King Mattress", dec!(500.00)).await;

    let checkout = app
        .request(
            Method::POST,
            "/checkout",
            Some(json!({
                "items": [{
                    "id": mattress.id,
                    "name": "King Mattress",
                    "size": "King",
                    "currentPrice": 500,
                    "quantity": 1
                }],
                "customer": { "email": "a@b.com" }
            })),
        )
        .await;
    assert_eq!(checkout.status(), StatusCode::OK);
    let session_id = response_json(checkout).await["id"]
        .as_str()
        .unwrap()
        .to_string();

    // The provider reports back what the session was created with.
    let sent = app.provider.last_session().unwrap();
    let line = &sent.line_items[0];
    app.provider.set_line_items(vec![paid_line(
        &line.name,
        line.quantity,
        line.unit_amount * line.quantity,
        line.product_id.map(|id| id as i32),
    )]);

    let mut event = completed_session_event("pi_e2e", 50_000, "a@b.com");
    event["data"]["object"]["id"] = json!(session_id);
    let response = app.deliver_event(&event).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["itemsCreated"], 1);

    let listed = response_json(
        app.request(Method::GET, "/orders?email=a@b.com", None)
            .await,
    )
    .await;
    let orders = listed["orders"].as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(decimal(&orders[0]["total_amount"]), dec!(500.00));
    assert_eq!(orders[0]["stripe_session_id"], session_id.as_str());
    let items = orders[0]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["quantity"], 1);
    assert_eq!(items[0]["product_id"], mattress.id);
}
