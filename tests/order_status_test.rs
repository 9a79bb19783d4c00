//! Integration tests for order history, back-office listing and status changes.

mod common;

use std::sync::atomic::Ordering;

use axum::http::{Method, StatusCode};
use common::{completed_session_event, response_json, TestApp};
use serde_json::json;
use uuid::Uuid;

async fn record_order(app: &TestApp, reference: &str, email: &str) -> String {
    let body = response_json(
        app.deliver_event(&completed_session_event(reference, 10_000, email))
            .await,
    )
    .await;
    body["orderId"].as_str().expect("order id").to_string()
}

#[tokio::test]
async fn admin_listing_is_newest_first_and_filterable() {
    let app = TestApp::new().await;
    let first = record_order(&app, "pi_a", "ada@example.com").await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = record_order(&app, "pi_b", "bob@example.com").await;

    let listed = response_json(app.request(Method::GET, "/admin/orders", None).await).await;
    let orders = listed["orders"].as_array().unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0]["id"], second.as_str());
    assert_eq!(orders[1]["id"], first.as_str());

    let by_email = response_json(
        app.request(Method::GET, "/admin/orders?email=ada@example.com", None)
            .await,
    )
    .await;
    assert_eq!(by_email["orders"].as_array().unwrap().len(), 1);

    let limited = response_json(app.request(Method::GET, "/admin/orders?limit=1", None).await).await;
    assert_eq!(limited["orders"].as_array().unwrap().len(), 1);

    let pending = response_json(
        app.request(Method::GET, "/admin/orders?status=pending", None)
            .await,
    )
    .await;
    assert_eq!(pending["orders"].as_array().unwrap().len(), 2);

    let dispatched = response_json(
        app.request(Method::GET, "/admin/orders?status=dispatched", None)
            .await,
    )
    .await;
    assert!(dispatched["orders"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn admin_listing_rejects_unknown_status_filter() {
    let app = TestApp::new().await;
    let response = app
        .request(Method::GET, "/admin/orders?status=shipped", None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_listing_degrades_to_empty_when_storage_fails() {
    let app = TestApp::new().await;
    record_order(&app, "pi_c", "ada@example.com").await;
    app.execute_sql("DROP TABLE order_items;").await;
    app.execute_sql("DROP TABLE orders;").await;

    let response = app.request(Method::GET, "/admin/orders", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert!(body["orders"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn customer_history_requires_a_valid_email() {
    let app = TestApp::new().await;
    record_order(&app, "pi_d", "ada@example.com").await;
    record_order(&app, "pi_e", "bob@example.com").await;

    let response = app.request(Method::GET, "/orders", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.request(Method::GET, "/orders?email=not-an-email", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .request(Method::GET, "/orders?email=ada@example.com", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let orders = body["orders"].as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["customer_email"], "ada@example.com");
}

#[tokio::test]
async fn unknown_order_is_404() {
    let app = TestApp::new().await;
    let response = app
        .request(Method::GET, &format!("/orders/{}", Uuid::new_v4()), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_moves_forward_and_never_back() {
    let app = TestApp::new().await;
    let id = record_order(&app, "pi_f", "ada@example.com").await;
    let uri = format!("/orders/{id}/status");

    let response = app
        .request(Method::PATCH, &uri, Some(json!({ "status": "processing" })))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["order"]["status"], "processing");

    let response = app
        .request(Method::PATCH, &uri, Some(json!({ "status": "pending" })))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .request(Method::PATCH, &uri, Some(json!({ "status": "teleported" })))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .request(Method::PATCH, &uri, Some(json!({ "status": "completed" })))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(Method::PATCH, &uri, Some(json!({ "status": "cancelled" })))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn dispatch_stamps_time_and_emails_the_chosen_address() {
    let app = TestApp::new().await;
    let id = record_order(&app, "pi_g", "ada@example.com").await;

    let response = app
        .request(
            Method::POST,
            "/orders/dispatch",
            Some(json!({ "orderId": id, "clientEmail": "gift@example.com" })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["order"]["status"], "dispatched");
    assert!(body["order"]["dispatched_at"].is_string());

    let dispatch_mails = app.mailer.sent_to("gift@example.com");
    assert_eq!(dispatch_mails.len(), 1);
    assert!(dispatch_mails[0].subject.contains("dispatched"));
}

#[tokio::test]
async fn dispatch_succeeds_even_if_email_fails() {
    let app = TestApp::new().await;
    let id = record_order(&app, "pi_h", "ada@example.com").await;
    app.mailer.fail.store(true, Ordering::SeqCst);

    let response = app
        .request(Method::POST, "/orders/dispatch", Some(json!({ "orderId": id })))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let order = response_json(
        app.request(Method::GET, &format!("/orders/{id}"), None)
            .await,
    )
    .await;
    assert_eq!(order["order"]["status"], "dispatched");
}

#[tokio::test]
async fn health_reports_database_and_openapi_is_served() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], "up");
    assert_eq!(body["database"], "up");

    let response = app.request(Method::GET, "/api-docs/openapi.json", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let doc = response_json(response).await;
    assert!(doc["paths"]["/webhooks/payment"].is_object());
}
