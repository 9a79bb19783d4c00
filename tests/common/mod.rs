#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseBackend as DbBackend, NotSet, Set, Statement};
use serde_json::{json, Value};
use storefront_api::{
    config::AppConfig,
    db,
    entities::{product, ProductModel},
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    logging,
    notifications::{Email, Mailer, NotificationError},
    services::payment_provider::{
        CheckoutSession, CheckoutSessionParams, PaidLineItem, PaymentProvider,
    },
    webhooks::signature,
    AppState,
};
use tower::ServiceExt;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const ADMIN_EMAIL: &str = "admin@shop.test";

/// Payment provider double: records every session request and serves canned line items.
#[derive(Default)]
pub struct FakePaymentProvider {
    pub sessions: Mutex<Vec<CheckoutSessionParams>>,
    pub line_items: Mutex<Vec<PaidLineItem>>,
    pub fail_sessions: AtomicBool,
    pub fail_line_items: AtomicBool,
    pub omit_url: AtomicBool,
    /// Artificial latency in milliseconds for every provider call.
    pub delay_ms: AtomicU64,
}

impl FakePaymentProvider {
    pub fn set_line_items(&self, items: Vec<PaidLineItem>) {
        *self.line_items.lock().unwrap() = items;
    }

    async fn latency(&self) {
        let ms = self.delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn last_session(&self) -> Option<CheckoutSessionParams> {
        self.sessions.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PaymentProvider for FakePaymentProvider {
    async fn create_checkout_session(
        &self,
        params: CheckoutSessionParams,
    ) -> Result<CheckoutSession, ServiceError> {
        self.latency().await;
        if self.fail_sessions.load(Ordering::SeqCst) {
            return Err(ServiceError::PaymentProviderError(
                "Your card was declined".to_string(),
            ));
        }
        let mut sessions = self.sessions.lock().unwrap();
        sessions.push(params);
        let id = format!("cs_test_{}", sessions.len());
        let url = (!self.omit_url.load(Ordering::SeqCst))
            .then(|| format!("https://checkout.test/pay/{id}"));
        Ok(CheckoutSession { id, url })
    }

    async fn list_line_items(&self, _session_id: &str) -> Result<Vec<PaidLineItem>, ServiceError> {
        self.latency().await;
        if self.fail_line_items.load(Ordering::SeqCst) {
            return Err(ServiceError::PaymentProviderError(
                "line items unavailable".to_string(),
            ));
        }
        Ok(self.line_items.lock().unwrap().clone())
    }
}

/// Mailer double that keeps sent messages and can be switched to fail.
#[derive(Default)]
pub struct FakeMailer {
    pub sent: Mutex<Vec<Email>>,
    pub fail: AtomicBool,
}

impl FakeMailer {
    pub fn sent_to(&self, address: &str) -> Vec<Email> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.to == address)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, email: &Email) -> Result<(), NotificationError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotificationError::Rejected {
                status: 503,
                body: "mail provider unavailable".to_string(),
            });
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// Application wired to an in-memory SQLite database and provider doubles.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub provider: Arc<FakePaymentProvider>,
    pub mailer: Arc<FakeMailer>,
    _event_task: tokio::task::JoinHandle<()>,
}

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        "127.0.0.1".to_string(),
        18_080,
        "test".to_string(),
    );
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;
    cfg.cors_allow_any_origin = true;
    cfg.site_url = "https://shop.test".to_string();
    cfg.stripe_secret_key = "sk_test_123".to_string();
    cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());
    cfg.checkout_allowed_countries = "GB,IE".to_string();
    cfg.admin_email = Some(ADMIN_EMAIL.to_string());
    cfg
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(cfg: AppConfig) -> Self {
        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_sender, event_rx) = EventSender::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let provider = Arc::new(FakePaymentProvider::default());
        let mailer = Arc::new(FakeMailer::default());
        let services = AppServices::new(
            db_arc.clone(),
            &cfg,
            provider.clone(),
            mailer.clone(),
            Some(event_sender),
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            services,
        };
        let router = storefront_api::build_app(state.clone(), logging::plain_logger())
            .expect("test router");

        Self {
            router,
            state,
            provider,
            mailer,
            _event_task: event_task,
        }
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Posts raw bytes to the webhook endpoint with an optional signature header.
    pub async fn post_webhook(&self, payload: &[u8], signature: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/webhooks/payment")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header("stripe-signature", sig);
        }
        let request = builder
            .body(Body::from(payload.to_vec()))
            .expect("failed to build webhook request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during webhook request")
    }

    /// Signs and posts an event the way the provider would.
    pub async fn deliver_event(&self, event: &Value) -> Response {
        let payload = serde_json::to_vec(event).expect("serialize event");
        let header = sign_now(&payload);
        self.post_webhook(&payload, Some(&header)).await
    }

    pub async fn seed_product(&self, name: &str, price: Decimal) -> ProductModel {
        product::ActiveModel {
            id: NotSet,
            name: Set(name.to_string()),
            brand: Set(Some("Slumberwell".to_string())),
            image_url: Set(Some(format!(
                "https://cdn.shop.test/{}.jpg",
                name.to_lowercase().replace(' ', "-")
            ))),
            current_price: Set(price),
            original_price: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn execute_sql(&self, sql: &str) {
        self.state
            .db
            .execute(Statement::from_string(DbBackend::Sqlite, sql.to_string()))
            .await
            .expect("execute raw sql");
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn sign_now(payload: &[u8]) -> String {
    signature::sign(WEBHOOK_SECRET, Utc::now().timestamp(), payload)
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Parses a decimal that the API serialized as a string.
pub fn decimal(value: &Value) -> Decimal {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .or_else(|| value.as_f64().and_then(|f| Decimal::try_from(f).ok()))
        .unwrap_or_else(|| panic!("not a decimal: {value}"))
}

/// A `checkout.session.completed` event as the provider sends it.
pub fn completed_session_event(payment_intent: &str, amount_total: i64, email: &str) -> Value {
    json!({
        "id": format!("evt_{payment_intent}"),
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": format!("cs_{payment_intent}"),
                "object": "checkout.session",
                "payment_intent": payment_intent,
                "amount_total": amount_total,
                "currency": "gbp",
                "customer_email": email,
                "customer_details": {
                    "email": email,
                    "name": "Ada Lovelace",
                    "phone": "+447700900123",
                    "address": {
                        "line1": "1 Analytical Row",
                        "line2": null,
                        "city": "London",
                        "state": null,
                        "postal_code": "N1 9GU",
                        "country": "GB"
                    }
                },
                "shipping_details": {
                    "name": "Ada Lovelace",
                    "address": {
                        "line1": "1 Analytical Row",
                        "city": "London",
                        "postal_code": "N1 9GU",
                        "country": "GB"
                    }
                },
                "metadata": {
                    "customerEmail": email,
                    "customerName": "Ada Lovelace"
                }
            }
        }
    })
}

pub fn paid_line(description: &str, quantity: i64, amount_total: i64, product_id: Option<i32>) -> PaidLineItem {
    PaidLineItem {
        description: description.to_string(),
        quantity,
        amount_total,
        product_id,
    }
}
