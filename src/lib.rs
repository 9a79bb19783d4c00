//! Storefront API
//!
//! Order-fulfillment pipeline for the storefront: cart state, hosted checkout session
//! creation, the payment completion webhook and order query/status endpoints.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod cart;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod logging;
pub mod migrator;
pub mod notifications;
pub mod openapi;
pub mod services;
pub mod webhooks;

use std::{sync::Arc, time::Duration};

use axum::{
    routing::{get, patch, post},
    Router,
};
use http::HeaderValue;
use sea_orm::DatabaseConnection;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub services: handlers::AppServices,
}

/// Everything bounded by the request timeout.
fn timed_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/checkout",
            post(handlers::checkout::create_checkout_session),
        )
        .route("/admin/orders", get(handlers::orders::admin_list_orders))
        .route("/orders", get(handlers::orders::customer_orders))
        .route("/orders/dispatch", post(handlers::orders::dispatch_order))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/:id/status",
            patch(handlers::orders::update_order_status),
        )
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
}

/// Payment webhook. Runs without the request timeout: once the order row is stored,
/// item reconciliation and emails must finish in the same delivery.
fn webhook_routes() -> Router<AppState> {
    Router::new().route(
        "/webhooks/payment",
        post(handlers::payment_webhooks::payment_webhook),
    )
}

/// Builds the CORS layer from configuration.
pub fn cors_layer(cfg: &config::AppConfig) -> Result<CorsLayer, config::AppConfigError> {
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    if let Some(origins) = configured_origins {
        Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any))
    } else if cfg.should_allow_permissive_cors() {
        info!(
            "Using permissive CORS because explicit origins were not configured ({})",
            if cfg.is_development() {
                "development environment"
            } else {
                "explicit override enabled"
            }
        );
        Ok(CorsLayer::permissive())
    } else {
        Err(config::AppConfigError::Cors(
            "set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true".to_string(),
        ))
    }
}

/// Full application: routes, access log, CORS, timeout (all but the webhook) and request ids.
pub fn build_app(
    state: AppState,
    access_logger: slog::Logger,
) -> Result<Router, config::AppConfigError> {
    let cors = cors_layer(&state.config)?;
    let timeout = Duration::from_secs(state.config.request_timeout_secs);
    let logging_state = Arc::new(logging::LoggingState::new(access_logger));

    Ok(timed_routes()
        .layer(TimeoutLayer::new(timeout))
        .merge(webhook_routes())
        .layer(axum::middleware::from_fn_with_state(
            logging_state,
            logging::logging_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state))
}
