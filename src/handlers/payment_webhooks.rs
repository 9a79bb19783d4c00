use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    errors::{ErrorResponse, ServiceError},
    webhooks::{WebhookOutcome, WebhookSummary},
    AppState,
};

/// Header carrying the provider's `t=...,v1=...` signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Acknowledgement for event types the pipeline does not act on.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookReceived {
    pub received: bool,
}

// POST /webhooks/payment
#[utoipa::path(
    post,
    path = "/webhooks/payment",
    request_body(content = String, description = "Raw provider event, verified byte-for-byte"),
    params(("Stripe-Signature" = String, Header, description = "Provider signature header")),
    responses(
        (status = 200, description = "Order recorded, already recorded, or event ignored", body = WebhookSummary),
        (status = 400, description = "Invalid signature", body = ErrorResponse),
        (status = 500, description = "Order could not be recorded; the provider will retry", body = ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match state.services.webhooks.handle(&body, signature).await? {
        WebhookOutcome::Ignored { .. } => Ok(Json(WebhookReceived { received: true }).into_response()),
        WebhookOutcome::Processed(summary) => Ok(Json(summary).into_response()),
    }
}
