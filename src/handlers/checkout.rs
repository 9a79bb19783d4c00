use axum::{extract::rejection::JsonRejection, extract::State, Json};

use crate::{
    errors::{ErrorResponse, ServiceError},
    services::checkout::{CheckoutRequest, CheckoutResponse},
    AppState,
};

/// Opens a hosted payment session for the submitted cart.
#[utoipa::path(
    post,
    path = "/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Session created", body = CheckoutResponse),
        (status = 400, description = "Empty cart, missing email or invalid item", body = ErrorResponse),
        (status = 500, description = "Payment provider failure", body = ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<CheckoutResponse>, ServiceError> {
    let Json(request) = payload.map_err(|e| ServiceError::ValidationError(e.body_text()))?;
    let response = state.services.checkout.create_session(request).await?;
    Ok(Json(response))
}
