use axum::Json;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = r#"
# Storefront order pipeline

Checkout session creation, the payment completion webhook, and order query/status
endpoints for the storefront and its back office.

## Webhook authentication

`POST /webhooks/payment` is public. It is authenticated only by the `Stripe-Signature`
header, an HMAC-SHA256 over `"<timestamp>.<raw body>"`. Deliveries for an already
recorded payment are acknowledged with `200` and do not create a second order.

## Errors

Errors share one body:

```json
{ "error": "Invalid signature", "status": "Bad Request", "timestamp": "2024-06-01T00:00:00Z" }
```
"#
    ),
    paths(
        crate::handlers::checkout::create_checkout_session,
        crate::handlers::payment_webhooks::payment_webhook,
        crate::handlers::orders::admin_list_orders,
        crate::handlers::orders::customer_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::dispatch_order,
        crate::handlers::health::health_check,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::services::checkout::CheckoutRequest,
        crate::services::checkout::CheckoutItem,
        crate::services::checkout::CheckoutCustomer,
        crate::services::checkout::CheckoutResponse,
        crate::webhooks::WebhookSummary,
        crate::handlers::payment_webhooks::WebhookReceived,
        crate::services::orders::OrderView,
        crate::services::orders::OrderItemView,
        crate::services::orders::ProductSummary,
        crate::entities::OrderStatus,
        crate::handlers::orders::OrdersResponse,
        crate::handlers::orders::OrderResponse,
        crate::handlers::orders::UpdateStatusRequest,
        crate::handlers::orders::DispatchRequest,
        crate::handlers::health::HealthResponse,
        crate::handlers::health::ComponentStatus,
    )),
    tags(
        (name = "Checkout", description = "Hosted payment session creation"),
        (name = "Payments", description = "Payment provider webhooks"),
        (name = "Orders", description = "Order history, back office listing and lifecycle"),
        (name = "Health", description = "Liveness and database reachability")
    )
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_core_paths() {
        let doc = ApiDoc::openapi();
        for path in ["/checkout", "/webhooks/payment", "/admin/orders", "/orders/{id}/status"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
