//! Turns a signed payment-completion event into a persisted order.
//!
//! Only two failures reach the provider as errors: a bad signature (400) and a failure
//! to record the order itself (500, so the provider retries). Line-item attribution and
//! email are best-effort once the order row exists.

use std::sync::Arc;

use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    event::{CompletedSession, ProviderEvent},
    signature::SignatureVerifier,
};
use crate::{
    entities::{OrderModel, ProductModel},
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::{NotificationReport, OrderNotifier, ReceiptLine},
    services::{
        orders::{NewOrder, NewOrderItem, OrderStore},
        payment_provider::{PaidLineItem, PaymentProvider},
        pricing,
    },
};

/// Response body once a completed session has been handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSummary {
    pub success: bool,
    pub order_id: Uuid,
    pub items_created: usize,
    pub customer_email_sent: bool,
    pub admin_email_sent: bool,
    /// Set when the payment had already been recorded by an earlier delivery.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Any event type other than a completed checkout session.
    Ignored { event_type: String },
    Processed(WebhookSummary),
}

/// Result of attributing the provider's line items to catalog products.
#[derive(Debug, Default)]
struct Reconciliation {
    items_created: usize,
    receipt: Vec<ReceiptLine>,
}

pub struct WebhookProcessor {
    verifier: SignatureVerifier,
    provider: Arc<dyn PaymentProvider>,
    store: Arc<dyn OrderStore>,
    notifier: OrderNotifier,
    event_sender: Option<EventSender>,
    default_currency: String,
}

impl WebhookProcessor {
    pub fn new(
        verifier: SignatureVerifier,
        provider: Arc<dyn PaymentProvider>,
        store: Arc<dyn OrderStore>,
        notifier: OrderNotifier,
        event_sender: Option<EventSender>,
        default_currency: impl Into<String>,
    ) -> Self {
        Self {
            verifier,
            provider,
            store,
            notifier,
            event_sender,
            default_currency: default_currency.into(),
        }
    }

    /// Full pipeline for one delivery: verify, decode, record, reconcile, notify.
    #[instrument(skip_all)]
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, ServiceError> {
        if let Err(err) = self.verifier.verify(payload, signature) {
            warn!(error = %err, "rejecting webhook");
            counter!("storefront_webhooks.rejected", 1);
            return Err(ServiceError::InvalidSignature);
        }

        let event: ProviderEvent = serde_json::from_slice(payload).map_err(|e| {
            warn!(error = %e, "signed webhook payload is not a provider event");
            counter!("storefront_webhooks.rejected", 1);
            ServiceError::InvalidSignature
        })?;

        if !event.is_checkout_completed() {
            info!(event_id = %event.id, event_type = %event.event_type, "ignoring webhook event");
            counter!("storefront_webhooks.ignored", 1);
            return Ok(WebhookOutcome::Ignored {
                event_type: event.event_type,
            });
        }

        let session: CompletedSession = serde_json::from_value(event.data.object).map_err(|e| {
            error!(event_id = %event.id, error = %e, "undecodable checkout session");
            ServiceError::WebhookProcessingFailed(e.to_string())
        })?;

        self.process_completed_session(session)
            .await
            .map(WebhookOutcome::Processed)
    }

    /// Records the order for an already-verified completed session.
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub async fn process_completed_session(
        &self,
        session: CompletedSession,
    ) -> Result<WebhookSummary, ServiceError> {
        let new_order = self.order_from_session(&session);
        let outcome = self
            .store
            .record_payment_if_new(new_order)
            .await
            .map_err(|e| {
                error!(error = %e, payment_reference = %session.payment_reference(), "failed to record paid order");
                counter!("storefront_webhooks.persistence_failed", 1);
                ServiceError::OrderPersistenceFailed(e)
            })?;

        let order = outcome.order;
        if !outcome.created {
            info!(order_id = %order.id, "payment already recorded; acknowledging duplicate delivery");
            counter!("storefront_webhooks.duplicate", 1);
            return Ok(WebhookSummary {
                success: true,
                order_id: order.id,
                items_created: 0,
                customer_email_sent: false,
                admin_email_sent: false,
                duplicate: true,
            });
        }

        counter!("storefront_webhooks.created", 1);
        info!(order_id = %order.id, total = %order.total_amount, "order recorded");

        let reconciliation = self.reconcile_items(&order, &session.id).await;
        let report: NotificationReport = self
            .notifier
            .order_confirmed(&order, &reconciliation.receipt)
            .await;

        if let Some(sender) = &self.event_sender {
            sender
                .publish(Event::OrderCreated {
                    order_id: order.id,
                    payment_reference: order.stripe_payment_intent_id.clone(),
                    total_amount: order.total_amount,
                    items_created: reconciliation.items_created,
                })
                .await;
        }

        Ok(WebhookSummary {
            success: true,
            order_id: order.id,
            items_created: reconciliation.items_created,
            customer_email_sent: report.customer_email_sent,
            admin_email_sent: report.admin_email_sent,
            duplicate: false,
        })
    }

    fn order_from_session(&self, session: &CompletedSession) -> NewOrder {
        let total_amount = match session.amount_total {
            Some(minor) => pricing::from_minor_units(minor),
            None => {
                warn!(session_id = %session.id, "completed session carries no amount_total");
                Decimal::ZERO
            }
        };
        let customer_email = session.customer_email().unwrap_or_default().to_string();
        if customer_email.is_empty() {
            warn!(session_id = %session.id, "completed session has no customer email");
        }

        NewOrder {
            payment_reference: session.payment_reference().to_string(),
            session_id: Some(session.id.clone()),
            customer_email,
            customer_name: session.customer_name().map(str::to_string),
            customer_phone: session.customer_phone().map(str::to_string),
            shipping_address: session
                .shipping()
                .and_then(|s| serde_json::to_string(s).ok()),
            billing_address: session
                .billing_address()
                .and_then(|a| serde_json::to_string(a).ok()),
            total_amount,
            currency: session
                .currency
                .clone()
                .unwrap_or_else(|| self.default_currency.clone()),
        }
    }

    /// Resolves a paid line to a catalog product: metadata id first, then exact name.
    async fn resolve_product(&self, line: &PaidLineItem, name: &str) -> Option<ProductModel> {
        if let Some(id) = line.product_id {
            match self.store.find_product(id).await {
                Ok(Some(product)) => return Some(product),
                Ok(None) => warn!(product_id = id, "line item references unknown product id"),
                Err(e) => {
                    warn!(product_id = id, error = %e, "product lookup failed");
                    return None;
                }
            }
        }
        match self.store.find_product_by_name(name).await {
            Ok(found) => found,
            Err(e) => {
                warn!(product_name = name, error = %e, "product lookup failed");
                None
            }
        }
    }

    async fn reconcile_items(&self, order: &OrderModel, session_id: &str) -> Reconciliation {
        let lines = match self.provider.list_line_items(session_id).await {
            Ok(lines) => lines,
            Err(e) => {
                error!(order_id = %order.id, error = %e, "could not list session line items; order has no items");
                return Reconciliation::default();
            }
        };

        let mut result = Reconciliation::default();
        for line in &lines {
            let (name, size) = pricing::parse_display_name(&line.description);
            let quantity = line.quantity.max(1);
            let unit_price = (pricing::from_minor_units(line.amount_total) / Decimal::from(quantity))
                .round_dp(2);
            result.receipt.push(ReceiptLine {
                name: name.to_string(),
                size: size.map(str::to_string),
                quantity,
                unit_price,
            });

            let Some(product) = self.resolve_product(line, name).await else {
                warn!(order_id = %order.id, description = %line.description, "skipping unattributable line item");
                counter!("storefront_webhooks.items_skipped", 1);
                continue;
            };

            let item = NewOrderItem {
                order_id: order.id,
                product_id: product.id,
                quantity: i32::try_from(quantity).unwrap_or(i32::MAX),
                price: unit_price,
                size: size.map(str::to_string),
            };
            match self.store.insert_item(item).await {
                Ok(_) => result.items_created += 1,
                Err(e) => {
                    warn!(order_id = %order.id, product_id = product.id, error = %e, "failed to persist line item");
                    counter!("storefront_webhooks.items_skipped", 1);
                }
            }
        }

        if result.items_created < lines.len() {
            warn!(
                order_id = %order.id,
                items_created = result.items_created,
                line_items = lines.len(),
                "order recorded with missing line items"
            );
        }
        result
    }
}
