use std::sync::Arc;

use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    config::AppConfig,
    errors::ServiceError,
    notifications::{OrderNotifier, ReceiptLine},
    services::{
        orders::OrderStore,
        payment_provider::{CheckoutSessionParams, PaymentProvider, SessionLineItem},
        pricing,
    },
};

/// Provider cap on a single metadata value.
pub const METADATA_VALUE_LIMIT: usize = 500;

/// One cart line as submitted by the storefront. Prices here are advisory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutItem {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<f64>, example = 500.0)]
    pub current_price: Option<Decimal>,
    #[serde(default)]
    #[schema(value_type = Option<f64>)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub quantity: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct CheckoutCustomer {
    #[serde(default)]
    #[validate(email(message = "Customer email is invalid"))]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub items: Vec<CheckoutItem>,
    #[serde(default)]
    pub customer: Option<CheckoutCustomer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutResponse {
    /// Provider checkout session id
    #[schema(example = "cs_test_a1b2c3")]
    pub id: String,
    /// Hosted payment page to redirect the shopper to
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub currency: String,
    pub allowed_countries: Vec<String>,
    pub site_url: String,
}

impl From<&AppConfig> for CheckoutSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            currency: cfg.checkout_currency.to_lowercase(),
            allowed_countries: cfg.allowed_countries(),
            site_url: cfg.site_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Serialize)]
struct ItemSummary<'a> {
    id: i64,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<&'a str>,
    quantity: i64,
}

/// Compact JSON of the cart for session metadata, dropping trailing entries until it
/// fits the provider's value limit.
fn items_metadata(summaries: &[ItemSummary<'_>]) -> String {
    let mut kept = summaries.len();
    loop {
        let encoded = serde_json::to_string(&summaries[..kept]).unwrap_or_else(|_| "[]".into());
        if encoded.len() <= METADATA_VALUE_LIMIT || kept == 0 {
            if kept < summaries.len() {
                warn!(
                    kept,
                    total = summaries.len(),
                    "cart summary truncated to fit session metadata"
                );
            }
            return encoded;
        }
        kept -= 1;
    }
}

fn blank_to_none(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Creates hosted payment sessions from cart snapshots.
#[derive(Clone)]
pub struct CheckoutService {
    provider: Arc<dyn PaymentProvider>,
    catalog: Arc<dyn OrderStore>,
    notifier: OrderNotifier,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(
        provider: Arc<dyn PaymentProvider>,
        catalog: Arc<dyn OrderStore>,
        notifier: OrderNotifier,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            provider,
            catalog,
            notifier,
            settings,
        }
    }

    /// Catalog price for products the store knows, otherwise the submitted price.
    async fn unit_price(&self, item: &CheckoutItem) -> Result<(Decimal, Option<String>), ServiceError> {
        if let Ok(id) = i32::try_from(item.id) {
            if let Some(product) = self.catalog.find_product(id).await? {
                return Ok((product.current_price, product.image_url));
            }
        }
        let submitted = item.current_price.or(item.price).ok_or_else(|| {
            ServiceError::ValidationError(format!("Item '{}' has no price", item.name))
        })?;
        Ok((submitted, None))
    }

    /// Validates the cart, prices it and opens exactly one provider session.
    #[instrument(skip(self, request), fields(items = request.items.len()))]
    pub async fn create_session(&self, request: CheckoutRequest) -> Result<CheckoutResponse, ServiceError> {
        if request.items.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".to_string()));
        }
        let customer = request.customer.unwrap_or(CheckoutCustomer {
            email: None,
            name: None,
        });
        let email = blank_to_none(customer.email.as_deref())
            .ok_or_else(|| ServiceError::ValidationError("Customer email is required".to_string()))?
            .to_string();
        customer.validate()?;
        let customer_name = blank_to_none(customer.name.as_deref()).map(str::to_string);

        let mut line_items = Vec::with_capacity(request.items.len());
        let mut receipt = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let quantity = item.quantity.unwrap_or(1);
            if quantity < 1 {
                return Err(ServiceError::ValidationError(format!(
                    "Quantity for '{}' must be at least 1",
                    item.name
                )));
            }
            let (price, catalog_image) = self.unit_price(item).await?;
            let size = blank_to_none(item.size.as_deref());
            line_items.push(SessionLineItem {
                product_id: Some(item.id),
                name: pricing::display_name(&item.name, size),
                image: blank_to_none(item.image.as_deref())
                    .map(str::to_string)
                    .or(catalog_image),
                unit_amount: pricing::to_minor_units(price)?,
                quantity,
            });
            receipt.push(ReceiptLine {
                name: item.name.clone(),
                size: size.map(str::to_string),
                quantity,
                unit_price: price,
            });
        }

        let summaries: Vec<ItemSummary<'_>> = request
            .items
            .iter()
            .map(|item| ItemSummary {
                id: item.id,
                name: &item.name,
                size: blank_to_none(item.size.as_deref()),
                quantity: item.quantity.unwrap_or(1),
            })
            .collect();
        let mut metadata = vec![
            ("items".to_string(), items_metadata(&summaries)),
            ("customerEmail".to_string(), email.clone()),
        ];
        if let Some(name) = &customer_name {
            metadata.push(("customerName".to_string(), name.clone()));
        }

        let params = CheckoutSessionParams {
            line_items,
            currency: self.settings.currency.clone(),
            customer_email: email.clone(),
            success_url: format!(
                "{}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}",
                self.settings.site_url
            ),
            cancel_url: format!("{}/cart", self.settings.site_url),
            allowed_countries: self.settings.allowed_countries.clone(),
            metadata,
        };

        let session = self.provider.create_checkout_session(params).await?;
        let url = session.url.clone().ok_or_else(|| {
            ServiceError::PaymentProviderError("Payment provider returned no redirect URL".into())
        })?;
        counter!("storefront_checkout.sessions_created", 1);
        info!(session_id = %session.id, "checkout session created");

        let notified = self
            .notifier
            .checkout_started(
                &session.id,
                &email,
                customer_name.as_deref(),
                &receipt,
                &self.settings.currency,
            )
            .await;
        debug!(session_id = %session.id, notified, "checkout started notification");

        Ok(CheckoutResponse {
            id: session.id,
            url,
        })
    }
}
