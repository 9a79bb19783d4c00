//! Hosted payment provider client.
//!
//! [`PaymentProvider`] is the seam the checkout initiator and webhook processor talk to;
//! [`StripeClient`] implements it against Stripe's form-encoded REST API.

use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::errors::ServiceError;

/// One priced line for a hosted checkout session. Amounts are minor units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLineItem {
    pub product_id: Option<i64>,
    /// Provider-facing name, already size-suffixed.
    pub name: String,
    pub image: Option<String>,
    pub unit_amount: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionParams {
    pub line_items: Vec<SessionLineItem>,
    pub currency: String,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
    pub allowed_countries: Vec<String>,
    /// Free-form session metadata echoed back on completion events.
    pub metadata: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

/// A line item as the provider reports it after payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaidLineItem {
    pub description: String,
    pub quantity: i64,
    /// Total charged for the line in minor units.
    pub amount_total: i64,
    /// Catalog id carried in the provider product's metadata, when present.
    pub product_id: Option<i32>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        params: CheckoutSessionParams,
    ) -> Result<CheckoutSession, ServiceError>;

    async fn list_line_items(&self, session_id: &str) -> Result<Vec<PaidLineItem>, ServiceError>;
}

/// Stripe Checkout over HTTPS.
#[derive(Clone)]
pub struct StripeClient {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(secret_key: impl Into<String>, api_base: impl Into<String>) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    fn form_params(params: &CheckoutSessionParams) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("customer_email".to_string(), params.customer_email.clone()),
            ("success_url".to_string(), params.success_url.clone()),
            ("cancel_url".to_string(), params.cancel_url.clone()),
        ];

        for (i, country) in params.allowed_countries.iter().enumerate() {
            form.push((
                format!("shipping_address_collection[allowed_countries][{i}]"),
                country.clone(),
            ));
        }

        for (i, item) in params.line_items.iter().enumerate() {
            let prefix = format!("line_items[{i}]");
            form.push((
                format!("{prefix}[price_data][currency]"),
                params.currency.clone(),
            ));
            form.push((
                format!("{prefix}[price_data][unit_amount]"),
                item.unit_amount.to_string(),
            ));
            form.push((
                format!("{prefix}[price_data][product_data][name]"),
                item.name.clone(),
            ));
            if let Some(image) = &item.image {
                form.push((
                    format!("{prefix}[price_data][product_data][images][0]"),
                    image.clone(),
                ));
            }
            if let Some(id) = item.product_id {
                form.push((
                    format!("{prefix}[price_data][product_data][metadata][product_id]"),
                    id.to_string(),
                ));
            }
            form.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
        }

        for (key, value) in &params.metadata {
            form.push((format!("metadata[{key}]"), value.clone()));
        }

        form
    }

    async fn error_message(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        serde_json::from_str::<StripeErrorBody>(&body)
            .ok()
            .and_then(|b| b.error.message)
            .unwrap_or_else(|| format!("Payment provider returned {status}"))
    }
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

#[derive(Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Deserialize)]
struct StripeLineItem {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    quantity: Option<i64>,
    #[serde(default)]
    amount_total: i64,
    #[serde(default)]
    price: Option<StripePrice>,
}

#[derive(Deserialize)]
struct StripePrice {
    /// Either a bare product id or the expanded product object.
    #[serde(default)]
    product: Value,
}

fn metadata_product_id(product: &Value) -> Option<i32> {
    match product.pointer("/metadata/product_id")? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        _ => None,
    }
}

impl From<StripeLineItem> for PaidLineItem {
    fn from(item: StripeLineItem) -> Self {
        Self {
            description: item.description.unwrap_or_default(),
            quantity: item.quantity.unwrap_or(1),
            amount_total: item.amount_total,
            product_id: item.price.as_ref().and_then(|p| metadata_product_id(&p.product)),
        }
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    #[instrument(skip(self, params), fields(lines = params.line_items.len()))]
    async fn create_checkout_session(
        &self,
        params: CheckoutSessionParams,
    ) -> Result<CheckoutSession, ServiceError> {
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .basic_auth(&self.secret_key, Some(""))
            .form(&Self::form_params(&params))
            .send()
            .await
            .map_err(|e| {
                counter!("storefront_payment_provider.errors", 1);
                ServiceError::PaymentProviderError(format!("Payment provider unreachable: {e}"))
            })?;

        if !response.status().is_success() {
            counter!("storefront_payment_provider.errors", 1);
            let message = Self::error_message(response).await;
            warn!(error = %message, "checkout session creation rejected");
            return Err(ServiceError::PaymentProviderError(message));
        }

        let session: CheckoutSession = response.json().await.map_err(|e| {
            ServiceError::PaymentProviderError(format!("Unreadable payment provider response: {e}"))
        })?;
        debug!(session_id = %session.id, "checkout session created");
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn list_line_items(&self, session_id: &str) -> Result<Vec<PaidLineItem>, ServiceError> {
        let response = self
            .client
            .get(format!(
                "{}/v1/checkout/sessions/{}/line_items",
                self.api_base, session_id
            ))
            .basic_auth(&self.secret_key, Some(""))
            .query(&[("limit", "100"), ("expand[]", "data.price.product")])
            .send()
            .await
            .map_err(|e| {
                ServiceError::PaymentProviderError(format!("Payment provider unreachable: {e}"))
            })?;

        if !response.status().is_success() {
            let message = Self::error_message(response).await;
            return Err(ServiceError::PaymentProviderError(message));
        }

        let list: StripeList<StripeLineItem> = response.json().await.map_err(|e| {
            ServiceError::PaymentProviderError(format!("Unreadable line item listing: {e}"))
        })?;
        Ok(list.data.into_iter().map(PaidLineItem::from).collect())
    }
}
