//! Payment provider event payloads, limited to the fields the order pipeline reads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";

/// Envelope shared by every provider event.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: Value,
}

impl ProviderEvent {
    pub fn is_checkout_completed(&self) -> bool {
        self.event_type == CHECKOUT_SESSION_COMPLETED
    }
}

/// A field the provider sends either as a bare id or as the expanded object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    pub fn id(&self) -> &str {
        match self {
            Expandable::Id(id) | Expandable::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingDetails {
    pub name: Option<String>,
    pub address: Option<Address>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectedInformation {
    pub shipping_details: Option<ShippingDetails>,
}

/// The `data.object` of a completed checkout session.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletedSession {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<Expandable>,
    /// Captured total in minor units.
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub shipping_details: Option<ShippingDetails>,
    #[serde(default)]
    pub collected_information: Option<CollectedInformation>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub metadata: HashMap<String, String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<HashMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl CompletedSession {
    /// Dedup key: the payment intent when present, otherwise the session id.
    pub fn payment_reference(&self) -> &str {
        self.payment_intent
            .as_ref()
            .map(Expandable::id)
            .filter(|id| !id.is_empty())
            .unwrap_or(self.id.as_str())
    }

    /// Customer details first, then the session's prefilled email, then metadata.
    pub fn customer_email(&self) -> Option<&str> {
        non_empty(self.customer_details.as_ref().and_then(|c| c.email.as_deref()))
            .or_else(|| non_empty(self.customer_email.as_deref()))
            .or_else(|| non_empty(self.metadata.get("customerEmail").map(String::as_str)))
    }

    pub fn customer_name(&self) -> Option<&str> {
        non_empty(self.customer_details.as_ref().and_then(|c| c.name.as_deref()))
            .or_else(|| non_empty(self.metadata.get("customerName").map(String::as_str)))
    }

    pub fn customer_phone(&self) -> Option<&str> {
        non_empty(self.customer_details.as_ref().and_then(|c| c.phone.as_deref()))
    }

    pub fn shipping(&self) -> Option<&ShippingDetails> {
        self.collected_information
            .as_ref()
            .and_then(|c| c.shipping_details.as_ref())
            .or(self.shipping_details.as_ref())
    }

    pub fn billing_address(&self) -> Option<&Address> {
        self.customer_details.as_ref().and_then(|c| c.address.as_ref())
    }
}
