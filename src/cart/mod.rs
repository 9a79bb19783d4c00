//! Shopping cart state for a single browser session.
//!
//! The cart is a pure reducer over a closed command set: every command takes the current
//! [`CartState`] and yields a new one. Commands never fail; bad input is clamped or ignored.
//! [`CartStore`] wraps the reducer with local persistence so the cart survives reloads.
//! Nothing here is trusted by the server: checkout re-prices every line.

mod storage;

pub use storage::{CartStorage, CartStorageError, JsonFileCartStorage, MemoryCartStorage};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::services::checkout::{CheckoutCustomer, CheckoutItem, CheckoutRequest};

/// One purchasable item in the cart. At most one line exists per `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub image: String,
    pub current_price: Decimal,
    #[serde(default)]
    pub original_price: Option<Decimal>,
    #[serde(default)]
    pub size: String,
    pub quantity: u32,
}

impl CartLine {
    /// Price times quantity, or `None` when the product does not fit a `Decimal`.
    pub fn line_total(&self) -> Option<Decimal> {
        self.current_price.checked_mul(Decimal::from(self.quantity))
    }
}

/// Payload of an add-item command; `quantity` defaults to one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemInput {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub image: String,
    pub current_price: Decimal,
    #[serde(default)]
    pub original_price: Option<Decimal>,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub quantity: Option<i64>,
}

impl From<CartLine> for CartItemInput {
    fn from(line: CartLine) -> Self {
        Self {
            id: line.id,
            name: line.name,
            brand: line.brand,
            image: line.image,
            current_price: line.current_price,
            original_price: line.original_price,
            size: line.size,
            quantity: Some(i64::from(line.quantity)),
        }
    }
}

/// The closed set of cart mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CartCommand {
    AddItem(CartItemInput),
    RemoveItem { id: i64 },
    UpdateQuantity { id: i64, quantity: i64 },
    Clear,
}

/// Cart contents plus projections that are recomputed on every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartState {
    items: Vec<CartLine>,
    item_count: u64,
    total: Decimal,
}

impl CartState {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Rebuilds a state from untrusted lines (e.g. local storage), merging duplicate ids
    /// and dropping anything an add-item command would reject.
    pub fn from_lines(lines: impl IntoIterator<Item = CartLine>) -> Self {
        lines.into_iter().fold(Self::empty(), |state, line| {
            reduce(&state, CartCommand::AddItem(line.into()))
        })
    }

    /// Recomputes the projections; `None` when the total would overflow.
    fn with_items(items: Vec<CartLine>) -> Option<Self> {
        let item_count = items.iter().map(|l| u64::from(l.quantity)).sum();
        let total = items.iter().try_fold(Decimal::ZERO, |acc, line| {
            line.line_total().and_then(|t| acc.checked_add(t))
        })?;
        Some(Self {
            items,
            item_count,
            total,
        })
    }

    pub fn items(&self) -> &[CartLine] {
        &self.items
    }

    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn line(&self, id: i64) -> Option<&CartLine> {
        self.items.iter().find(|l| l.id == id)
    }
}

fn clamp_quantity(quantity: i64) -> u32 {
    u32::try_from(quantity.max(1)).unwrap_or(u32::MAX)
}

/// Applies one command to `state`, returning the next state. A command whose result
/// cannot be priced leaves the state unchanged.
pub fn reduce(state: &CartState, command: CartCommand) -> CartState {
    match command {
        CartCommand::AddItem(input) => {
            if input.current_price.is_sign_negative() {
                return state.clone();
            }
            let id = input.id;
            let added = clamp_quantity(input.quantity.unwrap_or(1));
            let mut items = state.items.clone();
            match items.iter_mut().find(|l| l.id == id) {
                Some(existing) => {
                    existing.quantity = existing.quantity.saturating_add(added);
                }
                None => items.push(CartLine {
                    id,
                    name: input.name,
                    brand: input.brand,
                    image: input.image,
                    current_price: input.current_price,
                    original_price: input.original_price,
                    size: input.size,
                    quantity: added,
                }),
            }
            CartState::with_items(items).unwrap_or_else(|| {
                warn!(id, "ignoring cart line whose total overflows");
                state.clone()
            })
        }
        CartCommand::RemoveItem { id } => {
            if state.line(id).is_none() {
                return state.clone();
            }
            let items = state.items.iter().filter(|l| l.id != id).cloned().collect();
            CartState::with_items(items).unwrap_or_else(|| state.clone())
        }
        CartCommand::UpdateQuantity { id, quantity } if quantity <= 0 => {
            reduce(state, CartCommand::RemoveItem { id })
        }
        CartCommand::UpdateQuantity { id, quantity } => {
            let mut items = state.items.clone();
            match items.iter_mut().find(|l| l.id == id) {
                Some(line) => line.quantity = clamp_quantity(quantity),
                None => return state.clone(),
            }
            CartState::with_items(items).unwrap_or_else(|| {
                warn!(id, quantity, "ignoring quantity whose cart total overflows");
                state.clone()
            })
        }
        CartCommand::Clear => CartState::empty(),
    }
}

/// Authoritative cart for one visitor: the reducer plus local persistence.
///
/// Persistence failures are logged and never surface to the caller; the in-memory
/// state stays correct and the next successful save catches storage up.
#[derive(Debug)]
pub struct CartStore<S: CartStorage> {
    state: CartState,
    storage: S,
}

impl<S: CartStorage> CartStore<S> {
    /// Opens the store, restoring whatever the storage holds. Unreadable storage
    /// starts an empty cart.
    pub fn open(storage: S) -> Self {
        let state = match storage.load() {
            Ok(Some(lines)) => CartState::from_lines(lines),
            Ok(None) => CartState::empty(),
            Err(err) => {
                warn!(error = %err, "discarding unreadable persisted cart");
                CartState::empty()
            }
        };
        Self { state, storage }
    }

    pub fn state(&self) -> &CartState {
        &self.state
    }

    pub fn dispatch(&mut self, command: CartCommand) -> &CartState {
        self.state = reduce(&self.state, command);
        if let Err(err) = self.storage.save(self.state.items()) {
            warn!(error = %err, "failed to persist cart");
        }
        &self.state
    }

    pub fn add_item(&mut self, item: CartItemInput) -> &CartState {
        self.dispatch(CartCommand::AddItem(item))
    }

    pub fn remove_item(&mut self, id: i64) -> &CartState {
        self.dispatch(CartCommand::RemoveItem { id })
    }

    pub fn update_quantity(&mut self, id: i64, quantity: i64) -> &CartState {
        self.dispatch(CartCommand::UpdateQuantity { id, quantity })
    }

    pub fn clear(&mut self) -> &CartState {
        self.dispatch(CartCommand::Clear)
    }

    /// Snapshot of the cart as a checkout request body, or `None` for an empty cart.
    /// Carries no total: the server prices the order itself.
    pub fn checkout_request(&self, customer: CheckoutCustomer) -> Option<CheckoutRequest> {
        if self.state.is_empty() {
            return None;
        }
        let items = self
            .state
            .items()
            .iter()
            .map(|line| CheckoutItem {
                id: line.id,
                name: line.name.clone(),
                brand: Some(line.brand.clone()).filter(|b| !b.is_empty()),
                size: Some(line.size.clone()).filter(|s| !s.is_empty()),
                image: Some(line.image.clone()).filter(|i| !i.is_empty()),
                current_price: Some(line.current_price),
                price: None,
                quantity: Some(i64::from(line.quantity)),
            })
            .collect();
        Some(CheckoutRequest {
            items,
            customer: Some(customer),
        })
    }

    /// Clears the cart once the visitor has been handed off to the payment provider.
    pub fn complete_checkout(&mut self) -> &CartState {
        self.clear()
    }

    pub fn into_storage(self) -> S {
        self.storage
    }
}
