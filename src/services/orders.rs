use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, SqlErr,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        order, order_item, product, Order, OrderItem, OrderItemModel, OrderModel, OrderStatus,
        Product, ProductModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::OrderNotifier,
};

/// Upper bound on any order listing.
pub const MAX_LIST_LIMIT: u64 = 200;
pub const DEFAULT_LIST_LIMIT: u64 = 50;

/// Order row built from a completed payment, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    /// External payment reference; the natural dedup key.
    pub payment_reference: String,
    pub session_id: Option<String>,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub shipping_address: Option<String>,
    pub billing_address: Option<String>,
    pub total_amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderItem {
    pub order_id: Uuid,
    pub product_id: i32,
    pub quantity: i32,
    /// Per-unit amount actually charged.
    pub price: Decimal,
    pub size: Option<String>,
}

/// Result of [`OrderStore::record_payment_if_new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    pub order: OrderModel,
    /// `false` when the payment reference was already recorded.
    pub created: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
    pub email: Option<String>,
    pub status: Option<OrderStatus>,
    pub limit: Option<u64>,
}

impl OrderFilter {
    fn effective_limit(&self) -> u64 {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }
}

/// Persistence seam for the order pipeline.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts the order unless one already exists for its payment reference.
    /// Concurrent calls with the same reference yield exactly one `created: true`.
    async fn record_payment_if_new(&self, order: NewOrder) -> Result<RecordOutcome, DbErr>;

    async fn insert_item(&self, item: NewOrderItem) -> Result<OrderItemModel, DbErr>;

    async fn find_product(&self, id: i32) -> Result<Option<ProductModel>, DbErr>;

    async fn find_product_by_name(&self, name: &str) -> Result<Option<ProductModel>, DbErr>;

    async fn find_order(&self, id: Uuid) -> Result<Option<OrderModel>, DbErr>;

    /// Newest first.
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<OrderModel>, DbErr>;

    /// Items for the given orders with their product, when it still exists.
    async fn items_for_orders(
        &self,
        order_ids: &[Uuid],
    ) -> Result<Vec<(OrderItemModel, Option<ProductModel>)>, DbErr>;

    async fn set_status(
        &self,
        order: OrderModel,
        status: OrderStatus,
        dispatched_at: Option<DateTime<Utc>>,
    ) -> Result<OrderModel, DbErr>;
}

/// [`OrderStore`] backed by sea-orm. The unique index on
/// `orders.stripe_payment_intent_id` is the only concurrency guard.
#[derive(Clone)]
pub struct SeaOrmOrderStore {
    db: Arc<DbPool>,
}

impl SeaOrmOrderStore {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<OrderModel>, DbErr> {
        Order::find()
            .filter(order::Column::StripePaymentIntentId.eq(reference))
            .one(&*self.db)
            .await
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

#[async_trait]
impl OrderStore for SeaOrmOrderStore {
    async fn record_payment_if_new(&self, new: NewOrder) -> Result<RecordOutcome, DbErr> {
        if let Some(existing) = self.find_by_payment_reference(&new.payment_reference).await? {
            return Ok(RecordOutcome {
                order: existing,
                created: false,
            });
        }

        let now = Utc::now();
        let reference = new.payment_reference.clone();
        let active = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_email: Set(new.customer_email),
            customer_name: Set(new.customer_name),
            customer_phone: Set(new.customer_phone),
            shipping_address: Set(new.shipping_address),
            billing_address: Set(new.billing_address),
            status: Set(OrderStatus::Pending),
            total_amount: Set(new.total_amount),
            currency: Set(new.currency),
            stripe_payment_intent_id: Set(new.payment_reference),
            stripe_session_id: Set(new.session_id),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            dispatched_at: Set(None),
        };

        match active.insert(&*self.db).await {
            Ok(order) => Ok(RecordOutcome {
                order,
                created: true,
            }),
            // Lost the race against a concurrent delivery of the same event
            Err(err) if is_unique_violation(&err) => {
                match self.find_by_payment_reference(&reference).await? {
                    Some(order) => Ok(RecordOutcome {
                        order,
                        created: false,
                    }),
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn insert_item(&self, item: NewOrderItem) -> Result<OrderItemModel, DbErr> {
        order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(item.order_id),
            product_id: Set(item.product_id),
            quantity: Set(item.quantity),
            price: Set(item.price),
            size: Set(item.size),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
    }

    async fn find_product(&self, id: i32) -> Result<Option<ProductModel>, DbErr> {
        Product::find_by_id(id).one(&*self.db).await
    }

    async fn find_product_by_name(&self, name: &str) -> Result<Option<ProductModel>, DbErr> {
        Product::find()
            .filter(product::Column::Name.eq(name))
            .order_by_asc(product::Column::Id)
            .one(&*self.db)
            .await
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<OrderModel>, DbErr> {
        Order::find_by_id(id).one(&*self.db).await
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<OrderModel>, DbErr> {
        let mut query = Order::find();
        if let Some(email) = &filter.email {
            query = query.filter(order::Column::CustomerEmail.eq(email.as_str()));
        }
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }
        query
            .order_by_desc(order::Column::CreatedAt)
            .limit(filter.effective_limit())
            .all(&*self.db)
            .await
    }

    async fn items_for_orders(
        &self,
        order_ids: &[Uuid],
    ) -> Result<Vec<(OrderItemModel, Option<ProductModel>)>, DbErr> {
        if order_ids.is_empty() {
            return Ok(Vec::new());
        }
        OrderItem::find()
            .filter(order_item::Column::OrderId.is_in(order_ids.iter().copied()))
            .order_by_asc(order_item::Column::CreatedAt)
            .find_also_related(Product)
            .all(&*self.db)
            .await
    }

    async fn set_status(
        &self,
        order: OrderModel,
        status: OrderStatus,
        dispatched_at: Option<DateTime<Utc>>,
    ) -> Result<OrderModel, DbErr> {
        let mut active: order::ActiveModel = order.into();
        active.status = Set(status);
        active.updated_at = Set(Some(Utc::now()));
        if dispatched_at.is_some() {
            active.dispatched_at = Set(dispatched_at);
        }
        active.update(&*self.db).await
    }
}

/// Minimal product projection nested under order items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProductSummary {
    pub id: i32,
    pub name: String,
    pub brand: Option<String>,
    pub image_url: Option<String>,
}

impl From<ProductModel> for ProductSummary {
    fn from(p: ProductModel) -> Self {
        Self {
            id: p.id,
            name: p.name,
            brand: p.brand,
            image_url: p.image_url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderItemView {
    pub id: Uuid,
    pub product_id: i32,
    pub quantity: i32,
    #[schema(value_type = String, example = "500.00")]
    pub price: Decimal,
    pub size: Option<String>,
    pub product: Option<ProductSummary>,
}

/// Order as returned by the query endpoints. Field names follow the stored columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub shipping_address: Option<serde_json::Value>,
    #[schema(value_type = Option<Object>)]
    pub billing_address: Option<serde_json::Value>,
    pub status: OrderStatus,
    #[schema(value_type = String, example = "500.00")]
    pub total_amount: Decimal,
    pub currency: String,
    pub stripe_payment_intent_id: String,
    pub stripe_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItemView>,
}

fn parse_address(raw: Option<String>) -> Option<serde_json::Value> {
    raw.map(|text| serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)))
}

impl OrderView {
    fn from_parts(order: OrderModel, items: Vec<OrderItemView>) -> Self {
        Self {
            id: order.id,
            customer_email: order.customer_email,
            customer_name: order.customer_name,
            customer_phone: order.customer_phone,
            shipping_address: parse_address(order.shipping_address),
            billing_address: parse_address(order.billing_address),
            status: order.status,
            total_amount: order.total_amount,
            currency: order.currency,
            stripe_payment_intent_id: order.stripe_payment_intent_id,
            stripe_session_id: order.stripe_session_id,
            created_at: order.created_at,
            updated_at: order.updated_at,
            dispatched_at: order.dispatched_at,
            items,
        }
    }
}

/// Read and status-transition operations for the storefront and back office.
#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    notifier: OrderNotifier,
    event_sender: Option<EventSender>,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        notifier: OrderNotifier,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            store,
            notifier,
            event_sender,
        }
    }

    async fn publish(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.publish(event).await;
        }
    }

    async fn with_items(&self, orders: Vec<OrderModel>) -> Result<Vec<OrderView>, ServiceError> {
        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut grouped: HashMap<Uuid, Vec<OrderItemView>> = HashMap::new();
        for (item, product) in self.store.items_for_orders(&ids).await? {
            grouped.entry(item.order_id).or_default().push(OrderItemView {
                id: item.id,
                product_id: item.product_id,
                quantity: item.quantity,
                price: item.price,
                size: item.size,
                product: product.map(ProductSummary::from),
            });
        }
        Ok(orders
            .into_iter()
            .map(|order| {
                let items = grouped.remove(&order.id).unwrap_or_default();
                OrderView::from_parts(order, items)
            })
            .collect())
    }

    async fn load(&self, id: Uuid) -> Result<OrderModel, ServiceError> {
        self.store
            .find_order(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))
    }

    /// Orders matching the filter, newest first, with nested items.
    #[instrument(skip(self))]
    pub async fn list(&self, filter: OrderFilter) -> Result<Vec<OrderView>, ServiceError> {
        let orders = self.store.list_orders(&filter).await?;
        self.with_items(orders).await
    }

    pub async fn get(&self, id: Uuid) -> Result<OrderView, ServiceError> {
        let order = self.load(id).await?;
        self.view(order).await
    }

    /// Moves an order along its lifecycle. Backward moves and moves out of a terminal
    /// status are rejected with `InvalidStatus`.
    #[instrument(skip(self), fields(order_id = %id, to = %status))]
    pub async fn update_status(&self, id: Uuid, status: OrderStatus) -> Result<OrderView, ServiceError> {
        let (order, _) = self.transition(id, status).await?;
        self.view(order).await
    }

    /// Marks the order dispatched and emails the customer, or `notify_email` when given.
    /// The email is best-effort and is not repeated for an order that was already dispatched.
    #[instrument(skip(self), fields(order_id = %id))]
    pub async fn dispatch(&self, id: Uuid, notify_email: Option<String>) -> Result<OrderView, ServiceError> {
        let (order, from) = self.transition(id, OrderStatus::Dispatched).await?;
        if from == OrderStatus::Dispatched {
            info!("order already dispatched; skipping dispatch email");
        } else {
            let to = notify_email
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| order.customer_email.clone());
            if !self.notifier.order_dispatched(&order, &to).await {
                error!(order_id = %id, "dispatch email not delivered; follow up manually");
            }
        }
        self.view(order).await
    }

    /// Applies a status change and returns the stored order with its previous status.
    async fn transition(
        &self,
        id: Uuid,
        status: OrderStatus,
    ) -> Result<(OrderModel, OrderStatus), ServiceError> {
        let order = self.load(id).await?;
        let from = order.status;
        if !from.can_transition_to(status) {
            warn!(%from, to = %status, "rejected order status transition");
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot transition order from '{}' to '{}'",
                from, status
            )));
        }
        if from == status {
            return Ok((order, from));
        }

        let dispatched_at = (status == OrderStatus::Dispatched).then(Utc::now);
        let updated = self.store.set_status(order, status, dispatched_at).await?;
        info!(%from, to = %status, "order status updated");
        self.publish(Event::OrderStatusChanged {
            order_id: id,
            from,
            to: status,
        })
        .await;
        if let Some(at) = dispatched_at {
            self.publish(Event::OrderDispatched {
                order_id: id,
                dispatched_at: at,
            })
            .await;
        }
        Ok((updated, from))
    }

    async fn view(&self, order: OrderModel) -> Result<OrderView, ServiceError> {
        let mut views = self.with_items(vec![order]).await?;
        views
            .pop()
            .ok_or_else(|| ServiceError::InternalError("order view lost".to_string()))
    }
}
