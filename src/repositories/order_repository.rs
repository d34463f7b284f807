use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, SqlErr,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::{
    ActiveModel as OrderActiveModel, Column, Entity as Order, Model as OrderModel, OrderItems,
    OrderStatus, PaymentStatus, ShippingAddress,
};
use crate::errors::ServiceError;

const ORDER_NUMBER_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ORDER_NUMBER_SUFFIX_LEN: usize = 9;
const MAX_ORDER_NUMBER_ATTEMPTS: usize = 3;

/// Generates `ORD-<unix millis>-<9 uppercase base-36 chars>`.
pub fn generate_order_number() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ORDER_NUMBER_SUFFIX_LEN)
        .map(|_| ORDER_NUMBER_ALPHABET[rng.gen_range(0..ORDER_NUMBER_ALPHABET.len())] as char)
        .collect();
    format!("ORD-{}-{}", Utc::now().timestamp_millis(), suffix)
}

/// Everything needed to persist a fresh order; identifiers and statuses are assigned on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub shipping_address: ShippingAddress,
    pub items: OrderItems,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_method: Option<String>,
    pub paymob_order_id: Option<String>,
    pub paymob_transaction_id: Option<String>,
}

/// Equality filters for listing orders; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
    pub email: Option<String>,
    pub order_number: Option<String>,
    pub paymob_order_id: Option<String>,
}

/// Partial update; only present fields are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, ToSchema)]
pub struct OrderPatch {
    #[serde(default)]
    pub payment_status: Option<PaymentStatus>,
    #[serde(default)]
    pub order_status: Option<OrderStatus>,
    #[serde(default)]
    pub paymob_order_id: Option<String>,
    #[serde(default)]
    pub paymob_transaction_id: Option<String>,
}

/// Persistence seam for orders.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a pending/processing order with a fresh id and order number.
    async fn create(&self, order: NewOrder) -> Result<OrderModel, ServiceError>;

    /// Orders matching every set filter, newest first.
    async fn find_many(&self, filter: OrderFilter) -> Result<Vec<OrderModel>, ServiceError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, ServiceError>;

    /// Applies `patch` and stamps `updated_at`; `NotFound` if the order does not exist.
    async fn patch(&self, id: Uuid, patch: OrderPatch) -> Result<OrderModel, ServiceError>;
}

/// sea-orm backed order store
#[derive(Debug, Clone)]
pub struct OrderRepository {
    db: Arc<DatabaseConnection>,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn insert(&self, order: &NewOrder, order_number: String) -> Result<OrderModel, DbErr> {
        let now = Utc::now();
        let model = OrderActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(order_number),
            customer_name: Set(order.customer_name.clone()),
            customer_email: Set(order.customer_email.clone()),
            customer_phone: Set(order.customer_phone.clone()),
            shipping_address: Set(order.shipping_address.clone()),
            items: Set(order.items.clone()),
            total_amount: Set(order.total_amount),
            currency: Set(order.currency.clone()),
            payment_method: Set(order.payment_method.clone()),
            payment_status: Set(PaymentStatus::Pending),
            order_status: Set(OrderStatus::Processing),
            paymob_order_id: Set(order.paymob_order_id.clone()),
            paymob_transaction_id: Set(order.paymob_transaction_id.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        model.insert(self.db.as_ref()).await
    }
}

/// Decimal columns may round-trip through a float on SQLite.
fn normalize(mut model: OrderModel) -> OrderModel {
    model.total_amount = model.total_amount.round_dp(2);
    model
}

#[async_trait]
impl OrderStore for OrderRepository {
    #[instrument(skip(self, order), fields(customer_email = %order.customer_email))]
    async fn create(&self, order: NewOrder) -> Result<OrderModel, ServiceError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.insert(&order, generate_order_number()).await {
                Ok(model) => {
                    debug!(order_id = %model.id, order_number = %model.order_number, "Order inserted");
                    return Ok(normalize(model));
                }
                Err(e)
                    if attempt < MAX_ORDER_NUMBER_ATTEMPTS
                        && matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) =>
                {
                    warn!(attempt, "Order number collision, regenerating");
                }
                Err(e) => return Err(ServiceError::DatabaseError(e)),
            }
        }
    }

    #[instrument(skip(self))]
    async fn find_many(&self, filter: OrderFilter) -> Result<Vec<OrderModel>, ServiceError> {
        let mut query = Order::find();
        if let Some(email) = filter.email {
            query = query.filter(Column::CustomerEmail.eq(email));
        }
        if let Some(order_number) = filter.order_number {
            query = query.filter(Column::OrderNumber.eq(order_number));
        }
        if let Some(paymob_order_id) = filter.paymob_order_id {
            query = query.filter(Column::PaymobOrderId.eq(paymob_order_id));
        }

        let orders = query
            .order_by_desc(Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;
        Ok(orders.into_iter().map(normalize).collect())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
        let order = Order::find_by_id(id).one(self.db.as_ref()).await?;
        Ok(order.map(normalize))
    }

    #[instrument(skip(self))]
    async fn patch(&self, id: Uuid, patch: OrderPatch) -> Result<OrderModel, ServiceError> {
        let existing = Order::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", id)))?;

        let mut active_model: OrderActiveModel = existing.into();
        if let Some(payment_status) = patch.payment_status {
            active_model.payment_status = Set(payment_status);
        }
        if let Some(order_status) = patch.order_status {
            active_model.order_status = Set(order_status);
        }
        if let Some(paymob_order_id) = patch.paymob_order_id {
            active_model.paymob_order_id = Set(Some(paymob_order_id));
        }
        if let Some(paymob_transaction_id) = patch.paymob_transaction_id {
            active_model.paymob_transaction_id = Set(Some(paymob_transaction_id));
        }
        active_model.updated_at = Set(Utc::now());

        // The row can vanish between the read and the write
        match active_model.update(self.db.as_ref()).await {
            Ok(model) => Ok(normalize(model)),
            Err(DbErr::RecordNotUpdated) | Err(DbErr::RecordNotFound(_)) => {
                Err(ServiceError::NotFound(format!("order {}", id)))
            }
            Err(e) => Err(ServiceError::DatabaseError(e)),
        }
    }
}
