use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    entities::order::Model as OrderModel,
    errors::ServiceError,
    repositories::{OrderFilter, OrderPatch},
    services::orders::CreateOrderRequest,
    AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderEnvelope {
    pub order: OrderModel,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub orders: Vec<OrderModel>,
}

/// Filters for `GET /orders`; all optional, combined with AND.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct OrdersQuery {
    /// Customer email
    pub email: Option<String>,
    /// Public order number, e.g. `ORD-1718000000000-K3J9Q2ZXA`
    pub order_number: Option<String>,
    /// Paymob order id
    pub paymob_order_id: Option<String>,
}

impl From<OrdersQuery> for OrderFilter {
    fn from(query: OrdersQuery) -> Self {
        let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        OrderFilter {
            email: non_blank(query.email),
            order_number: non_blank(query.order_number),
            paymob_order_id: non_blank(query.paymob_order_id),
        }
    }
}

fn parse_order_id(raw: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(raw).map_err(|_| ServiceError::NotFound(format!("order {}", raw)))
}

#[utoipa::path(
    post,
    path = "/api/orders",
    tag = "Orders",
    summary = "Create order",
    description = "Record a pending order from a storefront cart. The total is recomputed from the items.",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = OrderEnvelope,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid order data", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderEnvelope>), ServiceError> {
    let order = state.order_service.create_order(payload).await?;
    Ok((StatusCode::CREATED, Json(OrderEnvelope { order })))
}

#[utoipa::path(
    get,
    path = "/api/orders",
    tag = "Orders",
    summary = "List orders",
    description = "Orders matching the filters, newest first",
    params(OrdersQuery),
    responses(
        (status = 200, description = "Orders retrieved", body = OrderList),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrdersQuery>,
) -> Result<Json<OrderList>, ServiceError> {
    let orders = state.order_service.list_orders(query.into()).await?;
    Ok(Json(OrderList { orders }))
}

#[utoipa::path(
    patch,
    path = "/api/orders/{id}",
    tag = "Orders",
    summary = "Update order",
    description = "Apply any subset of payment status, order status and Paymob references",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = OrderPatch,
    responses(
        (status = 200, description = "Order updated", body = OrderEnvelope),
        (status = 400, description = "Invalid update", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn update_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<OrderPatch>,
) -> Result<Json<OrderEnvelope>, ServiceError> {
    let order_id = parse_order_id(&id)?;
    let order = state.order_service.update_order(order_id, patch).await?;
    Ok(Json(OrderEnvelope { order }))
}
