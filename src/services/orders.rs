use crate::{
    entities::order::{Model as OrderModel, OrderItem, OrderItems, ShippingAddress},
    errors::ServiceError,
    events::{Event, EventSender},
    repositories::{NewOrder, OrderFilter, OrderPatch, OrderStore},
    services::paymob::{lenient_optional_string, to_minor_units},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Who is buying and where it ships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDetails {
    #[validate(length(min = 1, max = 200, message = "Customer name is required"))]
    pub customer_name: String,
    #[validate(email(message = "Customer email must be a valid address"))]
    pub customer_email: String,
    #[validate(length(min = 1, max = 30, message = "Customer phone is required"))]
    pub customer_phone: String,
    #[validate]
    pub shipping_address: ShippingAddress,
}

/// Body of `POST /orders`
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(flatten)]
    #[validate]
    pub customer: CustomerDetails,
    pub items: Vec<OrderItem>,
    /// Client-computed total; must agree with the items
    #[schema(value_type = f64, example = 59.97)]
    pub total_amount: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    /// Links the order to an existing Paymob order
    #[serde(default, deserialize_with = "lenient_optional_string")]
    #[schema(value_type = Option<String>)]
    pub paymob_order_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_optional_string")]
    #[schema(value_type = Option<String>)]
    pub paymob_transaction_id: Option<String>,
}

/// Checks the cart lines: at least one, each well-formed, no negative prices.
pub fn validate_line_items(items: &[OrderItem]) -> Result<(), ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::ValidationError(
            "at least one item is required".to_string(),
        ));
    }
    for (index, item) in items.iter().enumerate() {
        item.validate().map_err(|e| {
            ServiceError::ValidationError(format!("items[{}]: {}", index, e))
        })?;
        if item.price.is_sign_negative() && !item.price.is_zero() {
            return Err(ServiceError::ValidationError(format!(
                "items[{}]: price must not be negative",
                index
            )));
        }
    }
    Ok(())
}

/// Validates the order inputs and recomputes the total from the items.
///
/// The claimed total is compared in minor units so float noise from the
/// storefront (e.g. `0.30000000000000004`) does not cause a false mismatch.
pub fn build_new_order(
    customer: &CustomerDetails,
    items: Vec<OrderItem>,
    claimed_total: Decimal,
    currency: String,
    payment_method: Option<String>,
) -> Result<NewOrder, ServiceError> {
    customer.validate()?;
    validate_line_items(&items)?;

    let items = OrderItems(items);
    let computed_total = items
        .total()
        .ok_or_else(|| ServiceError::ValidationError("amount out of range".to_string()))?;
    if to_minor_units(claimed_total)? != to_minor_units(computed_total)? {
        return Err(ServiceError::ValidationError(format!(
            "total {} does not match the sum of the items ({})",
            claimed_total, computed_total
        )));
    }

    Ok(NewOrder {
        customer_name: customer.customer_name.trim().to_string(),
        customer_email: customer.customer_email.trim().to_string(),
        customer_phone: customer.customer_phone.trim().to_string(),
        shipping_address: customer.shipping_address.clone(),
        items,
        total_amount: computed_total.round_dp(2),
        currency,
        payment_method: payment_method.filter(|m| !m.trim().is_empty()),
        paymob_order_id: None,
        paymob_transaction_id: None,
    })
}

/// Service for the order record endpoints
#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    event_sender: EventSender,
    default_currency: String,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        event_sender: EventSender,
        default_currency: impl Into<String>,
    ) -> Self {
        Self {
            orders,
            event_sender,
            default_currency: default_currency.into(),
        }
    }

    /// Creates a pending order from a storefront cart
    #[instrument(skip(self, request), fields(customer_email = %request.customer.customer_email))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderModel, ServiceError> {
        let currency = request
            .currency
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| self.default_currency.clone());
        let new_order = build_new_order(
            &request.customer,
            request.items,
            request.total_amount,
            currency,
            request.payment_method,
        )?;
        let new_order = NewOrder {
            paymob_order_id: request.paymob_order_id,
            paymob_transaction_id: request.paymob_transaction_id,
            ..new_order
        };

        let order = self.orders.create(new_order).await?;
        info!(order_id = %order.id, order_number = %order.order_number, "Order created");

        self.event_sender
            .publish(Event::OrderCreated {
                order_id: order.id,
                order_number: order.order_number.clone(),
            })
            .await;
        Ok(order)
    }

    /// Lists orders matching the filter, newest first
    #[instrument(skip(self))]
    pub async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<OrderModel>, ServiceError> {
        self.orders.find_many(filter).await
    }

    /// Applies a partial update to an order
    #[instrument(skip(self))]
    pub async fn update_order(
        &self,
        order_id: Uuid,
        patch: OrderPatch,
    ) -> Result<OrderModel, ServiceError> {
        if patch.paymob_order_id.as_deref().map_or(false, |id| id.trim().is_empty()) {
            return Err(ServiceError::ValidationError(
                "paymob_order_id must not be empty".to_string(),
            ));
        }

        let order = self.orders.patch(order_id, patch).await.map_err(|e| {
            if !matches!(e, ServiceError::NotFound(_)) {
                warn!(order_id = %order_id, error = %e, "Order update failed");
            }
            e
        })?;

        self.event_sender
            .publish(Event::OrderUpdated { order_id: order.id })
            .await;
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::order_repository::MockOrderStore;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn customer() -> CustomerDetails {
        CustomerDetails {
            customer_name: "Mona Zaki".into(),
            customer_email: "mona@example.com".into(),
            customer_phone: "+201000000000".into(),
            shipping_address: ShippingAddress {
                full_name: "Mona Zaki".into(),
                address: "12 Tahrir St".into(),
                city: "Cairo".into(),
                postal_code: "11511".into(),
                phone: "+201000000000".into(),
            },
        }
    }

    fn item(price: Decimal, quantity: u32) -> OrderItem {
        OrderItem {
            id: json!(1),
            name: "Mug".into(),
            price,
            quantity,
            description: None,
            image: None,
        }
    }

    fn service(store: MockOrderStore) -> OrderService {
        let (tx, _rx) = mpsc::channel(16);
        OrderService::new(Arc::new(store), EventSender::new(tx), "EGP")
    }

    #[test]
    fn build_new_order_recomputes_total() {
        let order = build_new_order(
            &customer(),
            vec![item(dec!(0.1), 1), item(dec!(0.2), 1)],
            dec!(0.30000000000000004),
            "EGP".into(),
            Some("card".into()),
        )
        .unwrap();
        assert_eq!(order.total_amount, dec!(0.30));
    }

    #[test]
    fn build_new_order_rejects_total_mismatch() {
        let result = build_new_order(
            &customer(),
            vec![item(dec!(19.99), 3)],
            dec!(10.00),
            "EGP".into(),
            None,
        );
        assert_matches!(result, Err(ServiceError::ValidationError(msg)) if msg.contains("does not match"));
    }

    #[test]
    fn build_new_order_rejects_bad_inputs() {
        let mut bad_email = customer();
        bad_email.customer_email = "not-an-email".into();
        assert_matches!(
            build_new_order(&bad_email, vec![item(dec!(1), 1)], dec!(1), "EGP".into(), None),
            Err(ServiceError::ValidationError(_))
        );

        assert_matches!(
            build_new_order(&customer(), vec![], dec!(0), "EGP".into(), None),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            build_new_order(&customer(), vec![item(dec!(1), 0)], dec!(0), "EGP".into(), None),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            build_new_order(&customer(), vec![item(dec!(-1), 1)], dec!(-1), "EGP".into(), None),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[tokio::test]
    async fn create_order_does_not_touch_store_when_invalid() {
        let mut store = MockOrderStore::new();
        store.expect_create().never();

        let request = CreateOrderRequest {
            customer: customer(),
            items: vec![item(dec!(5), 2)],
            total_amount: dec!(11),
            currency: None,
            payment_method: None,
            paymob_order_id: None,
            paymob_transaction_id: None,
        };
        assert_matches!(
            service(store).create_order(request).await,
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn build_new_order_rejects_overflowing_amounts() {
        let huge = Decimal::MAX / Decimal::TWO + Decimal::ONE;
        let result = build_new_order(
            &customer(),
            vec![item(huge, 2)],
            dec!(1),
            "EGP".into(),
            None,
        );
        assert_matches!(result, Err(ServiceError::ValidationError(msg)) if msg == "amount out of range");

        let result = build_new_order(
            &customer(),
            vec![item(Decimal::MAX, 1), item(dec!(1), 1)],
            dec!(1),
            "EGP".into(),
            None,
        );
        assert_matches!(result, Err(ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn create_order_keeps_supplied_paymob_ids() {
        let mut store = MockOrderStore::new();
        store
            .expect_create()
            .withf(|order| {
                order.paymob_order_id.as_deref() == Some("314159")
                    && order.paymob_transaction_id.as_deref() == Some("987654")
            })
            .times(1)
            .returning(|_| Err(ServiceError::InternalError("stop".into())));

        let request = CreateOrderRequest {
            customer: customer(),
            items: vec![item(dec!(5), 2)],
            total_amount: dec!(10),
            currency: None,
            payment_method: None,
            paymob_order_id: Some("314159".into()),
            paymob_transaction_id: Some("987654".into()),
        };
        assert_matches!(
            service(store).create_order(request).await,
            Err(ServiceError::InternalError(_))
        );
    }

    #[tokio::test]
    async fn update_order_propagates_not_found() {
        let mut store = MockOrderStore::new();
        store
            .expect_patch()
            .returning(|id, _| Err(ServiceError::NotFound(format!("order {}", id))));

        let result = service(store)
            .update_order(Uuid::new_v4(), OrderPatch::default())
            .await;
        assert_matches!(result, Err(ServiceError::NotFound(_)));
    }

    #[test]
    fn create_order_request_reads_camel_case_body() {
        let request: CreateOrderRequest = serde_json::from_value(json!({
            "customerName": "Mona Zaki",
            "customerEmail": "mona@example.com",
            "customerPhone": "+201000000000",
            "shippingAddress": {
                "fullName": "Mona Zaki", "address": "12 Tahrir St",
                "city": "Cairo", "postalCode": "11511", "phone": "+201000000000"
            },
            "items": [{"id": 1, "name": "Mug", "price": 19.99, "quantity": 3}],
            "totalAmount": 59.97,
            "paymobOrderId": 314159
        }))
        .unwrap();
        assert_eq!(request.total_amount, dec!(59.97));
        assert_eq!(request.items[0].price, dec!(19.99));
        assert_eq!(request.customer.customer_name, "Mona Zaki");
        assert_eq!(request.paymob_order_id.as_deref(), Some("314159"));
        assert_eq!(request.paymob_transaction_id, None);
    }
}
