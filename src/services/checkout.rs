use crate::{
    entities::order::OrderItem,
    errors::{CheckoutStage, ServiceError},
    events::{Event, EventSender},
    repositories::{OrderPatch, OrderStore},
    services::{
        orders::{build_new_order, CustomerDetails},
        paymob::{
            to_minor_units, BillingData, PaymentGateway, PaymentKeyRequest, RemoteLineItem,
            RemoteOrderRequest,
        },
    },
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Body of `POST /payment`
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub items: Vec<OrderItem>,
    /// Cart total shown to the customer; recomputed server-side
    #[schema(value_type = f64, example = 59.97)]
    pub total: Decimal,
    #[serde(flatten)]
    #[validate]
    pub customer: CustomerDetails,
    #[serde(default)]
    pub payment_method: Option<String>,
}

/// A ready-to-open payment session.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub success: bool,
    /// Hosted payment page to open in a popup or redirect to
    pub payment_url: String,
    /// Paymob order id
    #[serde(rename = "orderId")]
    pub remote_order_id: String,
    pub payment_token: String,
    /// Local order id
    #[serde(rename = "dbOrderId")]
    pub local_order_id: Uuid,
    pub order_number: String,
}

/// Runs the checkout sequence against the order store and the payment gateway.
#[derive(Clone)]
pub struct CheckoutService {
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<dyn OrderStore>,
    event_sender: EventSender,
    currency: String,
    country: String,
}

impl CheckoutService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        orders: Arc<dyn OrderStore>,
        event_sender: EventSender,
        currency: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            orders,
            event_sender,
            currency: currency.into(),
            country: country.into(),
        }
    }

    /// Creates the local order, opens a Paymob payment session for it and
    /// returns the hosted payment URL.
    ///
    /// Validation happens before any side effect. Once the local order exists,
    /// every failure is reported as `CheckoutFailed` with the step that broke;
    /// the order stays `pending` for later reconciliation or cleanup.
    #[instrument(skip(self, request), fields(customer_email = %request.customer.customer_email, items = request.items.len()))]
    pub async fn initiate_checkout(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let new_order = build_new_order(
            &request.customer,
            request.items,
            request.total,
            self.currency.clone(),
            request.payment_method,
        )?;
        let amount_cents = to_minor_units(new_order.total_amount)?;
        let line_items = new_order
            .items
            .0
            .iter()
            .map(RemoteLineItem::from_order_item)
            .collect::<Result<Vec<_>, _>>()?;

        let order = self
            .orders
            .create(new_order)
            .await
            .map_err(|e| fail(CheckoutStage::CreateLocalOrder, None, e))?;
        info!(order_id = %order.id, order_number = %order.order_number, amount_cents, "Local order created");
        self.event_sender
            .publish(Event::OrderCreated {
                order_id: order.id,
                order_number: order.order_number.clone(),
            })
            .await;

        let token = self
            .gateway
            .authenticate()
            .await
            .map_err(|e| fail(CheckoutStage::Authenticate, Some(order.id), e))?;

        let remote_order_id = self
            .gateway
            .create_remote_order(
                &token,
                RemoteOrderRequest {
                    amount_cents,
                    currency: order.currency.clone(),
                    merchant_order_id: order.order_number.clone(),
                    items: line_items,
                },
            )
            .await
            .map_err(|e| fail(CheckoutStage::CreateRemoteOrder, Some(order.id), e))?;

        // Recovery checkpoint: reconciliation joins on this id
        self.orders
            .patch(
                order.id,
                OrderPatch {
                    paymob_order_id: Some(remote_order_id.to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| fail(CheckoutStage::LinkRemoteOrder, Some(order.id), e))?;
        self.event_sender
            .publish(Event::RemoteOrderLinked {
                order_id: order.id,
                paymob_order_id: remote_order_id.to_string(),
            })
            .await;

        let billing = BillingData::from_customer(
            &order.customer_name,
            &order.customer_email,
            &order.shipping_address,
            &self.country,
        );
        let payment_token = self
            .gateway
            .create_payment_key(
                &token,
                PaymentKeyRequest {
                    amount_cents,
                    currency: order.currency.clone(),
                    order_id: remote_order_id.clone(),
                    billing,
                },
            )
            .await
            .map_err(|e| fail(CheckoutStage::CreatePaymentKey, Some(order.id), e))?;

        let payment_url = self
            .gateway
            .hosted_payment_url(&payment_token)
            .map_err(|e| fail(CheckoutStage::BuildPaymentUrl, Some(order.id), e))?;

        info!(
            order_id = %order.id,
            paymob_order_id = %remote_order_id,
            "Checkout session ready"
        );
        self.event_sender
            .publish(Event::CheckoutInitiated {
                order_id: order.id,
                paymob_order_id: remote_order_id.to_string(),
            })
            .await;

        Ok(CheckoutSession {
            success: true,
            payment_url: payment_url.to_string(),
            remote_order_id: remote_order_id.to_string(),
            payment_token: payment_token.into_inner(),
            local_order_id: order.id,
            order_number: order.order_number,
        })
    }
}

fn fail(stage: CheckoutStage, order_id: Option<Uuid>, source: ServiceError) -> ServiceError {
    error!(%stage, ?order_id, error = %source, "Checkout step failed");
    ServiceError::checkout_failed(stage, source)
}
