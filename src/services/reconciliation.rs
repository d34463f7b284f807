use crate::{
    entities::order::{Model as OrderModel, OrderStatus, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    repositories::{OrderFilter, OrderPatch, OrderStore},
    services::paymob::{
        lenient_optional_string, to_minor_units, PaymentGateway, RemoteOrderId, Transaction,
        TransactionQuery,
    },
};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Identifies a payment by Paymob order id, transaction id, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLookupRequest {
    /// Paymob order id (string or number)
    #[serde(default, deserialize_with = "lenient_optional_string")]
    #[schema(value_type = Option<String>, example = "314159")]
    pub order_id: Option<String>,
    /// Paymob transaction id (string or number)
    #[serde(default, deserialize_with = "lenient_optional_string")]
    #[schema(value_type = Option<String>, example = "987654")]
    pub transaction_id: Option<String>,
}

pub type VerifyRequest = PaymentLookupRequest;
pub type ReconcileRequest = PaymentLookupRequest;

impl PaymentLookupRequest {
    /// Order id wins when both are present.
    fn query(&self) -> Result<TransactionQuery, ServiceError> {
        let non_blank = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        match (non_blank(&self.order_id), non_blank(&self.transaction_id)) {
            (Some(order_id), _) => Ok(TransactionQuery::ByOrder(RemoteOrderId::new(order_id))),
            (None, Some(transaction_id)) => Ok(TransactionQuery::ByTransaction(transaction_id)),
            (None, None) => Err(ServiceError::ValidationError(
                "orderId or transactionId is required".to_string(),
            )),
        }
    }
}

/// Provider view of a payment, without touching local state.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub success: bool,
    pub is_paid: bool,
    pub transaction_id: String,
    pub order_id: Option<String>,
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    #[schema(value_type = f64, example = 59.97)]
    pub amount: Decimal,
    /// Provider payment status, `unknown` when absent
    pub status: String,
    pub payment_method: String,
    /// Raw provider transaction
    #[schema(value_type = Object)]
    pub transaction: Value,
}

/// Outcome of a reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResult {
    pub success: bool,
    pub is_paid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    /// Local order id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_order_id: Option<Uuid>,
    /// Paymob order id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub transaction_id: String,
}

/// Settles local orders only after Paymob confirms the payment.
#[derive(Clone)]
pub struct ReconciliationService {
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<dyn OrderStore>,
    event_sender: EventSender,
    lookup_attempts: u32,
    lookup_backoff: Duration,
}

impl ReconciliationService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        orders: Arc<dyn OrderStore>,
        event_sender: EventSender,
        lookup_attempts: u32,
        lookup_backoff: Duration,
    ) -> Self {
        Self {
            gateway,
            orders,
            event_sender,
            lookup_attempts: lookup_attempts.max(1),
            lookup_backoff,
        }
    }

    async fn fetch_transaction(
        &self,
        query: TransactionQuery,
    ) -> Result<Transaction, ServiceError> {
        let token = self.gateway.authenticate().await?;
        self.gateway.query_transaction(&token, query).await
    }

    /// Looks the payment up at Paymob. Read-only.
    #[instrument(skip(self))]
    pub async fn verify(&self, request: VerifyRequest) -> Result<Verification, ServiceError> {
        let query = request.query()?;
        let queried_order = match &query {
            TransactionQuery::ByOrder(id) => Some(id.to_string()),
            TransactionQuery::ByTransaction(_) => None,
        };
        let transaction = self.fetch_transaction(query).await?;

        Ok(Verification {
            success: true,
            is_paid: transaction.is_paid(),
            transaction_id: transaction.id.clone(),
            order_id: transaction
                .remote_order_id()
                .map(|id| id.to_string())
                .or(queried_order),
            amount: transaction.amount(),
            status: transaction.payment_status().unwrap_or("unknown").to_string(),
            payment_method: transaction.payment_method().unwrap_or("unknown").to_string(),
            transaction: transaction.raw,
        })
    }

    /// Re-verifies the payment and, when Paymob reports it paid, settles the
    /// linked local order. Safe to repeat: the same values are re-applied.
    #[instrument(skip(self))]
    pub async fn reconcile(
        &self,
        request: ReconcileRequest,
    ) -> Result<ReconciliationResult, ServiceError> {
        let query = request.query()?;
        let transaction = self.fetch_transaction(query.clone()).await?;

        let remote_order_id = match &query {
            TransactionQuery::ByOrder(queried) => {
                if transaction
                    .remote_order_id()
                    .map_or(false, |id| &id != queried)
                {
                    warn!(
                        queried_order = %queried,
                        transaction_id = %transaction.id,
                        "Provider returned a transaction for a different order"
                    );
                    return Ok(self.not_settled(&transaction, Some(queried.clone())).await);
                }
                Some(queried.clone())
            }
            TransactionQuery::ByTransaction(_) => transaction.remote_order_id(),
        };

        if !transaction.is_paid() {
            return Ok(self.not_settled(&transaction, remote_order_id).await);
        }

        let remote_order_id = remote_order_id.ok_or_else(|| {
            ServiceError::provider(
                format!("transaction {} carries no order id", transaction.id),
                None,
                Some(transaction.raw.clone()),
            )
        })?;

        let order = self.locate_order(&remote_order_id).await?;
        if to_minor_units(order.total_amount).ok() != Some(transaction.amount_cents) {
            warn!(
                order_id = %order.id,
                order_total = %order.total_amount,
                paid_cents = transaction.amount_cents,
                "Paid amount differs from order total"
            );
        }

        let settled = self
            .orders
            .patch(
                order.id,
                OrderPatch {
                    payment_status: Some(PaymentStatus::Completed),
                    order_status: Some(OrderStatus::Processing),
                    paymob_transaction_id: Some(transaction.id.clone()),
                    ..Default::default()
                },
            )
            .await?;

        counter!("storefront.reconciliations", 1, "outcome" => "settled");
        info!(
            order_id = %settled.id,
            order_number = %settled.order_number,
            transaction_id = %transaction.id,
            "Order settled after payment verification"
        );
        self.event_sender
            .publish(Event::PaymentSettled {
                order_id: settled.id,
                paymob_order_id: remote_order_id.to_string(),
                transaction_id: transaction.id.clone(),
            })
            .await;

        Ok(ReconciliationResult {
            success: true,
            is_paid: true,
            order_number: Some(settled.order_number),
            db_order_id: Some(settled.id),
            order_id: Some(remote_order_id.to_string()),
            transaction_id: transaction.id,
        })
    }

    async fn not_settled(
        &self,
        transaction: &Transaction,
        remote_order_id: Option<RemoteOrderId>,
    ) -> ReconciliationResult {
        counter!("storefront.reconciliations", 1, "outcome" => "not_paid");
        info!(
            transaction_id = %transaction.id,
            success = transaction.success,
            provider_status = ?transaction.payment_status(),
            "Payment not completed; order left untouched"
        );
        self.event_sender
            .publish(Event::PaymentNotSettled {
                paymob_order_id: remote_order_id.as_ref().map(|id| id.to_string()),
                transaction_id: transaction.id.clone(),
                provider_status: transaction.payment_status().map(str::to_string),
            })
            .await;

        ReconciliationResult {
            success: true,
            is_paid: false,
            order_number: None,
            db_order_id: None,
            order_id: remote_order_id.map(|id| id.to_string()),
            transaction_id: transaction.id.clone(),
        }
    }

    /// The link written during checkout may lag; retry before giving up.
    async fn locate_order(&self, remote_order_id: &RemoteOrderId) -> Result<OrderModel, ServiceError> {
        let filter = OrderFilter {
            paymob_order_id: Some(remote_order_id.to_string()),
            ..Default::default()
        };
        for attempt in 1..=self.lookup_attempts {
            let mut found = self.orders.find_many(filter.clone()).await?;
            if !found.is_empty() {
                return Ok(found.remove(0));
            }
            if attempt < self.lookup_attempts {
                warn!(
                    paymob_order_id = %remote_order_id,
                    attempt,
                    "No local order linked yet; retrying"
                );
                tokio::time::sleep(self.lookup_backoff).await;
            }
        }

        counter!("storefront.reconciliations", 1, "outcome" => "unlinked");
        Err(ServiceError::ReconciliationError(format!(
            "no local order linked to Paymob order {} yet",
            remote_order_id
        )))
    }
}
