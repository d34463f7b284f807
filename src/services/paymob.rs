//! Paymob Accept API client.
//!
//! Wraps the four provider calls a checkout needs (auth token, remote order,
//! payment key, transaction inquiry) behind [`PaymentGateway`] so the
//! orchestration services can be exercised without the network.

use async_trait::async_trait;
use metrics::counter;
use reqwest::{RequestBuilder, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, error, instrument};
use url::Url;

use crate::config::PaymobConfig;
use crate::entities::order::{OrderItem, ShippingAddress};
use crate::errors::ServiceError;

/// Placeholder Paymob expects for billing fields we do not collect.
const NOT_APPLICABLE: &str = "NA";
const SHIPPING_METHOD: &str = "PKG";

/// Converts a major-unit amount to integer minor units, rounding half away from zero.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ServiceError::ValidationError(format!(
            "amount must not be negative, got {}",
            amount
        )));
    }
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|cents| cents.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|cents| cents.to_i64())
        .ok_or_else(|| ServiceError::ValidationError(format!("amount {} is out of range", amount)))
}

/// Short-lived provider auth token.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Opaque token that authorizes one hosted payment.
#[derive(Clone, PartialEq, Eq)]
pub struct PaymentToken(String);

impl PaymentToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for PaymentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PaymentToken(<redacted>)")
    }
}

/// Provider-side order id. Paymob issues integers; we carry them as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RemoteOrderId(String);

impl RemoteOrderId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wire form: numeric when the id parses as one, as Paymob expects.
    fn to_wire(&self) -> Value {
        self.0
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(self.0.clone()))
    }
}

impl fmt::Display for RemoteOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteLineItem {
    pub name: String,
    pub amount_cents: i64,
    pub description: String,
    pub quantity: u32,
}

impl RemoteLineItem {
    /// Unit price converted independently of the order total.
    pub fn from_order_item(item: &OrderItem) -> Result<Self, ServiceError> {
        Ok(Self {
            name: item.name.clone(),
            amount_cents: to_minor_units(item.price)?,
            description: item.description.clone().unwrap_or_default(),
            quantity: item.quantity,
        })
    }
}

/// The fixed billing field set Paymob requires on every payment key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillingData {
    pub apartment: String,
    pub email: String,
    pub floor: String,
    pub first_name: String,
    pub street: String,
    pub building: String,
    pub phone_number: String,
    pub shipping_method: String,
    pub postal_code: String,
    pub city: String,
    pub country: String,
    pub last_name: String,
    pub state: String,
}

impl BillingData {
    pub fn from_customer(
        customer_name: &str,
        customer_email: &str,
        shipping: &ShippingAddress,
        country: &str,
    ) -> Self {
        let mut names = customer_name.split_whitespace();
        let first_name = names.next().unwrap_or("Customer").to_string();
        let last_name = names.collect::<Vec<_>>().join(" ");
        let or_na = |value: &str| {
            if value.trim().is_empty() {
                NOT_APPLICABLE.to_string()
            } else {
                value.to_string()
            }
        };

        Self {
            apartment: NOT_APPLICABLE.into(),
            email: customer_email.to_string(),
            floor: NOT_APPLICABLE.into(),
            first_name,
            street: or_na(&shipping.address),
            building: NOT_APPLICABLE.into(),
            phone_number: or_na(&shipping.phone),
            shipping_method: SHIPPING_METHOD.into(),
            postal_code: or_na(&shipping.postal_code),
            city: or_na(&shipping.city),
            country: country.to_string(),
            last_name: if last_name.is_empty() {
                "Name".to_string()
            } else {
                last_name
            },
            state: or_na(&shipping.city),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOrderRequest {
    pub amount_cents: i64,
    pub currency: String,
    /// Our order number, echoed back by Paymob as `merchant_order_id`
    pub merchant_order_id: String,
    pub items: Vec<RemoteLineItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentKeyRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub order_id: RemoteOrderId,
    pub billing: BillingData,
}

/// How to look a transaction up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionQuery {
    ByOrder(RemoteOrderId),
    ByTransaction(String),
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

pub fn lenient_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransactionOrder {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_optional_string")]
    pub merchant_order_id: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceData {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub sub_type: Option<String>,
    #[serde(default)]
    pub pan: Option<String>,
}

/// A provider transaction as returned by the inquiry endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: String,
    pub success: bool,
    pub pending: bool,
    pub amount_cents: i64,
    pub currency: Option<String>,
    pub order: Option<TransactionOrder>,
    pub source_data: Option<SourceData>,
    /// Untouched provider payload
    pub raw: Value,
}

#[derive(Deserialize)]
struct TransactionWire {
    #[serde(deserialize_with = "lenient_string")]
    id: String,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    pending: bool,
    #[serde(default)]
    amount_cents: i64,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    order: Option<TransactionOrder>,
    #[serde(default)]
    source_data: Option<SourceData>,
}

impl Transaction {
    pub fn from_value(raw: Value) -> Result<Self, serde_json::Error> {
        let wire = TransactionWire::deserialize(&raw)?;
        Ok(Self {
            id: wire.id,
            success: wire.success,
            pending: wire.pending,
            amount_cents: wire.amount_cents,
            currency: wire.currency,
            order: wire.order,
            source_data: wire.source_data,
            raw,
        })
    }

    pub fn payment_status(&self) -> Option<&str> {
        self.order.as_ref()?.payment_status.as_deref()
    }

    /// Paid means the provider both succeeded the transaction and marked the order PAID.
    pub fn is_paid(&self) -> bool {
        self.success && self.payment_status() == Some("PAID")
    }

    pub fn remote_order_id(&self) -> Option<RemoteOrderId> {
        self.order.as_ref().map(|o| RemoteOrderId::new(o.id.clone()))
    }

    pub fn payment_method(&self) -> Option<&str> {
        self.source_data.as_ref()?.kind.as_deref()
    }

    /// Amount in major units
    pub fn amount(&self) -> Decimal {
        Decimal::new(self.amount_cents, 2)
    }
}

fn order_id_matches(candidate: &Value, order_id: &str) -> bool {
    match candidate.pointer("/order/id") {
        Some(Value::String(id)) => id == order_id,
        Some(Value::Number(id)) => id.to_string() == order_id,
        _ => false,
    }
}

fn select_candidate(candidates: Vec<Value>, order_id: Option<&str>) -> Option<Value> {
    if let Some(order_id) = order_id {
        if let Some(pos) = candidates.iter().position(|c| order_id_matches(c, order_id)) {
            return candidates.into_iter().nth(pos);
        }
    }
    candidates.into_iter().next()
}

/// Picks the transaction out of any of the inquiry response shapes:
/// `{results: [...]}`, a bare array, or a single object.
pub fn normalize_transaction(payload: Value, order_id: Option<&str>) -> Option<Value> {
    match payload {
        Value::Object(mut map) if map.get("results").map_or(false, Value::is_array) => {
            match map.remove("results") {
                Some(Value::Array(results)) => select_candidate(results, order_id),
                _ => None,
            }
        }
        Value::Array(items) => select_candidate(items, order_id),
        Value::Object(map) if !map.is_empty() => Some(Value::Object(map)),
        _ => None,
    }
}

/// Provider gateway seam.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authenticate(&self) -> Result<AuthToken, ServiceError>;

    async fn create_remote_order(
        &self,
        token: &AuthToken,
        request: RemoteOrderRequest,
    ) -> Result<RemoteOrderId, ServiceError>;

    async fn create_payment_key(
        &self,
        token: &AuthToken,
        request: PaymentKeyRequest,
    ) -> Result<PaymentToken, ServiceError>;

    /// URL of the hosted payment page for `payment_token`.
    fn hosted_payment_url(&self, payment_token: &PaymentToken) -> Result<Url, ServiceError>;

    async fn query_transaction(
        &self,
        token: &AuthToken,
        query: TransactionQuery,
    ) -> Result<Transaction, ServiceError>;

    /// Raw transaction listing, passed through untouched.
    async fn list_transactions(&self, token: &AuthToken) -> Result<Value, ServiceError>;
}

/// reqwest-backed Paymob client
#[derive(Clone)]
pub struct PaymobClient {
    client: reqwest::Client,
    config: PaymobConfig,
}

impl PaymobClient {
    pub fn new(config: PaymobConfig) -> Result<Self, ServiceError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("paymob-storefront/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ServiceError::ConfigError(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &PaymobConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Sends the request and decodes a JSON body; non-2xx becomes `ProviderError`.
    async fn send_json(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Value, ServiceError> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                counter!("paymob.requests", 1, "operation" => operation, "outcome" => "transport_error");
                error!(operation, error = %e, "Paymob request failed");
                return Err(ServiceError::provider(
                    format!("{} request failed: {}", operation, e),
                    None,
                    None,
                ));
            }
        };

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            ServiceError::provider(
                format!("{} response could not be read: {}", operation, e),
                Some(status.as_u16()),
                None,
            )
        })?;
        let payload = serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body));

        if !status.is_success() {
            counter!("paymob.requests", 1, "operation" => operation, "outcome" => "rejected");
            return Err(ServiceError::provider(
                format!("{} rejected with HTTP {}", operation, status.as_u16()),
                Some(status.as_u16()),
                Some(payload),
            ));
        }

        counter!("paymob.requests", 1, "operation" => operation, "outcome" => "ok");
        debug!(operation, status = status.as_u16(), "Paymob request succeeded");
        Ok(payload)
    }
}

fn required_field(
    operation: &str,
    payload: &Value,
    field: &str,
) -> Result<String, ServiceError> {
    match payload.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(ServiceError::provider(
            format!("{} response has no `{}`", operation, field),
            None,
            Some(payload.clone()),
        )),
    }
}

#[async_trait]
impl PaymentGateway for PaymobClient {
    #[instrument(skip(self))]
    async fn authenticate(&self) -> Result<AuthToken, ServiceError> {
        let request = self
            .client
            .post(self.endpoint("auth/tokens"))
            .json(&json!({ "api_key": self.config.api_key }));

        let payload = self
            .send_json("authenticate", request)
            .await
            .map_err(|e| ServiceError::AuthError(e.to_string()))?;

        match payload.get("token").and_then(Value::as_str) {
            Some(token) if !token.is_empty() => Ok(AuthToken::new(token)),
            _ => Err(ServiceError::AuthError(
                "auth response did not contain a token".to_string(),
            )),
        }
    }

    #[instrument(skip(self, token, request), fields(merchant_order_id = %request.merchant_order_id, amount_cents = request.amount_cents))]
    async fn create_remote_order(
        &self,
        token: &AuthToken,
        request: RemoteOrderRequest,
    ) -> Result<RemoteOrderId, ServiceError> {
        let body = json!({
            "auth_token": token.as_str(),
            "delivery_needed": self.config.delivery_needed.to_string(),
            "amount_cents": request.amount_cents,
            "currency": request.currency,
            "merchant_order_id": request.merchant_order_id,
            "items": request.items,
        });
        let payload = self
            .send_json(
                "create_remote_order",
                self.client.post(self.endpoint("ecommerce/orders")).json(&body),
            )
            .await?;

        required_field("create_remote_order", &payload, "id").map(RemoteOrderId::new)
    }

    #[instrument(skip(self, token, request), fields(order_id = %request.order_id, amount_cents = request.amount_cents))]
    async fn create_payment_key(
        &self,
        token: &AuthToken,
        request: PaymentKeyRequest,
    ) -> Result<PaymentToken, ServiceError> {
        let body = json!({
            "auth_token": token.as_str(),
            "amount_cents": request.amount_cents,
            "expiration": self.config.payment_key_expiry_secs,
            "order_id": request.order_id.to_wire(),
            "billing_data": request.billing,
            "currency": request.currency,
            "integration_id": self.config.integration_id,
        });
        let payload = self
            .send_json(
                "create_payment_key",
                self.client
                    .post(self.endpoint("acceptance/payment_keys"))
                    .json(&body),
            )
            .await?;

        required_field("create_payment_key", &payload, "token").map(PaymentToken::new)
    }

    fn hosted_payment_url(&self, payment_token: &PaymentToken) -> Result<Url, ServiceError> {
        let raw = format!(
            "{}?payment_token={}",
            self.endpoint(&format!("acceptance/iframes/{}", self.config.iframe_id)),
            payment_token.as_str()
        );
        Url::parse(&raw)
            .map_err(|e| ServiceError::ConfigError(format!("invalid payment URL {}: {}", raw, e)))
    }

    #[instrument(skip(self, token))]
    async fn query_transaction(
        &self,
        token: &AuthToken,
        query: TransactionQuery,
    ) -> Result<Transaction, ServiceError> {
        let (request, order_id) = match &query {
            TransactionQuery::ByOrder(order_id) => (
                self.client
                    .get(self.endpoint("acceptance/transactions"))
                    .query(&[("order", order_id.as_str())]),
                Some(order_id.as_str()),
            ),
            TransactionQuery::ByTransaction(transaction_id) => (
                self.client.get(self.endpoint(&format!(
                    "acceptance/transactions/{}",
                    transaction_id
                ))),
                None,
            ),
        };

        let payload = match self
            .send_json("query_transaction", request.bearer_auth(token.as_str()))
            .await
        {
            Ok(payload) => payload,
            Err(ServiceError::ProviderError {
                status: Some(status),
                ..
            }) if status == StatusCode::NOT_FOUND.as_u16() => {
                return Err(ServiceError::NotFound(format!("transaction for {:?}", query)));
            }
            Err(e) => return Err(e),
        };

        let candidate = normalize_transaction(payload, order_id)
            .ok_or_else(|| ServiceError::NotFound(format!("transaction for {:?}", query)))?;

        Transaction::from_value(candidate.clone()).map_err(|e| {
            ServiceError::provider(
                format!("unexpected transaction payload: {}", e),
                None,
                Some(candidate),
            )
        })
    }

    #[instrument(skip(self, token))]
    async fn list_transactions(&self, token: &AuthToken) -> Result<Value, ServiceError> {
        self.send_json(
            "list_transactions",
            self.client
                .get(self.endpoint("acceptance/transactions"))
                .bearer_auth(token.as_str()),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> PaymobClient {
        let mut config = PaymobConfig::new("test-key", 4242, "777");
        config.base_url = server.uri();
        PaymobClient::new(config).unwrap()
    }

    fn shipping() -> ShippingAddress {
        ShippingAddress {
            full_name: "Mona Zaki".into(),
            address: "12 Tahrir St".into(),
            city: "Cairo".into(),
            postal_code: String::new(),
            phone: "+201000000000".into(),
        }
    }

    #[test]
    fn minor_units_round_half_away_from_zero() {
        assert_eq!(to_minor_units(dec!(19.99)).unwrap(), 1999);
        assert_eq!(to_minor_units(dec!(0.005)).unwrap(), 1);
        assert_eq!(to_minor_units(dec!(10.125)).unwrap(), 1013);
        assert_eq!(to_minor_units(dec!(0)).unwrap(), 0);
        assert_matches!(
            to_minor_units(dec!(-1)),
            Err(ServiceError::ValidationError(_))
        );
    }

    proptest! {
        #[test]
        fn minor_units_preserve_two_decimal_amounts(cents in 0i64..10_000_000_000) {
            prop_assert_eq!(to_minor_units(Decimal::new(cents, 2)).unwrap(), cents);
        }
    }

    #[test]
    fn billing_data_splits_name_and_fills_placeholders() {
        let billing = BillingData::from_customer("Mona Ahmed Zaki", "m@example.com", &shipping(), "EG");
        assert_eq!(billing.first_name, "Mona");
        assert_eq!(billing.last_name, "Ahmed Zaki");
        assert_eq!(billing.postal_code, "NA");
        assert_eq!(billing.state, "Cairo");
        assert_eq!(billing.shipping_method, "PKG");

        let single = BillingData::from_customer("Cher", "c@example.com", &shipping(), "EG");
        assert_eq!(single.last_name, "Name");
        let blank = BillingData::from_customer("  ", "c@example.com", &shipping(), "EG");
        assert_eq!(blank.first_name, "Customer");
    }

    #[test]
    fn normalize_handles_every_response_shape() {
        let paginated = json!({"count": 2, "results": [
            {"id": 1, "order": {"id": 10}},
            {"id": 2, "order": {"id": 20}}
        ]});
        assert_eq!(
            normalize_transaction(paginated, Some("20")).unwrap()["id"],
            json!(2)
        );

        let bare = json!([{"id": 1, "order": {"id": "10"}}, {"id": 2, "order": {"id": 20}}]);
        assert_eq!(normalize_transaction(bare, Some("10")).unwrap()["id"], json!(1));

        let no_match = json!([{"id": 5, "order": {"id": 1}}]);
        assert_eq!(
            normalize_transaction(no_match, Some("99")).unwrap()["id"],
            json!(5)
        );

        let single = json!({"id": 7, "success": true});
        assert_eq!(normalize_transaction(single, None).unwrap()["id"], json!(7));

        assert!(normalize_transaction(json!({"results": []}), Some("1")).is_none());
        assert!(normalize_transaction(json!([]), None).is_none());
    }

    #[test]
    fn every_response_shape_yields_the_same_transaction() {
        let matching = json!({
            "id": 987654, "success": true, "pending": false, "amount_cents": 5997,
            "currency": "EGP",
            "order": {"id": 314159, "payment_status": "PAID"},
            "source_data": {"type": "card", "pan": "2346"}
        });
        let other = json!({"id": 1, "success": false, "order": {"id": 42}});

        let shapes = [
            matching.clone(),
            json!([other.clone(), matching.clone()]),
            json!({"count": 2, "next": null, "results": [other, matching]}),
        ];
        let normalized: Vec<Transaction> = shapes
            .into_iter()
            .map(|payload| {
                let picked = normalize_transaction(payload, Some("314159")).unwrap();
                Transaction::from_value(picked).unwrap()
            })
            .collect();

        assert_eq!(normalized[0], normalized[1]);
        assert_eq!(normalized[1], normalized[2]);
        assert_eq!(normalized[0].id, "987654");
        assert!(normalized[0].is_paid());
    }

    #[test]
    fn transaction_is_paid_requires_success_and_paid_status() {
        let paid = Transaction::from_value(json!({
            "id": 900, "success": true, "amount_cents": 5997,
            "order": {"id": 314, "payment_status": "PAID"},
            "source_data": {"type": "card", "sub_type": "Visa"}
        }))
        .unwrap();
        assert!(paid.is_paid());
        assert_eq!(paid.id, "900");
        assert_eq!(paid.amount(), dec!(59.97));
        assert_eq!(paid.payment_method(), Some("card"));
        assert_eq!(paid.remote_order_id(), Some(RemoteOrderId::new("314")));

        let unpaid = Transaction::from_value(json!({
            "id": "901", "success": true,
            "order": {"id": 314, "payment_status": "UNPAID"}
        }))
        .unwrap();
        assert!(!unpaid.is_paid());
    }

    #[test]
    fn tokens_are_redacted_in_debug_output() {
        assert!(!format!("{:?}", AuthToken::new("secret")).contains("secret"));
        assert!(!format!("{:?}", PaymentToken::new("secret")).contains("secret"));
    }

    #[tokio::test]
    async fn authenticate_returns_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/tokens"))
            .and(body_partial_json(json!({"api_key": "test-key"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"token": "auth-123"})))
            .expect(1)
            .mount(&server)
            .await;

        let token = client(&server).authenticate().await.unwrap();
        assert_eq!(token.as_str(), "auth-123");
    }

    #[tokio::test]
    async fn authenticate_rejection_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/tokens"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"detail": "bad key"})))
            .mount(&server)
            .await;

        assert_matches!(
            client(&server).authenticate().await,
            Err(ServiceError::AuthError(_))
        );
    }

    #[tokio::test]
    async fn create_remote_order_sends_items_and_merchant_reference() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ecommerce/orders"))
            .and(body_partial_json(json!({
                "auth_token": "auth-123",
                "delivery_needed": "true",
                "amount_cents": 5997,
                "currency": "EGP",
                "merchant_order_id": "ORD-1-ABC",
                "items": [{"name": "Mug", "amount_cents": 1999, "description": "", "quantity": 3}]
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 314159})))
            .expect(1)
            .mount(&server)
            .await;

        let remote_id = client(&server)
            .create_remote_order(
                &AuthToken::new("auth-123"),
                RemoteOrderRequest {
                    amount_cents: 5997,
                    currency: "EGP".into(),
                    merchant_order_id: "ORD-1-ABC".into(),
                    items: vec![RemoteLineItem {
                        name: "Mug".into(),
                        amount_cents: 1999,
                        description: String::new(),
                        quantity: 3,
                    }],
                },
            )
            .await
            .unwrap();
        assert_eq!(remote_id, RemoteOrderId::new("314159"));
    }

    #[tokio::test]
    async fn create_remote_order_rejection_keeps_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ecommerce/orders"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(json!({"message": "duplicate"})),
            )
            .mount(&server)
            .await;

        let result = client(&server)
            .create_remote_order(
                &AuthToken::new("auth-123"),
                RemoteOrderRequest {
                    amount_cents: 100,
                    currency: "EGP".into(),
                    merchant_order_id: "ORD-1-ABC".into(),
                    items: vec![],
                },
            )
            .await;
        assert_matches!(
            result,
            Err(ServiceError::ProviderError { status: Some(422), payload: Some(p), .. })
                if p["message"] == "duplicate"
        );
    }

    #[tokio::test]
    async fn create_payment_key_sends_integration_and_billing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/acceptance/payment_keys"))
            .and(body_partial_json(json!({
                "auth_token": "auth-123",
                "amount_cents": 5997,
                "expiration": 3600,
                "order_id": 314159,
                "currency": "EGP",
                "integration_id": 4242,
                "billing_data": {"first_name": "Mona", "last_name": "Zaki", "country": "EG"}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"token": "pay-tok"})))
            .expect(1)
            .mount(&server)
            .await;

        let token = client(&server)
            .create_payment_key(
                &AuthToken::new("auth-123"),
                PaymentKeyRequest {
                    amount_cents: 5997,
                    currency: "EGP".into(),
                    order_id: RemoteOrderId::new("314159"),
                    billing: BillingData::from_customer(
                        "Mona Zaki",
                        "m@example.com",
                        &shipping(),
                        "EG",
                    ),
                },
            )
            .await
            .unwrap();
        assert_eq!(token.as_str(), "pay-tok");
    }

    #[test]
    fn hosted_payment_url_points_at_iframe() {
        let client = PaymobClient::new(PaymobConfig::new("k", 1, "777")).unwrap();
        let url = client
            .hosted_payment_url(&PaymentToken::new("pay-tok"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://accept.paymob.com/api/acceptance/iframes/777?payment_token=pay-tok"
        );
    }

    #[tokio::test]
    async fn query_by_order_selects_matching_transaction() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/acceptance/transactions"))
            .and(query_param("order", "20"))
            .and(header("authorization", "Bearer auth-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": [
                {"id": 1, "success": false, "order": {"id": 10, "payment_status": "UNPAID"}},
                {"id": 2, "success": true, "amount_cents": 5997, "order": {"id": 20, "payment_status": "PAID"}}
            ]})))
            .mount(&server)
            .await;

        let tx = client(&server)
            .query_transaction(
                &AuthToken::new("auth-123"),
                TransactionQuery::ByOrder(RemoteOrderId::new("20")),
            )
            .await
            .unwrap();
        assert_eq!(tx.id, "2");
        assert!(tx.is_paid());
    }

    #[tokio::test]
    async fn query_by_transaction_reads_single_object() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/acceptance/transactions/900"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 900, "success": true, "order": {"id": 314, "payment_status": "PAID"}
            })))
            .mount(&server)
            .await;

        let tx = client(&server)
            .query_transaction(
                &AuthToken::new("auth-123"),
                TransactionQuery::ByTransaction("900".into()),
            )
            .await
            .unwrap();
        assert_eq!(tx.remote_order_id(), Some(RemoteOrderId::new("314")));
    }

    #[tokio::test]
    async fn query_with_no_candidates_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/acceptance/transactions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .mount(&server)
            .await;

        let result = client(&server)
            .query_transaction(
                &AuthToken::new("auth-123"),
                TransactionQuery::ByOrder(RemoteOrderId::new("20")),
            )
            .await;
        assert_matches!(result, Err(ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn query_server_error_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/acceptance/transactions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let result = client(&server)
            .query_transaction(
                &AuthToken::new("auth-123"),
                TransactionQuery::ByOrder(RemoteOrderId::new("20")),
            )
            .await;
        assert_matches!(
            result,
            Err(ServiceError::ProviderError { status: Some(500), .. })
        );
    }
}
