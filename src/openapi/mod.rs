use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Paymob Storefront API",
        version = "1.0.0",
        description = r#"
# Paymob Storefront API

Checkout and payment orchestration for a storefront backed by the Paymob Accept gateway.

## Flow

1. `POST /api/payment` records a pending order, opens a Paymob payment session and returns the hosted payment URL.
2. The customer pays on the hosted page.
3. `POST /api/payment/reconcile` re-verifies the transaction with Paymob and only then marks the order completed.

Client-side success signals are hints to reconcile, never proof of payment.

## Error Handling

Every error uses the same body:

```json
{
  "success": false,
  "error": "Bad Request",
  "message": "Validation error: orderId or transactionId is required",
  "timestamp": "2024-06-01T00:00:00Z"
}
```

A failed checkout answers `500` with `"error": "Payment processing failed"`.
A paid payment whose order is not linked yet answers `409` with `"retryable": true`.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Order records"),
        (name = "Payments", description = "Checkout, verification and reconciliation"),
        (name = "Paymob", description = "Provider passthrough endpoints"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::update_order,

        // Payments
        crate::handlers::payments::initiate_payment,
        crate::handlers::payments::verify_payment,
        crate::handlers::payments::reconcile_payment,

        // Paymob
        crate::handlers::paymob::list_transactions,

        crate::handlers::health::health,
    ),
    components(
        schemas(
            crate::entities::order::Model,
            crate::entities::order::OrderItem,
            crate::entities::order::ShippingAddress,
            crate::entities::order::PaymentStatus,
            crate::entities::order::OrderStatus,
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::CustomerDetails,
            crate::repositories::OrderPatch,
            crate::handlers::orders::OrderEnvelope,
            crate::handlers::orders::OrderList,
            crate::services::checkout::CheckoutRequest,
            crate::services::checkout::CheckoutSession,
            crate::services::reconciliation::PaymentLookupRequest,
            crate::services::reconciliation::Verification,
            crate::services::reconciliation::ReconciliationResult,
            crate::handlers::paymob::TransactionListing,
            crate::handlers::health::HealthResponse,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
