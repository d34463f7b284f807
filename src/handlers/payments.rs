use axum::{extract::State, Json};

use crate::{
    errors::ServiceError,
    services::{
        checkout::{CheckoutRequest, CheckoutSession},
        reconciliation::{ReconcileRequest, ReconciliationResult, Verification, VerifyRequest},
    },
    AppState,
};

#[utoipa::path(
    post,
    path = "/api/payment",
    tag = "Payments",
    summary = "Start checkout",
    description = "Creates the local order and a Paymob payment session, returning the hosted payment URL",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Payment session created", body = CheckoutSession),
        (status = 400, description = "Invalid cart or customer data", body = crate::errors::ErrorResponse),
        (status = 500, description = "Payment processing failed", body = crate::errors::ErrorResponse),
    )
)]
pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<Json<CheckoutSession>, ServiceError> {
    let session = state.checkout_service.initiate_checkout(payload).await?;
    Ok(Json(session))
}

#[utoipa::path(
    post,
    path = "/api/payment/verify",
    tag = "Payments",
    summary = "Verify payment",
    description = "Reads the transaction state from Paymob without changing any order",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Provider view of the payment", body = Verification),
        (status = 400, description = "Neither orderId nor transactionId given", body = crate::errors::ErrorResponse),
        (status = 404, description = "No matching transaction", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<Verification>, ServiceError> {
    let verification = state.reconciliation_service.verify(payload).await?;
    Ok(Json(verification))
}

#[utoipa::path(
    post,
    path = "/api/payment/reconcile",
    tag = "Payments",
    summary = "Reconcile payment",
    description = "Re-verifies the payment with Paymob and settles the linked order when it is paid. Safe to repeat.",
    request_body = ReconcileRequest,
    responses(
        (status = 200, description = "Reconciliation result", body = ReconciliationResult),
        (status = 400, description = "Neither orderId nor transactionId given", body = crate::errors::ErrorResponse),
        (status = 404, description = "No matching transaction", body = crate::errors::ErrorResponse),
        (status = 409, description = "Paid, but the local order is not linked yet; retry", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn reconcile_payment(
    State(state): State<AppState>,
    Json(payload): Json<ReconcileRequest>,
) -> Result<Json<ReconciliationResult>, ServiceError> {
    let result = state.reconciliation_service.reconcile(payload).await?;
    Ok(Json(result))
}
