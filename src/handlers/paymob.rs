use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::{errors::ServiceError, AppState};

/// Raw Paymob transaction listing.
#[derive(Debug, Serialize, ToSchema)]
pub struct TransactionListing {
    pub success: bool,
    #[schema(value_type = Object)]
    pub data: Value,
    /// Entries in `data` when it is a list, else 0
    pub count: usize,
}

impl TransactionListing {
    fn from_payload(data: Value) -> Self {
        let count = data.as_array().map_or(0, Vec::len);
        Self {
            success: true,
            data,
            count,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/paymob/transactions",
    tag = "Paymob",
    summary = "List Paymob transactions",
    description = "Passes the provider's transaction listing through untouched",
    responses(
        (status = 200, description = "Provider listing", body = TransactionListing),
        (status = 502, description = "Payment provider error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn list_transactions(
    State(state): State<AppState>,
) -> Result<Json<TransactionListing>, ServiceError> {
    let token = state.gateway.authenticate().await?;
    let data = state.gateway.list_transactions(&token).await?;
    Ok(Json(TransactionListing::from_payload(data)))
}
