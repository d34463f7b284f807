//! HTTP handlers. Each one takes [`AppState`](crate::AppState) and returns
//! `Result<_, ServiceError>`; errors render through `ServiceError::into_response`.

pub mod health;
pub mod orders;
pub mod paymob;
pub mod payments;
