//! Paymob storefront backend
//!
//! Order records, checkout orchestration against the Paymob Accept gateway and
//! verification-first payment reconciliation.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod completion;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod repositories;
pub mod services;
pub mod tracing;

use axum::{
    routing::{get, patch, post},
    Router,
};
use std::{sync::Arc, time::Duration};
use tower_http::timeout::TimeoutLayer;

use crate::{
    db::DbPool,
    events::EventSender,
    repositories::{OrderRepository, OrderStore},
    services::{
        checkout::CheckoutService, orders::OrderService, paymob::PaymentGateway,
        reconciliation::ReconciliationService,
    },
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: config::AppConfig,
    pub order_service: OrderService,
    pub checkout_service: CheckoutService,
    pub reconciliation_service: ReconciliationService,
    pub gateway: Arc<dyn PaymentGateway>,
}

impl AppState {
    /// Wires every service over one order store and one gateway.
    pub fn new(
        db: Arc<DbPool>,
        config: config::AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
    ) -> Self {
        let orders: Arc<dyn OrderStore> = Arc::new(OrderRepository::new(db.clone()));
        let paymob = &config.paymob;

        let order_service =
            OrderService::new(orders.clone(), event_sender.clone(), paymob.currency.clone());
        let checkout_service = CheckoutService::new(
            gateway.clone(),
            orders.clone(),
            event_sender.clone(),
            paymob.currency.clone(),
            paymob.country.clone(),
        );
        let reconciliation_service = ReconciliationService::new(
            gateway.clone(),
            orders,
            event_sender,
            paymob.reconcile_lookup_attempts,
            paymob.reconcile_lookup_backoff(),
        );

        Self {
            db,
            config,
            order_service,
            checkout_service,
            reconciliation_service,
            gateway,
        }
    }
}

/// Storefront API routes, mounted under `/api`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/orders",
            post(handlers::orders::create_order).get(handlers::orders::list_orders),
        )
        .route("/orders/:id", patch(handlers::orders::update_order))
        .route("/payment", post(handlers::payments::initiate_payment))
        .route("/payment/verify", post(handlers::payments::verify_payment))
        .route(
            "/payment/reconcile",
            post(handlers::payments::reconcile_payment),
        )
        .route(
            "/paymob/transactions",
            get(handlers::paymob::list_transactions),
        )
}

/// Full application router: API, health, docs and the request-scoped layers.
/// CORS and compression are left to the binary.
pub fn build_router(state: AppState) -> Router {
    let request_timeout = Duration::from_secs(state.config.request_timeout_secs);

    Router::new()
        .route("/", get(|| async { "paymob-storefront up" }))
        .route("/health", get(handlers::health::health))
        .nest("/api", api_routes())
        .merge(openapi::swagger_ui())
        .layer(TimeoutLayer::new(request_timeout))
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::http_trace_layer())
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}
