#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use paymob_storefront::{
    build_router,
    config::{AppConfig, PaymobConfig},
    db::{self, DbConfig},
    events::{self, EventSender},
    services::paymob::PaymobClient,
    AppState,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

pub const INTEGRATION_ID: u64 = 4242;
pub const IFRAME_ID: &str = "777";

/// Application wired to an in-memory SQLite database and a mock Paymob server.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub paymob: MockServer,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let paymob = MockServer::start().await;

        let mut paymob_cfg = PaymobConfig::new("test-api-key", INTEGRATION_ID, IFRAME_ID);
        paymob_cfg.base_url = paymob.uri();
        paymob_cfg.reconcile_lookup_attempts = 2;
        paymob_cfg.reconcile_lookup_backoff_ms = 5;

        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
            paymob_cfg,
        );

        let pool = db::establish_connection_with_config(&DbConfig::sqlite_memory())
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway =
            Arc::new(PaymobClient::new(cfg.paymob.clone()).expect("paymob client for tests"));
        let state = AppState::new(Arc::new(pool), cfg, gateway, EventSender::new(event_tx));

        Self {
            router: build_router(state.clone()),
            state,
            paymob,
            _event_task: event_task,
        }
    }

    /// Send a request against the router with an optional JSON body.
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn mount_auth(&self) {
        Mock::given(method("POST"))
            .and(path("/auth/tokens"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"token": "auth-token"})))
            .mount(&self.paymob)
            .await;
    }

    pub async fn mount_remote_order(&self, remote_order_id: u64) {
        Mock::given(method("POST"))
            .and(path("/ecommerce/orders"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": remote_order_id})),
            )
            .mount(&self.paymob)
            .await;
    }

    pub async fn mount_payment_key(&self, status: u16, body: Value) {
        Mock::given(method("POST"))
            .and(path("/acceptance/payment_keys"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.paymob)
            .await;
    }

    /// Transaction inquiry by Paymob order id.
    pub async fn mount_order_transactions(&self, remote_order_id: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path("/acceptance/transactions"))
            .and(query_param("order", remote_order_id))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.paymob)
            .await;
    }
}

/// A valid storefront cart totalling 59.97.
pub fn cart_body() -> Value {
    json!({
        "customerName": "Mona Zaki",
        "customerEmail": "mona@example.com",
        "customerPhone": "+201000000000",
        "shippingAddress": {
            "fullName": "Mona Zaki",
            "address": "12 Tahrir St",
            "city": "Cairo",
            "postalCode": "11511",
            "phone": "+201000000000"
        },
        "items": [
            {"id": 1, "name": "Mug", "price": 19.99, "quantity": 3, "description": "Ceramic"}
        ]
    })
}

/// Paymob transaction payload for `remote_order_id`.
pub fn transaction(id: u64, remote_order_id: u64, success: bool, payment_status: &str) -> Value {
    json!({
        "id": id,
        "success": success,
        "pending": false,
        "amount_cents": 5997,
        "currency": "EGP",
        "order": {"id": remote_order_id, "payment_status": payment_status},
        "source_data": {"type": "card", "sub_type": "MasterCard", "pan": "2346"}
    })
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
