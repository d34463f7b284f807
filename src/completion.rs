//! Detects the end of a hosted payment session.
//!
//! The hosted page runs in a separate window. Completion is signalled either by
//! the landing page posting a [`CompletionMessage`] back to the opener, or by
//! the window simply closing. [`CompletionListener::wait`] watches both and
//! resolves with exactly one [`CompletionOutcome`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::form_urlencoded;

use crate::services::paymob::lenient_optional_string;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const SUCCESS_PATH: &str = "/payment/success";

/// Reading another origin's window state is refused by the host.
#[derive(Debug, Clone, thiserror::Error)]
#[error("payment window is not accessible from this origin")]
pub struct WindowAccessError;

/// Handle to the window showing the hosted payment page.
#[cfg_attr(test, mockall::automock)]
pub trait PaymentWindow: Send + Sync {
    fn is_closed(&self) -> Result<bool, WindowAccessError>;
    fn close(&self);
}

/// A cross-window message as delivered by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowMessage {
    pub origin: String,
    pub data: Value,
}

/// Payload the landing page posts back to the opener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionMessage {
    #[serde(rename_all = "camelCase")]
    PaymentSuccess {
        #[serde(default, deserialize_with = "lenient_optional_string")]
        order_id: Option<String>,
        #[serde(default, deserialize_with = "lenient_optional_string")]
        transaction_id: Option<String>,
        #[serde(default)]
        order_number: Option<String>,
    },
    PaymentFailed {
        #[serde(default)]
        error: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Succeeded {
        order_id: Option<String>,
        transaction_id: Option<String>,
        order_number: Option<String>,
    },
    Failed {
        error: Option<String>,
    },
    /// Closed without a message; the landing page has to re-verify.
    WindowClosed { order_id: String },
}

impl From<CompletionMessage> for CompletionOutcome {
    fn from(message: CompletionMessage) -> Self {
        match message {
            CompletionMessage::PaymentSuccess {
                order_id,
                transaction_id,
                order_number,
            } => CompletionOutcome::Succeeded {
                order_id,
                transaction_id,
                order_number,
            },
            CompletionMessage::PaymentFailed { error } => CompletionOutcome::Failed { error },
        }
    }
}

impl CompletionOutcome {
    /// Where to navigate next. The landing page must re-verify with the
    /// server; this path proves nothing about the payment.
    pub fn return_path(&self) -> Option<String> {
        let mut query = form_urlencoded::Serializer::new(String::new());
        match self {
            CompletionOutcome::Succeeded {
                order_id,
                transaction_id,
                ..
            } => {
                if let Some(order_id) = order_id {
                    query.append_pair("order_id", order_id);
                }
                if let Some(transaction_id) = transaction_id {
                    query.append_pair("transaction_id", transaction_id);
                }
            }
            CompletionOutcome::WindowClosed { order_id } => {
                query.append_pair("order_id", order_id);
            }
            CompletionOutcome::Failed { .. } => return None,
        }
        query.append_pair("success", "true");
        Some(format!("{}?{}", SUCCESS_PATH, query.finish()))
    }

    fn closes_window(&self) -> bool {
        !matches!(self, CompletionOutcome::WindowClosed { .. })
    }
}

/// Waits for one hosted payment session to finish.
#[derive(Debug, Clone)]
pub struct CompletionListener {
    expected_origin: String,
    remote_order_id: String,
    poll_interval: Duration,
}

impl CompletionListener {
    pub fn new(expected_origin: impl Into<String>, remote_order_id: impl Into<String>) -> Self {
        Self {
            expected_origin: expected_origin.into(),
            remote_order_id: remote_order_id.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Resolves with whichever happens first: a recognised same-origin
    /// message, or the window closing. Both watchers are stopped before
    /// returning.
    pub async fn wait(
        &self,
        window: Arc<dyn PaymentWindow>,
        mut messages: mpsc::Receiver<WindowMessage>,
    ) -> CompletionOutcome {
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<CompletionOutcome>(2);

        let poller = {
            let window = window.clone();
            let outcome_tx = outcome_tx.clone();
            let interval = self.poll_interval;
            let order_id = self.remote_order_id.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    match window.is_closed() {
                        Ok(true) => {
                            let _ = outcome_tx
                                .send(CompletionOutcome::WindowClosed { order_id })
                                .await;
                            return;
                        }
                        Ok(false) => {}
                        Err(e) => debug!(error = %e, "Payment window still pending"),
                    }
                }
            })
        };

        let listener = {
            let expected_origin = self.expected_origin.clone();
            tokio::spawn(async move {
                while let Some(message) = messages.recv().await {
                    if message.origin != expected_origin {
                        debug!(origin = %message.origin, "Ignoring message from foreign origin");
                        continue;
                    }
                    match serde_json::from_value::<CompletionMessage>(message.data) {
                        Ok(completion) => {
                            let _ = outcome_tx.send(completion.into()).await;
                            return;
                        }
                        Err(_) => debug!("Ignoring unrecognised window message"),
                    }
                }
            })
        };

        // The poller never stops without sending unless it panics.
        let outcome = outcome_rx
            .recv()
            .await
            .unwrap_or_else(|| CompletionOutcome::WindowClosed {
                order_id: self.remote_order_id.clone(),
            });
        poller.abort();
        listener.abort();

        if outcome.closes_window() {
            window.close();
        }
        info!(?outcome, "Payment session finished");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const ORIGIN: &str = "https://shop.example.com";

    #[derive(Default)]
    struct FakeWindow {
        closed: AtomicBool,
        denied_reads: AtomicUsize,
        close_calls: AtomicUsize,
    }

    impl PaymentWindow for FakeWindow {
        fn is_closed(&self) -> Result<bool, WindowAccessError> {
            if self
                .denied_reads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(WindowAccessError);
            }
            Ok(self.closed.load(Ordering::SeqCst))
        }

        fn close(&self) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn listener() -> CompletionListener {
        CompletionListener::new(ORIGIN, "314159").with_poll_interval(Duration::from_millis(5))
    }

    fn message(origin: &str, data: Value) -> WindowMessage {
        WindowMessage {
            origin: origin.into(),
            data,
        }
    }

    #[tokio::test]
    async fn success_message_wins_and_closes_window() {
        let window = Arc::new(FakeWindow::default());
        let (tx, rx) = mpsc::channel(4);
        tx.send(message(
            ORIGIN,
            json!({"type": "PAYMENT_SUCCESS", "orderId": 314159, "transactionId": "987654", "orderNumber": "ORD-1-A"}),
        ))
        .await
        .unwrap();

        let outcome = listener().wait(window.clone(), rx).await;

        assert_eq!(
            outcome,
            CompletionOutcome::Succeeded {
                order_id: Some("314159".into()),
                transaction_id: Some("987654".into()),
                order_number: Some("ORD-1-A".into()),
            }
        );
        assert_eq!(
            outcome.return_path().as_deref(),
            Some("/payment/success?order_id=314159&transaction_id=987654&success=true")
        );
        assert_eq!(window.close_calls.load(Ordering::SeqCst), 1);

        // the message listener has been torn down
        tokio::time::timeout(Duration::from_secs(1), tx.closed())
            .await
            .expect("listener task should be aborted");
    }

    #[tokio::test]
    async fn foreign_origin_and_unknown_payloads_are_ignored() {
        let window = Arc::new(FakeWindow::default());
        let (tx, rx) = mpsc::channel(4);
        tx.send(message("https://evil.example.com", json!({"type": "PAYMENT_SUCCESS"})))
            .await
            .unwrap();
        tx.send(message(ORIGIN, json!({"type": "SOMETHING_ELSE"})))
            .await
            .unwrap();
        tx.send(message(ORIGIN, json!("not an object"))).await.unwrap();

        let closer = window.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            closer.closed.store(true, Ordering::SeqCst);
        });

        let outcome = listener().wait(window.clone(), rx).await;
        assert_eq!(
            outcome,
            CompletionOutcome::WindowClosed {
                order_id: "314159".into()
            }
        );
        assert_eq!(
            outcome.return_path().as_deref(),
            Some("/payment/success?order_id=314159&success=true")
        );
        assert_eq!(window.close_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cross_origin_reads_count_as_pending() {
        let window = Arc::new(FakeWindow {
            denied_reads: AtomicUsize::new(3),
            ..Default::default()
        });
        window.closed.store(true, Ordering::SeqCst);
        let (_tx, rx) = mpsc::channel(1);

        let outcome = listener().wait(window.clone(), rx).await;
        assert_matches::assert_matches!(outcome, CompletionOutcome::WindowClosed { .. });
        assert_eq!(window.denied_reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_message_has_no_return_path() {
        let window = Arc::new(FakeWindow::default());
        let (tx, rx) = mpsc::channel(1);
        tx.send(message(
            ORIGIN,
            json!({"type": "PAYMENT_FAILED", "error": "card declined"}),
        ))
        .await
        .unwrap();

        let outcome = listener().wait(window.clone(), rx).await;
        assert_eq!(
            outcome,
            CompletionOutcome::Failed {
                error: Some("card declined".into())
            }
        );
        assert!(outcome.return_path().is_none());
        assert_eq!(window.close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_message_stream_falls_back_to_polling() {
        let mut window = MockPaymentWindow::new();
        let mut reads = 0;
        window.expect_is_closed().returning(move || {
            reads += 1;
            Ok(reads > 2)
        });
        window.expect_close().never();
        let (tx, rx) = mpsc::channel(1);
        drop(tx);

        let outcome = listener().wait(Arc::new(window), rx).await;
        assert_matches::assert_matches!(outcome, CompletionOutcome::WindowClosed { .. });
    }

    #[test]
    fn completion_message_uses_type_tag() {
        let value = serde_json::to_value(CompletionMessage::PaymentFailed { error: None }).unwrap();
        assert_eq!(value["type"], "PAYMENT_FAILED");
    }
}
