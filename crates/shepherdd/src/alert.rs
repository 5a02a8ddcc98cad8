//! Failure alerting.
//!
//! [`AlertLayer`] forwards every ERROR event to a Slack-compatible incoming
//! webhook. Events are queued without blocking the logging call site and
//! posted by a background task.

use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber, warn};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Upper bound on how long shutdown waits for queued alerts.
pub const FLUSH_DELAY: Duration = Duration::from_secs(3);

const QUEUE_DEPTH: usize = 64;

/// Tracing layer feeding the alert queue.
pub struct AlertLayer {
    tx: mpsc::Sender<String>,
    pending: Arc<AtomicUsize>,
}

/// Handle used at shutdown to let queued alerts drain.
#[derive(Clone)]
pub struct AlertHandle {
    pending: Arc<AtomicUsize>,
}

impl AlertHandle {
    /// Wait until the queue is empty, at most [`FLUSH_DELAY`].
    pub async fn flush(&self) {
        self.flush_within(FLUSH_DELAY).await;
    }

    pub async fn flush_within(&self, limit: Duration) {
        let drained = async {
            while self.pending.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        let _ = tokio::time::timeout(limit, drained).await;
    }
}

/// Build the layer and spawn its delivery task.
///
/// Must be called from within a tokio runtime.
pub fn spawn(
    webhook_url: &str,
    channel: Option<String>,
    host: &str,
) -> (AlertLayer, AlertHandle) {
    let (tx, mut rx) = mpsc::channel::<String>(QUEUE_DEPTH);
    let pending = Arc::new(AtomicUsize::new(0));

    let client = reqwest::Client::new();
    let url = webhook_url.to_string();
    let host = host.to_string();
    let task_pending = pending.clone();
    tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            let mut body = json!({ "text": format!("[{host}] {text}") });
            if let Some(channel) = &channel {
                body["channel"] = json!(channel);
            }
            match client.post(&url).json(&body).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    warn!(status = resp.status().as_u16(), "alert webhook rejected message");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "failed to deliver alert"),
            }
            task_pending.fetch_sub(1, Ordering::SeqCst);
        }
    });

    (
        AlertLayer {
            tx,
            pending: pending.clone(),
        },
        AlertHandle { pending },
    )
}

impl<S: Subscriber> Layer<S> for AlertLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.try_send(visitor.finish()).is_err() {
            // Queue full or task gone; drop rather than block the caller.
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Renders `message key=value ...`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
