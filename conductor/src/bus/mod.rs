//! Message Bus (MB, §4.11): in-process pub/sub for cross-component events,
//! plus a correlation-id request/response helper for callers that need a
//! single subscriber's answer rather than a broadcast.
//!
//! Grounded on the event-bus pattern of a broadcast-channel `EventBus` /
//! `EventEmitter` pair, with fault isolation added: a panicking or slow
//! subscriber callback never blocks or poisons delivery to the others,
//! since `tokio::sync::broadcast` fans a clone of each message out to
//! independent receivers rather than calling subscriber code in-line.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BusEvent {
    TaskCreated { task_id: String },
    TaskClaimed { task_id: String, owner: String },
    TaskCompleted { task_id: String },
    TaskFailed { task_id: String, reason: String },
    PlanEvaluated { task_id: String, plan_id: String, score: u8 },
    PlansCompared { task_id: String, winner_plan_id: String },
    PlansTie { task_id: String, plan_ids: Vec<String> },
    OrchestrationStarted { orchestration_id: String, pattern: String },
    OrchestrationCompleted { orchestration_id: String, success: bool },
    HilTriggered { pattern_id: String, confidence: f64 },
    CheckpointRequested { session_id: String, context_percent: f64 },
    BudgetAlert { period: String, percent: f64 },
    Custom { topic: String, payload: serde_json::Value },
}

impl BusEvent {
    pub fn topic(&self) -> std::borrow::Cow<'_, str> {
        match self {
            BusEvent::TaskCreated { .. } => "task:created".into(),
            BusEvent::TaskClaimed { .. } => "task:claimed".into(),
            BusEvent::TaskCompleted { .. } => "task:completed".into(),
            BusEvent::TaskFailed { .. } => "task:failed".into(),
            BusEvent::PlanEvaluated { .. } => "plan:evaluated".into(),
            BusEvent::PlansCompared { .. } => "plans:compared".into(),
            BusEvent::PlansTie { .. } => "plans:tie".into(),
            BusEvent::OrchestrationStarted { .. } => "orchestration:started".into(),
            BusEvent::OrchestrationCompleted { .. } => "orchestration:completed".into(),
            BusEvent::HilTriggered { .. } => "hil:triggered".into(),
            BusEvent::CheckpointRequested { .. } => "checkpoint:requested".into(),
            BusEvent::BudgetAlert { .. } => "budget:alert".into(),
            BusEvent::Custom { topic, .. } => topic.as_str().into(),
        }
    }
}

/// A request awaiting exactly one response, matched by `correlation_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusRequest {
    pub correlation_id: String,
    pub topic: String,
    pub payload: serde_json::Value,
}

pub struct MessageBus {
    tx: broadcast::Sender<BusEvent>,
    pending: Arc<std::sync::Mutex<std::collections::HashMap<String, oneshot::Sender<serde_json::Value>>>>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            pending: Arc::new(std::sync::Mutex::new(std::collections::HashMap::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget publish. No subscribers is not an error; a lagging
    /// subscriber losing old events is that subscriber's problem, not the
    /// publisher's (§4.11: a slow or failing subscriber never blocks or
    /// breaks delivery to the others).
    pub fn publish(&self, event: BusEvent) {
        debug!(topic = %event.topic(), "bus publish");
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Registers a pending request and returns its correlation id, for a
    /// caller about to `publish` a `BusRequest`-shaped event and then
    /// `await` the matching `respond`.
    fn register_pending(&self) -> (String, oneshot::Receiver<serde_json::Value>) {
        let correlation_id = Uuid::now_v7().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("bus pending-requests lock poisoned").insert(correlation_id.clone(), tx);
        (correlation_id, rx)
    }

    /// Publishes `topic`/`payload` as a request and waits up to `timeout`
    /// for exactly one `respond` call against the generated correlation id.
    pub async fn request(&self, topic: impl Into<String>, payload: serde_json::Value, timeout: Duration) -> Option<serde_json::Value> {
        let (correlation_id, rx) = self.register_pending();
        self.publish(BusEvent::Custom {
            topic: format!("request:{}", topic.into()),
            payload: serde_json::json!({ "correlation_id": correlation_id.clone(), "payload": payload }),
        });
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Some(response),
            Ok(Err(_)) => None,
            Err(_) => {
                self.pending.lock().expect("bus pending-requests lock poisoned").remove(&correlation_id);
                warn!(correlation_id, "bus request timed out");
                None
            }
        }
    }

    /// Same as [`request`](Self::request) with the default timeout.
    pub async fn request_default(&self, topic: impl Into<String>, payload: serde_json::Value) -> Option<serde_json::Value> {
        self.request(topic, payload, DEFAULT_REQUEST_TIMEOUT).await
    }

    /// Delivers a response to whichever pending `request` call is waiting
    /// on `correlation_id`; a stale or unknown id is silently dropped since
    /// the requester may have already timed out.
    pub fn respond(&self, correlation_id: &str, response: serde_json::Value) {
        if let Some(tx) = self.pending.lock().expect("bus pending-requests lock poisoned").remove(correlation_id) {
            let _ = tx.send(response);
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

pub fn create_message_bus() -> Arc<MessageBus> {
    Arc::new(MessageBus::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus = MessageBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish(BusEvent::TaskCreated { task_id: "t1".into() });
        assert_eq!(rx1.recv().await.unwrap().topic().as_ref(), "task:created");
        assert_eq!(rx2.recv().await.unwrap().topic().as_ref(), "task:created");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let bus = MessageBus::new(16);
        bus.publish(BusEvent::TaskCreated { task_id: "t1".into() });
    }

    #[tokio::test]
    async fn request_resolves_once_responded() {
        let bus = Arc::new(MessageBus::new(16));
        let mut rx = bus.subscribe();

        let responder_bus = Arc::clone(&bus);
        tokio::spawn(async move {
            let event = rx.recv().await.unwrap();
            if let BusEvent::Custom { payload, .. } = event {
                let correlation_id = payload["correlation_id"].as_str().unwrap().to_string();
                responder_bus.respond(&correlation_id, serde_json::json!({"ok": true}));
            }
        });

        let response = bus.request_default("ping", serde_json::json!({})).await;
        assert_eq!(response.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn request_times_out_without_a_responder() {
        let bus = MessageBus::new(16);
        let response = bus.request("ping", serde_json::json!({}), Duration::from_millis(20)).await;
        assert!(response.is_none());
    }
}
