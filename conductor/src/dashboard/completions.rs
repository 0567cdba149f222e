//! Recent-completions feed (§6.2): `GET /api/sessions/summary` wants a
//! "recent completions" list, but the message bus (§4.11) is ephemeral
//! pub/sub with no replay, so this keeps its own bounded ring fed by
//! `task:completed` events.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::bus::{BusEvent, MessageBus};

const CAPACITY: usize = 50;

pub struct CompletionsLog {
    entries: Mutex<VecDeque<String>>,
}

impl CompletionsLog {
    pub fn new() -> Self {
        Self { entries: Mutex::new(VecDeque::new()) }
    }

    async fn record(&self, task_id: &str) {
        let mut entries = self.entries.lock().await;
        entries.push_back(format!("{} {task_id}", Utc::now().to_rfc3339()));
        while entries.len() > CAPACITY {
            entries.pop_front();
        }
    }

    pub async fn snapshot(&self) -> Vec<String> {
        self.entries.lock().await.iter().cloned().collect()
    }

    /// Subscribes to `bus` and appends every `task:completed` event until
    /// the bus is dropped. Spawned once per dashboard process.
    pub fn spawn_listener(self: Arc<Self>, bus: Arc<MessageBus>) {
        tokio::spawn(async move {
            let mut rx = bus.subscribe();
            loop {
                match rx.recv().await {
                    Ok(BusEvent::TaskCompleted { task_id }) => self.record(&task_id).await,
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "completions log lagged behind the bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

impl Default for CompletionsLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::create_message_bus;

    #[tokio::test]
    async fn records_task_completed_events_in_order() {
        let bus = create_message_bus();
        let log = Arc::new(CompletionsLog::new());
        log.clone().spawn_listener(bus.clone());

        bus.publish(BusEvent::TaskCompleted { task_id: "t1".to_string() });
        bus.publish(BusEvent::TaskCompleted { task_id: "t2".to_string() });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let entries = log.snapshot().await;
        assert_eq!(entries.len(), 2);
        assert!(entries[0].contains("t1"));
        assert!(entries[1].contains("t2"));
    }

    #[tokio::test]
    async fn ignores_other_event_kinds() {
        let bus = create_message_bus();
        let log = Arc::new(CompletionsLog::new());
        log.clone().spawn_listener(bus.clone());

        bus.publish(BusEvent::TaskCreated { task_id: "t1".to_string() });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(log.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn caps_at_capacity() {
        let bus = create_message_bus();
        let log = Arc::new(CompletionsLog::new());
        log.clone().spawn_listener(bus.clone());

        for i in 0..(CAPACITY + 5) {
            bus.publish(BusEvent::TaskCompleted { task_id: format!("t{i}") });
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(log.snapshot().await.len() <= CAPACITY);
    }
}
