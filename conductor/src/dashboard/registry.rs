//! Session Registry (part of DB, §4.16): aggregates a live handle per
//! active `LoopController` so the dashboard can list, inspect, and control
//! them without the HTTP layer knowing anything about the loop internals.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::domain::{SessionSnapshot, SessionStatus};
use crate::loopctl::LoopController;

#[derive(Clone)]
pub struct SessionHandle {
    pub controller: Arc<LoopController>,
    pub snapshot: Arc<RwLock<SessionSnapshot>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Pause,
    Resume,
    SkipTask,
    End,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, session_id: impl Into<String>, controller: Arc<LoopController>, snapshot: SessionSnapshot) {
        let session_id = session_id.into();
        let handle = SessionHandle {
            controller,
            snapshot: Arc::new(RwLock::new(snapshot)),
        };
        self.sessions.write().await.insert(session_id, handle);
    }

    pub async fn unregister(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        let sessions = self.sessions.read().await;
        let mut out = Vec::with_capacity(sessions.len());
        for handle in sessions.values() {
            out.push(handle.snapshot.read().await.clone());
        }
        out
    }

    /// Applies a dashboard control action (§6.2 `POST /api/sessions/{id}/...`).
    /// Returns `Err` when the requested transition is illegal for the
    /// session's current status, surfaced by the handler as a 409.
    pub async fn apply_control(&self, session_id: &str, action: ControlAction) -> Result<(), String> {
        let handle = self.get(session_id).await.ok_or_else(|| "session not found".to_string())?;
        let mut snapshot = handle.snapshot.write().await;

        match action {
            ControlAction::Pause => {
                if snapshot.status != SessionStatus::Active {
                    return Err(format!("cannot pause a session in status {:?}", snapshot.status));
                }
                handle.controller.pause();
                snapshot.status = SessionStatus::Paused;
            }
            ControlAction::Resume => {
                if snapshot.status != SessionStatus::Paused {
                    return Err(format!("cannot resume a session in status {:?}", snapshot.status));
                }
                handle.controller.resume();
                snapshot.status = SessionStatus::Active;
            }
            ControlAction::SkipTask => {
                if snapshot.status == SessionStatus::Ended {
                    return Err("cannot skip-task on an ended session".to_string());
                }
                handle.controller.cancellation_token().cancel();
            }
            ControlAction::End => {
                if snapshot.status == SessionStatus::Ended {
                    return Err("session already ended".to_string());
                }
                handle.controller.cancellation_token().cancel();
                snapshot.status = SessionStatus::Ended;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentInvocationResult, AgentOrchestrator, AgentRunner, InvokeOptions};
    use crate::bus::create_message_bus;
    use crate::checkpoint::CheckpointOptimizer;
    use crate::domain::TokenUsage;
    use crate::error::ConductorError;
    use crate::hil::HilDetector;
    use crate::hooks::HookPipeline;
    use crate::limits::{LimitTracker, PlanLimits};
    use crate::loopctl::{AgentRoster, LoopConfig};
    use crate::memory::MemoryStore;
    use crate::planning::CompetitivePlanner;
    use crate::quality::QualityGate;
    use crate::retrieval::ContextRetriever;
    use crate::tasks::TaskManager;
    use crate::usage::UsageTracker;
    use conductor_store::Store;
    use serde_json::Value;

    struct NoopRunner;

    #[async_trait::async_trait]
    impl AgentRunner for NoopRunner {
        async fn invoke(&self, _agent_id: &str, _instructions: &str, _inputs: Value, _options: InvokeOptions) -> Result<AgentInvocationResult, ConductorError> {
            Ok(AgentInvocationResult {
                output_text: "ok".to_string(),
                usage: TokenUsage::default(),
                model: "test-model".to_string(),
                duration_ms: 1,
            })
        }
    }

    fn make_handle() -> (Arc<LoopController>, SessionSnapshot) {
        let memory = Arc::new(MemoryStore::open_in_memory().unwrap());
        let tasks = Arc::new(TaskManager::new(memory.tasks()));
        let embedder: Arc<dyn conductor_context::EmbeddingProvider> = Arc::new(conductor_context::HashEmbedder::new(8));
        let vectors = Arc::new(conductor_context::VectorStore::in_memory());
        let retriever = Arc::new(ContextRetriever::new(memory.clone(), vectors, embedder, Default::default()));
        let bus = create_message_bus();
        let orchestrator = Arc::new(AgentOrchestrator::new(Arc::new(NoopRunner), Arc::new(HookPipeline::new()), bus.clone()));
        let controller = Arc::new(LoopController::new(
            "s1",
            tasks,
            memory,
            retriever,
            orchestrator,
            Arc::new(CompetitivePlanner::new(Default::default())),
            Arc::new(QualityGate::default()),
            Arc::new(UsageTracker::new(Arc::new(Store::open_in_memory().unwrap()))),
            Arc::new(LimitTracker::new(PlanLimits::free())),
            Arc::new(CheckpointOptimizer::new(Default::default())),
            Arc::new(HilDetector::with_builtin_patterns()),
            bus,
            LoopConfig::default(),
            AgentRoster::new(),
        ));
        let mut snapshot = SessionSnapshot::new("s1", "/tmp/project");
        snapshot.status = SessionStatus::Active;
        (controller, snapshot)
    }

    #[tokio::test]
    async fn pause_then_resume_round_trips_status() {
        let registry = SessionRegistry::new();
        let (controller, snapshot) = make_handle();
        registry.register("s1", controller, snapshot).await;

        registry.apply_control("s1", ControlAction::Pause).await.unwrap();
        assert_eq!(registry.get("s1").await.unwrap().snapshot.read().await.status, SessionStatus::Paused);

        registry.apply_control("s1", ControlAction::Resume).await.unwrap();
        assert_eq!(registry.get("s1").await.unwrap().snapshot.read().await.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn pausing_an_already_paused_session_is_rejected() {
        let registry = SessionRegistry::new();
        let (controller, snapshot) = make_handle();
        registry.register("s1", controller, snapshot).await;
        registry.apply_control("s1", ControlAction::Pause).await.unwrap();
        assert!(registry.apply_control("s1", ControlAction::Pause).await.is_err());
    }

    #[tokio::test]
    async fn unknown_session_is_rejected() {
        let registry = SessionRegistry::new();
        assert!(registry.apply_control("missing", ControlAction::Pause).await.is_err());
    }

    #[tokio::test]
    async fn ending_is_terminal() {
        let registry = SessionRegistry::new();
        let (controller, snapshot) = make_handle();
        registry.register("s1", controller, snapshot).await;
        registry.apply_control("s1", ControlAction::End).await.unwrap();
        assert!(registry.apply_control("s1", ControlAction::End).await.is_err());
    }
}
