//! Task Manager (TM, §4.8): ordered backlog with claim/heartbeat leasing.
//!
//! Mirrors the async handle style of a `StateManager` actor, but without
//! its mpsc command queue: `conductor_store::Store` already serializes
//! access behind its own mutex, so there is no shared mutable state left
//! for an actor to own. Claim-related mutations still go through a single
//! async mutex (`write_lock`) to honor §5's "mutations to a single task's
//! lease are serialized" guarantee across concurrent callers.

use std::sync::Arc;

use chrono::{Duration, Utc};
use conductor_store::{Filter, IndexValue, Store};
use tokio::sync::{Mutex, broadcast};

use crate::domain::{Claim, Task, TaskStatus};
use crate::error::ConductorError;

const DEFAULT_MAX_CLAIM_REVERTS: i64 = 3;

#[derive(Debug, Clone)]
pub enum TaskEvent {
    Created(String),
    Claimed { task_id: String, owner: String },
    Released { task_id: String },
    Completed { task_id: String },
    Failed { task_id: String, reason: String },
}

pub struct TaskManager {
    store: Arc<Store<Task>>,
    events: broadcast::Sender<TaskEvent>,
    write_lock: Mutex<()>,
    max_claim_reverts: i64,
}

impl TaskManager {
    pub fn new(store: Arc<Store<Task>>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            events,
            write_lock: Mutex::new(()),
            max_claim_reverts: DEFAULT_MAX_CLAIM_REVERTS,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub fn list(&self) -> Result<Vec<Task>, ConductorError> {
        Ok(self.store.all()?)
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<Task>, ConductorError> {
        Ok(self.store.get(id)?)
    }

    pub fn create(&self, task: Task) -> Result<(), ConductorError> {
        self.store.put(&task)?;
        let _ = self.events.send(TaskEvent::Created(task.id));
        Ok(())
    }

    /// Tasks eligible for claiming: pending, all dependencies completed.
    /// Sorted by priority (highest first), then by creation time (oldest
    /// first) -- §4.15 step 1.
    pub fn eligible_tasks(&self) -> Result<Vec<Task>, ConductorError> {
        let pending = self.store.query_indexed(&Filter::eq("status", IndexValue::Text(format!("{:?}", TaskStatus::Pending))))?;
        let all_tasks = self.store.all()?;
        let completed_ids: std::collections::HashSet<&str> =
            all_tasks.iter().filter(|t| t.status == TaskStatus::Completed).map(|t| t.id.as_str()).collect();

        let mut eligible: Vec<Task> = pending.into_iter().filter(|t| t.dependencies.iter().all(|dep| completed_ids.contains(dep.as_str()))).collect();
        eligible.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(eligible)
    }

    pub fn next_eligible(&self) -> Result<Option<Task>, ConductorError> {
        Ok(self.eligible_tasks()?.into_iter().next())
    }

    /// Attempt to claim `task_id` for `owner` with the given lease
    /// duration. Returns `Ok(false)` on contention (not an error).
    pub async fn claim(&self, task_id: &str, owner: &str, lease: Duration) -> Result<bool, ConductorError> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let claimed = self.store.claim(task_id, owner, lease, |task| {
            if task.status.can_transition_to(TaskStatus::Claimed) {
                task.status = TaskStatus::Claimed;
                task.claim = Some(Claim {
                    owner: owner.to_string(),
                    lease_expiry: now + lease,
                    heartbeat_at: now,
                });
            }
        })?;
        if claimed {
            let _ = self.events.send(TaskEvent::Claimed {
                task_id: task_id.to_string(),
                owner: owner.to_string(),
            });
        }
        Ok(claimed)
    }

    pub async fn heartbeat(&self, task_id: &str, owner: &str, lease: Duration) -> Result<bool, ConductorError> {
        Ok(self.store.heartbeat(task_id, owner, lease)?)
    }

    pub async fn release(&self, task_id: &str) -> Result<(), ConductorError> {
        let _guard = self.write_lock.lock().await;
        self.store.release_claim(task_id)?;
        if let Some(mut task) = self.store.get(task_id)? {
            task.status = TaskStatus::Pending;
            task.claim = None;
            self.store.put(&task)?;
        }
        let _ = self.events.send(TaskEvent::Released { task_id: task_id.to_string() });
        Ok(())
    }

    /// Marks acceptance criteria transitions monotonic within an attempt;
    /// callers drive criterion-by-criterion updates before calling
    /// `complete`.
    pub async fn complete(&self, task_id: &str, result_summary: impl Into<String>, quality_score: u8) -> Result<(), ConductorError> {
        let _guard = self.write_lock.lock().await;
        let mut task = self.store.require(task_id)?;
        if !task.status.can_transition_to(TaskStatus::Completed) {
            return Err(ConductorError::InvariantViolation(format!("task {task_id} cannot transition from {:?} to completed", task.status)));
        }
        task.status = TaskStatus::Completed;
        task.claim = None;
        task.result_summary = Some(result_summary.into());
        task.quality_history.push(quality_score);
        self.store.put(&task)?;
        self.store.release_claim(task_id)?;
        let _ = self.events.send(TaskEvent::Completed { task_id: task_id.to_string() });
        Ok(())
    }

    pub async fn fail(&self, task_id: &str, reason: impl Into<String>) -> Result<(), ConductorError> {
        let _guard = self.write_lock.lock().await;
        let reason = reason.into();
        let mut task = self.store.require(task_id)?;
        task.status = TaskStatus::Failed;
        task.claim = None;
        task.result_summary = Some(reason.clone());
        task.reset_acceptance_criteria();
        self.store.put(&task)?;
        self.store.release_claim(task_id)?;
        let _ = self.events.send(TaskEvent::Failed { task_id: task_id.to_string(), reason });
        Ok(())
    }

    /// Background sweep: reverts expired leases to pending, or to failed
    /// once a task has exceeded `max_claim_reverts` (§4.1).
    pub async fn sweep_expired_claims(&self) -> Result<Vec<String>, ConductorError> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let expired = self.store.expired_claims(now)?;
        let mut swept = Vec::new();
        for claim in expired {
            let revert_count = self.store.revert_expired_claim(&claim.id)?;
            let mut task = match self.store.get(&claim.id)? {
                Some(t) => t,
                None => continue,
            };
            task.claim_failure_count = revert_count as u32;
            if revert_count > self.max_claim_reverts {
                task.status = TaskStatus::Failed;
                task.claim = None;
                task.result_summary = Some(format!("exceeded {} claim reverts", self.max_claim_reverts));
                self.store.put(&task)?;
                let _ = self.events.send(TaskEvent::Failed {
                    task_id: claim.id.clone(),
                    reason: "claim-lease-exhausted".to_string(),
                });
            } else {
                task.status = TaskStatus::Pending;
                task.claim = None;
                self.store.put(&task)?;
                let _ = self.events.send(TaskEvent::Released { task_id: claim.id.clone() });
            }
            swept.push(claim.id);
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Priority;

    fn manager() -> TaskManager {
        TaskManager::new(Arc::new(Store::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn eligible_tasks_respect_dependencies() {
        let tm = manager();
        let mut dep = Task::new("dep1", "dependency", Priority::Medium);
        dep.status = TaskStatus::Pending;
        tm.create(dep).unwrap();

        let mut task = Task::new("t1", "blocked", Priority::High);
        task.dependencies.insert("dep1".to_string());
        tm.create(task).unwrap();

        assert!(tm.eligible_tasks().unwrap().is_empty());

        tm.claim("dep1", "worker-a", Duration::minutes(5)).await.unwrap();
        tm.complete("dep1", "done", 90).await.unwrap();

        let eligible = tm.eligible_tasks().unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, "t1");
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let tm = manager();
        tm.create(Task::new("t1", "task", Priority::Medium)).unwrap();
        assert!(tm.claim("t1", "a", Duration::minutes(5)).await.unwrap());
        assert!(!tm.claim("t1", "b", Duration::minutes(5)).await.unwrap());
    }

    #[tokio::test]
    async fn sweep_reverts_expired_claim_to_pending_then_fails_after_max_reverts() {
        let tm = manager();
        tm.create(Task::new("t1", "task", Priority::Medium)).unwrap();

        for _ in 0..DEFAULT_MAX_CLAIM_REVERTS {
            tm.claim("t1", "a", Duration::milliseconds(-1)).await.unwrap();
            tm.sweep_expired_claims().await.unwrap();
        }
        tm.claim("t1", "a", Duration::milliseconds(-1)).await.unwrap();
        tm.sweep_expired_claims().await.unwrap();

        let task = tm.get_by_id("t1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }
}
