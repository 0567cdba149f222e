//! Agent Orchestrator (AO, §4.14): executes one orchestration against one
//! of five collaboration patterns, delegating individual LLM calls to an
//! [`AgentRunner`] the caller supplies.
//!
//! State machine per orchestration: `init -> contextLoading -> executing ->
//! synthesizing -> persisting -> done`, with `error` reachable from any
//! non-terminal state. A `beforeExecution` hook failure is the only path
//! to `error` here; a pattern finishing with `success: false` (not enough
//! agents agreed, reviewers never approved) still reaches `done` — that is
//! a normal, informative outcome, not a failure of the orchestrator itself.

pub mod definition;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::{BusEvent, MessageBus};
use crate::domain::{Pattern, Task, TokenUsage};
use crate::error::ConductorError;
use crate::hooks::HookPipeline;

pub use definition::{AgentDefinition, AgentLoadError, AgentLoadOutcome, load_agent_definitions};

#[derive(Debug, Clone)]
pub struct InvokeOptions {
    pub timeout: Duration,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            temperature: None,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentInvocationResult {
    pub output_text: String,
    pub usage: TokenUsage,
    pub model: String,
    pub duration_ms: u64,
}

/// The one operation the orchestrator depends on (§6.1). Implementations
/// classify their own failures as retriable (`ConductorError::Transient`,
/// `RateLimited`) or fatal (`FatalAgent`) — the orchestrator never guesses.
#[async_trait::async_trait]
pub trait AgentRunner: Send + Sync {
    async fn invoke(&self, agent_id: &str, instructions: &str, inputs: Value, options: InvokeOptions) -> Result<AgentInvocationResult, ConductorError>;
}

/// An [`AgentRunner`] that echoes its inputs back as output text, with
/// token usage estimated from input/output length. No real model-provider
/// integration ships in this core (§6.1's `invoke()` is the abstract
/// boundary); this is the one concrete runner `start` can wire up so the
/// loop controller and dashboard have an end-to-end path to exercise
/// without one configured.
#[derive(Debug, Default)]
pub struct EchoRunner;

impl EchoRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl AgentRunner for EchoRunner {
    async fn invoke(&self, agent_id: &str, instructions: &str, inputs: Value, _options: InvokeOptions) -> Result<AgentInvocationResult, ConductorError> {
        let output_text = format!("[echo:{agent_id}] {inputs}");
        Ok(AgentInvocationResult {
            usage: TokenUsage {
                input: (instructions.len() / 4) as u64,
                output: (output_text.len() / 4) as u64,
                cache_create: 0,
                cache_read: 0,
            },
            output_text,
            model: "echo".to_string(),
            duration_ms: 1,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

async fn invoke_with_retry(runner: &dyn AgentRunner, agent_id: &str, instructions: &str, inputs: Value, options: InvokeOptions, retry: &RetryPolicy) -> Result<AgentInvocationResult, ConductorError> {
    let mut attempt = 0u32;
    loop {
        match runner.invoke(agent_id, instructions, inputs.clone(), options.clone()).await {
            Ok(result) => return Ok(result),
            Err(err) if err.is_retriable() && attempt + 1 < retry.max_attempts => {
                let delay = backoff_with_jitter(retry.base_delay, attempt);
                warn!(agent_id, attempt, delay_ms = delay.as_millis() as u64, error = %err, "agent call failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn backoff_with_jitter(base: Duration, attempt: u32) -> Duration {
    use rand::Rng;
    let exp_ms = base.as_millis() as u64 * 2u64.saturating_pow(attempt);
    let mut rng = rand::rng();
    let jitter_ms = rng.random_range(0..=(exp_ms / 2 + 1));
    Duration::from_millis(exp_ms + jitter_ms)
}

/// One agent's contribution to an orchestration.
#[derive(Debug, Clone)]
pub struct AgentOutput {
    pub agent_id: String,
    pub output_text: String,
    pub usage: TokenUsage,
    pub model: String,
    pub duration_ms: u64,
    pub succeeded: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusAggregation {
    Majority,
    Weighted,
    Unanimous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsembleSelector {
    BestOf,
    Merge,
    Vote,
}

#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub retry: RetryPolicy,
    /// Parallel: minimum successful outputs required. `None` means "all".
    pub min_success: Option<usize>,
    pub consensus_aggregation: ConsensusAggregation,
    pub consensus_threshold: f64,
    pub agent_weights: HashMap<String, f64>,
    pub debate_rounds: u32,
    pub synthesizer: Option<String>,
    pub review_rounds: u32,
    /// Review: approvals required to close. `None` means "all reviewers".
    pub min_approvals: Option<u32>,
    pub ensemble_selector: EnsembleSelector,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            min_success: None,
            consensus_aggregation: ConsensusAggregation::Majority,
            consensus_threshold: 0.7,
            agent_weights: HashMap::new(),
            debate_rounds: 3,
            synthesizer: None,
            review_rounds: 3,
            min_approvals: None,
            ensemble_selector: EnsembleSelector::BestOf,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub result: String,
    pub per_agent_outputs: Vec<AgentOutput>,
    pub usage: TokenUsage,
    pub duration_ms: u64,
    pub orchestration_id: String,
}

struct Vote {
    agent_id: String,
    decision: String,
    rationale: String,
}

/// An agent's vote, for Consensus and Ensemble-by-vote: the convention is
/// that a voting agent's `output_text` is either a `{"decision", "rationale"}`
/// JSON object, or, failing that, plain text treated as the decision itself.
fn parse_vote(output: &AgentOutput) -> Option<Vote> {
    if !output.succeeded {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(&output.output_text) {
        let decision = value.get("decision").and_then(|d| d.as_str()).unwrap_or(output.output_text.trim()).to_string();
        let rationale = value.get("rationale").and_then(|d| d.as_str()).unwrap_or_default().to_string();
        Some(Vote {
            agent_id: output.agent_id.clone(),
            decision,
            rationale,
        })
    } else {
        Some(Vote {
            agent_id: output.agent_id.clone(),
            decision: output.output_text.trim().to_string(),
            rationale: String::new(),
        })
    }
}

/// Returns the plurality decision and its support fraction of the total
/// vote weight. Under `Unanimous`, any split tally returns `None`.
fn aggregate_votes(votes: &[Vote], aggregation: ConsensusAggregation, weights: &HashMap<String, f64>) -> (Option<String>, f64) {
    if votes.is_empty() {
        return (None, 0.0);
    }
    let weight_of = |agent_id: &str| -> f64 {
        if aggregation == ConsensusAggregation::Weighted {
            *weights.get(agent_id).unwrap_or(&1.0)
        } else {
            1.0
        }
    };

    let mut tally: HashMap<String, f64> = HashMap::new();
    let mut total_weight = 0.0;
    for vote in votes {
        let w = weight_of(&vote.agent_id);
        total_weight += w;
        *tally.entry(vote.decision.clone()).or_insert(0.0) += w;
    }

    if aggregation == ConsensusAggregation::Unanimous && tally.len() > 1 {
        return (None, tally.values().cloned().fold(0.0, f64::max) / total_weight);
    }

    tally
        .into_iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(decision, weight)| (Some(decision), if total_weight > 0.0 { weight / total_weight } else { 0.0 }))
        .unwrap_or((None, 0.0))
}

pub struct AgentOrchestrator {
    runner: Arc<dyn AgentRunner>,
    hooks: Arc<HookPipeline>,
    bus: Arc<MessageBus>,
}

impl AgentOrchestrator {
    pub fn new(runner: Arc<dyn AgentRunner>, hooks: Arc<HookPipeline>, bus: Arc<MessageBus>) -> Self {
        Self { runner, hooks, bus }
    }

    async fn invoke_one(&self, agent_id: &str, instructions: &str, inputs: Value, retry: &RetryPolicy) -> AgentOutput {
        match invoke_with_retry(self.runner.as_ref(), agent_id, instructions, inputs, InvokeOptions::default(), retry).await {
            Ok(result) => AgentOutput {
                agent_id: agent_id.to_string(),
                output_text: result.output_text,
                usage: result.usage,
                model: result.model,
                duration_ms: result.duration_ms,
                succeeded: true,
                error: None,
            },
            Err(err) => AgentOutput {
                agent_id: agent_id.to_string(),
                output_text: String::new(),
                usage: TokenUsage::default(),
                model: String::new(),
                duration_ms: 0,
                succeeded: false,
                error: Some(err.to_string()),
            },
        }
    }

    async fn invoke_all(&self, agent_ids: &[String], instructions: &str, inputs: &Value, retry: &RetryPolicy) -> Vec<AgentOutput> {
        let futures = agent_ids.iter().map(|agent_id| self.invoke_one(agent_id, instructions, inputs.clone(), retry));
        futures::future::join_all(futures).await
    }

    /// Runs `pattern` against `agent_ids` for `task`, wrapped in the common
    /// pre-flight (`LH.beforeExecution`) and post-flight (`LH.afterExecution`
    /// + `MB` publish) described in §4.14.
    pub async fn execute(&self, pattern: Pattern, task: &Task, agent_ids: &[String], instructions: &str, options: ExecutionOptions) -> Result<ExecutionResult, ConductorError> {
        let orchestration_id = Uuid::now_v7().to_string();
        let started = std::time::Instant::now();

        debug!(orchestration_id, state = "init", task_id = %task.id, pattern = pattern.name(), "starting orchestration");

        let preflight_payload = serde_json::json!({
            "orchestration_id": orchestration_id,
            "task_id": task.id,
            "pattern": pattern.name(),
            "agent_ids": agent_ids,
        });

        debug!(orchestration_id, state = "contextLoading", "running beforeExecution hooks");
        let loaded_payload = match self.hooks.run_before_execution(preflight_payload) {
            Ok(payload) => payload,
            Err(err) => {
                debug!(orchestration_id, state = "error", "beforeExecution hook aborted the orchestration");
                let returned = self.hooks.run_on_error(serde_json::json!({"orchestration_id": orchestration_id, "task_id": task.id}), err);
                self.bus.publish(BusEvent::OrchestrationCompleted {
                    orchestration_id: orchestration_id.clone(),
                    success: false,
                });
                return Err(returned);
            }
        };

        debug!(orchestration_id, state = "executing", "dispatching to agents");
        self.bus.publish(BusEvent::OrchestrationStarted {
            orchestration_id: orchestration_id.clone(),
            pattern: pattern.name().to_string(),
        });

        let (success, result_text, per_agent_outputs) = match pattern {
            Pattern::Parallel => self.run_parallel(agent_ids, instructions, &loaded_payload, &options).await,
            Pattern::Consensus => self.run_consensus(agent_ids, instructions, &loaded_payload, &options).await,
            Pattern::Debate => self.run_debate(agent_ids, instructions, &loaded_payload, &options).await,
            Pattern::Review => {
                if agent_ids.is_empty() {
                    (false, "no agents provided for review".to_string(), Vec::new())
                } else {
                    self.run_review(&agent_ids[0], &agent_ids[1..], instructions, &loaded_payload, &options).await
                }
            }
            Pattern::Ensemble => self.run_ensemble(agent_ids, instructions, &loaded_payload, &options).await,
        };

        debug!(orchestration_id, state = "synthesizing", success, "aggregating outputs");
        let usage = per_agent_outputs.iter().fold(TokenUsage::default(), |acc, o| acc.checked_add(&o.usage));
        let duration_ms = started.elapsed().as_millis() as u64;

        debug!(orchestration_id, state = "persisting", "running afterExecution hooks");
        self.hooks.run_after_execution(serde_json::json!({
            "orchestration_id": orchestration_id,
            "task_id": task.id,
            "success": success,
            "duration_ms": duration_ms,
        }));

        self.bus.publish(BusEvent::OrchestrationCompleted {
            orchestration_id: orchestration_id.clone(),
            success,
        });
        self.bus.publish(BusEvent::Custom {
            topic: "orchestrator:execution:complete".to_string(),
            payload: serde_json::json!({"orchestration_id": orchestration_id, "task_id": task.id, "success": success}),
        });

        debug!(orchestration_id, state = "done", success, duration_ms, "orchestration finished");

        Ok(ExecutionResult {
            success,
            result: result_text,
            per_agent_outputs,
            usage,
            duration_ms,
            orchestration_id,
        })
    }

    /// Same task to every agent; success iff at least `min_success` (default
    /// all) produce an output. Result is the successful outputs concatenated.
    async fn run_parallel(&self, agent_ids: &[String], instructions: &str, inputs: &Value, options: &ExecutionOptions) -> (bool, String, Vec<AgentOutput>) {
        let outputs = self.invoke_all(agent_ids, instructions, inputs, &options.retry).await;
        let succeeded = outputs.iter().filter(|o| o.succeeded).count();
        let min_success = options.min_success.unwrap_or(agent_ids.len());
        let success = succeeded >= min_success;
        let result = outputs.iter().filter(|o| o.succeeded).map(|o| o.output_text.as_str()).collect::<Vec<_>>().join("\n\n---\n\n");
        (success, result, outputs)
    }

    /// Parallel dispatch, vote aggregation, one tie-break rerun with the
    /// opponents' rationales appended, then a surfaced deadlock if still
    /// below threshold (§4.14).
    async fn run_consensus(&self, agent_ids: &[String], instructions: &str, inputs: &Value, options: &ExecutionOptions) -> (bool, String, Vec<AgentOutput>) {
        let mut outputs = self.invoke_all(agent_ids, instructions, inputs, &options.retry).await;
        let votes: Vec<Vote> = outputs.iter().filter_map(parse_vote).collect();
        let (winner, support) = aggregate_votes(&votes, options.consensus_aggregation, &options.agent_weights);
        if let Some(decision) = &winner {
            if support >= options.consensus_threshold {
                return (true, decision.clone(), outputs);
            }
        }

        let rationale_digest = votes.iter().map(|v| format!("{}: {} ({})", v.agent_id, v.decision, v.rationale)).collect::<Vec<_>>().join("\n");
        let rerun_instructions = format!("{instructions}\n\nOther agents' positions this round:\n{rationale_digest}\n\nReconsider your decision in light of these positions.");
        let rerun_outputs = self.invoke_all(agent_ids, &rerun_instructions, inputs, &options.retry).await;
        let rerun_votes: Vec<Vote> = rerun_outputs.iter().filter_map(parse_vote).collect();
        let (rerun_winner, rerun_support) = aggregate_votes(&rerun_votes, options.consensus_aggregation, &options.agent_weights);
        outputs.extend(rerun_outputs);

        match rerun_winner {
            Some(decision) if rerun_support >= options.consensus_threshold => (true, decision, outputs),
            _ => (false, format!("deadlock: no consensus reached after tie-break rerun (best support {rerun_support:.2})"), outputs),
        }
    }

    /// Round 1: `agent_ids[0]` proposes. Each further round: the rest
    /// critique in parallel, then the synthesizer (default `agent_ids[0]`)
    /// refines. Stops early if the synthesizer's refinement reports
    /// convergence.
    async fn run_debate(&self, agent_ids: &[String], instructions: &str, inputs: &Value, options: &ExecutionOptions) -> (bool, String, Vec<AgentOutput>) {
        if agent_ids.is_empty() {
            return (false, "no agents provided for debate".to_string(), Vec::new());
        }

        let synthesizer_id = options.synthesizer.clone().unwrap_or_else(|| agent_ids[0].clone());
        let critics: Vec<String> = agent_ids.iter().filter(|id| **id != agent_ids[0]).cloned().collect();

        let mut outputs = Vec::new();
        let initial = self.invoke_one(&agent_ids[0], instructions, inputs.clone(), &options.retry).await;
        let mut proposal = initial.output_text.clone();
        outputs.push(initial);

        for _round in 1..options.debate_rounds.max(1) {
            if critics.is_empty() {
                break;
            }
            let critique_prompt = format!("{instructions}\n\nCurrent proposal:\n{proposal}\n\nCritique it.");
            let critiques = self.invoke_all(&critics, &critique_prompt, inputs, &options.retry).await;
            let critique_digest = critiques.iter().filter(|o| o.succeeded).map(|o| format!("{}: {}", o.agent_id, o.output_text)).collect::<Vec<_>>().join("\n");
            outputs.extend(critiques);

            let synth_prompt = format!("{instructions}\n\nYour proposal:\n{proposal}\n\nCritiques:\n{critique_digest}\n\nProduce a refined proposal, accepting or rejecting each critique with rationale. State CONVERGED if no further changes are needed.");
            let refined = self.invoke_one(&synthesizer_id, &synth_prompt, inputs.clone(), &options.retry).await;
            let converged = refined.output_text.contains("CONVERGED");
            proposal = refined.output_text.clone();
            outputs.push(refined);

            if converged {
                break;
            }
        }

        (true, proposal, outputs)
    }

    /// Creator produces, reviewers critique in parallel, creator revises;
    /// repeats until `min_approvals` reviewers approve in the same round or
    /// `review_rounds` is exhausted.
    async fn run_review(&self, creator_id: &str, reviewer_ids: &[String], instructions: &str, inputs: &Value, options: &ExecutionOptions) -> (bool, String, Vec<AgentOutput>) {
        let mut outputs = Vec::new();
        let creator_output = self.invoke_one(creator_id, instructions, inputs.clone(), &options.retry).await;
        let mut artifact = creator_output.output_text.clone();
        outputs.push(creator_output);

        if reviewer_ids.is_empty() {
            return (true, artifact, outputs);
        }

        let min_approvals = options.min_approvals.unwrap_or(reviewer_ids.len() as u32) as usize;

        for round in 0..options.review_rounds.max(1) {
            let critique_prompt = format!("{instructions}\n\nArtifact under review:\n{artifact}\n\nCritique it. If you approve it as-is, include the word APPROVED.");
            let critiques = self.invoke_all(reviewer_ids, &critique_prompt, inputs, &options.retry).await;
            let approvals = critiques.iter().filter(|o| o.succeeded && o.output_text.contains("APPROVED")).count();
            let critique_digest = critiques.iter().filter(|o| o.succeeded).map(|o| format!("{}: {}", o.agent_id, o.output_text)).collect::<Vec<_>>().join("\n");
            outputs.extend(critiques);

            if approvals >= min_approvals {
                return (true, artifact, outputs);
            }

            if round + 1 == options.review_rounds {
                break;
            }

            let revise_prompt = format!("{instructions}\n\nYour artifact:\n{artifact}\n\nReviewer feedback:\n{critique_digest}\n\nRevise the artifact.");
            let revision = self.invoke_one(creator_id, &revise_prompt, inputs.clone(), &options.retry).await;
            artifact = revision.output_text.clone();
            outputs.push(revision);
        }

        (false, artifact, outputs)
    }

    /// Parallel dispatch; selects, merges, or votes over the successful
    /// outputs per `options.ensemble_selector`. `BestOf`'s default scorer
    /// is output length — callers wanting a real quality scorer re-rank
    /// `per_agent_outputs` themselves before consuming `result`.
    async fn run_ensemble(&self, agent_ids: &[String], instructions: &str, inputs: &Value, options: &ExecutionOptions) -> (bool, String, Vec<AgentOutput>) {
        let outputs = self.invoke_all(agent_ids, instructions, inputs, &options.retry).await;
        let successes: Vec<&AgentOutput> = outputs.iter().filter(|o| o.succeeded).collect();
        if successes.is_empty() {
            return (false, "all agents failed".to_string(), outputs);
        }

        let selected = match options.ensemble_selector {
            EnsembleSelector::BestOf => successes.iter().max_by_key(|o| o.output_text.len()).map(|o| o.output_text.clone()).unwrap_or_default(),
            EnsembleSelector::Merge => successes.iter().map(|o| o.output_text.as_str()).collect::<Vec<_>>().join("\n\n"),
            EnsembleSelector::Vote => {
                let votes: Vec<Vote> = outputs.iter().filter_map(parse_vote).collect();
                aggregate_votes(&votes, ConsensusAggregation::Majority, &HashMap::new()).0.unwrap_or_default()
            }
        };

        (true, selected, outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[tokio::test]
    async fn echo_runner_echoes_inputs_and_reports_nonzero_usage() {
        let runner = EchoRunner::new();
        let result = runner.invoke("agent-1", "do the thing", serde_json::json!({"a": 1}), InvokeOptions::default()).await.unwrap();
        assert!(result.output_text.contains("agent-1"));
        assert!(result.output_text.contains("\"a\":1"));
        assert_eq!(result.model, "echo");
    }

    struct ScriptedRunner {
        scripts: Mutex<HashMap<String, VecDeque<Result<String, ConductorError>>>>,
    }

    impl ScriptedRunner {
        fn new() -> Self {
            Self { scripts: Mutex::new(HashMap::new()) }
        }

        fn push(&self, agent_id: &str, response: Result<&str, ConductorError>) {
            self.scripts
                .lock()
                .unwrap()
                .entry(agent_id.to_string())
                .or_default()
                .push_back(response.map(|s| s.to_string()));
        }
    }

    #[async_trait::async_trait]
    impl AgentRunner for ScriptedRunner {
        async fn invoke(&self, agent_id: &str, _instructions: &str, _inputs: Value, _options: InvokeOptions) -> Result<AgentInvocationResult, ConductorError> {
            let next = self.scripts.lock().unwrap().get_mut(agent_id).and_then(|q| q.pop_front());
            match next {
                Some(Ok(text)) => Ok(AgentInvocationResult {
                    output_text: text,
                    usage: TokenUsage::default(),
                    model: "mock".to_string(),
                    duration_ms: 1,
                }),
                Some(Err(err)) => Err(err),
                None => Ok(AgentInvocationResult {
                    output_text: format!("{agent_id} default response"),
                    usage: TokenUsage::default(),
                    model: "mock".to_string(),
                    duration_ms: 1,
                }),
            }
        }
    }

    fn orchestrator(runner: ScriptedRunner) -> AgentOrchestrator {
        AgentOrchestrator::new(Arc::new(runner), Arc::new(HookPipeline::new()), crate::bus::create_message_bus())
    }

    fn task() -> Task {
        Task::new("t1", "title", crate::domain::Priority::Medium)
    }

    #[tokio::test]
    async fn parallel_succeeds_when_all_agents_respond() {
        let orch = orchestrator(ScriptedRunner::new());
        let agents = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let result = orch.execute(Pattern::Parallel, &task(), &agents, "do the thing", ExecutionOptions::default()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.per_agent_outputs.len(), 3);
    }

    #[tokio::test]
    async fn parallel_fails_below_min_success() {
        let runner = ScriptedRunner::new();
        runner.push("b", Err(ConductorError::FatalAgent("rejected".into())));
        let orch = orchestrator(runner);
        let agents = vec!["a".to_string(), "b".to_string()];
        let options = ExecutionOptions {
            retry: RetryPolicy { max_attempts: 1, base_delay: Duration::from_millis(1) },
            ..Default::default()
        };
        let result = orch.execute(Pattern::Parallel, &task(), &agents, "do the thing", options).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn consensus_reaches_majority_on_first_round() {
        let runner = ScriptedRunner::new();
        runner.push("a", Ok(r#"{"decision":"approve","rationale":"looks fine"}"#));
        runner.push("b", Ok(r#"{"decision":"approve","rationale":"agreed"}"#));
        runner.push("c", Ok(r#"{"decision":"reject","rationale":"too risky"}"#));
        let orch = orchestrator(runner);
        let agents = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let options = ExecutionOptions { consensus_threshold: 0.6, ..Default::default() };
        let result = orch.execute(Pattern::Consensus, &task(), &agents, "vote", options).await.unwrap();
        assert!(result.success);
        assert_eq!(result.result, "approve");
    }

    #[tokio::test]
    async fn consensus_deadlocks_after_tiebreak_rerun_stays_split() {
        let runner = ScriptedRunner::new();
        runner.push("a", Ok(r#"{"decision":"approve","rationale":"r1"}"#));
        runner.push("b", Ok(r#"{"decision":"reject","rationale":"r2"}"#));
        runner.push("a", Ok(r#"{"decision":"approve","rationale":"still approve"}"#));
        runner.push("b", Ok(r#"{"decision":"reject","rationale":"still reject"}"#));
        let orch = orchestrator(runner);
        let agents = vec!["a".to_string(), "b".to_string()];
        let options = ExecutionOptions { consensus_threshold: 0.9, ..Default::default() };
        let result = orch.execute(Pattern::Consensus, &task(), &agents, "vote", options).await.unwrap();
        assert!(!result.success);
        assert!(result.result.contains("deadlock"));
        assert_eq!(result.per_agent_outputs.len(), 4);
    }

    #[tokio::test]
    async fn debate_stops_early_on_convergence() {
        let runner = ScriptedRunner::new();
        runner.push("a", Ok("initial proposal"));
        runner.push("b", Ok("critique: consider edge cases"));
        runner.push("a", Ok("refined proposal, handled edge cases. CONVERGED"));
        let orch = orchestrator(runner);
        let agents = vec!["a".to_string(), "b".to_string()];
        let options = ExecutionOptions { debate_rounds: 3, ..Default::default() };
        let result = orch.execute(Pattern::Debate, &task(), &agents, "design something", options).await.unwrap();
        assert!(result.success);
        assert!(result.result.contains("CONVERGED"));
        assert_eq!(result.per_agent_outputs.len(), 3);
    }

    #[tokio::test]
    async fn review_approves_once_min_approvals_reached() {
        let runner = ScriptedRunner::new();
        runner.push("creator", Ok("first draft"));
        runner.push("reviewer1", Ok("looks good, APPROVED"));
        let orch = orchestrator(runner);
        let agents = vec!["creator".to_string(), "reviewer1".to_string()];
        let result = orch.execute(Pattern::Review, &task(), &agents, "write the doc", ExecutionOptions::default()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.result, "first draft");
    }

    #[tokio::test]
    async fn review_exhausts_rounds_without_enough_approvals() {
        let runner = ScriptedRunner::new();
        for _ in 0..2 {
            runner.push("creator", Ok("draft"));
        }
        for _ in 0..2 {
            runner.push("reviewer1", Ok("needs work, not approved"));
        }
        let orch = orchestrator(runner);
        let agents = vec!["creator".to_string(), "reviewer1".to_string()];
        let options = ExecutionOptions { review_rounds: 2, ..Default::default() };
        let result = orch.execute(Pattern::Review, &task(), &agents, "write the doc", options).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn ensemble_best_of_selects_the_longest_output() {
        let runner = ScriptedRunner::new();
        runner.push("a", Ok("short"));
        runner.push("b", Ok("a much longer and more detailed answer"));
        let orch = orchestrator(runner);
        let agents = vec!["a".to_string(), "b".to_string()];
        let result = orch.execute(Pattern::Ensemble, &task(), &agents, "answer", ExecutionOptions::default()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.result, "a much longer and more detailed answer");
    }

    #[tokio::test]
    async fn before_execution_hook_failure_aborts_and_returns_the_error() {
        let hooks = Arc::new(HookPipeline::new());
        hooks.register(crate::hooks::HookPoint::BeforeExecution, "budget-check", 0, Box::new(|_| Err(ConductorError::InvariantViolation("over budget".into()))));
        let orch = AgentOrchestrator::new(Arc::new(ScriptedRunner::new()), hooks, crate::bus::create_message_bus());
        let agents = vec!["a".to_string()];
        let result = orch.execute(Pattern::Parallel, &task(), &agents, "do it", ExecutionOptions::default()).await;
        assert!(matches!(result, Err(ConductorError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_and_eventually_succeed() {
        let runner = ScriptedRunner::new();
        runner.push("a", Err(ConductorError::Transient("flaky".into())));
        runner.push("a", Ok("recovered"));
        let orch = orchestrator(runner);
        let agents = vec!["a".to_string()];
        let options = ExecutionOptions {
            retry: RetryPolicy { max_attempts: 3, base_delay: Duration::from_millis(1) },
            ..Default::default()
        };
        let result = orch.execute(Pattern::Parallel, &task(), &agents, "retry me", options).await.unwrap();
        assert!(result.success);
        assert_eq!(result.result, "recovered");
    }
}
