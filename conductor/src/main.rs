//! Continuous Loop Orchestrator CLI entry point.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use conductor::agents::{AgentOrchestrator, EchoRunner};
use conductor::bus::create_message_bus;
use conductor::checkpoint::CheckpointOptimizer;
use conductor::cli::{Cli, Command, ExportFormat, ReportKind, exit_code};
use conductor::config::Config;
use conductor::dashboard::{self, AppState, CompletionsLog, MetricsStore, SessionRegistry};
use conductor::hil::HilDetector;
use conductor::hooks::HookPipeline;
use conductor::limits::{LimitTracker, PlanLimits};
use conductor::loopctl::{AgentRoster, LoopConfig, LoopController};
use conductor::memory::{MemoryStore, RetentionConfig};
use conductor::planning::CompetitivePlanner;
use conductor::quality::QualityGate;
use conductor::retrieval::ContextRetriever;
use conductor::tasks::TaskManager;
use conductor::usage::{Period, UsageFilters, UsageTracker};
use conductor::domain::TokenUsageRecord;
use conductor_store::Store;

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("conductor").join("logs");
    fs::create_dir_all(&log_dir).context("failed to create log directory")?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!(path = %log_dir.display(), "logging initialized");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging().context("failed to set up logging")?;
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("failed to load configuration")?;

    let code = match cli.command {
        Command::Start { project_path, foreground } => run_start(project_path, foreground, config).await,
        Command::Stop { session_id } => {
            eprintln!("stop {session_id}: no separate daemon process to signal; use `POST /api/sessions/{session_id}/end` against the running dashboard instead");
            exit_code::USER_ERROR
        }
        Command::Status { session_id, .. } => {
            eprintln!("status {session_id}: query `GET /api/sessions/{session_id}` on the running dashboard instead");
            exit_code::USER_ERROR
        }
        Command::Report { project_path, kind } => run_report(project_path, kind, &config),
        Command::Export { session_id, format, output, project_path } => run_export(project_path, &session_id, format, output),
    };

    std::process::exit(code);
}

async fn run_start(project_path: PathBuf, foreground: bool, config: Config) -> i32 {
    if !foreground {
        eprintln!("warning: background daemonization is not implemented; running in the foreground");
    }

    let db_path = project_path.join(".conductor").join("state.db");
    if let Some(parent) = db_path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            eprintln!("failed to create state directory: {err}");
            return exit_code::RUNTIME_FAILURE;
        }
    }

    let memory = match MemoryStore::open(&db_path, RetentionConfig::default()) {
        Ok(memory) => Arc::new(memory),
        Err(err) => {
            eprintln!("failed to open state store: {err}");
            return exit_code::RUNTIME_FAILURE;
        }
    };

    let usage_store = match Store::<TokenUsageRecord>::open(project_path.join(".conductor").join("usage.db")) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            eprintln!("failed to open usage store: {err}");
            return exit_code::RUNTIME_FAILURE;
        }
    };

    let tasks = Arc::new(TaskManager::new(memory.tasks()));
    let embedder: Arc<dyn conductor_context::EmbeddingProvider> = Arc::new(conductor_context::HashEmbedder::new(256));
    let vectors = Arc::new(conductor_context::VectorStore::in_memory());
    let retriever = Arc::new(ContextRetriever::new(memory.clone(), vectors, embedder, Default::default()));
    let bus = create_message_bus();
    let hooks = Arc::new(HookPipeline::new());

    let plan_limits = match config.limits.plan.as_str() {
        "pro" => PlanLimits::pro(),
        "team" => PlanLimits::team(),
        _ => PlanLimits::free(),
    };

    let usage = UsageTracker::new(usage_store)
        .with_daily_budget(config.budget.daily_usd)
        .with_monthly_budget(config.budget.monthly_usd);

    let runner: Arc<dyn conductor::agents::AgentRunner> = match build_runner(&config) {
        Some(runner) => runner,
        None => return exit_code::RUNTIME_FAILURE,
    };
    let orchestrator = Arc::new(AgentOrchestrator::new(runner, hooks, bus.clone()));

    let loop_config = LoopConfig {
        complexity_threshold: config.planning.complexity_threshold,
        ..Default::default()
    };

    let session_id = uuid::Uuid::now_v7().to_string();
    let controller = Arc::new(LoopController::new(
        session_id.clone(),
        tasks,
        memory.clone(),
        retriever,
        orchestrator,
        Arc::new(CompetitivePlanner::new(Default::default())),
        Arc::new(QualityGate::default()),
        Arc::new(usage),
        Arc::new(LimitTracker::new(plan_limits)),
        Arc::new(CheckpointOptimizer::new(Default::default())),
        Arc::new(HilDetector::with_builtin_patterns()),
        bus.clone(),
        loop_config,
        AgentRoster::new(),
    ));

    let registry = Arc::new(SessionRegistry::new());
    let snapshot = conductor::domain::SessionSnapshot::new(session_id.clone(), project_path.display().to_string());
    registry.register(session_id.clone(), controller.clone(), snapshot).await;

    let completions = Arc::new(CompletionsLog::new());
    completions.clone().spawn_listener(bus.clone());

    let state = AppState {
        registry,
        metrics: Arc::new(MetricsStore::new(memory)),
        limits: Arc::new(LimitTracker::new(plan_limits)),
        bus,
        completions,
        log_dir: dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("conductor").join("logs"),
    };

    let app = dashboard::router(state);
    let listener = match tokio::net::TcpListener::bind("127.0.0.1:4717").await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("failed to bind dashboard listener: {err}");
            return exit_code::RUNTIME_FAILURE;
        }
    };
    info!(addr = "127.0.0.1:4717", session_id = %session_id, "dashboard listening");

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let loop_result = tokio::select! {
        result = controller.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, requesting graceful wrap-up");
            controller.cancellation_token().cancel();
            return exit_code::INTERRUPTED;
        }
    };
    server.abort();

    match loop_result {
        Ok(()) => exit_code::SUCCESS,
        Err(err) => {
            eprintln!("loop controller exited with an error: {err}");
            exit_code::RUNTIME_FAILURE
        }
    }
}

/// Selects the configured `AgentRunner` (§6.1). `"echo"` is the only
/// built-in option shipped in this core; a real model-provider
/// integration is expected to extend this match arm with its own runner.
fn build_runner(config: &Config) -> Option<Arc<dyn conductor::agents::AgentRunner>> {
    match config.agents.runner.as_str() {
        "echo" => Some(Arc::new(EchoRunner::new())),
        other => {
            eprintln!("unknown agent runner '{other}'; only 'echo' is built in");
            None
        }
    }
}

fn open_usage_store(project_path: &PathBuf) -> Option<Arc<Store<TokenUsageRecord>>> {
    let usage_path = project_path.join(".conductor").join("usage.db");
    if !usage_path.exists() {
        eprintln!("no usage data at {}; run `start` in this project first", usage_path.display());
        return None;
    }
    match Store::<TokenUsageRecord>::open(&usage_path) {
        Ok(store) => Some(Arc::new(store)),
        Err(err) => {
            eprintln!("failed to open usage store: {err}");
            None
        }
    }
}

fn run_report(project_path: PathBuf, kind: ReportKind, config: &Config) -> i32 {
    let Some(store) = open_usage_store(&project_path) else {
        return exit_code::USER_ERROR;
    };
    let records = match store.all() {
        Ok(records) => records,
        Err(err) => {
            eprintln!("failed to read usage records: {err}");
            return exit_code::RUNTIME_FAILURE;
        }
    };

    match kind {
        ReportKind::Daily => print_period_summary(store.clone(), Period::Daily, "daily"),
        ReportKind::Monthly => print_period_summary(store.clone(), Period::Monthly, "monthly"),
        ReportKind::Budget => print_budget_status(store.clone(), config),
        ReportKind::Pattern => print_grouped(&records, |r| r.pattern.name().to_string()),
        ReportKind::Agent => print_grouped(&records, |r| r.agent_id.clone().unwrap_or_else(|| "unknown".to_string())),
        ReportKind::BillingWindow => print_billing_windows(&records, config),
        ReportKind::Efficiency => print_efficiency(&records),
    }
    exit_code::SUCCESS
}

fn print_period_summary(store: Arc<Store<TokenUsageRecord>>, period: Period, label: &str) {
    let tracker = UsageTracker::new(store);
    let summary = tracker.usage_summary(period, &UsageFilters::default());
    println!(
        "{label} usage: {} tokens in, {} tokens out, ${:.4} cost, ${:.4} cache savings, {} records",
        summary.usage.input, summary.usage.output, summary.cost_usd, summary.cache_savings_usd, summary.record_count
    );
}

fn print_budget_status(store: Arc<Store<TokenUsageRecord>>, config: &Config) {
    let tracker = UsageTracker::new(store).with_daily_budget(config.budget.daily_usd).with_monthly_budget(config.budget.monthly_usd);

    let mut reported = false;
    if let Some(status) = tracker.check_budget_status(Period::Daily) {
        reported = true;
        println!(
            "daily budget: ${:.2} used of ${:.2} ({:.1}%), projected ${:.2}{}",
            status.used,
            status.limit,
            status.percent,
            status.projected,
            if status.exceeded { " — EXCEEDED" } else { "" }
        );
    }
    if let Some(status) = tracker.check_budget_status(Period::Monthly) {
        reported = true;
        println!(
            "monthly budget: ${:.2} used of ${:.2} ({:.1}%), projected ${:.2}{}",
            status.used,
            status.limit,
            status.percent,
            status.projected,
            if status.exceeded { " — EXCEEDED" } else { "" }
        );
    }
    if !reported {
        println!("no budget configured; set budget.daily-usd / budget.monthly-usd in the project config");
    }
}

fn print_grouped(records: &[TokenUsageRecord], key_fn: impl Fn(&TokenUsageRecord) -> String) {
    let mut totals: std::collections::HashMap<String, (u64, f64, u64)> = std::collections::HashMap::new();
    for record in records {
        let entry = totals.entry(key_fn(record)).or_insert((0, 0.0, 0));
        entry.0 += record.usage.total();
        entry.1 += record.cost_usd;
        entry.2 += 1;
    }
    if totals.is_empty() {
        println!("no usage records yet");
        return;
    }
    for (key, (tokens, cost, count)) in totals {
        println!("{key}: {tokens} tokens, ${cost:.4}, {count} records");
    }
}

fn print_billing_windows(records: &[TokenUsageRecord], config: &Config) {
    let now = chrono::Utc::now();
    let plan = match config.limits.plan.as_str() {
        "pro" => PlanLimits::pro(),
        "team" => PlanLimits::team(),
        _ => PlanLimits::free(),
    };
    let five_hour = records.iter().filter(|r| now - r.timestamp < chrono::Duration::hours(5)).count();
    let daily = records.iter().filter(|r| now - r.timestamp < chrono::Duration::days(1)).count();
    let weekly = records.iter().filter(|r| now - r.timestamp < chrono::Duration::days(7)).count();
    println!("five-hour window: {five_hour}/{} messages", plan.five_hour);
    println!("daily window: {daily}/{}", plan.daily);
    println!("weekly window: {weekly}/{}", plan.weekly);
}

fn print_efficiency(records: &[TokenUsageRecord]) {
    if records.is_empty() {
        println!("no usage records yet");
        return;
    }
    let total_cost: f64 = records.iter().map(|r| r.cost_usd).sum();
    let total_savings: f64 = records.iter().map(|r| r.cache_savings_usd).sum();
    let avg_cost = total_cost / records.len() as f64;
    let savings_percent = if total_cost + total_savings > 0.0 { total_savings / (total_cost + total_savings) * 100.0 } else { 0.0 };
    println!(
        "efficiency: {} orchestrations, ${total_cost:.4} total cost, ${total_savings:.4} cache savings ({savings_percent:.1}% saved), ${avg_cost:.4} avg cost/orchestration",
        records.len()
    );
}

fn run_export(project_path: PathBuf, session_id: &str, format: ExportFormat, output: Option<PathBuf>) -> i32 {
    let Some(store) = open_usage_store(&project_path) else {
        return exit_code::USER_ERROR;
    };
    let records: Vec<TokenUsageRecord> = match store.all() {
        Ok(records) => records.into_iter().filter(|r| r.session_id == session_id).collect(),
        Err(err) => {
            eprintln!("failed to read usage records: {err}");
            return exit_code::RUNTIME_FAILURE;
        }
    };
    if records.is_empty() {
        eprintln!("no usage records found for session {session_id}");
        return exit_code::USER_ERROR;
    }

    let rendered = match format {
        ExportFormat::Json => match serde_json::to_string_pretty(&records) {
            Ok(json) => json,
            Err(err) => {
                eprintln!("failed to serialize records: {err}");
                return exit_code::RUNTIME_FAILURE;
            }
        },
        ExportFormat::Csv => render_csv(&records),
    };

    match output {
        Some(path) => match fs::write(&path, &rendered) {
            Ok(()) => {
                println!("wrote {} records to {}", records.len(), path.display());
                exit_code::SUCCESS
            }
            Err(err) => {
                eprintln!("failed to write {}: {err}", path.display());
                exit_code::RUNTIME_FAILURE
            }
        },
        None => {
            println!("{rendered}");
            exit_code::SUCCESS
        }
    }
}

fn render_csv(records: &[TokenUsageRecord]) -> String {
    let mut out = String::from("id,orchestration_id,agent_id,timestamp,model,input,output,cache_create,cache_read,cost_usd,cache_savings_usd,pattern,session_id\n");
    for r in records {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{:.6},{:.6},{},{}\n",
            csv_field(&r.id),
            csv_field(&r.orchestration_id),
            csv_field(r.agent_id.as_deref().unwrap_or("")),
            r.timestamp.to_rfc3339(),
            csv_field(&r.model),
            r.usage.input,
            r.usage.output,
            r.usage.cache_create,
            r.usage.cache_read,
            r.cost_usd,
            r.cache_savings_usd,
            r.pattern.name(),
            csv_field(&r.session_id),
        ));
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
