//! HTTP/SSE handlers for the dashboard API (§6.2), in the `AppState` +
//! `State<AppState>` + `Json<Request> -> ApiResult<Json<Response>>` shape
//! `dashflow-langserve`'s `handler.rs` uses, with SSE streams built the
//! same way via `Sse::new(stream)` and `Event::default().event(...).json_data(...)`.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tracing::instrument;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::domain::{SessionSnapshot, WindowKind};

const LOG_HEARTBEAT: Duration = Duration::from_secs(25);
const EVENT_HEARTBEAT: Duration = Duration::from_secs(20);

#[derive(Debug, Serialize)]
pub struct SessionsSummaryResponse {
    pub sessions: Vec<SessionSnapshot>,
    pub active_count: usize,
    pub recent_completions: Vec<String>,
}

#[instrument(skip(state))]
pub async fn sessions_summary(State(state): State<AppState>) -> ApiResult<Json<SessionsSummaryResponse>> {
    let sessions = state.registry.snapshots().await;
    let active_count = sessions.iter().filter(|s| s.status == crate::domain::SessionStatus::Active).count();
    let recent_completions = state.completions.snapshot().await;
    Ok(Json(SessionsSummaryResponse {
        sessions,
        active_count,
        recent_completions,
    }))
}

#[instrument(skip(state))]
pub async fn session_detail(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResult<Json<SessionSnapshot>> {
    let handle = state.registry.get(&session_id).await.ok_or_else(|| ApiError::NotFound(format!("no session {session_id}")))?;
    let snapshot = handle.snapshot.read().await.clone();
    Ok(Json(snapshot))
}

#[derive(Debug, Serialize)]
pub struct ControlAck {
    pub session_id: String,
    pub action: &'static str,
}

async fn apply_control(state: &AppState, session_id: &str, action: crate::dashboard::registry::ControlAction, name: &'static str) -> ApiResult<Json<ControlAck>> {
    state
        .registry
        .apply_control(session_id, action)
        .await
        .map_err(ApiError::IllegalTransition)?;
    Ok(Json(ControlAck {
        session_id: session_id.to_string(),
        action: name,
    }))
}

pub async fn pause_session(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResult<Json<ControlAck>> {
    apply_control(&state, &session_id, crate::dashboard::registry::ControlAction::Pause, "pause").await
}

pub async fn resume_session(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResult<Json<ControlAck>> {
    apply_control(&state, &session_id, crate::dashboard::registry::ControlAction::Resume, "resume").await
}

pub async fn skip_task(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResult<Json<ControlAck>> {
    apply_control(&state, &session_id, crate::dashboard::registry::ControlAction::SkipTask, "skip-task").await
}

pub async fn end_session(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResult<Json<ControlAck>> {
    apply_control(&state, &session_id, crate::dashboard::registry::ControlAction::End, "end").await
}

#[derive(Debug, Serialize)]
pub struct WindowUsage {
    pub used: u64,
    pub limit: u64,
    pub percent: f64,
    pub reset_at: DateTime<Utc>,
    pub reset_in_secs: i64,
    pub pace_per_hour: f64,
    pub projected: u64,
}

#[derive(Debug, Serialize)]
pub struct UsageLimitsResponse {
    pub five_hour: WindowUsage,
    pub daily: WindowUsage,
    pub weekly: WindowUsage,
}

#[instrument(skip(state))]
pub async fn usage_limits(State(state): State<AppState>) -> ApiResult<Json<UsageLimitsResponse>> {
    let to_usage = |kind: WindowKind| {
        let status = state.limits.status(kind);
        let hours_remaining = (status.estimated_reset - Utc::now()).num_seconds().max(0) as f64 / 3600.0;
        let projected = status.count + (status.pace_per_hour * hours_remaining) as u64;
        WindowUsage {
            used: status.count,
            limit: status.limit,
            percent: status.percent,
            reset_at: status.estimated_reset,
            reset_in_secs: (status.estimated_reset - Utc::now()).num_seconds().max(0),
            pace_per_hour: status.pace_per_hour,
            projected,
        }
    };

    Ok(Json(UsageLimitsResponse {
        five_hour: to_usage(WindowKind::FiveHour),
        daily: to_usage(WindowKind::Daily),
        weekly: to_usage(WindowKind::Weekly),
    }))
}

#[instrument(skip(state))]
pub async fn events_stream(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        let mut rx = state.bus.subscribe();
        loop {
            tokio::select! {
                received = rx.recv() => {
                    match received {
                        Ok(event) => {
                            let payload = json!({ "topic": event.topic(), "event": event });
                            yield Ok(Event::default().event(event.topic().to_string()).json_data(payload).unwrap_or_else(|_| Event::default()));
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            yield Ok(Event::default().event("lagged").data(skipped.to_string()));
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = tokio::time::sleep(EVENT_HEARTBEAT) => {
                    yield Ok(Event::default().event("heartbeat").data(Utc::now().to_rfc3339()));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(EVENT_HEARTBEAT).text("keep-alive"))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub last_event_id: Option<u64>,
}

#[instrument(skip(state, headers))]
pub async fn logs_stream(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: axum::http::HeaderMap,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let resume_from = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .or(query.last_event_id)
        .unwrap_or(0);

    let log_path = state.log_dir.join(format!("{session_id}.log"));

    let stream = async_stream::stream! {
        let mut line_no: u64 = 0;
        let mut reader = match tokio::fs::File::open(&log_path).await {
            Ok(file) => tokio::io::BufReader::new(file),
            Err(_) => {
                yield Ok(Event::default().event("error").data("log file not found"));
                return;
            }
        };
        let mut buf = String::new();
        loop {
            buf.clear();
            match reader.read_line(&mut buf).await {
                Ok(0) => {
                    tokio::select! {
                        _ = tokio::time::sleep(LOG_HEARTBEAT) => {
                            yield Ok(Event::default().event("heartbeat").data(Utc::now().to_rfc3339()));
                        }
                        _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                    }
                }
                Ok(_) => {
                    line_no += 1;
                    if line_no <= resume_from {
                        continue;
                    }
                    yield Ok(Event::default().id(line_no.to_string()).event("log").data(buf.trim_end().to_string()));
                }
                Err(_) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(LOG_HEARTBEAT).text("keep-alive")))
}

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub series: Vec<crate::domain::MetricSample>,
    pub aggregate: MetricsAggregate,
}

#[derive(Debug, Default, Serialize)]
pub struct MetricsAggregate {
    pub total_tokens_in: u64,
    pub total_tokens_out: u64,
    pub total_cost_usd: f64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

#[instrument(skip(state))]
pub async fn metrics(State(state): State<AppState>, Query(query): Query<MetricsQuery>) -> ApiResult<Json<MetricsResponse>> {
    let since = parse_range(query.range.as_deref());
    let series = state.metrics.query(query.session.as_deref(), since).await?;

    let mut aggregate = MetricsAggregate::default();
    for sample in &series {
        aggregate.total_tokens_in += sample.tokens_in;
        aggregate.total_tokens_out += sample.tokens_out;
        aggregate.total_cost_usd += sample.cost_usd;
        aggregate.tasks_completed += sample.tasks_completed;
        aggregate.tasks_failed += sample.tasks_failed;
    }

    Ok(Json(MetricsResponse { series, aggregate }))
}

fn parse_range(range: Option<&str>) -> DateTime<Utc> {
    let window = match range {
        Some("1h") => ChronoDuration::hours(1),
        Some("24h") => ChronoDuration::hours(24),
        Some("7d") => ChronoDuration::days(7),
        Some("30d") => ChronoDuration::days(30),
        _ => ChronoDuration::hours(24),
    };
    Utc::now() - window
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_range_defaults_to_24h() {
        let since = parse_range(Some("nonsense"));
        let expected = Utc::now() - ChronoDuration::hours(24);
        assert!((since - expected).num_seconds().abs() < 2);
    }

    #[test]
    fn known_ranges_parse() {
        let since = parse_range(Some("1h"));
        let expected = Utc::now() - ChronoDuration::hours(1);
        assert!((since - expected).num_seconds().abs() < 2);
    }
}
