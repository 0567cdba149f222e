//! Dashboard (DB, §4.16): the HTTP/SSE surface a human (or a dashboard UI)
//! uses to observe and steer running sessions.
//!
//! The teacher carries no HTTP layer at all, so this module's router/error/
//! SSE idiom is grounded instead on `dashflow-langserve`'s `server.rs` /
//! `handler.rs` / `error.rs`: an `AppState` threaded via `axum::State`, a
//! permissive-CORS `create_router` for local/dev use, and SSE streams built
//! with `async_stream::stream!` yielding `Event::default().event(...)...`.

pub mod completions;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod registry;
pub mod state;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use completions::CompletionsLog;
pub use error::{ApiError, ApiResult};
pub use metrics::MetricsStore;
pub use registry::{ControlAction, SessionHandle, SessionRegistry};
pub use state::AppState;

/// Builds the full `/api/...` router (§6.2). CORS is permissive here the
/// same way `dashflow-langserve::create_server` is for local/dev use;
/// production deployments are expected to front this with their own
/// reverse proxy and origin policy.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions/summary", get(handlers::sessions_summary))
        .route("/api/sessions/:id", get(handlers::session_detail))
        .route("/api/sessions/:id/pause", post(handlers::pause_session))
        .route("/api/sessions/:id/resume", post(handlers::resume_session))
        .route("/api/sessions/:id/skip-task", post(handlers::skip_task))
        .route("/api/sessions/:id/end", post(handlers::end_session))
        .route("/api/usage/limits", get(handlers::usage_limits))
        .route("/api/events", get(handlers::events_stream))
        .route("/api/logs/:sessionId", get(handlers::logs_stream))
        .route("/api/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::create_message_bus;
    use crate::limits::{LimitTracker, PlanLimits};
    use crate::memory::MemoryStore;
    use std::sync::Arc;

    fn test_state() -> AppState {
        let memory = Arc::new(MemoryStore::open_in_memory().unwrap());
        AppState {
            registry: Arc::new(SessionRegistry::new()),
            metrics: Arc::new(MetricsStore::new(memory)),
            limits: Arc::new(LimitTracker::new(PlanLimits::free())),
            bus: create_message_bus(),
            completions: Arc::new(CompletionsLog::new()),
            log_dir: std::env::temp_dir(),
        }
    }

    #[test]
    fn router_builds_without_panicking() {
        let _router = router(test_state());
    }
}
