//! Shared dashboard state, threaded into every handler via
//! `axum::extract::State` (the same `AppState { ... }` + derived `Clone`
//! shape `dashflow-langserve`'s handlers use).

use std::path::PathBuf;
use std::sync::Arc;

use crate::bus::MessageBus;
use crate::limits::LimitTracker;

use super::completions::CompletionsLog;
use super::metrics::MetricsStore;
use super::registry::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub metrics: Arc<MetricsStore>,
    pub limits: Arc<LimitTracker>,
    pub bus: Arc<MessageBus>,
    pub completions: Arc<CompletionsLog>,
    pub log_dir: PathBuf,
}
