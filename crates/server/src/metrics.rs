//! Prometheus exposition
//!
//! Installs the global `metrics` recorder that the pipeline's stage metrics
//! report to, and renders it for `GET /metrics`.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use voice_call_pipeline::metrics::{FALLBACK_TOTAL, INTERRUPT_TOTAL, STAGE_DURATION, STAGE_TOTAL};

use crate::state::AppState;

/// Install the Prometheus recorder; returns `None` if one is already installed
pub fn init_metrics() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            describe_metrics();
            Some(handle)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Metrics recorder not installed");
            None
        }
    }
}

fn describe_metrics() {
    metrics::describe_histogram!(
        STAGE_DURATION,
        metrics::Unit::Seconds,
        "Duration of one pipeline stage"
    );
    metrics::describe_counter!(STAGE_TOTAL, "Pipeline stage executions by outcome");
    metrics::describe_counter!(FALLBACK_TOTAL, "Fallback backends taken by stage");
    metrics::describe_counter!(INTERRUPT_TOTAL, "AI tasks cancelled by an interruption");
    metrics::describe_gauge!("voice_call_active_sessions", "Sessions currently registered");
}

/// Prometheus text format
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics disabled".to_string(),
        ),
    }
}
