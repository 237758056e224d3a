//! Stage metrics backed by the `metrics` facade
//!
//! Samples go to whatever recorder the binary installs (Prometheus in the
//! server). With no recorder installed every call is a no-op.

use std::time::Duration;
use voice_call_core::{MetricsSink, Stage};

pub const STAGE_DURATION: &str = "voice_call_stage_duration_seconds";
pub const STAGE_TOTAL: &str = "voice_call_stage_total";
pub const FALLBACK_TOTAL: &str = "voice_call_fallback_total";
pub const INTERRUPT_TOTAL: &str = "voice_call_interrupt_total";

#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusMetrics;

impl MetricsSink for PrometheusMetrics {
    fn record(&self, stage: Stage, duration: Duration, success: bool, error: Option<&str>) {
        let outcome = if success { "success" } else { "error" };
        metrics::histogram!(STAGE_DURATION, "stage" => stage.as_str())
            .record(duration.as_secs_f64());
        metrics::counter!(STAGE_TOTAL, "stage" => stage.as_str(), "outcome" => outcome)
            .increment(1);
        if let Some(error) = error {
            tracing::debug!(stage = %stage, error, "Stage failed");
        }
    }
}

/// Count a fallback taken for `stage`
pub fn record_fallback(stage: Stage) {
    metrics::counter!(FALLBACK_TOTAL, "stage" => stage.as_str()).increment(1);
}

pub fn record_interrupt() {
    metrics::counter!(INTERRUPT_TOTAL).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_without_recorder_is_noop() {
        let sink = PrometheusMetrics;
        sink.record(Stage::Llm, Duration::from_millis(40), false, Some("timeout"));
        record_fallback(Stage::Tts);
        record_interrupt();
    }
}
