//! Stage metrics trait

use crate::events::Stage;
use std::time::Duration;

/// Fire-and-forget stage timing recorder
///
/// Implementations must not block or panic.
pub trait MetricsSink: Send + Sync + 'static {
    fn record(&self, stage: Stage, duration: Duration, success: bool, error: Option<&str>);
}

/// Discards every sample
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _stage: Stage, _duration: Duration, _success: bool, _error: Option<&str>) {}
}
