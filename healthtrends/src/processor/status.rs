use crate::metrics::MetricId;
use serde::Serialize;
use std::collections::BTreeMap;

/// Read-only snapshot of the processor
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessingStatus {
    /// Tasks waiting for a worker
    pub queue_size: usize,
    /// Metrics with a worker running
    pub processing: Vec<MetricId>,
    /// Metrics with a live entry in either cache tier
    pub cached_metrics: Vec<MetricId>,
    /// Hours since each metric was last computed
    pub cache_age: BTreeMap<MetricId, f64>,
}

/// Lifecycle notifications broadcast by the processor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrendEvent {
    /// A worker picked the metric up
    ProcessingStarted {
        /// Metric being computed
        metric: MetricId,
        /// Task label
        task_id: String,
    },
    /// A result is in the cache
    TrendReady {
        /// Metric computed
        metric: MetricId,
        /// The worker found a valid cache entry and did not recompute
        from_cache: bool,
    },
    /// Too few points to analyse; the cache was left alone
    InsufficientData {
        /// Metric skipped
        metric: MetricId,
        /// Points the data source returned
        points: usize,
    },
    /// The worker failed
    ProcessingFailed {
        /// Metric that failed
        metric: MetricId,
        /// Error message
        error: String,
    },
    /// A queued task was dropped at shutdown
    Cancelled {
        /// Metric that will not be computed
        metric: MetricId,
        /// Task label
        task_id: String,
    },
}

impl TrendEvent {
    /// Metric the event is about
    pub fn metric(&self) -> &MetricId {
        match self {
            Self::ProcessingStarted { metric, .. }
            | Self::TrendReady { metric, .. }
            | Self::InsufficientData { metric, .. }
            | Self::ProcessingFailed { metric, .. }
            | Self::Cancelled { metric, .. } => metric,
        }
    }

    /// Whether this ends a task's lifecycle
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::ProcessingStarted { .. })
    }
}
