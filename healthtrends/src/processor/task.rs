use crate::metrics::MetricId;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// Priority used by interactive `get_trend` requests
pub const PRIORITY_INTERACTIVE: i32 = 10;
/// Priority used after a data import
pub const PRIORITY_IMPORT: i32 = 5;
/// Default priority
pub const PRIORITY_DEFAULT: i32 = 0;
/// Priority used by the staleness sweep
pub const PRIORITY_SWEEP: i32 = -1;

/// One unit of trend work.
///
/// Tasks come out of the queue in priority order. Among equal priorities the
/// earlier submission currently wins, but callers should treat the tie-break
/// as unspecified.
#[derive(Debug, Clone)]
pub struct TrendProcessingTask {
    metric: MetricId,
    priority: i32,
    force_refresh: bool,
    created_at: DateTime<Utc>,
    task_id: String,
    sequence: u64,
}

impl TrendProcessingTask {
    /// Build a task. `sequence` is the submission counter used for ordering
    /// ties.
    pub fn new(metric: MetricId, priority: i32, force_refresh: bool, sequence: u64) -> Self {
        let created_at = Utc::now();
        let task_id = format!("{}_{}", metric, created_at.timestamp_millis());
        Self {
            metric,
            priority,
            force_refresh,
            created_at,
            task_id,
            sequence,
        }
    }

    /// Metric to compute
    pub fn metric(&self) -> &MetricId {
        &self.metric
    }

    /// Higher runs first
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Skip the cache read and recompute
    pub fn force_refresh(&self) -> bool {
        self.force_refresh
    }

    /// Submission time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Tracing label; not unique
    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

impl PartialEq for TrendProcessingTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TrendProcessingTask {}

impl PartialOrd for TrendProcessingTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// `BinaryHeap` pops the greatest element: higher priority is greater, and
// among equals the lower sequence is greater.
impl Ord for TrendProcessingTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn task(metric: &str, priority: i32, sequence: u64) -> TrendProcessingTask {
        TrendProcessingTask::new(MetricId::new(metric), priority, false, sequence)
    }

    #[test]
    fn test_heap_pops_highest_priority_first() {
        let mut heap = BinaryHeap::new();
        heap.push(task("steps", PRIORITY_SWEEP, 0));
        heap.push(task("heart_rate", PRIORITY_INTERACTIVE, 1));
        heap.push(task("sleep_hours", PRIORITY_DEFAULT, 2));
        heap.push(task("body_mass", PRIORITY_IMPORT, 3));

        let order: Vec<String> = std::iter::from_fn(|| heap.pop())
            .map(|t| t.metric().to_string())
            .collect();
        assert_eq!(order, vec!["heart_rate", "body_mass", "sleep_hours", "steps"]);
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let mut heap = BinaryHeap::new();
        heap.push(task("steps", 0, 7));
        heap.push(task("distance", 0, 3));
        heap.push(task("heart_rate", 0, 5));

        assert_eq!(heap.pop().unwrap().metric().as_str(), "distance");
        assert_eq!(heap.pop().unwrap().metric().as_str(), "heart_rate");
        assert_eq!(heap.pop().unwrap().metric().as_str(), "steps");
    }

    #[test]
    fn test_task_id_is_metric_and_millis() {
        let t = TrendProcessingTask::new(MetricId::new("steps"), 0, true, 0);
        assert_eq!(
            t.task_id(),
            format!("steps_{}", t.created_at().timestamp_millis())
        );
        assert!(t.force_refresh());
    }
}
