//! Collaborator interfaces consumed by the trend processor and comparative engine
//!
//! Storage and statistics live outside this crate; these traits are the whole
//! contract. [`InMemoryHealthStore`] and [`RecordStatisticsCalculator`] are the
//! default implementations used by the CLI and tests.

use crate::comparative::HistoricalComparison;
use crate::error::Result;
use crate::metrics::{daily_values, HealthRecord, MetricId, MetricStatistics};
use crate::trends::TrendResult;
use chrono::{DateTime, NaiveTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// Source of raw health records
pub trait MetricDataSource: Send + Sync {
    /// Records for `metric` with `start <= timestamp <= end`, possibly empty
    fn get_metric_data(
        &self,
        metric: &MetricId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HealthRecord>>;

    /// Every record the source holds
    fn get_all_records(&self) -> Result<Vec<HealthRecord>>;
}

/// Time-series trend and forecast capability
pub trait TrendAnalysisEngine: Send + Sync {
    /// Analyze `data` and forecast `forecast_days` ahead
    fn analyze(
        &self,
        data: &[HealthRecord],
        metric: &MetricId,
        forecast_days: u32,
    ) -> Result<TrendResult>;
}

/// Descriptive statistics for a metric over a date range
pub trait StatisticsProvider: Send + Sync {
    /// `Ok(None)` when the range holds no data
    fn calculate_statistics(
        &self,
        metric: &MetricId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<MetricStatistics>>;
}

/// Rolling-window history merged into fresh trend results
pub trait HistoricalComparator: Send + Sync {
    /// Historical comparison for `metric` as of `current_date`
    fn compare_to_historical(
        &self,
        metric: &MetricId,
        current_date: DateTime<Utc>,
        lookback_days: i64,
    ) -> Result<Arc<HistoricalComparison>>;
}

/// Thread-safe in-memory record store keyed by metric
#[derive(Debug, Default)]
pub struct InMemoryHealthStore {
    records: DashMap<MetricId, Vec<HealthRecord>>,
}

impl InMemoryHealthStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add records, keeping each metric's series ordered by timestamp.
    /// Returns the metrics that received new data.
    pub fn insert_records(&self, records: impl IntoIterator<Item = HealthRecord>) -> Vec<MetricId> {
        let mut touched: Vec<MetricId> = Vec::new();
        for record in records {
            if !touched.contains(&record.metric) {
                touched.push(record.metric.clone());
            }
            self.records
                .entry(record.metric.clone())
                .or_default()
                .push(record);
        }
        for metric in &touched {
            if let Some(mut series) = self.records.get_mut(metric) {
                series.sort_by_key(|r| r.timestamp);
            }
        }
        touched
    }

    /// Metrics that have at least one record
    pub fn metrics(&self) -> Vec<MetricId> {
        let mut metrics: Vec<MetricId> = self.records.iter().map(|e| e.key().clone()).collect();
        metrics.sort();
        metrics
    }

    /// Total number of records held
    pub fn len(&self) -> usize {
        self.records.iter().map(|e| e.value().len()).sum()
    }

    /// Whether the store holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetricDataSource for InMemoryHealthStore {
    fn get_metric_data(
        &self,
        metric: &MetricId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HealthRecord>> {
        Ok(self
            .records
            .get(metric)
            .map(|series| {
                series
                    .iter()
                    .filter(|r| r.timestamp >= start && r.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn get_all_records(&self) -> Result<Vec<HealthRecord>> {
        let mut all: Vec<HealthRecord> = self
            .records
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        all.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.metric.cmp(&b.metric)));
        Ok(all)
    }
}

/// Computes statistics over daily values pulled from a data source
pub struct RecordStatisticsCalculator {
    source: Arc<dyn MetricDataSource>,
}

impl RecordStatisticsCalculator {
    /// Wrap a data source
    pub fn new(source: Arc<dyn MetricDataSource>) -> Self {
        Self { source }
    }
}

impl StatisticsProvider for RecordStatisticsCalculator {
    fn calculate_statistics(
        &self,
        metric: &MetricId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<MetricStatistics>> {
        let records = self.source.get_metric_data(metric, start, end)?;
        let dated: Vec<(DateTime<Utc>, f64)> = daily_values(&records, metric.daily_aggregation())
            .into_iter()
            .map(|(day, value)| (day.and_time(NaiveTime::MIN).and_utc(), value))
            .collect();
        Ok(MetricStatistics::from_values(&dated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_store_filters_by_range_and_metric() {
        let store = InMemoryHealthStore::new();
        let touched = store.insert_records(vec![
            HealthRecord::new("steps", day(3), 3000.0),
            HealthRecord::new("steps", day(1), 1000.0),
            HealthRecord::new("heart_rate", day(2), 62.0),
        ]);
        assert_eq!(touched, vec![MetricId::new("steps"), MetricId::new("heart_rate")]);
        assert_eq!(store.len(), 3);

        let steps = store
            .get_metric_data(&MetricId::new("steps"), day(1), day(2))
            .unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].value, 1000.0);

        let none = store
            .get_metric_data(&MetricId::new("sleep_hours"), day(1), day(3))
            .unwrap();
        assert!(none.is_empty());

        let all = store.get_all_records().unwrap();
        assert_eq!(all.first().map(|r| r.timestamp), Some(day(1)));
    }

    #[test]
    fn test_statistics_calculator_uses_daily_totals() {
        let store = Arc::new(InMemoryHealthStore::new());
        store.insert_records(vec![
            HealthRecord::new("steps", day(1), 2000.0),
            HealthRecord::new("steps", day(1) + Duration::hours(5), 4000.0),
            HealthRecord::new("steps", day(2), 8000.0),
        ]);

        let calculator = RecordStatisticsCalculator::new(store);
        let stats = calculator
            .calculate_statistics(&MetricId::new("steps"), day(1), day(2))
            .unwrap()
            .unwrap();

        assert_eq!(stats.count, 2);
        assert_eq!(stats.mean, 7000.0);
        assert_eq!(stats.max, 8000.0);

        let empty = calculator
            .calculate_statistics(&MetricId::new("steps"), day(10), day(12))
            .unwrap();
        assert!(empty.is_none());
    }
}
