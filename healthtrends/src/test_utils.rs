//! Test doubles shared by unit and integration tests
//!
//! The mocks count their calls so tests can assert that cached paths skip the
//! data source, the analyzer or the statistics provider entirely.

use crate::config::Config;
use crate::error::{HealthTrendsError, Result};
use crate::metrics::{HealthRecord, MetricId, MetricStatistics, Percentiles};
use crate::providers::{MetricDataSource, StatisticsProvider, TrendAnalysisEngine};
use crate::trends::{LinearTrendAnalyzer, TrendResult};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Defaults tuned for fast tests, caching under `cache_dir`
pub fn test_config(cache_dir: &Path) -> Config {
    Config {
        poll_interval_ms: 20,
        wait_timeout_secs: 5,
        shutdown_timeout_secs: 2,
        cache_dir: cache_dir.to_path_buf(),
        ..Config::default()
    }
}

/// One record per day for the last `days` days, oldest first, rising by one
/// per day from `base`
pub fn daily_records(metric: &str, days: usize, base: f64) -> Vec<HealthRecord> {
    let now = Utc::now();
    (0..days)
        .map(|i| {
            let age = (days - 1 - i) as i64;
            HealthRecord::new(metric, now - Duration::days(age), base + i as f64)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceMode {
    Normal,
    Failing,
    Panicking,
}

/// In-memory data source that counts calls and tracks concurrency per metric
#[derive(Debug)]
pub struct CountingDataSource {
    records: Vec<HealthRecord>,
    mode: SourceMode,
    delay: std::time::Duration,
    calls: AtomicUsize,
    active: Mutex<HashMap<MetricId, usize>>,
    max_concurrent: AtomicUsize,
}

impl Default for CountingDataSource {
    fn default() -> Self {
        Self::with_records(Vec::new())
    }
}

impl CountingDataSource {
    /// Serve `records`
    pub fn with_records(records: Vec<HealthRecord>) -> Self {
        Self {
            records,
            mode: SourceMode::Normal,
            delay: std::time::Duration::ZERO,
            calls: AtomicUsize::new(0),
            active: Mutex::new(HashMap::new()),
            max_concurrent: AtomicUsize::new(0),
        }
    }

    /// Every call returns a data source error
    pub fn failing() -> Self {
        Self {
            mode: SourceMode::Failing,
            ..Self::default()
        }
    }

    /// Every call panics
    pub fn panicking() -> Self {
        Self {
            mode: SourceMode::Panicking,
            ..Self::default()
        }
    }

    /// Sleep this long inside each call
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Calls to `get_metric_data`
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls ever in progress at once for a single metric
    pub fn max_concurrent_per_metric(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

impl MetricDataSource for CountingDataSource {
    fn get_metric_data(
        &self,
        metric: &MetricId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HealthRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            SourceMode::Failing => {
                return Err(HealthTrendsError::DataSource("database locked".to_string()))
            }
            SourceMode::Panicking => panic!("data source exploded"),
            SourceMode::Normal => {}
        }

        {
            let mut active = self.active.lock().unwrap();
            let count = active.entry(metric.clone()).or_insert(0);
            *count += 1;
            self.max_concurrent.fetch_max(*count, Ordering::SeqCst);
        }

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let records = self
            .records
            .iter()
            .filter(|r| &r.metric == metric && r.timestamp >= start && r.timestamp <= end)
            .cloned()
            .collect();

        if let Some(count) = self.active.lock().unwrap().get_mut(metric) {
            *count -= 1;
        }
        Ok(records)
    }

    fn get_all_records(&self) -> Result<Vec<HealthRecord>> {
        Ok(self.records.clone())
    }
}

/// [`LinearTrendAnalyzer`] that counts calls
#[derive(Debug, Default)]
pub struct CountingAnalyzer {
    inner: LinearTrendAnalyzer,
    calls: AtomicUsize,
}

impl CountingAnalyzer {
    /// Calls to `analyze`
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TrendAnalysisEngine for CountingAnalyzer {
    fn analyze(
        &self,
        data: &[HealthRecord],
        metric: &MetricId,
        forecast_days: u32,
    ) -> Result<TrendResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.analyze(data, metric, forecast_days)
    }
}

/// Statistics stub keyed by window length in days
#[derive(Debug)]
pub struct CountingStatisticsProvider {
    means: Option<HashMap<i64, f64>>,
    calls: AtomicUsize,
}

impl CountingStatisticsProvider {
    /// Windows of `days` report a flat series at `mean`; other windows have
    /// no data
    pub fn by_window(windows: &[(i64, f64)]) -> Self {
        Self {
            means: Some(windows.iter().copied().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every call fails
    pub fn failing() -> Self {
        Self {
            means: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Calls to `calculate_statistics`
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Statistics for `count` identical values
pub fn flat_statistics(mean: f64, count: usize, at: DateTime<Utc>) -> MetricStatistics {
    MetricStatistics {
        count,
        mean,
        median: mean,
        std: 0.0,
        min: mean,
        max: mean,
        percentiles: Percentiles {
            p10: mean,
            p25: mean,
            p75: mean,
            p90: mean,
        },
        max_at: Some(at),
    }
}

impl StatisticsProvider for CountingStatisticsProvider {
    fn calculate_statistics(
        &self,
        _metric: &MetricId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<MetricStatistics>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(means) = &self.means else {
            return Err(HealthTrendsError::DataSource("statistics unavailable".to_string()));
        };

        let days = (end - start).num_days();
        Ok(means
            .get(&days)
            .map(|mean| flat_statistics(*mean, days.max(1) as usize, end)))
    }
}
