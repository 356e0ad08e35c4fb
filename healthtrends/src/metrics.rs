//! Health metric identifiers, records and descriptive statistics

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metrics the processor accepts when no custom allow-list is configured
pub const KNOWN_METRICS: &[&str] = &[
    "steps",
    "distance",
    "active_energy",
    "basal_energy",
    "heart_rate",
    "resting_heart_rate",
    "walking_heart_rate",
    "heart_rate_variability",
    "sleep_hours",
    "body_mass",
    "body_fat_percentage",
    "flights_climbed",
    "exercise_minutes",
    "stand_hours",
    "respiratory_rate",
    "oxygen_saturation",
    "vo2_max",
];

/// Metrics whose samples add up over a day rather than being averaged
const CUMULATIVE_METRICS: &[&str] = &[
    "steps",
    "distance",
    "active_energy",
    "basal_energy",
    "flights_climbed",
    "exercise_minutes",
    "stand_hours",
];

/// Identifier for a single health data series
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricId(String);

impl MetricId {
    /// Create a metric identifier
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key used for this metric in both trend cache tiers
    pub fn cache_key(&self) -> String {
        format!("trend_{}", self.0)
    }

    /// Inverse of [`MetricId::cache_key`]
    pub fn from_cache_key(key: &str) -> Option<Self> {
        key.strip_prefix("trend_")
            .filter(|rest| !rest.is_empty())
            .map(Self::new)
    }

    /// How samples of this metric combine into a daily value
    pub fn daily_aggregation(&self) -> DailyAggregation {
        if CUMULATIVE_METRICS.contains(&self.0.as_str()) {
            DailyAggregation::Sum
        } else {
            DailyAggregation::Mean
        }
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MetricId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for MetricId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for MetricId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// How multiple samples on the same day are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyAggregation {
    /// Add samples together (step counts, energy)
    Sum,
    /// Average samples (heart rate, body mass)
    Mean,
}

/// A single dated measurement from a health export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    /// Which series this sample belongs to
    pub metric: MetricId,
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
    /// Measured value
    pub value: f64,
}

impl HealthRecord {
    /// Create a record
    pub fn new(metric: impl Into<MetricId>, timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            timestamp,
            value,
        }
    }
}

/// Collapse raw records into one value per calendar day, ordered by date
pub fn daily_values(records: &[HealthRecord], aggregation: DailyAggregation) -> Vec<(NaiveDate, f64)> {
    let mut days: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for record in records.iter().filter(|r| r.value.is_finite()) {
        let entry = days.entry(record.timestamp.date_naive()).or_insert((0.0, 0));
        entry.0 += record.value;
        entry.1 += 1;
    }

    days.into_iter()
        .map(|(day, (sum, count))| match aggregation {
            DailyAggregation::Sum => (day, sum),
            DailyAggregation::Mean => (day, sum / count as f64),
        })
        .collect()
}

/// Percentiles reported alongside the basic statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    /// 10th percentile
    pub p10: f64,
    /// 25th percentile
    pub p25: f64,
    /// 75th percentile
    pub p75: f64,
    /// 90th percentile
    pub p90: f64,
}

/// Descriptive statistics for a metric over a date range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStatistics {
    /// Number of values summarised
    pub count: usize,
    /// Arithmetic mean
    pub mean: f64,
    /// Median
    pub median: f64,
    /// Population standard deviation
    pub std: f64,
    /// Smallest value
    pub min: f64,
    /// Largest value
    pub max: f64,
    /// Selected percentiles
    pub percentiles: Percentiles,
    /// When the maximum was observed, if known
    pub max_at: Option<DateTime<Utc>>,
}

impl MetricStatistics {
    /// Summarise dated values; `None` when there are no finite values
    pub fn from_values(values: &[(DateTime<Utc>, f64)]) -> Option<Self> {
        let finite: Vec<(DateTime<Utc>, f64)> = values
            .iter()
            .copied()
            .filter(|(_, v)| v.is_finite())
            .collect();
        if finite.is_empty() {
            return None;
        }

        let count = finite.len();
        let mean = finite.iter().map(|(_, v)| v).sum::<f64>() / count as f64;
        let variance = finite.iter().map(|(_, v)| (v - mean).powi(2)).sum::<f64>() / count as f64;

        let (max_at, max) = finite
            .iter()
            .copied()
            .fold((None, f64::NEG_INFINITY), |(at, best), (ts, v)| {
                if v > best {
                    (Some(ts), v)
                } else {
                    (at, best)
                }
            });

        let mut sorted: Vec<f64> = finite.iter().map(|(_, v)| *v).collect();
        sorted.sort_by(f64::total_cmp);

        Some(Self {
            count,
            mean,
            median: percentile(&sorted, 50.0),
            std: variance.sqrt(),
            min: sorted[0],
            max,
            percentiles: Percentiles {
                p10: percentile(&sorted, 10.0),
                p25: percentile(&sorted, 25.0),
                p75: percentile(&sorted, 75.0),
                p90: percentile(&sorted, 90.0),
            },
            max_at,
        })
    }
}

/// Linear-interpolated percentile of an ascending, non-empty slice
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_cache_key_round_trip() {
        let metric = MetricId::new("resting_heart_rate");
        assert_eq!(metric.cache_key(), "trend_resting_heart_rate");
        assert_eq!(
            MetricId::from_cache_key("trend_resting_heart_rate"),
            Some(metric)
        );
        assert_eq!(MetricId::from_cache_key("trend_"), None);
        assert_eq!(MetricId::from_cache_key("other_steps"), None);
    }

    #[test]
    fn test_daily_aggregation_by_metric() {
        assert_eq!(MetricId::new("steps").daily_aggregation(), DailyAggregation::Sum);
        assert_eq!(
            MetricId::new("heart_rate").daily_aggregation(),
            DailyAggregation::Mean
        );
    }

    #[test]
    fn test_daily_values_sum_and_mean() {
        let records = vec![
            HealthRecord::new("steps", at(1, 8), 1000.0),
            HealthRecord::new("steps", at(1, 18), 3000.0),
            HealthRecord::new("steps", at(2, 9), 500.0),
            HealthRecord::new("steps", at(2, 10), f64::NAN),
        ];

        let summed = daily_values(&records, DailyAggregation::Sum);
        assert_eq!(summed.len(), 2);
        assert_eq!(summed[0].1, 4000.0);
        assert_eq!(summed[1].1, 500.0);

        let averaged = daily_values(&records, DailyAggregation::Mean);
        assert_eq!(averaged[0].1, 2000.0);
    }

    #[test]
    fn test_statistics_from_values() {
        let values: Vec<(DateTime<Utc>, f64)> = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]
            .iter()
            .enumerate()
            .map(|(i, v)| (at(i as u32 + 1, 12), *v))
            .collect();

        let stats = MetricStatistics::from_values(&values).unwrap();
        assert_eq!(stats.count, 8);
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.std, 2.0);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 9.0);
        assert_eq!(stats.median, 4.5);
        assert_eq!(stats.max_at, Some(at(8, 12)));
    }

    #[test]
    fn test_statistics_empty() {
        assert!(MetricStatistics::from_values(&[]).is_none());
        assert!(MetricStatistics::from_values(&[(at(1, 0), f64::NAN)]).is_none());
    }
}
