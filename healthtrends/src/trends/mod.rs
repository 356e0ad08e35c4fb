//! Trend results and the default trend analysis engine

use crate::metrics::MetricId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Least-squares trend analyzer
pub mod analyzer;

pub use analyzer::LinearTrendAnalyzer;

/// Slope-based direction from the trend analysis engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    /// Values are rising over time
    Increasing,
    /// Values are falling over time
    Decreasing,
    /// No meaningful slope
    Stable,
    /// Too noisy to call a direction
    Volatile,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Increasing => "increasing",
            Self::Decreasing => "decreasing",
            Self::Stable => "stable",
            Self::Volatile => "volatile",
        };
        f.write_str(s)
    }
}

/// Direction derived by comparing the 30-day mean against the 90-day mean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonTrend {
    /// 30-day mean more than 5% above the 90-day mean
    Improving,
    /// Within 5% either way
    Stable,
    /// 30-day mean more than 5% below the 90-day mean
    Declining,
}

impl ComparisonTrend {
    /// Classify a recent mean against a longer baseline mean
    pub fn classify(recent_mean: f64, baseline_mean: f64) -> Self {
        if recent_mean > baseline_mean * 1.05 {
            Self::Improving
        } else if recent_mean < baseline_mean * 0.95 {
            Self::Declining
        } else {
            Self::Stable
        }
    }

    /// Lower-case label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Improving => "improving",
            Self::Stable => "stable",
            Self::Declining => "declining",
        }
    }
}

impl fmt::Display for ComparisonTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Highest value seen in the personal-record window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersonalBest {
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// The value
    pub value: f64,
}

/// One forecast day with its error band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    /// Forecast date
    pub date: NaiveDate,
    /// Predicted value
    pub value: f64,
    /// Lower bound of the error band
    pub lower: f64,
    /// Upper bound of the error band
    pub upper: f64,
}

/// Historical context merged into a trend result by the processor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparativeData {
    /// Mean of the trailing 7 days
    pub rolling_7_day: Option<f64>,
    /// Mean of the trailing 30 days
    pub rolling_30_day: Option<f64>,
    /// Mean of the trailing 90 days
    pub rolling_90_day: Option<f64>,
    /// 30-day vs 90-day classification
    pub trend_direction: Option<ComparisonTrend>,
    /// Best value in the last year
    pub personal_best: Option<PersonalBest>,
    /// Mean over the last year
    pub personal_average: Option<f64>,
}

/// Output of trend analysis for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    /// Metric analysed
    pub metric: MetricId,
    /// When the analysis ran
    pub generated_at: DateTime<Utc>,
    /// Number of raw records analysed
    pub data_points: usize,
    /// Slope-based direction
    pub direction: TrendDirection,
    /// Change per day
    pub slope_per_day: f64,
    /// Goodness of fit
    pub r_squared: f64,
    /// Confidence in the direction (0.0 to 1.0)
    pub confidence: f64,
    /// Standard deviation of day-to-day changes
    pub volatility: f64,
    /// Most recent daily value
    pub latest_value: f64,
    /// Mean daily value over the analysed window
    pub average_value: f64,
    /// Daily forecast
    pub forecast: Vec<ForecastPoint>,
    /// Historical comparison attached after analysis
    pub comparative_data: Option<ComparativeData>,
}

impl TrendResult {
    /// Attach historical comparison data
    pub fn with_comparative_data(mut self, data: ComparativeData) -> Self {
        self.comparative_data = Some(data);
        self
    }
}
