use crate::metrics::{MetricId, MetricStatistics};
use crate::trends::{ComparativeData, ComparisonTrend, PersonalBest};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A metric's recent values set against its own history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalComparison {
    /// Trailing day
    pub current: Option<MetricStatistics>,
    /// Trailing 7 days
    pub rolling_7_day: Option<MetricStatistics>,
    /// Trailing 30 days
    pub rolling_30_day: Option<MetricStatistics>,
    /// Trailing 90 days
    pub rolling_90_day: Option<MetricStatistics>,
    /// Trailing 365 days
    pub rolling_365_day: Option<MetricStatistics>,
    /// The same 30-day window one year earlier
    pub same_period_last_year: Option<MetricStatistics>,
    /// Highest daily value in the 365-day window
    pub personal_best: Option<PersonalBest>,
    /// Mean of the 365-day window
    pub personal_average: Option<f64>,
    /// 30-day mean against the 90-day mean
    pub trend_direction: Option<ComparisonTrend>,
}

impl HistoricalComparison {
    /// Whether every field is absent
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Block attached to a [`crate::trends::TrendResult`]
    pub fn comparative_data(&self) -> ComparativeData {
        ComparativeData {
            rolling_7_day: self.rolling_7_day.as_ref().map(|s| s.mean),
            rolling_30_day: self.rolling_30_day.as_ref().map(|s| s.mean),
            rolling_90_day: self.rolling_90_day.as_ref().map(|s| s.mean),
            trend_direction: self.trend_direction,
            personal_best: self.personal_best,
            personal_average: self.personal_average,
        }
    }
}

/// What a [`ComparisonResult`] compares against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonType {
    /// An age/gender/activity cohort
    Demographic,
    /// A seasonal baseline for the calendar month
    Seasonal,
}

/// How far a comparison's inputs travel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyLevel {
    /// Only the user's own data and fixed models
    LocalOnly,
    /// Shared values are noised before use
    Anonymized,
    /// Only cohort aggregates are used
    Aggregated,
}

impl fmt::Display for PrivacyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LocalOnly => "local_only",
            Self::Anonymized => "anonymized",
            Self::Aggregated => "aggregated",
        };
        f.write_str(s)
    }
}

/// Gender used to select a demographic cohort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    #[allow(missing_docs)]
    Female,
    #[allow(missing_docs)]
    Male,
    #[allow(missing_docs)]
    Other,
}

/// Self-reported activity level used to select a demographic cohort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    #[allow(missing_docs)]
    Sedentary,
    #[allow(missing_docs)]
    Moderate,
    #[allow(missing_docs)]
    Active,
    #[allow(missing_docs)]
    VeryActive,
}

/// Outcome of a demographic or seasonal comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// Metric compared
    pub metric: MetricId,
    /// Kind of baseline
    pub comparison_type: ComparisonType,
    /// The user's value (trailing 30-day mean)
    pub user_value: Option<f64>,
    /// Baseline value
    pub comparison_value: Option<f64>,
    /// Approximate percentile of the user within the baseline distribution
    pub percentile: Option<f64>,
    /// Members of the matched cohort, when there is one
    pub cohort_size: Option<usize>,
    /// Privacy treatment applied
    pub privacy_level: PrivacyLevel,
    /// Set when the comparison was withheld
    pub insufficient_data: bool,
    /// Short human-readable summary
    pub insight: String,
}

impl ComparisonResult {
    /// A withheld result carrying no comparison data
    pub fn insufficient(
        metric: MetricId,
        comparison_type: ComparisonType,
        privacy_level: PrivacyLevel,
        insight: impl Into<String>,
    ) -> Self {
        Self {
            metric,
            comparison_type,
            user_value: None,
            comparison_value: None,
            percentile: None,
            cohort_size: None,
            privacy_level,
            insufficient_data: true,
            insight: insight.into(),
        }
    }
}
