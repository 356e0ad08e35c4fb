//! Comparative analytics: a metric against its own history, a demographic
//! cohort, or a seasonal baseline
//!
//! Every public method validates its inputs and returns
//! [`HealthTrendsError::InvalidInput`] for bad arguments. Historical
//! comparisons are memoised per `(metric, date, lookback)`.

mod norms;
mod types;
pub mod validation;

pub use norms::{
    hemisphere_month, is_southern_hemisphere, CohortNorm, DemographicNorms, SeasonalModel,
    StaticDemographicNorms, StaticSeasonalModel, MIN_COHORT_SIZE,
};
pub use types::{
    ActivityLevel, ComparisonResult, ComparisonType, Gender, HistoricalComparison, PrivacyLevel,
};

use crate::config::Config;
use crate::error::{HealthTrendsError, Result};
use crate::metrics::{MetricId, MetricStatistics};
use crate::privacy::{AnonymizationMethod, PrivacyManager, DEMOGRAPHIC_COMPARISON};
use crate::processor::{BackgroundTrendProcessor, PRIORITY_INTERACTIVE};
use crate::providers::{HistoricalComparator, StatisticsProvider};
use crate::trends::{ComparisonTrend, PersonalBest, TrendResult};
use chrono::{DateTime, Datelike, Duration, Month, Utc};
use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tracing::{debug, error, info, warn};

/// Default number of memoised historical comparisons
pub const DEFAULT_MEMO_CAPACITY: usize = 128;
/// Default lookback for historical comparisons
pub const DEFAULT_LOOKBACK_DAYS: i64 = 365;

const RECENT_WINDOW_DAYS: i64 = 30;

type MemoKey = (MetricId, DateTime<Utc>, i64);

/// Validated, privacy-aware comparisons for one user's metrics
pub struct ComparativeAnalyticsEngine {
    statistics: Arc<dyn StatisticsProvider>,
    privacy: Arc<PrivacyManager>,
    norms: Arc<dyn DemographicNorms>,
    seasonal: Arc<dyn SeasonalModel>,
    known_metrics: HashSet<String>,
    memo: Mutex<LruCache<MemoKey, Arc<HistoricalComparison>>>,
    processor: RwLock<Weak<BackgroundTrendProcessor>>,
}

impl std::fmt::Debug for ComparativeAnalyticsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComparativeAnalyticsEngine")
            .field("memo_len", &self.memo_len())
            .field("has_processor", &self.processor().is_some())
            .finish()
    }
}

impl ComparativeAnalyticsEngine {
    /// Create an engine with the built-in norms and seasonal model
    pub fn new(statistics: Arc<dyn StatisticsProvider>, privacy: Arc<PrivacyManager>) -> Self {
        let capacity = NonZeroUsize::new(DEFAULT_MEMO_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            statistics,
            privacy,
            norms: Arc::new(StaticDemographicNorms::default()),
            seasonal: Arc::new(StaticSeasonalModel),
            known_metrics: crate::metrics::KNOWN_METRICS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            memo: Mutex::new(LruCache::new(capacity)),
            processor: RwLock::new(Weak::new()),
        }
    }

    /// Create an engine sized and filtered by `config`
    pub fn from_config(
        config: &Config,
        statistics: Arc<dyn StatisticsProvider>,
        privacy: Arc<PrivacyManager>,
    ) -> Self {
        Self::new(statistics, privacy)
            .with_memo_capacity(config.historical_memo_capacity)
            .with_known_metrics(config.known_metrics.iter().cloned())
    }

    /// Replace the demographic reference
    pub fn with_norms(mut self, norms: Arc<dyn DemographicNorms>) -> Self {
        self.norms = norms;
        self
    }

    /// Replace the seasonal model
    pub fn with_seasonal_model(mut self, seasonal: Arc<dyn SeasonalModel>) -> Self {
        self.seasonal = seasonal;
        self
    }

    /// Resize the historical memo. Zero falls back to the default.
    pub fn with_memo_capacity(self, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .or(NonZeroUsize::new(DEFAULT_MEMO_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            memo: Mutex::new(LruCache::new(capacity)),
            ..self
        }
    }

    /// Replace the known-metric list used alongside the name pattern
    pub fn with_known_metrics(mut self, metrics: impl IntoIterator<Item = String>) -> Self {
        self.known_metrics = metrics.into_iter().collect();
        self
    }

    /// Route `get_trend_analysis` to `processor`. Only a weak reference is
    /// kept, so the processor may hold this engine as its comparator.
    pub fn attach_processor(&self, processor: &Arc<BackgroundTrendProcessor>) {
        *self
            .processor
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(processor);
    }

    fn processor(&self) -> Option<Arc<BackgroundTrendProcessor>> {
        self.processor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }

    /// Privacy manager gating shared comparisons
    pub fn privacy(&self) -> &PrivacyManager {
        &self.privacy
    }

    /// Safe-pattern name, or one of the known metrics
    pub fn validate_metric_name(&self, metric: &str) -> bool {
        validation::is_safe_metric_name(metric) || self.known_metrics.contains(metric)
    }

    /// Age in `[13, 120]`
    pub fn validate_age(&self, age: i32) -> bool {
        validation::is_valid_age(age)
    }

    /// Ordered range of at most ten years
    pub fn validate_date_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        validation::is_valid_date_range(start, end)
    }

    fn ensure_metric_name(&self, metric: &str) -> Result<MetricId> {
        if self.validate_metric_name(metric) {
            Ok(MetricId::new(metric))
        } else {
            Err(HealthTrendsError::invalid_input(
                "metric",
                format!(
                    "'{}' must be 1-{} letters, digits, '_', '-' or '.'",
                    metric.escape_debug(),
                    validation::MAX_METRIC_NAME_LEN
                ),
            ))
        }
    }

    fn ensure_age(&self, age: i32) -> Result<()> {
        if self.validate_age(age) {
            Ok(())
        } else {
            Err(HealthTrendsError::invalid_input(
                "age",
                format!(
                    "{} is outside {}..={}",
                    age,
                    validation::MIN_AGE,
                    validation::MAX_AGE
                ),
            ))
        }
    }

    fn ensure_date_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
        if self.validate_date_range(start, end) {
            Ok(())
        } else {
            Err(HealthTrendsError::invalid_input(
                "date_range",
                format!(
                    "start must not be after end and the span must be at most {} days",
                    validation::MAX_RANGE_DAYS
                ),
            ))
        }
    }

    /// Statistics for an arbitrary validated range
    pub fn get_period_statistics(
        &self,
        metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<MetricStatistics>> {
        let metric = self.ensure_metric_name(metric)?;
        self.ensure_date_range(start, end)?;
        self.statistics.calculate_statistics(&metric, start, end)
    }

    /// The trailing day, rolling windows, last year's matching window,
    /// personal best and the 30-vs-90 day trend for `metric` as of
    /// `current_date`.
    ///
    /// Personal best and average are approximated from the 365-day window,
    /// not a scan of the full history. `lookback_days` is validated and keys
    /// the memo. Bad arguments are an error; any failure while computing
    /// returns an empty comparison that is not memoised.
    pub fn compare_to_historical(
        &self,
        metric: &str,
        current_date: DateTime<Utc>,
        lookback_days: i64,
    ) -> Result<Arc<HistoricalComparison>> {
        let metric = self.ensure_metric_name(metric)?;
        if !validation::is_valid_lookback(lookback_days) {
            return Err(HealthTrendsError::invalid_input(
                "lookback_days",
                format!(
                    "{} is outside 1..={}",
                    lookback_days,
                    validation::MAX_RANGE_DAYS
                ),
            ));
        }

        let key: MemoKey = (metric, current_date, lookback_days);
        if let Some(hit) = self.lock_memo().get(&key) {
            debug!(metric = %key.0, "Historical comparison served from memo");
            return Ok(Arc::clone(hit));
        }

        match self.build_historical(&key.0, current_date) {
            Ok(comparison) => {
                let comparison = Arc::new(comparison);
                self.lock_memo().put(key, Arc::clone(&comparison));
                Ok(comparison)
            }
            Err(e) => {
                error!(metric = %key.0, "Historical comparison failed: {}", e);
                Ok(Arc::new(HistoricalComparison::default()))
            }
        }
    }

    fn lock_memo(&self) -> std::sync::MutexGuard<'_, LruCache<MemoKey, Arc<HistoricalComparison>>> {
        self.memo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn window(
        &self,
        metric: &MetricId,
        end: DateTime<Utc>,
        days: i64,
    ) -> Result<Option<MetricStatistics>> {
        self.statistics
            .calculate_statistics(metric, end - Duration::days(days), end)
    }

    fn build_historical(
        &self,
        metric: &MetricId,
        current_date: DateTime<Utc>,
    ) -> Result<HistoricalComparison> {
        let current = self.window(metric, current_date, 1)?;
        let rolling_7_day = self.window(metric, current_date, 7)?;
        let rolling_30_day = self.window(metric, current_date, 30)?;
        let rolling_90_day = self.window(metric, current_date, 90)?;
        let rolling_365_day = self.window(metric, current_date, 365)?;
        let same_period_last_year =
            self.window(metric, current_date - Duration::days(365), RECENT_WINDOW_DAYS)?;

        let trend_direction = match (&rolling_30_day, &rolling_90_day) {
            (Some(recent), Some(baseline)) => {
                Some(ComparisonTrend::classify(recent.mean, baseline.mean))
            }
            _ => None,
        };

        Ok(HistoricalComparison {
            personal_best: rolling_365_day.as_ref().map(|s| PersonalBest {
                timestamp: s.max_at.unwrap_or(current_date),
                value: s.max,
            }),
            personal_average: rolling_365_day.as_ref().map(|s| s.mean),
            current,
            rolling_7_day,
            rolling_30_day,
            rolling_90_day,
            rolling_365_day,
            same_period_last_year,
            trend_direction,
        })
    }

    /// Drop every memoised historical comparison
    pub fn clear_memo(&self) {
        self.lock_memo().clear();
    }

    /// Number of memoised historical comparisons
    pub fn memo_len(&self) -> usize {
        self.lock_memo().len()
    }

    /// The user's trailing 30-day mean against a matched cohort.
    ///
    /// `Ok(None)` unless the user has granted `demographic_comparison`.
    /// Cohorts smaller than [`MIN_COHORT_SIZE`] yield an insufficient result
    /// with no cohort figures in it.
    pub fn compare_to_demographic(
        &self,
        metric: &str,
        age: i32,
        gender: Option<Gender>,
        activity_level: Option<ActivityLevel>,
    ) -> Result<Option<ComparisonResult>> {
        let metric = self.ensure_metric_name(metric)?;
        self.ensure_age(age)?;

        if !self.privacy.has_permission(DEMOGRAPHIC_COMPARISON) {
            info!(metric = %metric, "Demographic comparison not permitted");
            return Ok(None);
        }

        let cohort = match self.norms.cohort(&metric, age, gender, activity_level) {
            Some(cohort) if cohort.size >= MIN_COHORT_SIZE => cohort,
            Some(_) => {
                warn!(metric = %metric, "Matched cohort below k-anonymity floor");
                return Ok(Some(ComparisonResult::insufficient(
                    metric,
                    ComparisonType::Demographic,
                    PrivacyLevel::Aggregated,
                    "Not enough people in this group to compare privately",
                )));
            }
            None => {
                return Ok(Some(ComparisonResult::insufficient(
                    metric,
                    ComparisonType::Demographic,
                    PrivacyLevel::Aggregated,
                    "No reference group is available for this metric",
                )));
            }
        };

        let Some(user_value) = self.recent_mean(&metric, Utc::now())? else {
            return Ok(Some(ComparisonResult::insufficient(
                metric,
                ComparisonType::Demographic,
                PrivacyLevel::Anonymized,
                "Not enough recent data to compare",
            )));
        };

        let shared_mean = self
            .privacy
            .anonymize_value(cohort.mean, AnonymizationMethod::DifferentialPrivacy);
        let percentile = if cohort.std > 0.0 {
            (normal_cdf((user_value - shared_mean) / cohort.std) * 100.0).clamp(1.0, 99.0)
        } else {
            50.0
        };

        let insight = if percentile >= 50.0 {
            format!("Higher than about {:.0}% of people like you", percentile)
        } else {
            format!("Lower than about {:.0}% of people like you", 100.0 - percentile)
        };

        Ok(Some(ComparisonResult {
            metric,
            comparison_type: ComparisonType::Demographic,
            user_value: Some(user_value),
            comparison_value: Some(shared_mean),
            percentile: Some(percentile),
            cohort_size: Some(cohort.size),
            privacy_level: PrivacyLevel::Anonymized,
            insufficient_data: false,
            insight,
        }))
    }

    /// The trailing 30-day mean against the user's own yearly average
    /// adjusted for the calendar month. Southern-hemisphere locations use
    /// the opposite season. Always [`PrivacyLevel::LocalOnly`].
    pub fn compare_to_seasonal(
        &self,
        metric: &str,
        current_date: DateTime<Utc>,
        location: Option<&str>,
    ) -> Result<Option<ComparisonResult>> {
        let metric = self.ensure_metric_name(metric)?;

        let recent = self.recent_mean(&metric, current_date)?;
        let yearly = self.window(&metric, current_date, 365)?.map(|s| s.mean);

        let (Some(user_value), Some(yearly)) = (recent, yearly) else {
            return Ok(Some(ComparisonResult::insufficient(
                metric,
                ComparisonType::Seasonal,
                PrivacyLevel::LocalOnly,
                "Not enough history for a seasonal comparison",
            )));
        };

        let month = hemisphere_month(current_date.month(), location);
        let baseline = yearly * self.seasonal.monthly_factor(&metric, month);
        let month_name = Month::try_from(current_date.month() as u8)
            .map(|m| m.name())
            .unwrap_or("this month");

        let insight = if baseline.abs() < f64::EPSILON {
            format!("No seasonal baseline for {}", month_name)
        } else {
            let change = (user_value - baseline) / baseline * 100.0;
            if change.abs() < 5.0 {
                format!("About usual for {}", month_name)
            } else if change > 0.0 {
                format!("{:.0}% above your usual for {}", change, month_name)
            } else {
                format!("{:.0}% below your usual for {}", -change, month_name)
            }
        };

        Ok(Some(ComparisonResult {
            metric,
            comparison_type: ComparisonType::Seasonal,
            user_value: Some(user_value),
            comparison_value: Some(baseline),
            percentile: None,
            cohort_size: None,
            privacy_level: PrivacyLevel::LocalOnly,
            insufficient_data: false,
            insight,
        }))
    }

    fn recent_mean(&self, metric: &MetricId, end: DateTime<Utc>) -> Result<Option<f64>> {
        Ok(self
            .window(metric, end, RECENT_WINDOW_DAYS)?
            .map(|s| s.mean))
    }

    /// Cached trend from the attached processor, queueing work on a miss.
    ///
    /// Never computes synchronously. With `use_cache == false` a forced
    /// refresh is queued and `None` returned; poll again later.
    pub async fn get_trend_analysis(
        &self,
        metric: &str,
        use_cache: bool,
    ) -> Result<Option<Arc<TrendResult>>> {
        let metric = self.ensure_metric_name(metric)?;

        let Some(processor) = self.processor() else {
            warn!(metric = %metric, "No trend processor attached");
            return Ok(None);
        };

        if !use_cache {
            processor.queue_trend_calculation(metric, PRIORITY_INTERACTIVE, true);
            return Ok(None);
        }

        Ok(processor.get_trend(&metric, false).await)
    }
}

impl HistoricalComparator for ComparativeAnalyticsEngine {
    fn compare_to_historical(
        &self,
        metric: &MetricId,
        current_date: DateTime<Utc>,
        lookback_days: i64,
    ) -> Result<Arc<HistoricalComparison>> {
        ComparativeAnalyticsEngine::compare_to_historical(
            self,
            metric.as_str(),
            current_date,
            lookback_days,
        )
    }
}

/// Standard normal CDF (Abramowitz and Stegun 7.1.26)
fn normal_cdf(z: f64) -> f64 {
    let x = z.abs() / std::f64::consts::SQRT_2;
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    let erf = 1.0 - poly * (-x * x).exp();
    if z >= 0.0 {
        0.5 * (1.0 + erf)
    } else {
        0.5 * (1.0 - erf)
    }
}
