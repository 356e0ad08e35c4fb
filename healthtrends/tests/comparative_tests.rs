//! Comparative engine behaviour, alone and wired to a running processor

use chrono::{TimeZone, Utc};
use healthtrends::comparative::{CohortNorm, DemographicNorms, StaticDemographicNorms};
use healthtrends::privacy::DEMOGRAPHIC_COMPARISON;
use healthtrends::test_utils::{daily_records, test_config, CountingStatisticsProvider};
use healthtrends::trends::ComparisonTrend;
use healthtrends::{
    ActivityLevel, BackgroundTrendProcessor, ComparativeAnalyticsEngine, Gender,
    InMemoryHealthStore, LinearTrendAnalyzer, MetricId, PrivacyManager,
    RecordStatisticsCalculator, MIN_COHORT_SIZE,
};
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;

fn engine_with(stats: Arc<CountingStatisticsProvider>) -> ComparativeAnalyticsEngine {
    ComparativeAnalyticsEngine::new(stats, Arc::new(PrivacyManager::default()))
}

#[test]
fn test_historical_validation_boundary() {
    let stats = Arc::new(CountingStatisticsProvider::by_window(&[(7, 8000.0), (30, 7500.0)]));
    let engine = engine_with(stats);
    let now = Utc::now();

    let err = engine.compare_to_historical("bad metric!@#", now, 365).unwrap_err();
    assert!(err.is_invalid_input());

    let err = engine.compare_to_historical("steps", now, 9999).unwrap_err();
    assert!(err.is_invalid_input());
    assert!(engine.compare_to_historical("steps", now, 0).is_err());

    let comparison = engine.compare_to_historical("steps", now, 30).unwrap();
    assert!(!comparison.is_empty());
    assert_eq!(comparison.rolling_7_day.as_ref().map(|s| s.mean), Some(8000.0));
    assert_eq!(comparison.rolling_30_day.as_ref().map(|s| s.mean), Some(7500.0));
    assert_eq!(comparison.personal_average, Some(7500.0));
}

#[test]
fn test_trend_classification_literal_cases() {
    let now = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap();
    let cases = [
        (110.0, Some(ComparisonTrend::Improving)),
        (95.0, Some(ComparisonTrend::Stable)),
        (94.0, Some(ComparisonTrend::Declining)),
    ];

    for (recent, expected) in cases {
        let stats = Arc::new(CountingStatisticsProvider::by_window(&[(30, recent), (90, 100.0)]));
        let engine = engine_with(stats);
        let comparison = engine.compare_to_historical("steps", now, 365).unwrap();
        assert_eq!(comparison.trend_direction, expected, "30-day mean {recent}");
    }
}

#[test]
fn test_historical_comparison_is_memoised() {
    let stats = Arc::new(CountingStatisticsProvider::by_window(&[(30, 10.0), (90, 10.0)]));
    let engine = engine_with(stats.clone());
    let date = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();

    let first = engine.compare_to_historical("steps", date, 365).unwrap();
    let calls_after_first = stats.calls();
    assert!(calls_after_first > 0);

    let second = engine.compare_to_historical("steps", date, 365).unwrap();
    assert_eq!(stats.calls(), calls_after_first);
    assert!(Arc::ptr_eq(&first, &second));

    // any change in the key recomputes
    engine.compare_to_historical("steps", date, 364).unwrap();
    assert!(stats.calls() > calls_after_first);
}

struct FixedCohort(usize);

impl DemographicNorms for FixedCohort {
    fn cohort(
        &self,
        _metric: &MetricId,
        _age: i32,
        _gender: Option<Gender>,
        _activity_level: Option<ActivityLevel>,
    ) -> Option<CohortNorm> {
        Some(CohortNorm {
            mean: 100.0,
            std: 15.0,
            size: self.0,
        })
    }
}

fn gender_strategy() -> impl Strategy<Value = Option<Gender>> {
    prop_oneof![
        Just(None),
        Just(Some(Gender::Female)),
        Just(Some(Gender::Male)),
        Just(Some(Gender::Other)),
    ]
}

fn activity_strategy() -> impl Strategy<Value = Option<ActivityLevel>> {
    prop_oneof![
        Just(None),
        Just(Some(ActivityLevel::Sedentary)),
        Just(Some(ActivityLevel::Moderate)),
        Just(Some(ActivityLevel::Active)),
        Just(Some(ActivityLevel::VeryActive)),
    ]
}

proptest! {
    #[test]
    fn prop_small_cohorts_never_compared(
        size in 0usize..200,
        age in 13i32..=120,
        gender in gender_strategy(),
        activity in activity_strategy(),
    ) {
        let stats = Arc::new(CountingStatisticsProvider::by_window(&[(30, 110.0)]));
        let engine = engine_with(stats).with_norms(Arc::new(FixedCohort(size)));
        engine.privacy().grant(DEMOGRAPHIC_COMPARISON);

        let result = engine
            .compare_to_demographic("steps", age, gender, activity)
            .unwrap()
            .unwrap();

        if size < MIN_COHORT_SIZE {
            prop_assert!(result.insufficient_data);
            prop_assert!(result.comparison_value.is_none());
            prop_assert!(result.cohort_size.is_none());
        } else {
            prop_assert!(!result.insufficient_data);
            prop_assert_eq!(result.cohort_size, Some(size));
        }
    }

    #[test]
    fn prop_builtin_norms_respect_floor(
        age in 13i32..=120,
        gender in gender_strategy(),
        activity in activity_strategy(),
    ) {
        let norms = StaticDemographicNorms::default();
        let metric = MetricId::new("steps");
        let stats = Arc::new(CountingStatisticsProvider::by_window(&[(30, 9000.0)]));
        let engine = engine_with(stats);
        engine.privacy().grant(DEMOGRAPHIC_COMPARISON);

        let result = engine
            .compare_to_demographic("steps", age, gender, activity)
            .unwrap()
            .unwrap();
        let cohort_size = norms.cohort(&metric, age, gender, activity).map(|c| c.size).unwrap_or(0);

        if !result.insufficient_data {
            prop_assert!(cohort_size >= MIN_COHORT_SIZE);
        }
    }

    #[test]
    fn prop_trend_thresholds(baseline in 1.0f64..10_000.0, ratio in 0.5f64..1.5) {
        let recent = baseline * ratio;
        let expected = if recent > baseline * 1.05 {
            ComparisonTrend::Improving
        } else if recent < baseline * 0.95 {
            ComparisonTrend::Declining
        } else {
            ComparisonTrend::Stable
        };
        prop_assert_eq!(ComparisonTrend::classify(recent, baseline), expected);
    }
}

#[test]
fn test_demographic_denied_without_permission() {
    let stats = Arc::new(CountingStatisticsProvider::by_window(&[(30, 110.0)]));
    let engine = engine_with(stats.clone()).with_norms(Arc::new(FixedCohort(1000)));

    assert!(engine
        .compare_to_demographic("steps", 40, None, None)
        .unwrap()
        .is_none());
    assert_eq!(stats.calls(), 0);
}

#[tokio::test]
async fn test_processor_attaches_historical_context() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());

    let store = Arc::new(InMemoryHealthStore::new());
    store.insert_records(daily_records("steps", 120, 10.0));

    let statistics = Arc::new(RecordStatisticsCalculator::new(store.clone()));
    let engine = Arc::new(ComparativeAnalyticsEngine::from_config(
        &config,
        statistics,
        Arc::new(PrivacyManager::default()),
    ));
    let processor = BackgroundTrendProcessor::builder(
        config,
        store,
        Arc::new(LinearTrendAnalyzer::default()),
    )
    .comparator(engine.clone())
    .spawn();
    engine.attach_processor(&processor);

    // nothing cached yet, so the pass-through only queues work
    assert!(engine.get_trend_analysis("steps", true).await.unwrap().is_none());

    let trend = processor
        .get_trend(&MetricId::new("steps"), true)
        .await
        .expect("trend computed");
    let context = trend.comparative_data.as_ref().expect("comparative data attached");
    assert!(context.rolling_7_day.is_some());
    assert!(context.rolling_90_day.is_some());
    // steadily rising series
    assert_eq!(context.trend_direction, Some(ComparisonTrend::Improving));
    assert!(context.personal_best.is_some());

    let via_engine = engine.get_trend_analysis("steps", true).await.unwrap();
    assert!(via_engine.is_some());

    // a forced refresh queues work and returns nothing immediately
    assert!(engine.get_trend_analysis("steps", false).await.unwrap().is_none());

    processor.shutdown().await;
    drop(processor);
    assert!(engine.get_trend_analysis("steps", true).await.unwrap().is_none());
}
