//! # HealthTrends
//!
//! Background trend processing and comparative analytics for personal health
//! exports.
//!
//! ## Features
//!
//! - **Trend Processing**: Priority-queued, bounded worker pool computing per-metric trends
//! - **Two-Tier Cache**: In-memory TTL cache backed by one JSON file per metric
//! - **Self-Healing**: Idle-time sweep refreshes results older than the expiry window
//! - **Comparisons**: Memoised historical windows, seasonal baselines, and
//!   k-anonymous demographic cohorts with differential-privacy noise
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use healthtrends::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> healthtrends::Result<()> {
//! let config = Config::new();
//! let store = Arc::new(InMemoryHealthStore::new());
//! let statistics = Arc::new(RecordStatisticsCalculator::new(store.clone()));
//! let engine = Arc::new(ComparativeAnalyticsEngine::from_config(
//!     &config,
//!     statistics,
//!     Arc::new(PrivacyManager::default()),
//! ));
//!
//! let processor = BackgroundTrendProcessor::builder(
//!     config,
//!     store,
//!     Arc::new(LinearTrendAnalyzer::default()),
//! )
//! .comparator(engine.clone())
//! .spawn();
//! engine.attach_processor(&processor);
//!
//! let steps = MetricId::new("steps");
//! if let Some(trend) = processor.get_trend(&steps, true).await {
//!     println!("{} is {}", trend.metric, trend.direction);
//! }
//! processor.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Two-tier trend cache
pub mod cache;

/// Shared helpers
pub mod common;

/// Comparative analytics engine
pub mod comparative;

/// Configuration management
pub mod config;

/// Error types
pub mod error;

/// Metric identifiers, records and statistics
pub mod metrics;

/// Permission gating and anonymisation
pub mod privacy;

/// Background trend processor
pub mod processor;

/// Collaborator traits and default implementations
pub mod providers;

/// Trend results and analysis
pub mod trends;

pub use cache::{CacheManager, CacheStats, DiskCache};
pub use comparative::{
    ActivityLevel, ComparativeAnalyticsEngine, ComparisonResult, ComparisonType, Gender,
    HistoricalComparison, PrivacyLevel, MIN_COHORT_SIZE,
};
pub use config::{Config, ConfigError};
pub use error::{ErrorChainExt, ErrorContext, HealthTrendsError, Result};
pub use metrics::{HealthRecord, MetricId, MetricStatistics, KNOWN_METRICS};
pub use privacy::{AnonymizationMethod, PrivacyManager};
pub use processor::{BackgroundTrendProcessor, ProcessingStatus, TrendEvent, TrendProcessingTask};
pub use providers::{
    HistoricalComparator, InMemoryHealthStore, MetricDataSource, RecordStatisticsCalculator,
    StatisticsProvider, TrendAnalysisEngine,
};
pub use trends::{LinearTrendAnalyzer, TrendDirection, TrendResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        BackgroundTrendProcessor, ComparativeAnalyticsEngine, Config, HealthRecord,
        HealthTrendsError, InMemoryHealthStore, LinearTrendAnalyzer, MetricDataSource, MetricId,
        PrivacyManager, RecordStatisticsCalculator, Result, StatisticsProvider,
        TrendAnalysisEngine, TrendResult,
    };

    pub use crate::processor::{PRIORITY_DEFAULT, PRIORITY_IMPORT, PRIORITY_INTERACTIVE};
}

/// Test utilities module for testing support
#[doc(hidden)]
pub mod test_utils;
