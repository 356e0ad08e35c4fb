use colored::*;
use healthtrends::{
    BackgroundTrendProcessor, ComparativeAnalyticsEngine, Config, InMemoryHealthStore,
    LinearTrendAnalyzer, MetricId, PrivacyManager, RecordStatisticsCalculator, TrendEvent,
    TrendResult,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tabled::{
    settings::{object::Rows, Alignment, Color, Modify, Style},
    Table, Tabled,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, OutputFormat};
use crate::error::{CliError, CliResult, IntoCliResult};
use crate::exit_codes::{EXIT_SUCCESS, EXIT_WARNING};
use crate::import;

/// How one requested metric ended up
#[derive(Debug, Clone)]
enum Outcome {
    Ready(Arc<TrendResult>),
    InsufficientData(usize),
    Failed(String),
    Cancelled,
    TimedOut,
}

impl Outcome {
    fn status(&self) -> &'static str {
        match self {
            Self::Ready(_) => "ready",
            Self::InsufficientData(_) => "insufficient_data",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            Self::InsufficientData(points) => Some(format!("{points} data points")),
            Self::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct MetricReport {
    metric: MetricId,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trend: Option<TrendResult>,
}

#[derive(Tabled)]
struct TrendRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Direction")]
    direction: String,
    #[tabled(rename = "Slope/day")]
    slope: String,
    #[tabled(rename = "R²")]
    r_squared: String,
    #[tabled(rename = "Latest")]
    latest: String,
    #[tabled(rename = "30d avg")]
    rolling_30: String,
    #[tabled(rename = "30d vs 90d")]
    comparison: String,
}

/// Import `data`, refresh the trend of every affected (or requested) metric
/// and print the results
pub async fn run_analyze_command(
    config: Config,
    data: &Path,
    requested: Vec<String>,
    format: OutputFormat,
    cancel: CancellationToken,
) -> CliResult<i32> {
    let records = import::read_export(data)?;

    let store = Arc::new(InMemoryHealthStore::new());
    let affected = store.insert_records(records);

    let targets = select_targets(&config, &affected, &requested)?;
    if targets.is_empty() {
        println!("No known metrics found in {}", data.display());
        return Ok(EXIT_WARNING);
    }

    let statistics = Arc::new(RecordStatisticsCalculator::new(store.clone()));
    let privacy = Arc::new(PrivacyManager::new(config.dp_epsilon, config.dp_sensitivity));
    let engine = Arc::new(ComparativeAnalyticsEngine::from_config(
        &config, statistics, privacy,
    ));
    let wait_timeout = config.wait_timeout();
    let processor = BackgroundTrendProcessor::builder(
        config,
        store,
        Arc::new(LinearTrendAnalyzer::default()),
    )
    .comparator(engine.clone())
    .build();
    engine.attach_processor(&processor);

    // subscribe before any work can finish
    let mut events = processor.subscribe();
    processor.start();
    let queued = processor.on_data_import_complete(&targets);
    tracing::debug!("Queued {} of {} metrics for refresh", queued, targets.len());

    let outcomes = tokio::select! {
        _ = cancel.cancelled() => {
            tracing::info!("Analysis interrupted");
            None
        }
        collected = tokio::time::timeout(wait_timeout, collect_outcomes(&processor, &mut events, &targets)) => {
            collected.ok()
        }
    };
    let interrupted = cancel.is_cancelled();
    processor.shutdown().await;

    let outcomes: BTreeMap<MetricId, Outcome> = targets
        .iter()
        .map(|metric| {
            let outcome = outcomes
                .as_ref()
                .and_then(|found| found.get(metric).cloned())
                .unwrap_or(if interrupted {
                    Outcome::Cancelled
                } else {
                    Outcome::TimedOut
                });
            (metric.clone(), outcome)
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&outcomes)?,
        OutputFormat::Table => print_table(&outcomes),
    }

    let all_ready = outcomes.values().all(|o| matches!(o, Outcome::Ready(_)));
    Ok(if all_ready { EXIT_SUCCESS } else { EXIT_WARNING })
}

fn select_targets(
    config: &Config,
    affected: &[MetricId],
    requested: &[String],
) -> CliResult<Vec<MetricId>> {
    if requested.is_empty() {
        let (known, unknown): (Vec<_>, Vec<_>) = affected
            .iter()
            .cloned()
            .partition(|m| config.is_known_metric(m.as_str()));
        for metric in unknown {
            tracing::warn!("Skipping unknown metric '{}'", metric);
        }
        return Ok(known);
    }

    let mut targets = Vec::with_capacity(requested.len());
    for name in requested {
        if !config.is_known_metric(name) {
            return Err(CliError::validation(format!(
                "Unknown metric '{}'. Run `healthtrends metrics` to list the accepted names",
                name
            )));
        }
        let metric = MetricId::new(name.as_str());
        if !targets.contains(&metric) {
            targets.push(metric);
        }
    }
    Ok(targets)
}

/// Wait until every target has reached a terminal event
async fn collect_outcomes(
    processor: &BackgroundTrendProcessor,
    events: &mut broadcast::Receiver<TrendEvent>,
    targets: &[MetricId],
) -> BTreeMap<MetricId, Outcome> {
    let mut outcomes = BTreeMap::new();

    while outcomes.len() < targets.len() {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Missed {} processor events", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let metric = event.metric().clone();
        if !targets.contains(&metric) || outcomes.contains_key(&metric) {
            continue;
        }

        let outcome = match event {
            TrendEvent::TrendReady { .. } => match processor.get_trend(&metric, false).await {
                Some(trend) => Outcome::Ready(trend),
                None => Outcome::Failed("result missing from cache".to_string()),
            },
            TrendEvent::InsufficientData { points, .. } => Outcome::InsufficientData(points),
            TrendEvent::ProcessingFailed { error, .. } => Outcome::Failed(error),
            TrendEvent::Cancelled { .. } => Outcome::Cancelled,
            TrendEvent::ProcessingStarted { .. } => continue,
        };
        outcomes.insert(metric, outcome);
    }

    outcomes
}

fn print_json(outcomes: &BTreeMap<MetricId, Outcome>) -> CliResult<()> {
    let reports: Vec<MetricReport> = outcomes
        .iter()
        .map(|(metric, outcome)| MetricReport {
            metric: metric.clone(),
            status: outcome.status(),
            detail: outcome.detail(),
            trend: match outcome {
                Outcome::Ready(trend) => Some(trend.as_ref().clone()),
                _ => None,
            },
        })
        .collect();

    let json = serde_json::to_string_pretty(&reports).cli_general_error()?;
    println!("{}", json);
    Ok(())
}

fn print_table(outcomes: &BTreeMap<MetricId, Outcome>) {
    let rows: Vec<TrendRow> = outcomes
        .iter()
        .map(|(metric, outcome)| trend_row(metric, outcome))
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::modern());

    if Cli::should_use_color() {
        table.with(Modify::new(Rows::one(0)).with(Color::FG_BRIGHT_CYAN));

        for (i, outcome) in outcomes.values().enumerate() {
            let row_index = i + 1;
            let color = match outcome {
                Outcome::Ready(_) => Color::FG_GREEN,
                Outcome::InsufficientData(_) => Color::FG_YELLOW,
                _ => Color::FG_RED,
            };
            table.with(Modify::new(Rows::one(row_index)).with(color));
        }
    }

    table.with(Modify::new(Rows::new(1..)).with(Alignment::left()));
    println!("{}", table);

    let problems: Vec<String> = outcomes
        .iter()
        .filter_map(|(metric, outcome)| outcome.detail().map(|d| format!("{metric}: {d}")))
        .collect();
    if !problems.is_empty() && Cli::is_tty() {
        println!();
        for problem in problems {
            println!("  {} {}", "●".yellow(), problem);
        }
    }
}

fn trend_row(metric: &MetricId, outcome: &Outcome) -> TrendRow {
    let Outcome::Ready(trend) = outcome else {
        return TrendRow {
            metric: metric.to_string(),
            status: outcome.status().to_string(),
            direction: "-".to_string(),
            slope: "-".to_string(),
            r_squared: "-".to_string(),
            latest: "-".to_string(),
            rolling_30: "-".to_string(),
            comparison: "-".to_string(),
        };
    };

    let context = trend.comparative_data.as_ref();
    TrendRow {
        metric: metric.to_string(),
        status: outcome.status().to_string(),
        direction: trend.direction.to_string(),
        slope: format!("{:+.2}", trend.slope_per_day),
        r_squared: format!("{:.2}", trend.r_squared),
        latest: format!("{:.1}", trend.latest_value),
        rolling_30: context
            .and_then(|c| c.rolling_30_day)
            .map(|v| format!("{v:.1}"))
            .unwrap_or_else(|| "-".to_string()),
        comparison: context
            .and_then(|c| c.trend_direction)
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string()),
    }
}
