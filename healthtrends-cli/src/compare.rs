use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use colored::*;
use healthtrends::privacy::DEMOGRAPHIC_COMPARISON;
use healthtrends::{
    ActivityLevel, ComparativeAnalyticsEngine, ComparisonResult, Config, Gender,
    HistoricalComparison, InMemoryHealthStore, MetricStatistics, PrivacyManager,
    RecordStatisticsCalculator,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{
    settings::{object::Rows, Alignment, Color, Modify, Style},
    Table, Tabled,
};

use crate::cli::{Cli, OutputFormat};
use crate::error::{CliError, CliResult, IntoCliResult};
use crate::exit_codes::{EXIT_SUCCESS, EXIT_WARNING};
use crate::import;

/// Arguments of `healthtrends compare`
#[derive(Debug, Clone)]
pub struct CompareOptions {
    pub data: PathBuf,
    pub metric: String,
    pub date: Option<String>,
    pub lookback: i64,
    pub seasonal: bool,
    pub location: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<Gender>,
    pub activity: Option<ActivityLevel>,
    pub share_demographics: bool,
    pub format: OutputFormat,
}

#[derive(Serialize)]
struct CompareReport<'a> {
    metric: &'a str,
    as_of: DateTime<Utc>,
    lookback_days: i64,
    historical: &'a HistoricalComparison,
    #[serde(skip_serializing_if = "Option::is_none")]
    seasonal: Option<ComparisonResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    demographic: Option<ComparisonResult>,
    demographic_permitted: bool,
}

#[derive(Tabled)]
struct WindowRow {
    #[tabled(rename = "Window")]
    window: &'static str,
    #[tabled(rename = "Mean")]
    mean: String,
    #[tabled(rename = "Min")]
    min: String,
    #[tabled(rename = "Max")]
    max: String,
    #[tabled(rename = "Days")]
    days: String,
}

pub fn run_compare_command(config: &Config, options: CompareOptions) -> CliResult<i32> {
    let as_of = match options.date.as_deref() {
        Some(raw) => parse_as_of(raw).ok_or_else(|| {
            CliError::validation(format!(
                "Invalid --date '{}': expected YYYY-MM-DD or RFC 3339",
                raw
            ))
        })?,
        None => Utc::now(),
    };

    let records = import::read_export(&options.data)?;
    let store = Arc::new(InMemoryHealthStore::new());
    store.insert_records(records);

    let privacy = Arc::new(PrivacyManager::new(config.dp_epsilon, config.dp_sensitivity));
    if options.share_demographics {
        privacy.grant(DEMOGRAPHIC_COMPARISON);
    }
    let statistics = Arc::new(RecordStatisticsCalculator::new(store));
    let engine = ComparativeAnalyticsEngine::from_config(config, statistics, privacy);

    let historical = engine.compare_to_historical(&options.metric, as_of, options.lookback)?;

    let seasonal = if options.seasonal {
        engine.compare_to_seasonal(&options.metric, as_of, options.location.as_deref())?
    } else {
        None
    };

    let demographic = match options.age {
        Some(age) => engine.compare_to_demographic(
            &options.metric,
            age,
            options.gender,
            options.activity,
        )?,
        None => None,
    };
    let demographic_permitted = engine.privacy().has_permission(DEMOGRAPHIC_COMPARISON);

    match options.format {
        OutputFormat::Json => {
            let report = CompareReport {
                metric: &options.metric,
                as_of,
                lookback_days: options.lookback,
                historical: &historical,
                seasonal,
                demographic,
                demographic_permitted,
            };
            let json = serde_json::to_string_pretty(&report).cli_general_error()?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            print_historical(&options.metric, as_of, &historical);
            if let Some(result) = &seasonal {
                print_comparison("Seasonal", result);
            }
            if options.age.is_some() {
                match &demographic {
                    Some(result) => print_comparison("Demographic", result),
                    None => println!(
                        "\n{} Demographic comparison not permitted. Pass {} to allow it.",
                        "●".yellow(),
                        "--share-demographics".cyan()
                    ),
                }
            }
        }
    }

    if historical.is_empty() {
        eprintln!(
            "No history for '{}' before {}",
            options.metric,
            as_of.format("%Y-%m-%d")
        );
        return Ok(EXIT_WARNING);
    }
    Ok(EXIT_SUCCESS)
}

/// A bare date means "as of the end of that day"
fn parse_as_of(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let end_of_day = NaiveTime::from_hms_opt(23, 59, 59)?;
        return Some(date.and_time(end_of_day).and_utc());
    }
    import::parse_timestamp(raw)
}

fn window_row(window: &'static str, stats: Option<&MetricStatistics>) -> WindowRow {
    match stats {
        Some(s) => WindowRow {
            window,
            mean: format!("{:.1}", s.mean),
            min: format!("{:.1}", s.min),
            max: format!("{:.1}", s.max),
            days: s.count.to_string(),
        },
        None => WindowRow {
            window,
            mean: "-".to_string(),
            min: "-".to_string(),
            max: "-".to_string(),
            days: "0".to_string(),
        },
    }
}

fn print_historical(metric: &str, as_of: DateTime<Utc>, historical: &HistoricalComparison) {
    let rows = vec![
        window_row("Last day", historical.current.as_ref()),
        window_row("7 days", historical.rolling_7_day.as_ref()),
        window_row("30 days", historical.rolling_30_day.as_ref()),
        window_row("90 days", historical.rolling_90_day.as_ref()),
        window_row("365 days", historical.rolling_365_day.as_ref()),
        window_row("Same 30 days last year", historical.same_period_last_year.as_ref()),
    ];

    let mut table = Table::new(rows);
    table.with(Style::modern());
    if Cli::should_use_color() {
        table.with(Modify::new(Rows::one(0)).with(Color::FG_BRIGHT_CYAN));
    }
    table.with(Modify::new(Rows::new(1..)).with(Alignment::left()));

    println!("{} as of {}", metric.bold(), as_of.format("%Y-%m-%d"));
    println!("{}", table);

    if let Some(trend) = historical.trend_direction {
        println!("30-day vs 90-day: {}", trend);
    }
    if let Some(best) = historical.personal_best {
        println!(
            "Personal best: {:.1} on {}",
            best.value,
            best.timestamp.format("%Y-%m-%d")
        );
    }
    if let Some(average) = historical.personal_average {
        println!("Personal average: {:.1}", average);
    }
}

fn print_comparison(label: &str, result: &ComparisonResult) {
    println!();
    println!("{} ({})", label.bold(), result.privacy_level);
    if result.insufficient_data {
        println!("  {} {}", "●".yellow(), result.insight);
        return;
    }
    if let (Some(user), Some(baseline)) = (result.user_value, result.comparison_value) {
        println!("  You: {:.1}  Baseline: {:.1}", user, baseline);
    }
    if let Some(percentile) = result.percentile {
        println!("  Percentile: {:.0}", percentile);
    }
    if let Some(size) = result.cohort_size {
        println!("  Cohort size: {}", size);
    }
    println!("  {} {}", "●".green(), result.insight);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_bare_date_means_end_of_day() {
        assert_eq!(
            parse_as_of("2024-06-30"),
            Some(Utc.with_ymd_and_hms(2024, 6, 30, 23, 59, 59).unwrap())
        );
        assert_eq!(
            parse_as_of("2024-06-30T08:00:00Z"),
            Some(Utc.with_ymd_and_hms(2024, 6, 30, 8, 0, 0).unwrap())
        );
        assert!(parse_as_of("30/06/2024").is_none());
    }

    #[test]
    fn test_missing_window_row_is_blank() {
        let row = window_row("7 days", None);
        assert_eq!(row.mean, "-");
        assert_eq!(row.days, "0");
    }
}
