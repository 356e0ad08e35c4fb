use colored::*;
use healthtrends::{Config, DiskCache, MetricId};
use serde::Serialize;
use tabled::{
    settings::{object::Rows, Alignment, Color, Modify, Style},
    Table, Tabled,
};

use crate::cli::{CacheSubcommand, Cli, OutputFormat};
use crate::error::{CliError, CliResult, IntoCliResult};
use crate::exit_codes::EXIT_SUCCESS;

#[derive(Tabled, Serialize)]
struct CacheRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Age (h)")]
    #[serde(skip)]
    age: String,
    #[tabled(skip)]
    age_hours: f64,
}

pub fn run_cache_command(config: &Config, subcommand: CacheSubcommand) -> CliResult<i32> {
    let disk = DiskCache::new(config.cache_dir.clone(), config.cache_expiry());

    match subcommand {
        CacheSubcommand::Status { format } => show_status(&disk, format),
        CacheSubcommand::Clear { metric } => clear(&disk, metric.as_deref()),
    }
}

fn show_status(disk: &DiskCache, format: OutputFormat) -> CliResult<i32> {
    let rows: Vec<CacheRow> = disk
        .entries()
        .into_iter()
        .filter_map(|entry| {
            let metric = MetricId::from_cache_key(&entry.key)?;
            let age_hours = entry.age.as_secs_f64() / 3600.0;
            Some(CacheRow {
                metric: metric.to_string(),
                age: format!("{:.1}", age_hours),
                age_hours,
            })
        })
        .collect();

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&rows).cli_general_error()?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("No cached trends in {}", disk.dir().display());
                return Ok(EXIT_SUCCESS);
            }

            let mut table = Table::new(&rows);
            table.with(Style::modern());
            if Cli::should_use_color() {
                table.with(Modify::new(Rows::one(0)).with(Color::FG_BRIGHT_CYAN));
            }
            table.with(Modify::new(Rows::new(1..)).with(Alignment::left()));

            println!("{}", table);
            println!(
                "{} cached, expiring after {}h ({})",
                rows.len(),
                disk.expiry().as_secs() / 3600,
                disk.dir().display()
            );
        }
    }

    Ok(EXIT_SUCCESS)
}

fn clear(disk: &DiskCache, metric: Option<&str>) -> CliResult<i32> {
    match metric {
        Some(name) => {
            if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
                return Err(CliError::validation(format!("Invalid metric name '{}'", name)));
            }
            let metric = MetricId::new(name);
            if disk.remove(&metric.cache_key()) {
                println!("{} Removed cached trend for {}", "✓".green(), metric);
            } else {
                println!("No cached trend for {}", metric);
            }
        }
        None => {
            let removed = disk.clear();
            println!("{} Removed {} cached trends", "✓".green(), removed);
        }
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_clear_rejects_path_like_metric() {
        let temp = TempDir::new().unwrap();
        let disk = DiskCache::new(temp.path(), Duration::from_secs(3600));

        let error = clear(&disk, Some("../secrets")).unwrap_err();
        assert_eq!(error.exit_code, crate::exit_codes::EXIT_ERROR);
    }

    #[test]
    fn test_clear_single_metric_leaves_others() {
        let temp = TempDir::new().unwrap();
        let disk = DiskCache::new(temp.path(), Duration::from_secs(3600));
        disk.write("trend_steps", &serde_json::json!({"v": 1})).unwrap();
        disk.write("trend_distance", &serde_json::json!({"v": 2})).unwrap();

        assert_eq!(clear(&disk, Some("steps")).unwrap(), EXIT_SUCCESS);

        let keys: Vec<String> = disk.entries().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["trend_distance".to_string()]);
    }
}
