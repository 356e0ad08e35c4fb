use healthtrends::metrics::DailyAggregation;
use healthtrends::{Config, MetricId};
use serde::Serialize;
use tabled::{
    settings::{object::Rows, Alignment, Color, Modify, Style},
    Table, Tabled,
};

use crate::cli::{Cli, OutputFormat};
use crate::error::{CliResult, IntoCliResult};
use crate::exit_codes::EXIT_SUCCESS;

#[derive(Tabled, Serialize)]
struct MetricRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Daily value")]
    aggregation: &'static str,
}

fn aggregation_name(aggregation: DailyAggregation) -> &'static str {
    match aggregation {
        DailyAggregation::Sum => "sum",
        DailyAggregation::Mean => "mean",
    }
}

pub fn run_metrics_command(config: &Config, format: OutputFormat) -> CliResult<i32> {
    let rows: Vec<MetricRow> = config
        .known_metrics
        .iter()
        .map(|name| MetricRow {
            metric: name.clone(),
            aggregation: aggregation_name(MetricId::new(name.as_str()).daily_aggregation()),
        })
        .collect();

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&rows).cli_general_error()?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            let mut table = Table::new(rows);
            table.with(Style::modern());
            if Cli::should_use_color() {
                table.with(Modify::new(Rows::one(0)).with(Color::FG_BRIGHT_CYAN));
            }
            table.with(Modify::new(Rows::new(1..)).with(Alignment::left()));
            println!("{}", table);
        }
    }

    Ok(EXIT_SUCCESS)
}
