use std::path::PathBuf;
use std::process;

use clap::CommandFactory;
use healthtrends::Config;
use healthtrends_cli::cli::{Cli, Commands};
use healthtrends_cli::compare::CompareOptions;
use healthtrends_cli::error::handle_cli_result;
use healthtrends_cli::exit_codes::EXIT_SUCCESS;
use healthtrends_cli::{analyze, cache, compare, metrics};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    let Some(command) = cli.command else {
        if let Err(e) = Cli::command().print_help() {
            eprintln!("Failed to print help: {}", e);
        }
        process::exit(EXIT_SUCCESS);
    };

    let log_level = if cli.quiet {
        Level::ERROR
    } else if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::TRACE
    } else {
        Level::INFO
    };

    // RUST_LOG wins over the flags when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let config = load_config(cli.cache_dir);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            on_signal.cancel();
        }
    });

    let exit_code = match command {
        Commands::Metrics { format } => {
            handle_cli_result(metrics::run_metrics_command(&config, format))
        }
        Commands::Analyze {
            data,
            metrics,
            format,
        } => {
            tracing::info!("Running analyze command");
            handle_cli_result(
                analyze::run_analyze_command(config, &data, metrics, format, cancel).await,
            )
        }
        Commands::Compare {
            data,
            metric,
            date,
            lookback,
            seasonal,
            location,
            age,
            gender,
            activity,
            share_demographics,
            format,
        } => {
            tracing::info!("Running compare command");
            let options = CompareOptions {
                data,
                metric,
                date,
                lookback,
                seasonal,
                location,
                age,
                gender: gender.map(Into::into),
                activity: activity.map(Into::into),
                share_demographics,
                format,
            };
            handle_cli_result(compare::run_compare_command(&config, options))
        }
        Commands::Cache { subcommand } => {
            handle_cli_result(cache::run_cache_command(&config, subcommand))
        }
    };

    process::exit(exit_code);
}

fn load_config(cache_dir: Option<PathBuf>) -> Config {
    let mut config = Config::new();
    if let Some(dir) = cache_dir {
        config.cache_dir = dir;
    }
    tracing::debug!("Trend cache directory: {}", config.cache_dir.display());
    config
}
