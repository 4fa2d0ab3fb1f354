//! Historical data CLI
//!
//! Usage:
//!   histdata load BTCUSDT --days 30 --interval 15m
//!   histdata load BTCUSDT --start 2024-01-01 --end 2024-01-02
//!   histdata export BTCUSDT --format csv --output btc.csv
//!   histdata info [BTCUSDT]
//!   histdata validate exports/btc.csv [--symbol BTCUSDT --interval 15m]

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use histdata::config::HistoryConfig;
use histdata::export::ExportFormat;
use histdata::time::format_time;
use histdata::HistoricalDataService;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "histdata")]
#[command(about = "Load, inspect and export cached OHLCV history")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fill the cache for a range, fetching only what is missing
    Load {
        /// Trading pair (e.g., BTCUSDT)
        symbol: String,
        #[arg(short, long, default_value = "15m")]
        interval: String,
        /// Load the trailing N days when no --start is given
        #[arg(long, default_value_t = 30)]
        days: i64,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        /// Re-fetch and overwrite the range even where it is cached
        #[arg(long)]
        repair: bool,
    },
    /// Write cached candles to a CSV or JSON file
    Export {
        symbol: String,
        #[arg(short, long, default_value = "15m")]
        interval: String,
        #[arg(short, long, default_value = "csv")]
        format: String,
        /// Defaults to <SYMBOL>_<INTERVAL>.<FORMAT> under the export directory
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, requires = "end")]
        start: Option<String>,
        #[arg(long, requires = "start")]
        end: Option<String>,
    },
    /// Show cached coverage for a symbol, or list cached datasets
    Info {
        symbol: Option<String>,
        #[arg(short, long, default_value = "15m")]
        interval: String,
    },
    /// Validate a previously exported file
    Validate {
        file: PathBuf,
        /// Guessed from the file extension when omitted
        #[arg(short, long)]
        format: Option<String>,
        /// Expected symbol; defaults to the first row's
        #[arg(long)]
        symbol: Option<String>,
        /// Expected interval; defaults to the first row's
        #[arg(short, long)]
        interval: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let raw = shared::Config::from_env()?;
    let config = HistoryConfig::try_from(&raw).context("invalid historical data configuration")?;
    info!("Using candle cache at {}", config.cache_path);
    let service = HistoricalDataService::from_config(config).await?;

    match cli.command {
        Commands::Load {
            symbol,
            interval,
            days,
            start,
            end,
            repair,
        } => {
            let now = Utc::now();
            let end = end.unwrap_or_else(|| now.timestamp_millis().to_string());
            let start = start.unwrap_or_else(|| (now - Duration::days(days)).timestamp_millis().to_string());

            let result = if repair {
                service.repair_range(&symbol, &start, &end, &interval).await?
            } else {
                service.load_data(&symbol, &start, &end, &interval).await?
            };
            print_json(&json!({
                "symbol": result.symbol,
                "interval": result.interval,
                "start": format_time(result.span.start),
                "end": format_time(result.span.end),
                "records_count": result.records_count,
                "cached": result.cached,
                "upstream_calls": result.upstream_calls,
                "is_valid": result.validation.is_valid(),
                "issues": result.validation.issues,
                "unresolved_gaps": result.unresolved_gaps,
            }))?;
        }
        Commands::Export {
            symbol,
            interval,
            format,
            output,
            start,
            end,
        } => {
            let output = output.unwrap_or_else(|| {
                PathBuf::from(format!("{}_{}.{}", symbol.to_uppercase(), interval, format.to_lowercase()))
            });
            let result = match (start, end) {
                (Some(start), Some(end)) => {
                    service
                        .export_data_range(&symbol, &interval, &format, &output, &start, &end)
                        .await?
                }
                _ => service.export_data(&symbol, &interval, &format, &output).await?,
            };
            print_json(&json!(result))?;
        }
        Commands::Info { symbol, interval } => match symbol {
            Some(symbol) => {
                let summary = service.get_data_summary(&symbol, &interval).await?;
                let ranges: Vec<_> = summary
                    .ranges
                    .iter()
                    .map(|r| {
                        json!({
                            "start": format_time(r.start_time),
                            "end": format_time(r.end_time),
                            "records": r.bar_count(),
                        })
                    })
                    .collect();
                print_json(&json!({
                    "symbol": summary.symbol,
                    "interval": summary.interval,
                    "records_count": summary.record_count,
                    "first": summary.first_open_time.map(format_time),
                    "last": summary.last_open_time.map(format_time),
                    "ranges": ranges,
                }))?;
            }
            None => {
                let datasets: Vec<_> = service
                    .store()
                    .datasets()
                    .await?
                    .into_iter()
                    .map(|(symbol, interval)| json!({ "symbol": symbol, "interval": interval }))
                    .collect();
                print_json(&json!(datasets))?;
            }
        },
        Commands::Validate {
            file,
            format,
            symbol,
            interval,
        } => {
            let format = match format {
                Some(format) => format.parse::<ExportFormat>()?,
                None => ExportFormat::from_path(&file)?,
            };
            let candles = service.import_data(format.as_str(), &file)?;
            let first = candles.first();
            let symbol = symbol
                .or_else(|| first.map(|c| c.symbol.clone()))
                .context("empty file: pass --symbol and --interval")?;
            let interval = interval
                .or_else(|| first.map(|c| c.interval.to_string()))
                .context("empty file: pass --symbol and --interval")?;
            let report = service.validate_data(&symbol, &interval, &candles)?;
            print_json(&json!(report))?;
        }
    }

    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
