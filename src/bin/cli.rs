//! Tally CLI
//!
//! Command-line interface for Tally queries:
//! - Show the scan plan of a query
//! - Run a query against points loaded from a JSON file
//! - Generate a default config file

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tally::backend::{MemoryStore, Record, ScanQuery};
use tally::config::{generate_default_config, Config, LoggingConfig};
use tally::model::{TimeRange, DAY, HOUR, MINUTE, SECOND, WEEK};
use tally::query::{Output, QueryExecutor};

#[derive(Parser)]
#[command(name = "tally")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Query language for grouped event time series")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the scan queries a query needs
    Plan {
        /// Query text
        query: String,
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Run a query against points from a JSON file
    Query {
        /// Query text
        query: String,
        /// JSON array of {event, fields, timestamp, value}
        #[arg(short, long)]
        data: PathBuf,
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
pub struct WindowArgs {
    /// Window start: "now", RFC 3339 or Unix milliseconds (default: end - last)
    #[arg(long)]
    start: Option<String>,
    /// Window end: "now", RFC 3339 or Unix milliseconds
    #[arg(long, default_value = "now")]
    end: String,
    /// Window length when no start is given (e.g. 90m, 24h, 7d, 2w)
    #[arg(short, long, default_value = "1d")]
    last: String,
    /// Sampling interval
    #[arg(short, long, default_value = "1h")]
    step: String,
}

impl WindowArgs {
    fn range(&self) -> anyhow::Result<TimeRange> {
        let step = parse_duration(&self.step)?;
        if step <= 0 {
            anyhow::bail!("Step must be positive: {}", self.step);
        }

        let end = match self.end.as_str() {
            // Include the current partial step
            "now" => {
                let now = Utc::now().timestamp_millis();
                now - now.rem_euclid(step) + step
            }
            s => parse_time(s)?,
        };
        let start = match &self.start {
            Some(s) => parse_time(s)?,
            None => end
                .checked_sub(parse_duration(&self.last)?)
                .context("Window start out of range")?,
        };
        if start >= end {
            anyhow::bail!("Window start must be before end");
        }
        Ok(TimeRange::new(start, end, step))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_tracing(&config.logging);

    match cli.command {
        Commands::Plan { query, window } => {
            let window = window.range()?;
            let executor = QueryExecutor::with_config(Arc::new(MemoryStore::new()), config.query);
            let parsed = executor.parse(&query)?;
            let plan = executor.plan(&parsed, &window)?;

            match cli.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&plan)?),
                _ => print_plan(&plan),
            }
        }

        Commands::Query {
            query,
            data,
            window,
        } => {
            let window = window.range()?;
            let store = Arc::new(MemoryStore::new());
            let count = store.insert_records(load_records(&data)?).await;
            tracing::info!("Loaded {} points from {:?}", count, data);

            let executor = QueryExecutor::with_config(store, config.query);
            let result = executor.execute_str(&window, &query).await?;
            tracing::info!(
                "Query returned {} outputs in {}ms ({} scans, {} series)",
                result.len(),
                result.execution_time_ms,
                result.scan_queries,
                result.series_scanned
            );

            match cli.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&result)?),
                _ => print_table(&result.outputs),
            }
        }

        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("Failed to write {:?}", path))?;
                    println!("Config written to {:?}", path);
                }
                None => print!("{}", content),
            }
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tally={}", logging.level)));
    let json = logging.format == "json";

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

fn load_records(path: &Path) -> anyhow::Result<Vec<Record>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))
}

/// Parse durations like 30s, 15m, 2h, 7d, 1w into milliseconds
fn parse_duration(s: &str) -> anyhow::Result<i64> {
    let s = s.trim().to_lowercase();
    let Some(unit) = s.chars().last() else {
        anyhow::bail!("Empty duration");
    };
    let n = &s[..s.len() - unit.len_utf8()];
    let unit = match unit {
        's' => SECOND,
        'm' => MINUTE,
        'h' => HOUR,
        'd' => DAY,
        'w' => WEEK,
        _ => anyhow::bail!("Invalid duration format: {}. Use: 30s, 15m, 2h, 7d, 1w", s),
    };
    let n: i64 = if n.is_empty() {
        1
    } else {
        n.parse()
            .with_context(|| format!("Invalid duration format: {}", s))?
    };
    n.checked_mul(unit)
        .with_context(|| format!("Duration out of range: {}", s))
}

fn parse_time(s: &str) -> anyhow::Result<i64> {
    if s == "now" {
        return Ok(Utc::now().timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    s.parse::<i64>()
        .with_context(|| format!("Invalid timestamp format: {}", s))
}

fn format_time(ts: i64) -> String {
    DateTime::from_timestamp_millis(ts)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn print_plan(plan: &[ScanQuery]) {
    if plan.is_empty() {
        println!("No scans needed");
        return;
    }
    for (i, q) in plan.iter().enumerate() {
        let target = if q.matcher.is_empty() {
            q.event.clone()
        } else {
            format!("{}{}", q.event, q.matcher)
        };
        println!(
            "{:>3}  {:<24} {} .. {}  step {}s",
            i + 1,
            target,
            format_time(q.range.start),
            format_time(q.range.end),
            q.range.step / SECOND
        );
    }
}

fn print_table(outputs: &[Output]) {
    if outputs.is_empty() {
        println!("No data for the selected time range");
        return;
    }

    for output in outputs {
        let series = output.series();
        let kind = if output.is_raw() { "raw" } else { "computed" };
        println!("{} [{}] {}", series.event, kind, series.fields);
        println!("{}", "-".repeat(36));
        for point in series.data.iter() {
            println!("  {:<22} | {:.2}", format_time(point.timestamp), point.value);
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90m").unwrap(), 90 * MINUTE);
        assert_eq!(parse_duration("h").unwrap(), HOUR);
        assert_eq!(parse_duration(" 2W ").unwrap(), 2 * WEEK);
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5y").is_err());
        assert!(parse_duration("99999999999999w").is_err());
    }
}
