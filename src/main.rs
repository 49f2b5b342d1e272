//! Fina CLI
//!
//! Command-line interface operating directly on a data directory:
//! - Create and delete feeds
//! - Post and update samples
//! - Read last values and time ranges
//! - Export raw bytes or CSV

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use fina::config::{generate_default_config, Config};
use fina::storage::{DataQuery, Engine, PaddingMode, SeriesId};
use regex::Regex;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fina")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fixed-interval time-series storage")]
#[command(long_about = "Fina stores each feed as a flat array of samples, one per interval.\nTimes accept unix seconds, RFC 3339, \"now\" or \"now-<n>[smhdw]\".")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory, overrides the config file
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a feed
    Create {
        id: SeriesId,
        /// Interval in seconds (minimum 5)
        #[arg(short, long, default_value = "10")]
        interval: u32,
    },

    /// Delete a feed and its files
    Delete { id: SeriesId },

    /// Write a sample
    Post {
        id: SeriesId,
        value: f64,
        /// Timestamp (default: now)
        #[arg(short, long)]
        time: Option<String>,
        /// Gap padding: none, flat or join
        #[arg(short, long, default_value = "none")]
        padding: PaddingMode,
    },

    /// Overwrite a sample in place
    Update {
        id: SeriesId,
        time: String,
        value: f64,
    },

    /// Show the last sample
    Last { id: SeriesId },

    /// Read a time range
    Data {
        id: SeriesId,
        #[arg(short, long)]
        start: String,
        #[arg(short, long, default_value = "now")]
        end: String,
        /// Output interval in seconds
        #[arg(short, long)]
        interval: i64,
        /// Omit missing points
        #[arg(long)]
        skip_missing: bool,
        /// Never step finer than the feed interval
        #[arg(long)]
        limit_interval: bool,
        /// Print JSON instead of tab-separated lines
        #[arg(long)]
        json: bool,
    },

    /// Export raw sample bytes
    Export {
        id: SeriesId,
        /// Byte offset already held by the receiver
        #[arg(short, long, default_value = "0")]
        start: u64,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Export a time range as CSV
    Csv {
        id: SeriesId,
        #[arg(short, long)]
        start: String,
        #[arg(short, long, default_value = "now")]
        end: String,
        /// Output interval in seconds
        #[arg(short, long)]
        interval: i64,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show bytes used by a feed
    Size { id: SeriesId },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("Failed to write {:?}", path))?;
                println!("Config written to {:?}", path);
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    config.logging.init()?;

    let mut storage_config = config.storage_config()?;
    if let Some(dir) = cli.data_dir {
        storage_config.data_dir = dir;
    }
    tracing::debug!("Data directory: {:?}", storage_config.data_dir);

    let engine = Engine::new(storage_config).context("Failed to open data directory")?;

    match cli.command {
        Commands::Create { id, interval } => {
            let meta = engine.create(id, interval)?;
            println!("Feed {}: interval {}s", id, meta.interval);
        }

        Commands::Delete { id } => {
            engine.delete(id)?;
            println!("Deleted feed {}", id);
        }

        Commands::Post {
            id,
            value,
            time,
            padding,
        } => {
            let timestamp = match time {
                Some(t) => parse_time(&t)?,
                None => Utc::now().timestamp(),
            };
            let value = engine.post(id, timestamp, value, padding)?;
            println!("Posted {} at {}", value, timestamp);
        }

        Commands::Update { id, time, value } => {
            let timestamp = parse_time(&time)?;
            let value = engine.update(id, timestamp, value)?;
            println!("Updated {} at {}", value, timestamp);
        }

        Commands::Last { id } => match engine.lastvalue(id)? {
            Some(last) => println!("{}\t{}", last.time, last.value),
            None => println!("Feed {} has no data", id),
        },

        Commands::Data {
            id,
            start,
            end,
            interval,
            skip_missing,
            limit_interval,
            json,
        } => {
            let query = DataQuery::new(parse_time(&start)? * 1000, parse_time(&end)? * 1000, interval)
                .skip_missing(skip_missing)
                .limit_interval(limit_interval);
            let points = engine.get_data(id, query)?;

            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            if json {
                let pairs: Vec<(i64, Option<f32>)> = points.map(|p| (p.time, p.value)).collect();
                serde_json::to_writer(&mut out, &pairs)?;
                writeln!(out)?;
            } else {
                for point in points {
                    match point.value {
                        Some(v) => writeln!(out, "{}\t{}", point.time, v)?,
                        None => writeln!(out, "{}\tnull", point.time)?,
                    }
                }
            }
            out.flush()?;
        }

        Commands::Export { id, start, output } => {
            let reader = engine.export(id, start)?;
            let bytes = match output {
                Some(path) => {
                    let mut file = BufWriter::new(File::create(&path)?);
                    reader.copy_to(&mut file)?
                }
                None => reader.copy_to(&mut io::stdout().lock())?,
            };
            tracing::info!(series = id, bytes, "Export complete");
        }

        Commands::Csv {
            id,
            start,
            end,
            interval,
            output,
        } => {
            let start = parse_time(&start)?;
            let end = parse_time(&end)?;
            let rows = match output {
                Some(path) => engine.csv_export(id, start, end, interval, File::create(&path)?)?,
                None => engine.csv_export(id, start, end, interval, io::stdout().lock())?,
            };
            tracing::info!(series = id, rows, "CSV export complete");
        }

        Commands::Size { id } => {
            println!("{}", engine.feed_size(id)?);
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}

/// Parse a time argument into unix seconds
fn parse_time(s: &str) -> anyhow::Result<i64> {
    let s = s.trim();
    let now = Utc::now().timestamp();

    if s == "now" {
        return Ok(now);
    }

    let re = Regex::new(r"^now-(\d+)([smhdw])$")?;
    if let Some(caps) = re.captures(s) {
        let amount: i64 = caps[1].parse()?;
        let unit = match &caps[2] {
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            "d" => 86_400,
            _ => 7 * 86_400,
        };
        return Ok(now - amount * unit);
    }

    if let Ok(ts) = s.parse::<i64>() {
        return Ok(ts);
    }

    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp());
    }

    bail!("Cannot parse time: {}. Use unix seconds, RFC 3339, now or now-<n>[smhdw]", s)
}
