mod aggregate;
mod config;
mod data;
mod error;
mod export;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};

use aggregate::Aggregator;
use config::{NormalizerConfig, PartialPolicy};
use export::OutputFormat;

/// Normalize decibel-meter exports into a metadata table and a combined readings table.
#[derive(Parser, Debug)]
#[command(name = "decibel-normalizer", version, about)]
struct Cli {
    /// Export files to process (default: the configured input list)
    files: Vec<PathBuf>,

    /// TOML config file (default: ./normalizer.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory the configured inputs are resolved against
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Directory the two output tables are written to
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// Fail when a wall-clock export has no timestamp column
    #[arg(long)]
    strict: bool,

    /// Print the first N combined readings
    #[arg(long)]
    preview: Option<usize>,
}

impl Cli {
    fn apply(&self, mut config: NormalizerConfig) -> NormalizerConfig {
        if let Some(dir) = &self.input_dir {
            config.input_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(format) = self.format {
            config.format = format;
        }
        if self.strict {
            config.on_partial = PartialPolicy::Fail;
        }
        if let Some(n) = self.preview {
            config.preview_rows = n;
        }
        config
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = cli.apply(NormalizerConfig::load(cli.config.as_deref())?);
    let inputs = if cli.files.is_empty() {
        config.input_paths()
    } else {
        cli.files.clone()
    };

    run(&config, &inputs)
}

fn run(config: &NormalizerConfig, inputs: &[PathBuf]) -> Result<()> {
    let mut aggregator = Aggregator::new(config.device.clone(), config.on_partial);
    for path in inputs {
        aggregator
            .ingest(path)
            .with_context(|| format!("processing {}", path.display()))?;
    }

    let tables = aggregator.finish();
    let report = &tables.report;
    if tables.metadata.is_empty() {
        bail!("none of the {} input file(s) could be processed", inputs.len());
    }
    if report.has_skips() {
        warn!("{}", report.skip_summary());
    }

    export::export_tables(&tables, &config.output_dir, config.format)?;
    info!(
        "{} file(s), {} readings combined",
        tables.metadata.len(),
        tables.readings.len()
    );

    if config.preview_rows > 0 {
        println!("{}", export::preview(&tables.readings, config.preview_rows)?);
    }
    Ok(())
}
