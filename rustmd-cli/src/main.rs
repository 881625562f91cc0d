//! rustmd command-line interface.
//!
//! Converts JSON-described spectra workspaces into MD event trees and
//! reports the resulting layout.
#![allow(
    clippy::uninlined_format_args,
    clippy::too_many_lines,
    clippy::float_cmp
)]

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use serde::Serialize;

use rustmd_algorithms::{
    convert_to_md, estimate_min_max, local_min_max, CancellationToken, ConvertToMdConfig,
    GeometryRegistry, LogProgress,
};
use rustmd_core::{InMemoryWorkspace, SpectraSource};
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(#[from] rustmd_core::Error),

    #[error("Conversion error: {0}")]
    Conversion(#[from] rustmd_algorithms::Error),
}

/// Reciprocal-space conversion of time-of-flight spectra.
#[derive(Parser)]
#[command(name = "rustmd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert workspaces into one MD event tree, appending in order
    Convert {
        /// Input workspace JSON file(s)
        #[arg(required = true)]
        input: Vec<PathBuf>,

        /// Conversion configuration JSON file
        #[arg(short, long)]
        config: PathBuf,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the extents a conversion would use
    MinMax {
        /// Input workspace JSON file
        input: PathBuf,

        /// Conversion configuration JSON file
        #[arg(short, long)]
        config: PathBuf,

        /// Exact data extents instead of the padded estimate
        #[arg(long)]
        local: bool,
    },

    /// Show information about a workspace file
    Info {
        /// Input workspace JSON file
        input: PathBuf,
    },
}

#[derive(Serialize)]
struct MinMaxReport {
    dims: Vec<String>,
    min: Vec<f64>,
    max: Vec<f64>,
}

fn load_workspace(path: &Path) -> Result<InMemoryWorkspace> {
    let reader = BufReader::new(File::open(path)?);
    let workspace: InMemoryWorkspace = serde_json::from_reader(reader)?;
    workspace.validate()?;
    Ok(workspace)
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            serde_json::to_writer_pretty(&mut lock, value)?;
            lock.write_all(b"\n")?;
        }
    }
    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(err) = run(cli.command) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Convert {
            input,
            config,
            output,
        } => {
            let config = ConvertToMdConfig::from_file(&config)?;
            let mut registry = GeometryRegistry::new();
            let cancel = CancellationToken::new();
            let progress = LogProgress::default();
            let start = Instant::now();

            let mut converted = None;
            for path in &input {
                info!("Reading: {}", path.display());
                let workspace = load_workspace(path)?;
                converted = Some(convert_to_md(
                    &workspace,
                    &config,
                    &mut registry,
                    converted,
                    &progress,
                    &cancel,
                )?);
            }

            if let Some(converted) = converted {
                info!(
                    "Converted {} workspace(s) in {:.2}s",
                    input.len(),
                    start.elapsed().as_secs_f64()
                );
                write_json(&converted.report(), output.as_deref())?;
            }
        }

        Commands::MinMax {
            input,
            config,
            local,
        } => {
            let config = ConvertToMdConfig::from_file(&config)?;
            let workspace = load_workspace(&input)?;
            let mut registry = GeometryRegistry::new();
            let description = config
                .description_builder()
                .with_extents(Vec::new(), Vec::new())
                .build(&workspace, &mut registry)?;
            let (min, max) = if local {
                local_min_max(&workspace, &config, &mut registry)?
            } else {
                estimate_min_max(&workspace, &config, &mut registry)?
            };
            let report = MinMaxReport {
                dims: description.dims().iter().map(|d| d.name.clone()).collect(),
                min,
                max,
            };
            write_json(&report, None)?;
        }

        Commands::Info { input } => {
            let workspace = load_workspace(&input)?;
            let instrument = workspace.instrument();

            println!("File: {}", input.display());
            println!("Instrument: {}", instrument.name());
            println!("Detectors: {}", workspace.instrument.detectors.len());
            println!("Spectra: {}", workspace.spectrum_count());
            println!("X unit: {}", workspace.x_unit());

            let range = (0..workspace.spectrum_count())
                .filter_map(|i| workspace.spectrum(i).ok().and_then(|s| s.x_range()))
                .reduce(|(lo, hi), (a, b)| (lo.min(a), hi.max(b)));
            if let Some((lo, hi)) = range {
                println!("X range: {} - {}", lo, hi);
            }

            println!("Lattice: {}", if workspace.lattice.is_some() { "yes" } else { "no" });
            println!(
                "Goniometer: {}",
                if workspace.goniometer.is_some() { "yes" } else { "no" }
            );
            for name in workspace.logs.names() {
                match workspace.logs.min_max(name) {
                    Some((lo, hi)) if lo == hi => println!("Log {}: {}", name, lo),
                    Some((lo, hi)) => println!("Log {}: {} - {}", name, lo, hi),
                    None => println!("Log {}: (non-numeric)", name),
                }
            }
        }
    }

    Ok(())
}
