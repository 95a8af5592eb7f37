//! Command-line interface for the ice-lab routines.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::loaders::load_harp_log;
use crate::core::series::InstrumentTable;
use crate::core::writers;
use crate::processors::harp_model::{build_dataset_with, DiagnosticSummary, HarpDataset, Variable};
use crate::processors::{arduino, ctd, licor, light_harp};
use crate::visualization;
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "icelab")]
#[command(about = "Read-out routines for sea-ice lab instruments", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive salinity and phase fractions from a salinity harp log
    Harp {
        /// Harp log file
        file: PathBuf,
        /// Modules to process, comma separated (default: all)
        #[arg(short, long, value_delimiter = ',')]
        module: Vec<usize>,
        /// Brine salinity method (assur, notz_worster, vancoppenolle, freezing_point)
        #[arg(long)]
        method: Option<String>,
        /// Number of modules wired to the logger
        #[arg(long)]
        modules: Option<usize>,
        /// Number of segments per module
        #[arg(long)]
        segments: Option<usize>,
        /// Resistance channel used for conductivity (r2 or r16)
        #[arg(long)]
        channel: Option<String>,
        /// Output directory for per-module CSV files
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also plot this variable to PNG (requires --output)
        #[arg(long)]
        plot: Option<String>,
    },

    /// Read a CTD log (Sea-Bird, Sea-Bird serial or RBR)
    Ctd {
        /// CTD log file
        file: PathBuf,
        /// Output CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Read an Arduino multi-sensor log
    Arduino {
        /// Arduino log file
        file: PathBuf,
        /// Output CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Resampling step in seconds (0 keeps raw rows)
        #[arg(long)]
        resample: Option<u64>,
        /// Interpolate interior gaps
        #[arg(long)]
        interpolate: bool,
    },

    /// Read a LI-COR log
    Licor {
        /// LI-COR log file
        file: PathBuf,
        /// Output CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Read a light harp log (first recording only)
    LightHarp {
        /// Light harp log file
        file: PathBuf,
        /// Output CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print or write the effective configuration
    Config {
        /// Output YAML file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<60} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 37 {
            format!("{}...", value.chars().take(34).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<37} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    if let Err(e) = dispatch(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => {
            let cfg = PipelineConfig::from_yaml(path)
                .map_err(|e| anyhow::anyhow!("{}", e))
                .with_context(|| format!("failed to load config from {}", path.display()))?;
            info!("Loaded config from: {}", path.display());
            cfg
        }
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Harp {
            file,
            module,
            method,
            modules,
            segments,
            channel,
            output,
            plot,
        } => {
            if let Some(method) = method {
                config.harp.derivation_method = method;
            }
            if let Some(n) = modules {
                config.harp.module_count = n;
            }
            if let Some(n) = segments {
                config.harp.segments_per_module = n;
            }
            if let Some(channel) = channel {
                config.harp.resistance_channel = channel;
            }
            cmd_harp(&file, &module, output.as_deref(), plot.as_deref(), &config)
        }
        Commands::Ctd { file, output } => {
            let spinner = create_spinner("Reading CTD log...");
            let result = ctd::read_ctd(&file, &config.ctd);
            spinner.finish_and_clear();
            let table = result.with_context(|| format!("failed to read CTD log {}", file.display()))?;
            finish_table("CTD Read Complete", &file, &table, output.as_deref())
        }
        Commands::Arduino {
            file,
            output,
            resample,
            interpolate,
        } => {
            if let Some(secs) = resample {
                config.arduino.resample_secs = secs;
            }
            config.arduino.interpolate |= interpolate;
            let spinner = create_spinner("Reading Arduino log...");
            let result = arduino::read_arduino(&file, &config.arduino);
            spinner.finish_and_clear();
            let table = result.with_context(|| format!("failed to read Arduino log {}", file.display()))?;
            finish_table("Arduino Read Complete", &file, &table, output.as_deref())
        }
        Commands::Licor { file, output } => {
            let spinner = create_spinner("Reading LI-COR log...");
            let result = licor::read_licor(&file);
            spinner.finish_and_clear();
            let table = result.with_context(|| format!("failed to read LI-COR log {}", file.display()))?;
            finish_table("LI-COR Read Complete", &file, &table, output.as_deref())
        }
        Commands::LightHarp { file, output } => {
            let spinner = create_spinner("Reading light harp log...");
            let result = light_harp::read_light_harp(&file);
            spinner.finish_and_clear();
            let table = result.with_context(|| format!("failed to read light harp log {}", file.display()))?;
            finish_table("Light Harp Read Complete", &file, &table, output.as_deref())
        }
        Commands::Config { output } => cmd_config(&config, output.as_deref()),
    }
}

fn cmd_harp(
    file: &Path,
    module_ids: &[usize],
    output: Option<&Path>,
    plot: Option<&str>,
    config: &PipelineConfig,
) -> Result<()> {
    let start = Instant::now();

    // Everything configurable is checked before the log is opened.
    let method = config.harp.method()?;
    let options = config.harp.model_options()?;
    config.harp.validate_layout()?;
    let plot_variable = plot.map(str::parse::<Variable>).transpose()?;
    if plot_variable.is_some() && output.is_none() {
        bail!("--plot requires --output");
    }

    println!("Processing salinity harp log...");
    println!("Input: {}", file.display());
    println!(
        "Layout: {} modules x {} segments",
        config.harp.module_count, config.harp.segments_per_module
    );
    println!("Method: {}", method);

    let spinner = create_spinner("Reading harp log...");
    let table = load_harp_log(file, &config.harp);
    let table = match table {
        Ok(table) => table,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e).with_context(|| format!("failed to read harp log {}", file.display()));
        }
    };

    let modules: Vec<usize> = if module_ids.is_empty() {
        (0..table.module_count()).collect()
    } else {
        module_ids.to_vec()
    };

    spinner.set_message(format!("Deriving {} module(s)...", modules.len()));
    let datasets: std::result::Result<Vec<HarpDataset>, _> = modules
        .par_iter()
        .map(|&m| build_dataset_with(&table, m, method, &options))
        .collect();
    spinner.finish_and_clear();
    let datasets = datasets?;

    let mut summary = DiagnosticSummary::default();
    for dataset in &datasets {
        summary.merge(&dataset.summary());
    }

    let mut written = Vec::new();
    if let Some(dir) = output {
        for dataset in &datasets {
            let csv_path = dir.join(format!("harp_module_{}.csv", dataset.module()));
            writers::write_dataset_csv(&csv_path, dataset)?;
            written.push(csv_path);

            if let Some(variable) = plot_variable {
                let png_path = dir.join(format!("harp_module_{}_{}.png", dataset.module(), variable));
                let title = format!("Module {} {}", dataset.module(), variable);
                match visualization::plot_variable(&png_path, dataset, variable, &title) {
                    Ok(()) => written.push(png_path),
                    Err(e) => warn!("Module {}: no plot written: {}", dataset.module(), e),
                }
            }
        }
    }

    let module_list: Vec<String> = modules.iter().map(usize::to_string).collect();
    print_summary(
        "Harp Derivation Complete",
        &[
            ("Input file", file.display().to_string()),
            ("Samples", table.len().to_string()),
            ("Modules", module_list.join(", ")),
            ("Method", method.to_string()),
            ("Read diagnostics", table.diagnostics().len().to_string()),
            ("Model diagnostics", summary.total().to_string()),
            ("Files written", written.len().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );

    for (kind, count) in summary.iter() {
        println!("  {:<26} {}", kind.name(), count);
    }

    Ok(())
}

fn finish_table(title: &str, file: &Path, table: &InstrumentTable, output: Option<&Path>) -> Result<()> {
    if let Some(path) = output {
        writers::write_table_csv(path, table)?;
    }

    let span = match (table.time.first(), table.time.last()) {
        (Some(first), Some(last)) => format!("{} - {}", first, last),
        _ => "-".to_string(),
    };

    print_summary(
        title,
        &[
            ("Input file", file.display().to_string()),
            ("Rows", table.len().to_string()),
            ("Variables", table.names().join(", ")),
            ("Time span", span),
            (
                "Output",
                output.map_or_else(|| "-".to_string(), |p| p.display().to_string()),
            ),
        ],
    );

    Ok(())
}

fn cmd_config(config: &PipelineConfig, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            config
                .to_yaml(path)
                .map_err(|e| anyhow::anyhow!("{}", e))
                .with_context(|| format!("failed to write config to {}", path.display()))?;
            println!("Configuration written to {}", path.display());
        }
        None => print!("{}", serde_yaml::to_string(config)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_harp_arguments() {
        let cli = Cli::try_parse_from([
            "icelab", "-vv", "harp", "log.txt", "--module", "0,2", "--method", "assur", "--segments", "8",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Harp {
                module,
                method,
                segments,
                ..
            } => {
                assert_eq!(module, vec![0, 2]);
                assert_eq!(method.as_deref(), Some("assur"));
                assert_eq!(segments, Some(8));
            }
            _ => panic!("expected harp subcommand"),
        }
    }

    #[test]
    fn test_parse_light_harp_arguments() {
        let cli = Cli::try_parse_from(["icelab", "light-harp", "light.txt", "-o", "out.csv"]).unwrap();
        match cli.command {
            Commands::LightHarp { file, output } => {
                assert_eq!(file, PathBuf::from("light.txt"));
                assert_eq!(output, Some(PathBuf::from("out.csv")));
            }
            _ => panic!("expected light-harp subcommand"),
        }
    }

    #[test]
    fn test_unknown_method_fails_before_reading() {
        let mut config = PipelineConfig::default();
        config.harp.derivation_method = "magic".to_string();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");

        let err = cmd_harp(Path::new("does/not/exist.txt"), &[], Some(&out), None, &config).unwrap_err();

        assert!(err.downcast_ref::<crate::config::ConfigError>().is_some());
        assert!(!out.exists());
    }

    #[test]
    fn test_harp_command_writes_module_csv() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("harp.txt");
        let mut file = std::fs::File::create(&log).unwrap();
        writeln!(file, "0:0: 2019-01-24T12:00:00 900 1 0.5 1 -5.0 20.0").unwrap();
        writeln!(file, "0:0: 2019-01-24T12:01:00 900 1 0.6 1 -5.5 20.0").unwrap();
        drop(file);

        let mut config = PipelineConfig::default();
        config.harp.segments_per_module = 1;
        let out = dir.path().join("out");

        cmd_harp(&log, &[], Some(&out), None, &config).unwrap();

        let content = std::fs::read_to_string(out.join("harp_module_0.csv")).unwrap();
        assert_eq!(content.lines().count(), 3);
    }
}
