//! isolation-matrix: characterize the reference store's isolation levels.
//!
//! Runs every configured anomaly at every configured level, prints the
//! matrix, and exits 0 only when every cell is consistent across
//! repetitions and matches the level's documented guarantee.

mod commands;
mod format;

use std::path::{Path, PathBuf};
use std::process;

use harness_core::IsolationLevel;
use harness_mvcc::MvccStore;
use isolation_harness::{Anomaly, ConfigError, Harness, HarnessConfig, CONFIG_FILE_NAME};
use tracing::Level;

use commands::build_cli;
use format::{format_error, format_report, OutputMode};

fn main() {
    let matches = build_cli().get_matches();

    let output_mode = if matches.get_flag("json") {
        OutputMode::Json
    } else if matches.get_flag("raw") {
        OutputMode::Raw
    } else {
        OutputMode::Human
    };

    init_logging(matches.get_count("verbose"));

    if let Some(path) = matches.get_one::<String>("write-default-config") {
        match HarnessConfig::write_default_if_missing(Path::new(path)) {
            Ok(true) => eprintln!("Wrote default config to {}", path),
            Ok(false) => eprintln!("{} already exists, left untouched", path),
            Err(e) => {
                eprintln!("{}", format_error(&e, output_mode));
                process::exit(1);
            }
        }
        return;
    }

    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", format_error(&e, output_mode));
            process::exit(1);
        }
    };

    let harness = Harness::new(MvccStore::new(), config);
    let report = harness.run_matrix();
    println!("{}", format_report(&report, output_mode));

    process::exit(if report.is_clean() { 0 } else { 1 });
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Config file from `--config`, else `isolation-harness.toml` in the
/// working directory if it exists, else defaults; then CLI overrides.
fn load_config(matches: &clap::ArgMatches) -> Result<HarnessConfig, ConfigError> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => HarnessConfig::from_file(Path::new(path))?,
        None => {
            let default_path = PathBuf::from(CONFIG_FILE_NAME);
            if default_path.exists() {
                HarnessConfig::from_file(&default_path)?
            } else {
                HarnessConfig::default()
            }
        }
    };

    if let Some(levels) = matches.get_many::<String>("level") {
        config.levels = levels
            .map(|s| s.parse::<IsolationLevel>())
            .collect::<Result<_, _>>()
            .map_err(ConfigError::Invalid)?;
    }
    if let Some(anomalies) = matches.get_many::<String>("anomaly") {
        config.anomalies = anomalies
            .map(|s| s.parse::<Anomaly>())
            .collect::<Result<_, _>>()
            .map_err(ConfigError::Invalid)?;
    }
    if let Some(&n) = matches.get_one::<u32>("repetitions") {
        config.repetitions = n;
    }

    config.validate()?;
    Ok(config)
}
