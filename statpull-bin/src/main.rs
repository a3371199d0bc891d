//! `statpull` pulls team, match and player statistics from a rate-limited
//! esports stats platform.
//!
//! The binary is a wrapper around statpull-lib: every request goes through a
//! bounded, rate-limited dispatcher, throttled responses are retried with
//! exponential backoff, and the records of all teams are merged without
//! duplicates.
//!
//! Collect two teams and print a summary:
//! ```sh
//! statpull --base-url https://stats.example.org/api 17 42
//! ```
//!
//! Read team ids from a file and write all records as JSON:
//! ```sh
//! statpull --base-url https://stats.example.org/api --ids-from teams.txt --format json -o stats.json
//! ```
//!
//! Stay well below the platform limit of 30 calls per minute:
//! ```sh
//! statpull --max-calls 25 --period 1m --concurrency 2 17 42
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Error, Result, bail};
use clap::Parser;
use formatters::log::init_logging;
use log::{error, info};

mod commands;
mod formatters;
mod ids_from;
mod options;
mod platform;
mod verbosity;

use crate::options::{Config, STATPULL_CONFIG_FILE, StatpullOptions};

/// A C-like enum that can be cast to `i32` and used as process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitCode {
    Success = 0,
    // NOTE: exit code 1 is used for any `Result::Err` bubbled up to `main()`
    // using the `?` operator, e.g. an unreachable base URL or missing team ids.
    #[allow(unused)]
    UnexpectedFailure = 1,
    ItemFailure = 2,
    ConfigFile = 3,
}

fn main() -> Result<()> {
    // std::process::exit doesn't guarantee that all destructors will be run,
    // therefore we wrap the main code in another function to ensure that.
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

/// Merge all provided config options into one.
/// This includes a potential config file, command-line- and environment variables
fn load_config() -> Result<StatpullOptions> {
    let mut opts = StatpullOptions::parse();

    init_logging(&opts.config.verbose, opts.config.mode);

    if let Some(config_file) = &opts.config_file {
        match Config::load_from_file(config_file) {
            Ok(c) => opts.config.merge(c),
            Err(e) => {
                bail!(
                    "Cannot load configuration file `{}`: {e:?}",
                    config_file.display()
                );
            }
        }
    } else {
        // Without an explicit config file, a `statpull.toml` in the current
        // directory is used if present. An invalid one is still an error.
        let default_config = PathBuf::from(STATPULL_CONFIG_FILE);
        if default_config.is_file() {
            match Config::load_from_file(&default_config) {
                Ok(c) => opts.config.merge(c),
                Err(e) => {
                    bail!(
                        "Cannot load default configuration file `{}`: {e:?}",
                        default_config.display()
                    );
                }
            }
        }
    }

    Ok(opts)
}

fn run_main() -> Result<i32> {
    use std::process::exit;

    let opts = match load_config() {
        Ok(opts) => opts,
        Err(e) => {
            error!("Error while loading config: {e}");
            exit(ExitCode::ConfigFile as i32);
        }
    };

    let runtime = match opts.config.threads {
        Some(threads) => {
            // We define our own runtime instead of the `tokio::main` attribute
            // since we want to make the number of threads configurable
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(threads)
                .enable_all()
                .build()?
        }
        None => tokio::runtime::Runtime::new()?,
    };

    match runtime.block_on(run(&opts)) {
        Err(e) if Some(io::ErrorKind::BrokenPipe) == underlying_io_error_kind(&e) => {
            exit(ExitCode::Success as i32);
        }
        res => res,
    }
}

/// Check if the given error can be traced back to an `io::ErrorKind`
fn underlying_io_error_kind(error: &Error) -> Option<io::ErrorKind> {
    for cause in error.chain() {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return Some(io_error.kind());
        }
    }
    None
}

/// Collect all requested teams and write the report
async fn run(opts: &StatpullOptions) -> Result<i32> {
    let team_ids = opts.team_ids()?;
    info!("Collecting {} team(s)", team_ids.len());

    let report = commands::collect(team_ids, &opts.config).await?;

    let formatter = formatters::get_report_formatter(opts.config.format, opts.config.mode);
    let formatted = formatter.format(&report)?;

    if let Some(output) = &opts.config.output {
        fs::write(output, formatted)
            .with_context(|| format!("Cannot write report to `{}`", output.display()))?;
    } else {
        writeln!(io::stdout(), "{formatted}")?;
    }

    let exit_code = if report.summary.is_success() {
        ExitCode::Success
    } else {
        ExitCode::ItemFailure
    };
    Ok(exit_code as i32)
}
