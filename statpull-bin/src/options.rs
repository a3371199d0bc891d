use crate::ids_from::IdsFrom;
use crate::verbosity::Verbosity;
use anyhow::{Context, Result, bail};
use clap::Parser;
use const_format::{concatcp, formatcp};
use serde::Deserialize;
use statpull_lib::aggregate::{DEFAULT_POOL_SIZE, plan};
use statpull_lib::dispatcher::{DEFAULT_CONCURRENCY, DEFAULT_PER_CALL_TIMEOUT};
use statpull_lib::ratelimit::{DEFAULT_JITTER, DEFAULT_MAX_CALLS, DEFAULT_PERIOD, ThrottleConfig};
use statpull_lib::retry::{DEFAULT_BASE_DELAY, DEFAULT_RETRIES, DEFAULT_RETRY_JITTER};
use statpull_lib::{AggregatorConfig, DispatcherConfig, RateLimitConfig, RetryConfig};
use std::path::{Path, PathBuf};
use std::{fs, time::Duration};
use strum::Display;

pub(crate) const STATPULL_CONFIG_FILE: &str = "statpull.toml";

const DEFAULT_USER_AGENT: &str = concatcp!("statpull/", env!("CARGO_PKG_VERSION"));
const DEFAULT_THROTTLE_PERIOD: Duration = Duration::from_secs(1);

// this exists because clap requires `&str` type values for defaults
// whereas serde expects owned values
const MAX_CALLS_STR: &str = concatcp!(DEFAULT_MAX_CALLS);
const CONCURRENCY_STR: &str = concatcp!(DEFAULT_CONCURRENCY);
const POOL_SIZE_STR: &str = concatcp!(DEFAULT_POOL_SIZE);
const RETRIES_STR: &str = concatcp!(DEFAULT_RETRIES);
const PERIOD_STR: &str = "1s";
const JITTER_STR: &str = "50ms";
const TIMEOUT_STR: &str = "10s";
const BASE_DELAY_STR: &str = "2s";
const RETRY_JITTER_STR: &str = "1s";
const THROTTLE_PERIOD_STR: &str = "1s";

// We use a custom help message here because we want to show the default
// value of the config file, but also be able to check if the user has
// provided a custom value. If they didn't, we won't throw an error if
// the file doesn't exist.
const HELP_MSG_CONFIG_FILE: &str = formatcp!(
    "Configuration file to use\n\n[default: {}]",
    STATPULL_CONFIG_FILE,
);

/// The format of the collected data
#[derive(Debug, Deserialize, Default, Clone, Copy, Display, PartialEq, Eq, clap::ValueEnum)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub(crate) enum OutputFormat {
    /// Counts per collection plus every failed team
    #[default]
    Compact,
    /// Every collected record, the run summary and dispatcher statistics
    Json,
}

/// Whether log lines and the compact report use color
#[derive(Debug, Deserialize, Default, Clone, Copy, Display, PartialEq, Eq, clap::ValueEnum)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub(crate) enum OutputMode {
    /// Plain text, for scripting and for terminals without color support
    Plain,
    /// Colorful output
    #[default]
    Color,
}

impl OutputMode {
    pub(crate) const fn is_plain(self) -> bool {
        matches!(self, OutputMode::Plain)
    }
}

// Macro for generating default functions to be used by serde
macro_rules! default_function {
    ( $( $name:ident : $T:ty = $e:expr; )* ) => {
        $(
            #[allow(clippy::missing_const_for_fn)]
            fn $name() -> $T {
                $e
            }
        )*
    };
}

// Generate the functions for serde defaults
default_function! {
    max_calls: usize = DEFAULT_MAX_CALLS;
    period: Duration = DEFAULT_PERIOD;
    jitter: Duration = DEFAULT_JITTER;
    concurrency: usize = DEFAULT_CONCURRENCY;
    timeout: Duration = DEFAULT_PER_CALL_TIMEOUT;
    pool_size: usize = DEFAULT_POOL_SIZE;
    retries: u32 = DEFAULT_RETRIES;
    base_delay: Duration = DEFAULT_BASE_DELAY;
    retry_jitter: Duration = DEFAULT_RETRY_JITTER;
    throttle_period: Duration = DEFAULT_THROTTLE_PERIOD;
    user_agent: String = DEFAULT_USER_AGENT.to_string();
    verbosity: Verbosity = Verbosity::default();
}

// Macro for merging configuration values
macro_rules! fold_in {
    ($cli:ident , $toml:ident ; $ty:ident { $( $key:ident : $default:expr, )* } ) => {
        if (false) {
            #[allow(dead_code, unused, clippy::diverging_sub_expression)]
            let _check_fold_in_exhaustivity = $ty {
                $($key: unreachable!(), )*
            };
        };
        $(
            if $cli.$key == $default && $toml.$key != $default {
                $cli.$key = $toml.$key;
            }
        )*
    };
}

/// Pull team, match and player stats from a rate-limited stats platform
#[derive(Parser, Debug)]
#[command(version, about)]
pub(crate) struct StatpullOptions {
    /// Ids of the teams to collect
    #[arg(name = "team-ids")]
    raw_team_ids: Vec<String>,

    #[arg(short, long = "config")]
    #[arg(help = HELP_MSG_CONFIG_FILE)]
    pub(crate) config_file: Option<PathBuf>,

    #[clap(flatten)]
    pub(crate) config: Config,
}

impl StatpullOptions {
    /// All team ids from the command line and `--ids-from`, without
    /// duplicates, in the order they were given
    pub(crate) fn team_ids(&self) -> Result<Vec<String>> {
        let mut ids = self.raw_team_ids.clone();
        if let Some(ids_from_path) = &self.config.ids_from {
            let ids_from = IdsFrom::try_from(ids_from_path.as_path())
                .context("Cannot read team ids from --ids-from")?;
            ids.extend(ids_from.ids);
        }
        let ids = plan::unique(ids.into_iter().map(|id| id.trim().to_string()));
        if ids.is_empty() {
            bail!("No team ids given. Pass them as arguments or with `--ids-from`");
        }
        Ok(ids)
    }
}

/// The main configuration for statpull
#[allow(clippy::struct_excessive_bools)]
#[derive(Parser, Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Verbose program output
    #[clap(flatten)]
    #[serde(default = "verbosity")]
    pub(crate) verbose: Verbosity,

    /// Base URL of the stats platform API
    #[arg(short, long, env = "STATPULL_BASE_URL")]
    #[serde(default)]
    pub(crate) base_url: Option<String>,

    /// Read team ids from the given file, one per line.
    /// Use `-` to read from stdin. Blank lines and lines starting with `#`
    /// are ignored.
    #[arg(long)]
    #[serde(default)]
    pub(crate) ids_from: Option<PathBuf>,

    /// Output format of the collected data
    #[arg(short, long, value_enum, default_value_t)]
    #[serde(default)]
    pub(crate) format: OutputFormat,

    /// Output display mode
    #[arg(long, value_enum, default_value_t)]
    #[serde(default)]
    pub(crate) mode: OutputMode,

    /// Write the collected data to this file instead of stdout
    #[arg(short, long)]
    #[serde(default)]
    pub(crate) output: Option<PathBuf>,

    /// Maximum number of calls per rate-limit window
    #[arg(long, default_value = MAX_CALLS_STR)]
    #[serde(default = "max_calls")]
    pub(crate) max_calls: usize,

    /// Length of the sliding rate-limit window, e.g. `1s` or `500ms`
    #[arg(long, default_value = PERIOD_STR, value_parser = humantime::parse_duration)]
    #[serde(default = "period", with = "humantime_serde")]
    pub(crate) period: Duration,

    /// Upper bound of the random delay added when waiting for the rate limiter
    #[arg(long, default_value = JITTER_STR, value_parser = humantime::parse_duration)]
    #[serde(default = "jitter", with = "humantime_serde")]
    pub(crate) jitter: Duration,

    /// Maximum number of calls in flight
    #[arg(long, default_value = CONCURRENCY_STR)]
    #[serde(default = "concurrency")]
    pub(crate) concurrency: usize,

    /// Deadline of a single call
    #[arg(short, long, default_value = TIMEOUT_STR, value_parser = humantime::parse_duration)]
    #[serde(default = "timeout", with = "humantime_serde")]
    pub(crate) timeout: Duration,

    /// Number of teams collected at the same time
    #[arg(long, default_value = POOL_SIZE_STR)]
    #[serde(default = "pool_size")]
    pub(crate) pool_size: usize,

    /// Maximum number of attempts per call
    #[arg(long, default_value = RETRIES_STR)]
    #[serde(default = "retries")]
    pub(crate) retries: u32,

    /// Base of the exponential backoff between attempts
    #[arg(long, default_value = BASE_DELAY_STR, value_parser = humantime::parse_duration)]
    #[serde(default = "base_delay", with = "humantime_serde")]
    pub(crate) base_delay: Duration,

    /// Upper bound of the random delay added to every backoff
    #[arg(long, default_value = RETRY_JITTER_STR, value_parser = humantime::parse_duration)]
    #[serde(default = "retry_jitter", with = "humantime_serde")]
    pub(crate) retry_jitter: Duration,

    /// Additionally allow at most this many attempts per `--throttle-period`
    #[arg(long)]
    #[serde(default)]
    pub(crate) throttle_calls: Option<usize>,

    /// Bucket length of `--throttle-calls`
    #[arg(long, default_value = THROTTLE_PERIOD_STR, value_parser = humantime::parse_duration)]
    #[serde(default = "throttle_period", with = "humantime_serde")]
    pub(crate) throttle_period: Duration,

    /// User agent sent to the platform
    #[arg(short, long, default_value = DEFAULT_USER_AGENT)]
    #[serde(default = "user_agent")]
    pub(crate) user_agent: String,

    /// Number of threads to utilize.
    /// Defaults to number of cores available to the system
    #[arg(short = 'T', long)]
    #[serde(default)]
    pub(crate) threads: Option<usize>,
}

impl Config {
    /// Load configuration from a file
    pub(crate) fn load_from_file(path: &Path) -> Result<Config> {
        // Read configuration file
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).with_context(|| "Failed to parse configuration file")
    }

    /// Merge the configuration from TOML into the CLI configuration
    pub(crate) fn merge(&mut self, toml: Config) {
        // NOTE: if you see an error within this macro call, check to make sure that
        // that the fields provided to fold_in! match all the fields of the Config struct.
        fold_in! {
            // Destination and source configs
            self, toml;

            Config {
                // Keys with defaults to assign
                verbose: Verbosity::default(),
                base_url: None,
                ids_from: None,
                format: OutputFormat::default(),
                mode: OutputMode::default(),
                output: None,
                max_calls: DEFAULT_MAX_CALLS,
                period: DEFAULT_PERIOD,
                jitter: DEFAULT_JITTER,
                concurrency: DEFAULT_CONCURRENCY,
                timeout: DEFAULT_PER_CALL_TIMEOUT,
                pool_size: DEFAULT_POOL_SIZE,
                retries: DEFAULT_RETRIES,
                base_delay: DEFAULT_BASE_DELAY,
                retry_jitter: DEFAULT_RETRY_JITTER,
                throttle_calls: None,
                throttle_period: DEFAULT_THROTTLE_PERIOD,
                user_agent: DEFAULT_USER_AGENT,
                threads: None,
            }
        }
    }

    pub(crate) fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig::default()
            .with_concurrency(self.concurrency)
            .with_per_call_timeout(self.timeout)
            .with_rate_limit(
                RateLimitConfig::new(self.max_calls, self.period).with_jitter(self.jitter),
            )
    }

    pub(crate) fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            retries: self.retries,
            base_delay: self.base_delay,
            retry_jitter: self.retry_jitter,
            throttle: self.throttle_calls.map(|calls| ThrottleConfig {
                calls,
                per: self.throttle_period,
            }),
        }
    }

    pub(crate) const fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            pool_size: self.pool_size,
        }
    }
}
