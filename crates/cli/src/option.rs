use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use serde::{Deserialize, Serialize};

const LAKE_SOURCE_NAME: &str = "LAKE_SOURCE_NAME";
const LAKE_ARCHIVE_BASE_URL: &str = "LAKE_ARCHIVE_BASE_URL";
const LAKE_BRONZE_PATH: &str = "LAKE_BRONZE_PATH";
const LAKE_SILVER_PATH: &str = "LAKE_SILVER_PATH";
const LAKE_QUEUE_DB_PATH: &str = "LAKE_QUEUE_DB_PATH";
const LAKE_WORKER_CONCURRENCY: &str = "LAKE_WORKER_CONCURRENCY";
const LAKE_VISIBILITY_TIMEOUT_SECONDS: &str = "LAKE_VISIBILITY_TIMEOUT_SECONDS";
const LAKE_MAX_ATTEMPTS: &str = "LAKE_MAX_ATTEMPTS";
const LAKE_OCR_FALLBACK_THRESHOLD: &str = "LAKE_OCR_FALLBACK_THRESHOLD";
const LAKE_DRAIN_DEADLINE_SECONDS: &str = "LAKE_DRAIN_DEADLINE_SECONDS";
const LAKE_QUALITY_FAIL_FRACTION: &str = "LAKE_QUALITY_FAIL_FRACTION";
const LAKE_FILING_TYPES: &str = "LAKE_FILING_TYPES";
const LAKE_TICK_INTERVAL_SECONDS: &str = "LAKE_TICK_INTERVAL_SECONDS";
const LAKE_LOG_LEVEL: &str = "LAKE_LOG_LEVEL";
const LAKE_LOG_MODE: &str = "LAKE_LOG_MODE";

const DEFAULT_CONFIG_FILE_PATH: &str = "./config.toml";
const DEFAULT_SOURCE_NAME: &str = "house";
pub const DEFAULT_ARCHIVE_BASE_URL: &str = "https://disclosures-clerk.house.gov/public_disc/financial-pdfs";
const DEFAULT_BRONZE_PATH: &str = "./data/bronze";
const DEFAULT_SILVER_PATH: &str = "./data/silver";
const DEFAULT_QUEUE_DB_PATH: &str = "./data/state.db";

fn default_source_name() -> String {
    DEFAULT_SOURCE_NAME.to_string()
}
fn default_archive_base_url() -> String {
    DEFAULT_ARCHIVE_BASE_URL.to_string()
}
fn default_bronze_path() -> PathBuf {
    PathBuf::from(DEFAULT_BRONZE_PATH)
}
fn default_silver_path() -> PathBuf {
    PathBuf::from(DEFAULT_SILVER_PATH)
}
fn default_queue_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_QUEUE_DB_PATH)
}
fn default_worker_concurrency() -> usize {
    10
}
fn default_visibility_timeout_seconds() -> u64 {
    900
}
fn default_max_attempts() -> u32 {
    5
}
fn default_ocr_fallback_threshold() -> f64 {
    0.15
}
fn default_drain_deadline_seconds() -> u64 {
    14_400
}
fn default_quality_fail_fraction() -> f64 {
    0.01
}
fn default_tick_interval_seconds() -> u64 {
    3_600
}

/// Human-readable logs for a terminal, or JSON logs for an unattended supervisor (§4.12
/// "Logging").
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogMode {
    #[default]
    Human,
    Json,
}

impl fmt::Display for LogMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogMode::Human => f.write_str("HUMAN"),
            LogMode::Json => f.write_str("JSON"),
        }
    }
}

impl FromStr for LogMode {
    type Err = LogModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "human" => Ok(LogMode::Human),
            "json" => Ok(LogMode::Json),
            _ => Err(LogModeError(s.to_owned())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unsupported log mode `{0}`. Supported values are `HUMAN` and `JSON`.")]
pub struct LogModeError(String);

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Off => f.write_str("OFF"),
            LogLevel::Error => f.write_str("ERROR"),
            LogLevel::Warn => f.write_str("WARN"),
            LogLevel::Info => f.write_str("INFO"),
            LogLevel::Debug => f.write_str("DEBUG"),
            LogLevel::Trace => f.write_str("TRACE"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Log level `{0}` is invalid. Accepted values are OFF, ERROR, WARN, INFO, DEBUG, TRACE.")]
pub struct LogLevelError(String);

impl FromStr for LogLevel {
    type Err = LogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(LogLevel::Off),
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LogLevelError(s.to_owned())),
        }
    }
}

/// Comma-separated filing type codes (e.g. `P,A,T`), or empty for "all known types"
/// (§6 `filing_types`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilingTypeSet(pub Vec<String>);

impl FromStr for FilingTypeSet {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.split(',').map(|c| c.trim().to_uppercase()).filter(|c| !c.is_empty()).collect()))
    }
}

impl fmt::Display for FilingTypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

/// Every field in §6's configuration surface, layered config.toml < environment variables
/// < CLI flags, the same precedence and `kebab-case`/`SCREAMING_SNAKE_CASE` convention the
/// rest of this ecosystem uses for its options struct.
#[derive(Debug, Clone, Parser)]
#[clap(version, next_display_order = None)]
pub struct Opt {
    /// Name of the configured archive source (used as the Bronze/Silver/watermark
    /// partition key).
    #[clap(long, env = LAKE_SOURCE_NAME, default_value_t = default_source_name())]
    pub source_name: String,

    /// Base URL a year is appended to as `<base>/<YEAR>FD.zip` to fetch that year's
    /// disclosure archive.
    #[clap(long, env = LAKE_ARCHIVE_BASE_URL, default_value_t = default_archive_base_url())]
    pub archive_base_url: String,

    /// Filesystem root for the Bronze object store.
    #[clap(long, env = LAKE_BRONZE_PATH, default_value_os_t = default_bronze_path())]
    pub bronze_path: PathBuf,

    /// Filesystem root for the Silver object store.
    #[clap(long, env = LAKE_SILVER_PATH, default_value_os_t = default_silver_path())]
    pub silver_path: PathBuf,

    /// Path to the SQLite database backing the Work Queue and Watermark Store.
    #[clap(long, env = LAKE_QUEUE_DB_PATH, default_value_os_t = default_queue_db_path())]
    pub queue_db_path: PathBuf,

    /// Parallel extraction tasks per worker process.
    #[clap(long, env = LAKE_WORKER_CONCURRENCY, default_value_t = default_worker_concurrency())]
    pub worker_concurrency: usize,

    /// Queue lease duration, in seconds.
    #[clap(long, env = LAKE_VISIBILITY_TIMEOUT_SECONDS, default_value_t = default_visibility_timeout_seconds())]
    pub visibility_timeout_seconds: u64,

    /// Attempts before a queue message is dead-lettered.
    #[clap(long, env = LAKE_MAX_ATTEMPTS, default_value_t = default_max_attempts())]
    pub max_attempts: u32,

    /// Embedded-text density ratio below which OCR engages.
    #[clap(long, env = LAKE_OCR_FALLBACK_THRESHOLD, default_value_t = default_ocr_fallback_threshold())]
    pub ocr_fallback_threshold: f64,

    /// Hard deadline, in seconds, for the Orchestrator's Drain step.
    #[clap(long, env = LAKE_DRAIN_DEADLINE_SECONDS, default_value_t = default_drain_deadline_seconds())]
    pub drain_deadline_seconds: u64,

    /// Invariant-violation rate above which the QualityGate fails a run.
    #[clap(long, env = LAKE_QUALITY_FAIL_FRACTION, default_value_t = default_quality_fail_fraction())]
    pub quality_fail_fraction: f64,

    /// Restrict which filing types are enqueued for extraction. Empty means all known
    /// types.
    #[clap(long, env = LAKE_FILING_TYPES, default_value_t = FilingTypeSet::default())]
    pub filing_types: FilingTypeSet,

    /// How long `run` sleeps between sweeps over every configured `(source, year)`.
    #[clap(long, env = LAKE_TICK_INTERVAL_SECONDS, default_value_t = default_tick_interval_seconds())]
    pub tick_interval_seconds: u64,

    /// Minimum log level.
    #[clap(long, env = LAKE_LOG_LEVEL, default_value_t = LogLevel::default())]
    pub log_level: LogLevel,

    /// Log output format: human-readable for a terminal, JSON for a process supervisor.
    #[clap(long, env = LAKE_LOG_MODE, default_value_t = LogMode::default())]
    pub log_mode: LogMode,

    /// Set the path to a configuration file that should be used to set up the pipeline.
    /// Format must be TOML.
    #[clap(long)]
    pub config_file_path: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, clap::Subcommand)]
pub enum Command {
    /// Start the Orchestrator loop, sweeping every configured year on a fixed interval.
    Run {
        /// Years to orchestrate. Repeat the flag for more than one.
        #[clap(long = "year", required = true)]
        years: Vec<u32>,
    },
    /// Force a single (source, year) through the pipeline once, bypassing the scheduler.
    Ingest {
        #[clap(long)]
        year: u32,
        /// Run even if the Update Detector reports no change since the last watermark.
        #[clap(long)]
        force_refresh: bool,
    },
    /// Print the current watermark state for the configured source.
    Status {
        #[clap(long = "year", required = true)]
        years: Vec<u32>,
    },
}

impl Opt {
    /// Build a new Opt from a config file, environment variables, and CLI args, in that
    /// ascending order of precedence.
    pub fn try_build() -> anyhow::Result<(Self, Option<PathBuf>)> {
        let mut opts = Opt::parse();
        let mut config_read_from = None;
        let user_specified_config_file_path =
            opts.config_file_path.clone().or_else(|| env::var("LAKE_CONFIG_FILE_PATH").map(PathBuf::from).ok());
        let config_file_path =
            user_specified_config_file_path.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE_PATH));

        match std::fs::read_to_string(&config_file_path) {
            Ok(config) => {
                let opt_from_config = toml::from_str::<OptFromFile>(&config)?;
                opt_from_config.export_to_env();
                opts = Opt::parse();
                config_read_from = Some(config_file_path);
            }
            Err(e) => {
                if let Some(path) = user_specified_config_file_path {
                    anyhow::bail!("unable to open or read the {:?} configuration file: {}.", path, e)
                }
            }
        }

        opts.validate()?;
        Ok((opts, config_read_from))
    }

    /// Cross-field constraints that can't be expressed as a `clap` value parser (§4.12:
    /// "validates cross-field constraints ... failing fast with a readable message").
    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.max_attempts >= 1, "max-attempts must be at least 1, got {}", self.max_attempts);
        anyhow::ensure!(self.worker_concurrency >= 1, "worker-concurrency must be at least 1, got {}", self.worker_concurrency);
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.ocr_fallback_threshold),
            "ocr-fallback-threshold must be between 0.0 and 1.0, got {}",
            self.ocr_fallback_threshold
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.quality_fail_fraction),
            "quality-fail-fraction must be between 0.0 and 1.0, got {}",
            self.quality_fail_fraction
        );
        anyhow::ensure!(self.visibility_timeout_seconds >= 1, "visibility-timeout-seconds must be at least 1");
        anyhow::ensure!(self.drain_deadline_seconds >= 1, "drain-deadline-seconds must be at least 1");
        for code in &self.filing_types.0 {
            anyhow::ensure!(
                lake_types::FilingType::from_code(code).is_some(),
                "unrecognized filing type `{code}` in --filing-types"
            );
        }
        Ok(())
    }

    pub fn filing_types(&self) -> Vec<lake_types::FilingType> {
        self.filing_types.0.iter().filter_map(|c| lake_types::FilingType::from_code(c)).collect()
    }

    pub fn pipeline_config(&self) -> pipeline::PipelineConfig {
        pipeline::PipelineConfig {
            worker_concurrency: self.worker_concurrency,
            visibility_timeout: std::time::Duration::from_secs(self.visibility_timeout_seconds),
            max_attempts: self.max_attempts,
            drain_deadline: std::time::Duration::from_secs(self.drain_deadline_seconds),
            quality_fail_fraction: self.quality_fail_fraction,
            force_refresh: false,
            ocr_fallback_threshold: self.ocr_fallback_threshold as f32,
        }
    }
}

/// A config-file-only mirror of [`Opt`]'s TOML-relevant fields. `Opt::command` has no
/// sensible TOML representation, so the config file never drives subcommand selection;
/// only its layered options do.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
struct OptFromFile {
    #[serde(default = "default_source_name")]
    source_name: String,
    #[serde(default = "default_archive_base_url")]
    archive_base_url: String,
    #[serde(default = "default_bronze_path")]
    bronze_path: PathBuf,
    #[serde(default = "default_silver_path")]
    silver_path: PathBuf,
    #[serde(default = "default_queue_db_path")]
    queue_db_path: PathBuf,
    #[serde(default = "default_worker_concurrency")]
    worker_concurrency: usize,
    #[serde(default = "default_visibility_timeout_seconds")]
    visibility_timeout_seconds: u64,
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
    #[serde(default = "default_ocr_fallback_threshold")]
    ocr_fallback_threshold: f64,
    #[serde(default = "default_drain_deadline_seconds")]
    drain_deadline_seconds: u64,
    #[serde(default = "default_quality_fail_fraction")]
    quality_fail_fraction: f64,
    #[serde(default)]
    filing_types: FilingTypeSet,
    #[serde(default = "default_tick_interval_seconds")]
    tick_interval_seconds: u64,
    #[serde(default)]
    log_level: LogLevel,
    #[serde(default)]
    log_mode: LogMode,
}

impl OptFromFile {
    /// Injects every value into its corresponding environment variable unless already
    /// set, so the precedence stays config-file < env vars < CLI args once `Opt::parse`
    /// runs a second time.
    fn export_to_env(self) {
        export_if_absent(LAKE_SOURCE_NAME, self.source_name);
        export_if_absent(LAKE_ARCHIVE_BASE_URL, self.archive_base_url);
        export_if_absent(LAKE_BRONZE_PATH, self.bronze_path.display().to_string());
        export_if_absent(LAKE_SILVER_PATH, self.silver_path.display().to_string());
        export_if_absent(LAKE_QUEUE_DB_PATH, self.queue_db_path.display().to_string());
        export_if_absent(LAKE_WORKER_CONCURRENCY, self.worker_concurrency.to_string());
        export_if_absent(LAKE_VISIBILITY_TIMEOUT_SECONDS, self.visibility_timeout_seconds.to_string());
        export_if_absent(LAKE_MAX_ATTEMPTS, self.max_attempts.to_string());
        export_if_absent(LAKE_OCR_FALLBACK_THRESHOLD, self.ocr_fallback_threshold.to_string());
        export_if_absent(LAKE_DRAIN_DEADLINE_SECONDS, self.drain_deadline_seconds.to_string());
        export_if_absent(LAKE_QUALITY_FAIL_FRACTION, self.quality_fail_fraction.to_string());
        if !self.filing_types.0.is_empty() {
            export_if_absent(LAKE_FILING_TYPES, self.filing_types.to_string());
        }
        export_if_absent(LAKE_TICK_INTERVAL_SECONDS, self.tick_interval_seconds.to_string());
        export_if_absent(LAKE_LOG_LEVEL, self.log_level.to_string());
        export_if_absent(LAKE_LOG_MODE, self.log_mode.to_string());
    }
}

fn export_if_absent(key: &str, value: impl AsRef<str>) {
    if env::var_os(key).is_none() {
        // SAFETY: single-threaded at this point in startup, before any subsystem reads
        // the environment concurrently.
        unsafe { env::set_var(key, value.as_ref()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filing_type_set_parses_comma_separated_codes() {
        let set: FilingTypeSet = "p, A,t".parse().unwrap();
        assert_eq!(set.0, vec!["P".to_string(), "A".to_string(), "T".to_string()]);
    }

    #[test]
    fn filing_type_set_round_trips_through_display() {
        let set: FilingTypeSet = "P,A".parse().unwrap();
        assert_eq!(set.to_string(), "P,A");
    }
}
