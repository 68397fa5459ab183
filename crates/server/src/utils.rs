use aloft_core::{
    find_config_file, load_config, ConfigSource, DEFAULT_POLL_TICK, DEFAULT_SERVER_PORT,
    DEFAULT_STARTUP_DELAY,
};
use clap::Parser;
use fern::{
    colors::{Color, ColoredLevelConfig},
    Dispatch,
};
use log::LevelFilter;
use serde::Deserialize;
use std::env;
use time::{format_description::well_known::Iso8601, OffsetDateTime};

use crate::fetch::RetryPolicy;
use crate::models::ProviderKind;
use crate::rate_limit::RateBudget;

#[derive(Parser, Clone, Debug, Deserialize, Default)]
#[command(
    author,
    version,
    about = "Aloft - flight-weather aggregation and caching service"
)]
pub struct Cli {
    /// Path to config file (TOML format)
    /// Searched in order: this flag, $ALOFT_CONFIG, ./aloft.toml,
    /// $XDG_CONFIG_HOME/aloft/aloft.toml, /etc/aloft/aloft.toml
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, env = "ALOFT_LEVEL")]
    pub level: Option<String>,

    /// Host to listen on (use 0.0.0.0 for all interfaces)
    #[arg(long, env = "ALOFT_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "ALOFT_PORT")]
    pub port: Option<u16>,

    /// Directory for the SQLite weather cache
    #[arg(short, long, env = "ALOFT_DATA_DIR")]
    pub data_dir: Option<String>,

    /// ICAO station identifier for METAR/TAF lookups
    #[arg(short, long, env = "ALOFT_STATION")]
    pub station: Option<String>,

    /// Site latitude for coordinate-keyed forecasts
    #[arg(long, env = "ALOFT_LATITUDE")]
    pub latitude: Option<f64>,

    /// Site longitude for coordinate-keyed forecasts
    #[arg(long, env = "ALOFT_LONGITUDE")]
    pub longitude: Option<f64>,

    /// AVWX API token for METAR/TAF; those providers are skipped without it
    #[arg(long, env = "ALOFT_AVWX_TOKEN")]
    pub avwx_token: Option<String>,

    /// Pre-resolved NWS gridpoint forecast URL; resolved from coordinates
    /// when not set
    #[arg(long, env = "ALOFT_NWS_FORECAST_URL")]
    pub nws_forecast_url: Option<String>,
}

impl Cli {
    pub fn host(&self) -> String {
        self.host.clone().unwrap_or_else(|| "127.0.0.1".to_string())
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SERVER_PORT)
    }

    pub fn data_dir(&self) -> String {
        self.data_dir
            .clone()
            .unwrap_or_else(|| "./weather_data".to_string())
    }

    pub fn station(&self) -> String {
        self.station.clone().unwrap_or_else(|| "KPDX".to_string())
    }

    pub fn latitude(&self) -> f64 {
        self.latitude.unwrap_or(45.5886)
    }

    pub fn longitude(&self) -> f64 {
        self.longitude.unwrap_or(-122.5975)
    }
}

/// Per-family cache TTLs, minutes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    pub metar_minutes: i64,
    pub taf_minutes: i64,
    pub nws_minutes: i64,
    pub extended_minutes: i64,
    pub hourly_minutes: i64,
    pub historical_minutes: i64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            metar_minutes: 30,
            taf_minutes: 60,
            nws_minutes: 120,
            extended_minutes: 240,
            hourly_minutes: 240,
            historical_minutes: 1440,
        }
    }
}

impl TtlConfig {
    pub fn for_kind(&self, kind: ProviderKind) -> time::Duration {
        let minutes = match kind {
            ProviderKind::Metar => self.metar_minutes,
            ProviderKind::Taf => self.taf_minutes,
            ProviderKind::Nws => self.nws_minutes,
            ProviderKind::Extended => self.extended_minutes,
            ProviderKind::Hourly => self.hourly_minutes,
            ProviderKind::Historical => self.historical_minutes,
        };
        time::Duration::minutes(minutes)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub tick_secs: u64,
    pub startup_delay_secs: u64,
    /// Process-wide pause on the shared-quota family after an upstream 429.
    pub cooldown_secs: i64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            tick_secs: DEFAULT_POLL_TICK,
            startup_delay_secs: DEFAULT_STARTUP_DELAY,
            cooldown_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 1,
            max_delay_secs: 30,
            timeout_secs: 10,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: std::time::Duration::from_secs(self.base_delay_secs),
            max_delay: std::time::Duration::from_secs(self.max_delay_secs),
        }
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub cleanup_days: i64,
    /// Local hour of day (0-23) at/after which the daily sweep runs.
    pub cleanup_hour: u8,
    /// Deployment timezone as a fixed offset from UTC, hours.
    pub utc_offset_hours: i8,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            cleanup_days: 30,
            cleanup_hour: 3,
            utc_offset_hours: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub avwx_base_url: String,
    pub nws_base_url: String,
    pub open_meteo_base_url: String,
    pub open_meteo_archive_url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            avwx_base_url: "https://avwx.rest/api".to_string(),
            nws_base_url: "https://api.weather.gov".to_string(),
            open_meteo_base_url: "https://api.open-meteo.com/v1".to_string(),
            open_meteo_archive_url: "https://archive-api.open-meteo.com/v1".to_string(),
        }
    }
}

/// Tunables only reachable through the config file, all defaulted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub ttl: TtlConfig,
    pub poll: PollConfig,
    pub retry: RetryConfig,
    pub rate: RateBudget,
    pub retention: RetentionConfig,
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    #[serde(flatten)]
    cli: Cli,
    #[serde(flatten)]
    tuning: Tuning,
}

/// Load configuration from CLI args, config file, and environment
pub fn get_config_info() -> (Cli, Tuning) {
    let cli_args = Cli::parse();
    merge_config(cli_args)
}

fn merge_config(cli_args: Cli) -> (Cli, Tuning) {
    let source = if let Some(ref path) = cli_args.config {
        ConfigSource::Explicit(path.into())
    } else {
        find_config_file("ALOFT_CONFIG", "aloft.toml")
    };

    if let Some(path) = source.path() {
        log::info!("Loading config from: {}", path.display());
    }

    let file_config: FileConfig = load_config(&source).unwrap_or_default();
    let file_cli = file_config.cli;

    // CLI args override file config (env vars are handled by clap)
    let cli = Cli {
        config: cli_args.config,
        level: cli_args.level.or(file_cli.level),
        host: cli_args.host.or(file_cli.host),
        port: cli_args.port.or(file_cli.port),
        data_dir: cli_args.data_dir.or(file_cli.data_dir),
        station: cli_args.station.or(file_cli.station),
        latitude: cli_args.latitude.or(file_cli.latitude),
        longitude: cli_args.longitude.or(file_cli.longitude),
        avwx_token: cli_args.avwx_token.or(file_cli.avwx_token),
        nws_forecast_url: cli_args.nws_forecast_url.or(file_cli.nws_forecast_url),
    };

    (cli, file_config.tuning)
}

pub fn get_log_level(cli: &Cli) -> LevelFilter {
    let level_str = cli
        .level
        .clone()
        .or_else(|| env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    match level_str.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

pub fn setup_logger() -> Dispatch {
    let colors = ColoredLevelConfig::new()
        .trace(Color::White)
        .debug(Color::Cyan)
        .info(Color::Blue)
        .warn(Color::Yellow)
        .error(Color::Magenta);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {}] {}: {}",
                OffsetDateTime::now_utc().format(&Iso8601::DEFAULT).unwrap(),
                colors.color(record.level()),
                record.target(),
                message
            ));
        })
        .level_for("sqlx", LevelFilter::Warn)
        .level_for("hyper", LevelFilter::Warn)
        .level_for("reqwest", LevelFilter::Warn)
        .chain(std::io::stdout())
}
