//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

mod cli;

pub use cli::{CliArgs, Command, ResolveArgs, ResolveOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "townsite";
const DEFAULT_ENDPOINT_BASE_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_DEBOUNCE_MS: u64 = 25;
const DEFAULT_MAX_WAIT_MS: u64 = 100;
const DEFAULT_MAX_BATCH_SIZE: NonZeroUsize = match NonZeroUsize::new(50) {
    Some(size) => size,
    None => NonZeroUsize::MIN,
};

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub media: MediaSettings,
    pub endpoint: EndpointSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct MediaSettings {
    pub debounce: Duration,
    pub max_wait: Duration,
    pub max_batch_size: NonZeroUsize,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            max_wait: Duration::from_millis(DEFAULT_MAX_WAIT_MS),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EndpointSettings {
    pub base_url: Url,
    pub request_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("TOWNSITE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Resolve(args)) => raw.apply_resolve_overrides(&args.overrides),
        None => raw.apply_resolve_overrides(&ResolveOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    media: RawMediaSettings,
    endpoint: RawEndpointSettings,
}

impl RawSettings {
    fn apply_resolve_overrides(&mut self, overrides: &ResolveOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.endpoint_base_url.as_ref() {
            self.endpoint.base_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.endpoint_request_timeout_seconds {
            self.endpoint.request_timeout_seconds = Some(seconds);
        }
        if let Some(ms) = overrides.media_debounce_ms {
            self.media.debounce_ms = Some(ms);
        }
        if let Some(ms) = overrides.media_max_wait_ms {
            self.media.max_wait_ms = Some(ms);
        }
        if let Some(size) = overrides.media_max_batch_size {
            self.media.max_batch_size = Some(size);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            media,
            endpoint,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let media = build_media_settings(media)?;
        let endpoint = build_endpoint_settings(endpoint)?;

        Ok(Self {
            logging,
            media,
            endpoint,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_media_settings(media: RawMediaSettings) -> Result<MediaSettings, LoadError> {
    let debounce_ms = media.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS);
    if debounce_ms == 0 {
        return Err(LoadError::invalid(
            "media.debounce_ms",
            "must be greater than zero",
        ));
    }

    let max_wait_ms = media.max_wait_ms.unwrap_or(DEFAULT_MAX_WAIT_MS);
    if max_wait_ms < debounce_ms {
        return Err(LoadError::invalid(
            "media.max_wait_ms",
            format!("must be at least media.debounce_ms ({debounce_ms})"),
        ));
    }

    let max_batch_size = match media.max_batch_size {
        Some(size) => non_zero_usize(size, "media.max_batch_size")?,
        None => DEFAULT_MAX_BATCH_SIZE,
    };

    Ok(MediaSettings {
        debounce: Duration::from_millis(debounce_ms),
        max_wait: Duration::from_millis(max_wait_ms),
        max_batch_size,
    })
}

fn build_endpoint_settings(endpoint: RawEndpointSettings) -> Result<EndpointSettings, LoadError> {
    let raw_url = endpoint
        .base_url
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_ENDPOINT_BASE_URL.to_string());
    let base_url = Url::parse(&raw_url)
        .map_err(|err| LoadError::invalid("endpoint.base_url", format!("`{raw_url}`: {err}")))?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "endpoint.base_url",
            format!("unsupported scheme `{}`", base_url.scheme()),
        ));
    }

    let timeout_secs = endpoint
        .request_timeout_seconds
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "endpoint.request_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(EndpointSettings {
        base_url,
        request_timeout: Duration::from_secs(timeout_secs),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMediaSettings {
    debounce_ms: Option<u64>,
    max_wait_ms: Option<u64>,
    max_batch_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEndpointSettings {
    base_url: Option<String>,
    request_timeout_seconds: Option<u64>,
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
