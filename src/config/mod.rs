//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{collections::HashMap, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{CacheConfig, Expiry, Granularity, HashAlgorithm};

mod cli;

pub use cli::{
    CacheOverrides, CidArgs, CliArgs, Command, LoggingOverrides, ObjectsArgs, ViewArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "render-cache";
const ENV_PREFIX: &str = "RENDER_CACHE";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
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
pub struct CacheSettings {
    pub enabled: bool,
    pub kinds: HashMap<String, bool>,
    pub hash_algorithm: HashAlgorithm,
    pub default_bin: String,
    pub default_granularity: Option<Granularity>,
    pub default_expire: Expiry,
    pub bin_capacity: usize,
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_logging_overrides(&cli.logging);
    raw.apply_cache_overrides(cli.command.cache_overrides());

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(name) = overrides.cache_hash_algorithm.as_ref() {
            self.cache.hash_algorithm = Some(name.clone());
        }
        if let Some(bin) = overrides.cache_default_bin.as_ref() {
            self.cache.default_bin = Some(bin.clone());
        }
        if let Some(granularity) = overrides.cache_default_granularity.as_ref() {
            self.cache.default_granularity = Some(granularity.clone());
        }
        if let Some(expire) = overrides.cache_default_expire.as_ref() {
            self.cache.default_expire = Some(expire.clone());
        }
        if let Some(capacity) = overrides.cache_bin_capacity {
            self.cache.bin_capacity = Some(capacity);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, cache } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self { logging, cache })
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

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = CacheConfig::default();

    let hash_algorithm = match cache.hash_algorithm {
        Some(name) => HashAlgorithm::from_str(&name)
            .map_err(|reason| LoadError::invalid("cache.hash_algorithm", reason))?,
        None => defaults.hash_algorithm,
    };

    let default_bin = cache
        .default_bin
        .map(|bin| bin.trim().to_string())
        .unwrap_or(defaults.default_bin);
    if default_bin.is_empty() {
        return Err(LoadError::invalid("cache.default_bin", "must not be empty"));
    }

    let default_granularity = match cache.default_granularity {
        Some(value) => parse_granularity(&value)
            .map_err(|reason| LoadError::invalid("cache.default_granularity", reason))?,
        None => defaults.default_granularity,
    };

    let default_expire = match cache.default_expire {
        Some(value) => parse_expiry(&value)
            .map_err(|reason| LoadError::invalid("cache.default_expire", reason))?,
        None => defaults.default_expire,
    };

    let bin_capacity = cache.bin_capacity.unwrap_or(defaults.bin_capacity);
    if bin_capacity == 0 {
        return Err(LoadError::invalid(
            "cache.bin_capacity",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        kinds: cache.kinds,
        hash_algorithm,
        default_bin,
        default_granularity,
        default_expire,
        bin_capacity,
    })
}

/// `none` leaves the default descriptor without a granularity, disabling caching.
fn parse_granularity(value: &str) -> Result<Option<Granularity>, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "none" => Ok(None),
        "no_cache" => Ok(Some(Granularity::NoCache)),
        "per_object" => Ok(Some(Granularity::PerObject)),
        "per_context" => Ok(Some(Granularity::PerContext)),
        other => Err(format!(
            "unknown granularity `{other}` (expected none, no_cache, per_object or per_context)"
        )),
    }
}

fn parse_expiry(value: &str) -> Result<Expiry, String> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "permanent" => Ok(Expiry::Permanent),
        "temporary" => Ok(Expiry::Temporary),
        seconds => match seconds.parse::<u64>() {
            Ok(0) => Err("expiry seconds must be greater than zero".to_string()),
            Ok(seconds) => Ok(Expiry::After(Duration::from_secs(seconds))),
            Err(_) => Err(format!(
                "unknown expiry `{seconds}` (expected permanent, temporary or seconds)"
            )),
        },
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    kinds: HashMap<String, bool>,
    hash_algorithm: Option<String>,
    default_bin: Option<String>,
    default_granularity: Option<String>,
    default_expire: Option<String>,
    bin_capacity: Option<usize>,
}
