//! Configuration layer: typed settings with layered precedence (file → env).

use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use axum::http::Method;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{CacheConfig, JsonFileStore, ResponseCache};

const LOCAL_CONFIG_BASENAME: &str = "callcache";
const ENV_PREFIX: &str = "CALLCACHE";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache: CacheConfig,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Default)]
pub struct StoreSettings {
    /// Persist entries to this JSON file instead of keeping them only in memory.
    pub path: Option<PathBuf>,
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

impl Settings {
    /// Build a cache from these settings, file-backed when `store.path` is set.
    pub fn response_cache<T>(&self) -> ResponseCache<T>
    where
        T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let builder = ResponseCache::builder(self.cache.clone());
        match &self.store.path {
            Some(path) => builder
                .storage(Arc::new(JsonFileStore::<T>::open(
                    path.clone(),
                    self.cache.max_size,
                )))
                .build(),
            None => builder.build(),
        }
    }

    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        Ok(Self {
            cache: build_cache_config(raw.cache)?,
            store: StoreSettings {
                path: raw.store.path,
            },
            logging: build_logging_settings(raw.logging)?,
        })
    }
}

/// Load settings using the configured precedence (file → environment).
///
/// `callcache.toml` in the working directory is read when present; an explicit
/// `config_file` must exist. Environment variables use the `CALLCACHE__`
/// prefix with `__` between sections, e.g. `CALLCACHE__CACHE__TTL_SECONDS=60`
/// or `CALLCACHE__CACHE__METHODS=GET,HEAD`.
pub fn load(config_file: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder =
        Config::builder().add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cache.methods")
            .try_parsing(true),
    );

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

fn build_cache_config(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let ttl_seconds = cache.ttl_seconds.unwrap_or(defaults.ttl.as_secs());
    if ttl_seconds == 0 {
        return Err(LoadError::invalid(
            "cache.ttl_seconds",
            "must be greater than zero",
        ));
    }

    let methods = match cache.methods {
        Some(methods) => parse_methods(&methods)?,
        None => defaults.methods,
    };

    let max_size = match cache.max_size {
        Some(limit) => Some(
            NonZeroUsize::new(limit)
                .ok_or_else(|| LoadError::invalid("cache.max_size", "must be greater than zero"))?,
        ),
        None => None,
    };

    let body_limit = match cache.response_body_limit_bytes {
        Some(limit) => usize::try_from(limit).map_err(|_| {
            LoadError::invalid(
                "cache.response_body_limit_bytes",
                "value exceeds supported range for usize",
            )
        })?,
        None => defaults.response_body_limit_bytes,
    };
    if body_limit == 0 {
        return Err(LoadError::invalid(
            "cache.response_body_limit_bytes",
            "must be greater than zero",
        ));
    }

    Ok(CacheConfig {
        ttl: Duration::from_secs(ttl_seconds),
        methods,
        max_size,
        response_body_limit_bytes: body_limit,
    })
}

fn parse_methods(methods: &[String]) -> Result<Vec<Method>, LoadError> {
    let mut parsed = Vec::with_capacity(methods.len());
    for method in methods {
        let trimmed = method.trim();
        if trimmed.is_empty() {
            continue;
        }
        let method = Method::from_bytes(trimmed.to_ascii_uppercase().as_bytes()).map_err(|err| {
            LoadError::invalid("cache.methods", format!("`{trimmed}`: {err}"))
        })?;
        if !parsed.contains(&method) {
            parsed.push(method);
        }
    }

    if parsed.is_empty() {
        return Err(LoadError::invalid(
            "cache.methods",
            "at least one method is required",
        ));
    }
    Ok(parsed)
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

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    cache: RawCacheSettings,
    store: RawStoreSettings,
    logging: RawLoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    ttl_seconds: Option<u64>,
    methods: Option<Vec<String>>,
    max_size: Option<usize>,
    response_body_limit_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}
