use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::EngineSettings;
use crate::limits::MAX_HOLD_TTL_SECS;

#[derive(Debug, thiserror::Error)]
#[error("{var}: invalid value {value:?}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Process configuration, read once from `BUNKHOUSE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub catalog_path: PathBuf,
    pub max_connections: usize,
    pub hold_ttl: Duration,
    pub cache_ttl: Duration,
    pub upstream_timeout: Duration,
    pub sweep_interval: Duration,
    pub hold_retention: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn positive(var: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError {
            var,
            value: "0".into(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(value)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset variables take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let hold_ttl_secs = positive(
            "BUNKHOUSE_HOLD_TTL_SECS",
            parse_var(&lookup, "BUNKHOUSE_HOLD_TTL_SECS", 900u64)?,
        )?;
        if hold_ttl_secs > MAX_HOLD_TTL_SECS {
            return Err(ConfigError {
                var: "BUNKHOUSE_HOLD_TTL_SECS",
                value: hold_ttl_secs.to_string(),
                reason: format!("must be at most {MAX_HOLD_TTL_SECS}"),
            });
        }
        let metrics_port = match lookup("BUNKHOUSE_METRICS_PORT") {
            Some(_) => Some(parse_var(&lookup, "BUNKHOUSE_METRICS_PORT", 0u16)?),
            None => None,
        };

        Ok(Self {
            port: parse_var(&lookup, "BUNKHOUSE_PORT", 7878)?,
            bind: lookup("BUNKHOUSE_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: lookup("BUNKHOUSE_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            catalog_path: lookup("BUNKHOUSE_CATALOG")
                .unwrap_or_else(|| "./rooms.json".into())
                .into(),
            max_connections: positive(
                "BUNKHOUSE_MAX_CONNECTIONS",
                parse_var(&lookup, "BUNKHOUSE_MAX_CONNECTIONS", 256u64)?,
            )? as usize,
            hold_ttl: Duration::from_secs(hold_ttl_secs),
            cache_ttl: Duration::from_secs(positive(
                "BUNKHOUSE_CACHE_TTL_SECS",
                parse_var(&lookup, "BUNKHOUSE_CACHE_TTL_SECS", 120)?,
            )?),
            upstream_timeout: Duration::from_millis(positive(
                "BUNKHOUSE_UPSTREAM_TIMEOUT_MS",
                parse_var(&lookup, "BUNKHOUSE_UPSTREAM_TIMEOUT_MS", 2000)?,
            )?),
            sweep_interval: Duration::from_secs(positive(
                "BUNKHOUSE_SWEEP_INTERVAL_SECS",
                parse_var(&lookup, "BUNKHOUSE_SWEEP_INTERVAL_SECS", 5)?,
            )?),
            hold_retention: Duration::from_secs(parse_var(
                &lookup,
                "BUNKHOUSE_HOLD_RETENTION_SECS",
                3600,
            )?),
            compact_threshold: positive(
                "BUNKHOUSE_COMPACT_THRESHOLD",
                parse_var(&lookup, "BUNKHOUSE_COMPACT_THRESHOLD", 1000)?,
            )?,
            metrics_port,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            cache_ttl: self.cache_ttl,
            upstream_timeout: self.upstream_timeout,
            default_hold_ttl: self.hold_ttl,
        }
    }
}
