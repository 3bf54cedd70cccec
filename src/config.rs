use anyhow::{Context, Result, anyhow, bail};
use std::{
    env,
    net::SocketAddr,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};
use uuid::Uuid;

use crate::scope::Scope;

#[derive(Debug, Clone)]
pub struct CounterConfig {
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub log_format: LogFormat,
    pub scope: Scope,
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PolicyConfig {
    Local { max_entries: usize },
    Central {
        journal_path: PathBuf,
        compact_interval: Duration,
    },
    Redis(RedisConfig),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedisConfig {
    pub settings: RedisSettings,
    // Seconds between batched flushes; zero or negative means every
    // increment is written through synchronously.
    pub sync_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: i64,
    pub ssl: bool,
    pub ssl_verify: bool,
    pub timeout: Duration,
    pub pool_size: usize,
    pub keepalive_idle: Duration,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            username: None,
            password: None,
            database: 0,
            ssl: false,
            ssl_verify: true,
            timeout: Duration::from_millis(2_000),
            pool_size: 32,
            keepalive_idle: Duration::from_millis(60_000),
        }
    }
}

impl CounterConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = Source { lookup };

        let bind_addr = source
            .string("BIND_ADDR", "0.0.0.0:8080")
            .parse::<SocketAddr>()
            .context("invalid BIND_ADDR")?;

        let log_format = match source.string("LOG_FORMAT", "compact").to_ascii_lowercase().as_str()
        {
            "compact" => LogFormat::Compact,
            "json" => LogFormat::Json,
            other => bail!("unsupported LOG_FORMAT: {other}"),
        };

        let scope = Scope::new(source.uuid("SERVICE_ID")?, source.uuid("ROUTE_ID")?);

        let policy = match source
            .string("COUNTER_POLICY", "local")
            .to_ascii_lowercase()
            .as_str()
        {
            "local" => PolicyConfig::Local {
                max_entries: source.parse("LOCAL_MAX_ENTRIES", 100_000usize)?.max(1),
            },
            "central" => PolicyConfig::Central {
                journal_path: PathBuf::from(source.string("CENTRAL_JOURNAL_PATH", "counters.jsonl")),
                compact_interval: Duration::from_secs(source.parse("CENTRAL_COMPACT_SECS", 60u64)?),
            },
            "redis" => PolicyConfig::Redis(RedisConfig {
                settings: redis_settings(&source)?,
                sync_rate: source.parse("SYNC_RATE", -1.0f64)?,
            }),
            other => return Err(anyhow!("unsupported COUNTER_POLICY: {other}")),
        };

        Ok(Self {
            bind_addr,
            log_level: source.string("LOG_LEVEL", "info"),
            log_format,
            scope,
            policy,
        })
    }
}

fn redis_settings<F>(source: &Source<F>) -> Result<RedisSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = RedisSettings::default();
    let host = source.string("REDIS_HOST", &defaults.host);
    if host.trim().is_empty() {
        bail!("REDIS_HOST must not be empty");
    }

    let timeout_ms = source.parse("REDIS_TIMEOUT_MS", 2_000u64)?;
    if timeout_ms == 0 {
        bail!("REDIS_TIMEOUT_MS must be greater than zero");
    }

    let database = source.parse("REDIS_DATABASE", defaults.database)?;
    if database < 0 {
        bail!("REDIS_DATABASE must not be negative");
    }

    Ok(RedisSettings {
        host: host.trim().to_string(),
        port: source.parse("REDIS_PORT", defaults.port)?,
        username: source.optional("REDIS_USERNAME"),
        password: source.optional("REDIS_PASSWORD"),
        database,
        ssl: source.parse("REDIS_SSL", defaults.ssl)?,
        ssl_verify: source.parse("REDIS_SSL_VERIFY", defaults.ssl_verify)?,
        timeout: Duration::from_millis(timeout_ms),
        pool_size: source.parse("REDIS_POOL_SIZE", defaults.pool_size)?.max(1),
        keepalive_idle: Duration::from_millis(source.parse("REDIS_KEEPALIVE_MS", 60_000u64)?),
    })
}

struct Source<F> {
    lookup: F,
}

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw
                .parse::<T>()
                .map_err(|e| anyhow!("invalid {key} ({raw}): {e}")),
            None => Ok(default),
        }
    }

    fn uuid(&self, key: &str) -> Result<Option<Uuid>> {
        self.optional(key)
            .map(|raw| Uuid::parse_str(&raw).with_context(|| format!("invalid {key}")))
            .transpose()
    }
}
