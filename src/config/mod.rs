//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "murmur";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_CACHE_MEMORY_CAPACITY: u32 = 10_000;
const DEFAULT_DISTRIBUTE_CONCURRENCY: u32 = 4;
const DEFAULT_BACKFILL_CONCURRENCY: u32 = 2;
const DEFAULT_HANDLER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BACKFILL_PAGE_SIZE: u32 = 100;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Command-line arguments for the murmur binary.
#[derive(Debug, Parser)]
#[command(name = "murmur", version, about = "murmur social feed service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "MURMUR_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP API. With the in-process broker this also runs fan-out consumers.
    Serve(Box<ServeArgs>),
    /// Run fan-out consumers only.
    Worker(WorkerArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub overrides: SharedOverrides,
}

/// Overrides accepted by every command.
#[derive(Debug, Args, Default, Clone)]
pub struct SharedOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the storage mode (memory|postgres|cached).
    #[arg(long = "storage-mode", value_name = "MODE")]
    pub storage_mode: Option<String>,

    /// Override the store wrapped by the cached mode (memory|postgres).
    #[arg(long = "storage-cached-origin", value_name = "MODE")]
    pub storage_cached_origin: Option<String>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the cache backend (memory|redis).
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub cache_backend: Option<String>,

    /// Override the Redis connection URL.
    #[arg(long = "cache-redis-url", value_name = "URL")]
    pub cache_redis_url: Option<String>,

    /// Override the cache entry lifetime.
    #[arg(long = "cache-ttl-seconds", value_name = "SECONDS")]
    pub cache_ttl_seconds: Option<u64>,

    /// Override the task broker (memory|postgres).
    #[arg(long = "broker", value_name = "BACKEND")]
    pub broker: Option<String>,

    /// Override the distributePost worker concurrency.
    #[arg(long = "fanout-distribute-concurrency", value_name = "COUNT")]
    pub fanout_distribute_concurrency: Option<u32>,

    /// Override the backfillFeed worker concurrency.
    #[arg(long = "fanout-backfill-concurrency", value_name = "COUNT")]
    pub fanout_backfill_concurrency: Option<u32>,

    /// Override the per-task handler timeout.
    #[arg(long = "fanout-handler-timeout-seconds", value_name = "SECONDS")]
    pub fanout_handler_timeout_seconds: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub shared: SharedOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the per-request storage deadline.
    #[arg(long = "server-request-timeout-seconds", value_name = "SECONDS")]
    pub server_request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub broker: BrokerBackend,
    pub fanout: FanoutSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub request_timeout: Duration,
    pub graceful_shutdown: Duration,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    Memory,
    Postgres,
    Cached,
}

/// A store that can sit underneath the cache-aside layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginMode {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy)]
pub struct StorageSettings {
    pub mode: StorageMode,
    pub cached_origin: OriginMode,
}

impl StorageSettings {
    /// Whether any part of the storage stack talks to PostgreSQL.
    pub fn uses_postgres(&self) -> bool {
        match self.mode {
            StorageMode::Postgres => true,
            StorageMode::Cached => self.cached_origin == OriginMode::Postgres,
            StorageMode::Memory => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub redis_url: Option<String>,
    pub ttl_seconds: NonZeroU64,
    pub memory_capacity: NonZeroU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone)]
pub struct FanoutSettings {
    pub distribute_concurrency: NonZeroU32,
    pub backfill_concurrency: NonZeroU32,
    pub handler_timeout: Duration,
    pub backfill_page_size: NonZeroU32,
    pub max_attempts: NonZeroU32,
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

    builder = builder.add_source(Environment::with_prefix("MURMUR").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Worker(args)) => raw.apply_shared_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    storage: RawStorageSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    broker: RawBrokerSettings,
    fanout: RawFanoutSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_request_timeout_seconds {
            self.server.request_timeout_seconds = Some(seconds);
        }

        self.apply_shared_overrides(&overrides.shared);
    }

    fn apply_shared_overrides(&mut self, overrides: &SharedOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(mode) = overrides.storage_mode.as_ref() {
            self.storage.mode = Some(mode.clone());
        }
        if let Some(origin) = overrides.storage_cached_origin.as_ref() {
            self.storage.cached_origin = Some(origin.clone());
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.cache_redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
        if let Some(ttl) = overrides.cache_ttl_seconds {
            self.cache.ttl_seconds = Some(ttl);
        }
        if let Some(backend) = overrides.broker.as_ref() {
            self.broker.backend = Some(backend.clone());
        }
        if let Some(value) = overrides.fanout_distribute_concurrency {
            self.fanout.distribute_concurrency = Some(value);
        }
        if let Some(value) = overrides.fanout_backfill_concurrency {
            self.fanout.backfill_concurrency = Some(value);
        }
        if let Some(seconds) = overrides.fanout_handler_timeout_seconds {
            self.fanout.handler_timeout_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            storage,
            database,
            cache,
            broker,
            fanout,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let storage = build_storage_settings(storage)?;
        let database = build_database_settings(database)?;
        let cache = build_cache_settings(cache)?;
        let broker = build_broker_backend(broker)?;
        let fanout = build_fanout_settings(fanout)?;

        if database.url.is_none() {
            if storage.uses_postgres() {
                return Err(LoadError::invalid(
                    "database.url",
                    "required when storage uses postgres",
                ));
            }
            if broker == BrokerBackend::Postgres {
                return Err(LoadError::invalid(
                    "database.url",
                    "required by the postgres broker",
                ));
            }
        }
        if storage.mode == StorageMode::Cached
            && cache.backend == CacheBackend::Redis
            && cache.redis_url.is_none()
        {
            return Err(LoadError::invalid(
                "cache.redis_url",
                "required when the cache backend is redis",
            ));
        }
        // The postgres broker runs consumers in a separate process.
        if broker == BrokerBackend::Postgres {
            if !storage.uses_postgres() {
                return Err(LoadError::invalid(
                    "broker.backend",
                    "the postgres broker requires postgres-backed storage",
                ));
            }
            if storage.mode == StorageMode::Cached && cache.backend == CacheBackend::Memory {
                return Err(LoadError::invalid(
                    "cache.backend",
                    "the postgres broker requires a shared cache backend",
                ));
            }
        }

        Ok(Self {
            server,
            logging,
            storage,
            database,
            cache,
            broker,
            fanout,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let request_timeout = positive_seconds(
        server
            .request_timeout_seconds
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        "server.request_timeout_seconds",
    )?;
    let graceful_shutdown = positive_seconds(
        server
            .graceful_shutdown_seconds
            .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS),
        "server.graceful_shutdown_seconds",
    )?;

    Ok(ServerSettings {
        addr,
        request_timeout,
        graceful_shutdown,
    })
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

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let mode = match keyword(storage.mode).as_deref() {
        None | Some("memory") => StorageMode::Memory,
        Some("postgres") => StorageMode::Postgres,
        Some("cached") => StorageMode::Cached,
        Some(other) => {
            return Err(LoadError::invalid(
                "storage.mode",
                format!("unknown mode `{other}`, expected memory|postgres|cached"),
            ));
        }
    };

    let cached_origin = match keyword(storage.cached_origin).as_deref() {
        None | Some("postgres") => OriginMode::Postgres,
        Some("memory") => OriginMode::Memory,
        Some(other) => {
            return Err(LoadError::invalid(
                "storage.cached_origin",
                format!("unknown origin `{other}`, expected memory|postgres"),
            ));
        }
    };

    Ok(StorageSettings {
        mode,
        cached_origin,
    })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = trimmed(database.url);
    let max_value = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = non_zero_u32(max_value.into(), "database.max_connections")?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match keyword(cache.backend).as_deref() {
        None | Some("memory") => CacheBackend::Memory,
        Some("redis") => CacheBackend::Redis,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("unknown backend `{other}`, expected memory|redis"),
            ));
        }
    };

    let ttl_seconds = NonZeroU64::new(cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS))
        .ok_or_else(|| LoadError::invalid("cache.ttl_seconds", "must be greater than zero"))?;
    let memory_capacity = non_zero_u32(
        cache
            .memory_capacity
            .unwrap_or(DEFAULT_CACHE_MEMORY_CAPACITY)
            .into(),
        "cache.memory_capacity",
    )?;

    Ok(CacheSettings {
        backend,
        redis_url: trimmed(cache.redis_url),
        ttl_seconds,
        memory_capacity,
    })
}

fn build_broker_backend(broker: RawBrokerSettings) -> Result<BrokerBackend, LoadError> {
    match keyword(broker.backend).as_deref() {
        None | Some("memory") => Ok(BrokerBackend::Memory),
        Some("postgres") => Ok(BrokerBackend::Postgres),
        Some(other) => Err(LoadError::invalid(
            "broker.backend",
            format!("unknown backend `{other}`, expected memory|postgres"),
        )),
    }
}

fn build_fanout_settings(fanout: RawFanoutSettings) -> Result<FanoutSettings, LoadError> {
    let distribute_concurrency = non_zero_u32(
        fanout
            .distribute_concurrency
            .unwrap_or(DEFAULT_DISTRIBUTE_CONCURRENCY)
            .into(),
        "fanout.distribute_concurrency",
    )?;
    let backfill_concurrency = non_zero_u32(
        fanout
            .backfill_concurrency
            .unwrap_or(DEFAULT_BACKFILL_CONCURRENCY)
            .into(),
        "fanout.backfill_concurrency",
    )?;
    let handler_timeout = positive_seconds(
        fanout
            .handler_timeout_seconds
            .unwrap_or(DEFAULT_HANDLER_TIMEOUT_SECS),
        "fanout.handler_timeout_seconds",
    )?;

    let backfill_page_size = non_zero_u32(
        fanout
            .backfill_page_size
            .unwrap_or(DEFAULT_BACKFILL_PAGE_SIZE)
            .into(),
        "fanout.backfill_page_size",
    )?;
    if backfill_page_size.get() > crate::application::pagination::MAX_PAGE_SIZE {
        return Err(LoadError::invalid(
            "fanout.backfill_page_size",
            format!(
                "must not exceed {}",
                crate::application::pagination::MAX_PAGE_SIZE
            ),
        ));
    }

    let max_attempts = non_zero_u32(
        fanout.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).into(),
        "fanout.max_attempts",
    )?;

    Ok(FanoutSettings {
        distribute_concurrency,
        backfill_concurrency,
        handler_timeout,
        backfill_page_size,
        max_attempts,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    request_timeout_seconds: Option<u64>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    mode: Option<String>,
    cached_origin: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    redis_url: Option<String>,
    ttl_seconds: Option<u64>,
    memory_capacity: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBrokerSettings {
    backend: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFanoutSettings {
    distribute_concurrency: Option<u32>,
    backfill_concurrency: Option<u32>,
    handler_timeout_seconds: Option<u64>,
    backfill_page_size: Option<u32>,
    max_attempts: Option<u32>,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn keyword(value: Option<String>) -> Option<String> {
    trimmed(value).map(|value| value.to_ascii_lowercase())
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn positive_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
