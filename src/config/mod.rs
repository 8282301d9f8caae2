//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{fmt, net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use chrono_tz::Tz;
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::util::timezone::parse_timezone;

mod cli;

pub use cli::{CliArgs, Command, DatabaseOverride, InitArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "tidings";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 10000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_TIMEZONE: &str = "Europe/Moscow";
const DEFAULT_RESTART_DELAY_SECS: u64 = 60;
const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BLOBS_DIR: &str = "media";
const DEFAULT_GROUP: &str = "general";
const PARSE_MODES: [&str; 3] = ["HTML", "Markdown", "MarkdownV2"];

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub access: AccessSettings,
    pub scheduler: SchedulerSettings,
    pub gateway: GatewaySettings,
    pub blobs: BlobSettings,
    pub store: StoreSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct AccessSettings {
    pub admin_user_id: i64,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub timezone: Tz,
    pub restart_delay: Duration,
}

#[derive(Clone)]
pub struct GatewaySettings {
    pub bot_token: String,
    pub api_base: Url,
    pub timeout: Duration,
    pub parse_mode: Option<String>,
}

impl fmt::Debug for GatewaySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewaySettings")
            .field("bot_token", &"<redacted>")
            .field("api_base", &self.api_base.as_str())
            .field("timeout", &self.timeout)
            .field("parse_mode", &self.parse_mode)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct BlobSettings {
    pub directory: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub default_groups: Vec<String>,
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

/// Settings resolved for the selected subcommand.
#[derive(Debug, Clone)]
pub enum Loaded {
    Serve(Box<Settings>),
    Init(InitSettings),
}

/// `init` only touches the store, so gateway and access settings are not read.
#[derive(Debug, Clone)]
pub struct InitSettings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub store: StoreSettings,
}

impl Loaded {
    pub fn logging(&self) -> &LoggingSettings {
        match self {
            Self::Serve(settings) => &settings.logging,
            Self::Init(settings) => &settings.logging,
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Loaded, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("TIDINGS").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Init(args)) => {
            raw.apply_database_override(&args.database);
            InitSettings::from_raw(raw).map(Loaded::Init)
        }
        Some(Command::Serve(args)) => {
            raw.apply_serve_overrides(&args.overrides);
            Settings::from_raw(raw).map(|settings| Loaded::Serve(Box::new(settings)))
        }
        None => {
            raw.apply_serve_overrides(&ServeOverrides::default());
            Settings::from_raw(raw).map(|settings| Loaded::Serve(Box::new(settings)))
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    access: RawAccessSettings,
    scheduler: RawSchedulerSettings,
    gateway: RawGatewaySettings,
    blobs: RawBlobSettings,
    store: RawStoreSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_database_override(&overrides.database);
        if let Some(token) = overrides.bot_token.as_ref() {
            self.gateway.bot_token = Some(token.clone());
        }
        if let Some(id) = overrides.admin_user_id {
            self.access.admin_user_id = Some(id);
        }
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.port {
            self.server.port = Some(port);
        }
        if let Some(zone) = overrides.timezone.as_ref() {
            self.scheduler.timezone = Some(zone.clone());
        }
        if let Some(directory) = overrides.blobs_directory.as_ref() {
            self.blobs.directory = Some(directory.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            access,
            scheduler,
            gateway,
            blobs,
            store,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            access: build_access_settings(access)?,
            scheduler: build_scheduler_settings(scheduler)?,
            gateway: build_gateway_settings(gateway)?,
            blobs: build_blob_settings(blobs)?,
            store: build_store_settings(store)?,
        })
    }
}

impl InitSettings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        Ok(Self {
            logging: build_logging_settings(raw.logging)?,
            database: build_database_settings(raw.database)?,
            store: build_store_settings(raw.store)?,
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

    Ok(ServerSettings { addr })
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

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_empty(database.url)
        .ok_or_else(|| LoadError::invalid("database.url", "a connection URL is required"))?;

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_access_settings(access: RawAccessSettings) -> Result<AccessSettings, LoadError> {
    let admin_user_id = access
        .admin_user_id
        .ok_or_else(|| LoadError::invalid("access.admin_user_id", "a super-admin id is required"))?;

    Ok(AccessSettings { admin_user_id })
}

fn build_scheduler_settings(
    scheduler: RawSchedulerSettings,
) -> Result<SchedulerSettings, LoadError> {
    let zone = scheduler
        .timezone
        .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
    let timezone =
        parse_timezone(&zone).map_err(|reason| LoadError::invalid("scheduler.timezone", reason))?;

    let delay_seconds = scheduler
        .restart_delay_seconds
        .unwrap_or(DEFAULT_RESTART_DELAY_SECS);
    if delay_seconds == 0 {
        return Err(LoadError::invalid(
            "scheduler.restart_delay_seconds",
            "must be greater than zero",
        ));
    }

    Ok(SchedulerSettings {
        timezone,
        restart_delay: Duration::from_secs(delay_seconds),
    })
}

fn build_gateway_settings(gateway: RawGatewaySettings) -> Result<GatewaySettings, LoadError> {
    let bot_token = non_empty(gateway.bot_token)
        .ok_or_else(|| LoadError::invalid("gateway.bot_token", "a bot token is required"))?;

    let api_base = gateway
        .api_base
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
    let api_base = Url::parse(api_base.trim())
        .map_err(|err| LoadError::invalid("gateway.api_base", format!("invalid URL: {err}")))?;

    let timeout_seconds = gateway
        .timeout_seconds
        .unwrap_or(DEFAULT_GATEWAY_TIMEOUT_SECS);
    if timeout_seconds == 0 {
        return Err(LoadError::invalid(
            "gateway.timeout_seconds",
            "must be greater than zero",
        ));
    }

    let parse_mode = match non_empty(gateway.parse_mode) {
        Some(mode) if PARSE_MODES.contains(&mode.as_str()) => Some(mode),
        Some(mode) => {
            return Err(LoadError::invalid(
                "gateway.parse_mode",
                format!("unsupported parse mode `{mode}`"),
            ));
        }
        None => None,
    };

    Ok(GatewaySettings {
        bot_token,
        api_base,
        timeout: Duration::from_secs(timeout_seconds),
        parse_mode,
    })
}

fn build_blob_settings(blobs: RawBlobSettings) -> Result<BlobSettings, LoadError> {
    let directory = blobs
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BLOBS_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "blobs.directory",
            "directory must not be empty",
        ));
    }

    Ok(BlobSettings { directory })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let groups = store
        .default_groups
        .unwrap_or_else(|| vec![DEFAULT_GROUP.to_string()]);

    let mut default_groups = Vec::with_capacity(groups.len());
    for group in groups {
        let trimmed = group.trim();
        if trimmed.is_empty() {
            return Err(LoadError::invalid(
                "store.default_groups",
                "group ids must not be empty",
            ));
        }
        if !default_groups.iter().any(|known: &String| known == trimmed) {
            default_groups.push(trimmed.to_string());
        }
    }

    Ok(StoreSettings { default_groups })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAccessSettings {
    admin_user_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSchedulerSettings {
    timezone: Option<String>,
    restart_delay_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawGatewaySettings {
    bot_token: Option<String>,
    api_base: Option<String>,
    timeout_seconds: Option<u64>,
    parse_mode: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBlobSettings {
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    default_groups: Option<Vec<String>>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Parse the command line and resolve the settings for the chosen subcommand.
pub fn load_with_cli() -> Result<Loaded, LoadError> {
    let mut args = CliArgs::parse();
    if args.command.is_none() {
        // Environment bindings of `serve` only resolve when the subcommand is parsed.
        args = CliArgs::parse_from(std::env::args_os().chain(std::iter::once("serve".into())));
    }
    load(&args)
}
