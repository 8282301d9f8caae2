use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the tidings binary.
#[derive(Debug, Parser)]
#[command(name = "tidings", version, about = "Recurring message scheduler for chat bots")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "TIDINGS_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the dispatch engine and the health endpoint.
    Serve(Box<ServeArgs>),
    /// Create or upgrade the store schema, seed default groups, then exit.
    Init(InitArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct InitArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", env = "DATABASE_URL", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the maximum number of pooled connections.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Bot credentials for the messaging gateway.
    #[arg(long = "bot-token", env = "BOT_TOKEN", value_name = "TOKEN", hide_env_values = true)]
    pub bot_token: Option<String>,

    /// User id of the super-admin.
    #[arg(long = "admin-user-id", env = "ADMIN_USER_ID", value_name = "ID")]
    pub admin_user_id: Option<i64>,

    /// Override the health endpoint host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the health endpoint port.
    #[arg(long = "port", env = "PORT", value_name = "PORT")]
    pub port: Option<u16>,

    /// IANA time zone used to interpret schedules.
    #[arg(long = "timezone", value_name = "ZONE")]
    pub timezone: Option<String>,

    /// Directory holding template images.
    #[arg(long = "blobs-directory", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub blobs_directory: Option<PathBuf>,

    /// Override the log level filter.
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long = "log-json", value_parser = BoolishValueParser::new())]
    pub log_json: Option<bool>,
}
