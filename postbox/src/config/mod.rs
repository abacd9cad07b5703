//! Configuration system for the `postbox` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/postbox/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use postbox_store::ChatId;

use crate::client::{ClientOptions, IncomingRoute};
use crate::delivery::DEFAULT_NOTICE_BUFFER;
use crate::transport::DEFAULT_INCOMING_BUFFER;
use crate::transport::socket::SocketConfig;

/// Endpoint used when nothing else is configured: a local `postbox-echo`.
pub const DEFAULT_ENDPOINT_URL: &str = "ws://127.0.0.1:9000/ws";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The endpoint is not a `ws://` or `wss://` URL.
    #[error("invalid endpoint URL {url:?}: {reason}")]
    InvalidEndpoint {
        /// The rejected value.
        url: String,
        /// What is wrong with it.
        reason: String,
    },

    /// `incoming_route` is neither `last-listed` nor a chat id.
    #[error("invalid incoming_route {0:?} (expected \"last-listed\" or a chat id)")]
    InvalidRoute(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    storage: StorageFileConfig,
    delivery: DeliveryFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    endpoint_url: Option<String>,
    connect_timeout_secs: Option<u64>,
    incoming_buffer: Option<usize>,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    database_path: Option<PathBuf>,
}

/// `[delivery]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct DeliveryFileConfig {
    sender_label: Option<String>,
    bot_label: Option<String>,
    notice_buffer: Option<usize>,
    incoming_route: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Network --
    /// WebSocket endpoint the transport connects to.
    pub endpoint_url: String,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Incoming payloads buffered before the read loop waits.
    pub incoming_buffer: usize,
    /// Start with the transport in simulated-offline mode.
    pub start_offline: bool,

    // -- Storage --
    /// SQLite database file.
    pub database_path: PathBuf,

    // -- Delivery --
    /// Sender recorded on outbound messages.
    pub sender_label: String,
    /// Sender recorded on incoming payloads.
    pub bot_label: String,
    /// Capacity of the notice channel.
    pub notice_buffer: usize,
    /// Chat incoming payloads are recorded in.
    pub incoming_route: IncomingRoute,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            incoming_buffer: DEFAULT_INCOMING_BUFFER,
            start_offline: false,
            database_path: default_database_path(),
            sender_label: "You".to_string(),
            bot_label: "Bot".to_string(),
            notice_buffer: DEFAULT_NOTICE_BUFFER,
            incoming_route: IncomingRoute::LastListed,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// CLI args and env vars are parsed via `clap`. If `--config` is given
    /// and the file does not exist, returns an error. If no `--config` is
    /// given, the default path (`~/.config/postbox/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or if the endpoint URL or incoming route is invalid.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. This is separated from `load()` to
    /// enable unit testing without CLI parsing.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let endpoint_url = cli
            .endpoint_url
            .clone()
            .or_else(|| file.network.endpoint_url.clone())
            .unwrap_or(defaults.endpoint_url);
        validate_endpoint(&endpoint_url)?;

        let incoming_route = file
            .delivery
            .incoming_route
            .as_deref()
            .map(parse_route)
            .transpose()?
            .unwrap_or(defaults.incoming_route);

        Ok(Self {
            endpoint_url,
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            incoming_buffer: file
                .network
                .incoming_buffer
                .unwrap_or(defaults.incoming_buffer),
            start_offline: cli.offline,
            database_path: cli
                .database
                .clone()
                .or_else(|| file.storage.database_path.clone())
                .unwrap_or(defaults.database_path),
            sender_label: file
                .delivery
                .sender_label
                .clone()
                .unwrap_or(defaults.sender_label),
            bot_label: file
                .delivery
                .bot_label
                .clone()
                .unwrap_or(defaults.bot_label),
            notice_buffer: file
                .delivery
                .notice_buffer
                .unwrap_or(defaults.notice_buffer),
            incoming_route,
        })
    }

    /// Connection parameters for the WebSocket transport.
    #[must_use]
    pub fn to_socket_config(&self) -> SocketConfig {
        SocketConfig {
            url: self.endpoint_url.clone(),
            connect_timeout: self.connect_timeout,
            incoming_buffer: self.incoming_buffer,
        }
    }

    /// Labels and policies for the chat client.
    #[must_use]
    pub fn to_client_options(&self) -> ClientOptions {
        ClientOptions {
            sender_label: self.sender_label.clone(),
            bot_label: self.bot_label.clone(),
            incoming_route: self.incoming_route,
            notice_buffer: self.notice_buffer,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Offline-tolerant chat client")]
pub struct CliArgs {
    /// WebSocket URL of the chat endpoint.
    #[arg(long, env = "POSTBOX_ENDPOINT")]
    pub endpoint_url: Option<String>,

    /// Path to the SQLite database (default: `<data dir>/postbox/postbox.db`).
    #[arg(long, env = "POSTBOX_DB")]
    pub database: Option<PathBuf>,

    /// Path to config file (default: `~/.config/postbox/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Start in simulated-offline mode: nothing touches the network.
    #[arg(long)]
    pub offline: bool,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "POSTBOX_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/postbox.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn default_database_path() -> PathBuf {
    dirs::data_dir().map_or_else(
        || PathBuf::from("postbox.db"),
        |dir| dir.join("postbox").join("postbox.db"),
    )
}

fn validate_endpoint(raw: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(raw).map_err(|e| ConfigError::InvalidEndpoint {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(ConfigError::InvalidEndpoint {
            url: raw.to_string(),
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}

fn parse_route(raw: &str) -> Result<IncomingRoute, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("last-listed") {
        return Ok(IncomingRoute::LastListed);
    }
    trimmed
        .parse::<ChatId>()
        .map(IncomingRoute::Fixed)
        .map_err(|_| ConfigError::InvalidRoute(raw.to_string()))
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("postbox").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
