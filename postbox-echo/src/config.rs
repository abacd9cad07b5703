//! Settings for the echo endpoint.
//!
//! Three knobs matter: where to listen, how large a frame may be before it
//! is dropped instead of echoed, and whether a client hears its own frames
//! back (the hosted echo channel does, so the default is yes).
//!
//! Values come from, highest priority first: CLI flags, `ECHO_*`
//! environment variables, `~/.config/postbox-echo/config.toml`, built-in
//! defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Default listen address; matches the client's default endpoint port.
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9000";

/// Default frame size limit in bytes (64 KiB).
const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Why the echo endpoint's settings could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The settings file named on the command line (or found in the config
    /// directory) could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The listen address is not `host:port` with a numeric host.
    #[error("invalid bind address {addr:?}: {reason}")]
    InvalidBindAddr { addr: String, reason: String },

    /// A zero limit would drop every frame.
    #[error("max_payload_size must be at least 1 byte")]
    ZeroPayloadLimit,
}

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct EchoConfigFile {
    server: ServerSection,
}

/// `[server]` table.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerSection {
    bind_addr: Option<String>,
    max_payload_size: Option<usize>,
    notify_self: Option<bool>,
}

/// Command line of `postbox-echo`.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Local WebSocket echo endpoint for Postbox clients")]
pub struct EchoCliArgs {
    /// Listen address, e.g. `127.0.0.1:9000`.
    #[arg(short, long, env = "ECHO_ADDR")]
    pub bind: Option<String>,

    /// Settings file to read instead of the one in the config directory.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Frames above this many bytes are dropped rather than echoed.
    #[arg(long, env = "ECHO_MAX_PAYLOAD")]
    pub max_payload_size: Option<usize>,

    /// Do not echo a frame back to the client that sent it; only the other
    /// connected clients receive it.
    #[arg(long)]
    pub no_echo_self: bool,

    /// Log filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "ECHO_LOG")]
    pub log_level: String,
}

/// Settings the server runs with.
#[derive(Debug, Clone)]
pub struct EchoConfig {
    /// Address the listener binds to.
    pub bind_addr: String,
    pub max_payload_size: usize,
    /// Whether a client receives its own frames.
    pub notify_self: bool,
    pub log_level: String,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            notify_self: true,
            log_level: "info".to_string(),
        }
    }
}

impl EchoConfig {
    /// Merge the command line with the settings file and check the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the settings file cannot be read or
    /// parsed, or if the merged values are unusable.
    pub fn load(cli: &EchoCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    fn resolve(cli: &EchoCliArgs, file: &EchoConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind_addr = cli
            .bind
            .clone()
            .or_else(|| file.server.bind_addr.clone())
            .unwrap_or(defaults.bind_addr);
        if let Err(e) = bind_addr.parse::<SocketAddr>() {
            return Err(ConfigError::InvalidBindAddr {
                addr: bind_addr,
                reason: e.to_string(),
            });
        }

        let max_payload_size = cli
            .max_payload_size
            .or(file.server.max_payload_size)
            .unwrap_or(defaults.max_payload_size);
        if max_payload_size == 0 {
            return Err(ConfigError::ZeroPayloadLimit);
        }

        // The flag can only switch self-echo off.
        let notify_self =
            !cli.no_echo_self && file.server.notify_self.unwrap_or(defaults.notify_self);

        Ok(Self {
            bind_addr,
            max_payload_size,
            notify_self,
            log_level: cli.log_level.clone(),
        })
    }
}

fn load_config_file(explicit_path: Option<&Path>) -> Result<EchoConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(EchoConfigFile::default());
    };
    let path = config_dir.join("postbox-echo").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EchoConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
