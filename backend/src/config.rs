//! Configuration management.

use crate::mcp::channel::{DEFAULT_CAPACITY, DEFAULT_KEEPALIVE};
use crate::mcp::service::DEFAULT_SWEEP_INTERVAL;
use crate::mcp::session::{DEFAULT_EXPIRED_GRACE, DEFAULT_PENDING_GRACE};
use crate::mcp::{ChannelSettings, RegistrySettings};
use anyhow::{bail, Context};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration structure that matches the TOML file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    session: SessionConfigFile,
    #[serde(default)]
    resources: ResourcesConfig,
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    tls: TlsConfigFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionConfigFile {
    #[serde(default = "default_keepalive_secs")]
    keepalive_secs: u64,
    #[serde(default = "default_pending_grace_secs")]
    pending_grace_secs: u64,
    #[serde(default = "default_expired_grace_secs")]
    expired_grace_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    sweep_interval_secs: u64,
    #[serde(default = "default_channel_capacity")]
    channel_capacity: usize,
}

impl Default for SessionConfigFile {
    fn default() -> Self {
        Self {
            keepalive_secs: default_keepalive_secs(),
            pending_grace_secs: default_pending_grace_secs(),
            expired_grace_secs: default_expired_grace_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ResourcesConfig {
    /// Serve the files of this directory instead of the bundled sample catalog
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LoggingConfig {
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    log_file: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    /// If not set, uses RUST_LOG environment variable or defaults to "info"
    log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct TlsConfigFile {
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    sluice_types::DEFAULT_PORT
}

fn default_keepalive_secs() -> u64 {
    DEFAULT_KEEPALIVE.as_secs()
}

fn default_pending_grace_secs() -> u64 {
    DEFAULT_PENDING_GRACE.as_secs()
}

fn default_expired_grace_secs() -> u64 {
    DEFAULT_EXPIRED_GRACE.as_secs()
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}

fn default_channel_capacity() -> usize {
    DEFAULT_CAPACITY
}

/// Session timing and buffering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Interval between keepalive frames on each stream
    pub keepalive_interval: Duration,
    /// How long a session may wait for its first stream
    pub pending_grace: Duration,
    /// How long a session without a stream is kept for re-attach
    pub expired_grace: Duration,
    /// How often stale sessions are swept
    pub sweep_interval: Duration,
    /// Frames buffered per stream
    pub channel_capacity: usize,
}

impl SessionConfig {
    /// Registry settings derived from this configuration.
    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            pending_grace: self.pending_grace,
            expired_grace: self.expired_grace,
            channel: ChannelSettings {
                keepalive_interval: self.keepalive_interval,
                capacity: self.channel_capacity,
            },
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&SessionConfigFile::default())
    }
}

impl From<&SessionConfigFile> for SessionConfig {
    fn from(file: &SessionConfigFile) -> Self {
        Self {
            keepalive_interval: Duration::from_secs(file.keepalive_secs),
            pending_grace: Duration::from_secs(file.pending_grace_secs),
            expired_grace: Duration::from_secs(file.expired_grace_secs),
            sweep_interval: Duration::from_secs(file.sweep_interval_secs),
            channel_capacity: file.channel_capacity,
        }
    }
}

/// PEM certificate and key for HTTPS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Values given on the command line. They take precedence over everything else.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Extra TOML file merged above the discovered config files
    pub config_file: Option<PathBuf>,
    pub resources_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Allowed CORS origins (empty = any)
    pub cors_allowed_origins: Vec<String>,
    /// Session timing and buffering
    pub session: SessionConfig,
    /// Directory served as `file:///` resources (bundled catalog when unset)
    pub resources_dir: Option<PathBuf>,
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    pub log_file: Option<PathBuf>,
    /// Log level (if set, overrides RUST_LOG environment variable)
    pub log_level: Option<String>,
    /// HTTPS material; plain HTTP when unset
    pub tls: Option<TlsConfig>,
}

impl Config {
    /// Load configuration with full priority chain: CLI args > env vars > config files > defaults.
    ///
    /// Config files are searched in this order:
    /// 1. `config.toml` in user config directory (~/.config/sluice/ on Linux)
    /// 2. `.sluice.toml` in current directory
    /// 3. the file given with `--config`
    ///
    /// Environment variables use the `SLUICE_` prefix followed by the section
    /// name, e.g. `SLUICE_SERVER_PORT` or `SLUICE_SESSION_KEEPALIVE_SECS`.
    pub fn from_figment(overrides: &ConfigOverrides) -> anyhow::Result<Self> {
        // Find config file paths
        let local_config = std::env::current_dir()
            .ok()
            .map(|d| d.join(".sluice.toml"));
        let user_config = directories::ProjectDirs::from("", "", "sluice")
            .map(|dirs| dirs.config_dir().join("config.toml"));

        // Build figment with priority: defaults < user config < local config < env vars < CLI args
        let mut figment = Figment::new();

        // 1. Start with defaults
        figment = figment.merge(Serialized::defaults(ConfigFile::default()));

        // 2. Merge user config file if it exists
        if let Some(ref path) = user_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        // 3. Merge local config file if it exists
        if let Some(ref path) = local_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        // 4. Merge an explicitly requested config file, which must exist
        if let Some(ref path) = overrides.config_file {
            if !path.exists() {
                bail!("Config file {} does not exist", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }

        // 5. Merge environment variables (SLUICE_<SECTION>_<KEY>)
        figment = figment.merge(
            Env::prefixed("SLUICE_").map(|key| key.as_str().replacen('_', ".", 1).into()),
        );

        // 6. Merge CLI arguments (highest priority)
        if let Some(ref host) = overrides.host {
            figment = figment.merge(Serialized::default("server.host", host));
        }
        if let Some(port) = overrides.port {
            figment = figment.merge(Serialized::default("server.port", port));
        }
        if let Some(ref dir) = overrides.resources_dir {
            figment = figment.merge(Serialized::default("resources.directory", dir));
        }
        if let Some(ref level) = overrides.log_level {
            figment = figment.merge(Serialized::default("logging.log_level", level));
        }
        if let Some(ref file) = overrides.log_file {
            figment = figment.merge(Serialized::default("logging.log_file", file));
        }

        // Extract the configuration
        let config_file: ConfigFile = figment.extract().context("Invalid configuration")?;
        Self::from_file(config_file)
    }

    fn from_file(file: ConfigFile) -> anyhow::Result<Self> {
        if file.session.keepalive_secs == 0 {
            bail!("session.keepalive_secs must be greater than zero");
        }
        if file.session.sweep_interval_secs == 0 {
            bail!("session.sweep_interval_secs must be greater than zero");
        }
        if file.session.channel_capacity == 0 {
            bail!("session.channel_capacity must be greater than zero");
        }
        file.server
            .host
            .parse::<IpAddr>()
            .with_context(|| format!("server.host {:?} is not an IP address", file.server.host))?;

        let tls = match (file.tls.cert_path, file.tls.key_path) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path,
                key_path,
            }),
            (None, None) => None,
            _ => bail!("tls.cert_path and tls.key_path must be set together"),
        };

        Ok(Self {
            host: file.server.host,
            port: file.server.port,
            cors_allowed_origins: file.server.cors_allowed_origins,
            session: SessionConfig::from(&file.session),
            resources_dir: file.resources.directory,
            log_file: file.logging.log_file,
            log_level: file.logging.log_level,
            tls,
        })
    }

    /// Socket address to bind.
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("Invalid host address: {}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_allowed_origins: Vec::new(),
            session: SessionConfig::default(),
            resources_dir: None,
            log_file: None,
            log_level: None,
            tls: None,
        }
    }
}
