//! Server configuration: TOML file + CLI overrides.

use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use vmgate_core::{VmError, VmResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub readiness: ReadinessSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Origins granted cross-origin access to the HTTP API.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Origins allowed to open a stream. Empty = any origin.
    #[serde(default)]
    pub stream_origins: Vec<String>,
    #[serde(default = "default_ws_buffer")]
    pub ws_read_buffer: usize,
    #[serde(default = "default_ws_buffer")]
    pub ws_write_buffer: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            allowed_origins: default_allowed_origins(),
            stream_origins: Vec::new(),
            ws_read_buffer: default_ws_buffer(),
            ws_write_buffer: default_ws_buffer(),
        }
    }
}

/// `[runtime]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeSection {
    #[serde(default = "default_docker")]
    pub docker: String,
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_network")]
    pub network: String,
    /// Pause between create and the running-state check.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Bound for docker calls other than `run`.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            docker: default_docker(),
            image: default_image(),
            network: default_network(),
            settle_ms: default_settle_ms(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

/// `[readiness]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadinessSection {
    #[serde(default = "default_service_port")]
    pub service_port: u16,
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub resolve_interval_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_probe_deadline_ms")]
    pub probe_deadline_ms: u64,
}

impl Default for ReadinessSection {
    fn default() -> Self {
        Self {
            service_port: default_service_port(),
            resolve_timeout_ms: default_resolve_timeout_ms(),
            resolve_interval_ms: default_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            probe_interval_ms: default_interval_ms(),
            probe_deadline_ms: default_probe_deadline_ms(),
        }
    }
}

fn default_port() -> u16 {
    8080
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:8080".to_string(),
    ]
}
fn default_ws_buffer() -> usize {
    32 * 1024
}
fn default_docker() -> String {
    "docker".to_string()
}
fn default_image() -> String {
    "platform-vm:latest".to_string()
}
fn default_network() -> String {
    "platform_default".to_string()
}
fn default_settle_ms() -> u64 {
    300
}
fn default_command_timeout_ms() -> u64 {
    30_000
}
fn default_service_port() -> u16 {
    5901
}
fn default_resolve_timeout_ms() -> u64 {
    10_000
}
fn default_interval_ms() -> u64 {
    500
}
fn default_connect_timeout_ms() -> u64 {
    1_000
}
fn default_probe_deadline_ms() -> u64 {
    20_000
}

/// Timing and port settings for the readiness gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessConfig {
    pub service_port: u16,
    pub resolve_timeout: Duration,
    pub resolve_interval: Duration,
    pub connect_timeout: Duration,
    pub probe_interval: Duration,
    pub probe_deadline: Duration,
}

impl From<&ReadinessSection> for ReadinessConfig {
    fn from(s: &ReadinessSection) -> Self {
        Self {
            service_port: s.service_port,
            resolve_timeout: Duration::from_millis(s.resolve_timeout_ms),
            resolve_interval: Duration::from_millis(s.resolve_interval_ms),
            connect_timeout: Duration::from_millis(s.connect_timeout_ms),
            probe_interval: Duration::from_millis(s.probe_interval_ms),
            probe_deadline: Duration::from_millis(s.probe_deadline_ms),
        }
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self::from(&ReadinessSection::default())
    }
}

/// Values given on the command line; `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub image: Option<String>,
    pub network: Option<String>,
    pub allowed_origins: Vec<String>,
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: IpAddr,
    /// CORS allow list for the HTTP API.
    pub allowed_origins: Vec<String>,
    /// Origins allowed to open a stream. Empty = any origin.
    pub stream_origins: Vec<String>,
    pub ws_read_buffer: usize,
    pub ws_write_buffer: usize,
    pub docker: String,
    pub image: String,
    pub network: String,
    pub settle: Duration,
    pub command_timeout: Duration,
    pub readiness: ReadinessConfig,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: CliOverrides) -> VmResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse_config(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::from_parts(file_config, cli)
    }

    /// Merge a parsed file with CLI overrides.
    pub fn from_parts(file: ConfigFile, cli: CliOverrides) -> VmResult<Self> {
        let bind_str = cli.bind.unwrap_or(file.server.bind);
        let bind: IpAddr = bind_str
            .parse()
            .map_err(|e| VmError::Other(format!("invalid bind address {bind_str:?}: {e}")))?;

        let allowed_origins = if cli.allowed_origins.is_empty() {
            file.server.allowed_origins
        } else {
            cli.allowed_origins
        };

        Ok(Self {
            port: cli.port.unwrap_or(file.server.port),
            bind,
            allowed_origins,
            stream_origins: file.server.stream_origins,
            ws_read_buffer: file.server.ws_read_buffer,
            ws_write_buffer: file.server.ws_write_buffer,
            docker: file.runtime.docker,
            image: cli.image.unwrap_or(file.runtime.image),
            network: cli.network.unwrap_or(file.runtime.network),
            settle: Duration::from_millis(file.runtime.settle_ms),
            command_timeout: Duration::from_millis(file.runtime.command_timeout_ms),
            readiness: ReadinessConfig::from(&file.readiness),
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: IpAddr::from([0, 0, 0, 0]),
            allowed_origins: default_allowed_origins(),
            stream_origins: Vec::new(),
            ws_read_buffer: default_ws_buffer(),
            ws_write_buffer: default_ws_buffer(),
            docker: default_docker(),
            image: default_image(),
            network: default_network(),
            settle: Duration::from_millis(default_settle_ms()),
            command_timeout: Duration::from_millis(default_command_timeout_ms()),
            readiness: ReadinessConfig::default(),
        }
    }
}

fn parse_config(content: &str) -> VmResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| VmError::Other(format!("config parse error: {e}")))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
