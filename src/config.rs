//! Configuration for the benchmark server and client binaries.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

/// How the server handles its connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Event-driven dispatch over epoll.
    Epoll,
    /// Event-driven dispatch over kqueue.
    Kqueue,
    /// Event-driven dispatch over poll(2).
    Poll,
    /// Event-driven dispatch over select(2).
    Select,
    /// One serve loop per connection on the worker pool.
    Threads,
}

/// Command-line arguments for the benchmark server
#[derive(Parser, Debug, Default)]
#[command(name = "evbench-server")]
#[command(version = "0.1.0")]
#[command(about = "Request/response benchmark server", long_about = None)]
pub struct ServerCliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:32000)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Event mechanism or thread-per-connection mode
    #[arg(short, long, value_enum)]
    pub mode: Option<ServerMode>,

    /// Number of worker threads in the pool
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of queued jobs in the pool
    #[arg(short = 'q', long)]
    pub max_queue: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Command-line arguments for the load-driving client
#[derive(Parser, Debug, Default)]
#[command(name = "evbench-client")]
#[command(version = "0.1.0")]
#[command(about = "Request/response benchmark load driver", long_about = None)]
pub struct ClientCliArgs {
    /// Path to TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Server host to connect to
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Response size to request, in bytes
    #[arg(short = 's', long)]
    pub message_size: Option<u32>,

    /// Requests to issue per connection
    #[arg(short = 'c', long)]
    pub message_count: Option<u64>,

    /// Number of concurrent connections
    #[arg(short = 'x', long)]
    pub clients: Option<usize>,

    /// Per-window timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<f64>,

    /// Messages batched into one timed record
    #[arg(long)]
    pub messages_per_record: Option<u64>,

    /// Results CSV path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// `[server]` section
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    pub mode: Option<ServerMode>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_queue")]
    pub max_queue: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            mode: None,
            workers: default_workers(),
            max_queue: default_max_queue(),
        }
    }
}

/// `[client]` section
#[derive(Debug, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_message_size")]
    pub message_size: u32,
    #[serde(default = "default_message_count")]
    pub message_count: u64,
    #[serde(default = "default_clients")]
    pub clients: usize,
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    #[serde(default = "default_messages_per_record")]
    pub messages_per_record: u64,
    #[serde(default = "default_output")]
    pub output: PathBuf,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            message_size: default_message_size(),
            message_count: default_message_count(),
            clients: default_clients(),
            timeout: default_timeout(),
            messages_per_record: default_messages_per_record(),
            output: default_output(),
        }
    }
}

/// `[logging]` section
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:32000".to_string()
}

fn default_workers() -> usize {
    16
}

fn default_max_queue() -> usize {
    4096
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    32000
}

fn default_message_size() -> u32 {
    1024
}

fn default_message_count() -> u64 {
    250
}

fn default_clients() -> usize {
    250
}

fn default_timeout() -> f64 {
    3.0
}

fn default_messages_per_record() -> u64 {
    1
}

fn default_output() -> PathBuf {
    PathBuf::from("response_times.csv")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    pub mode: ServerMode,
    pub workers: usize,
    pub max_queue: usize,
    pub log_level: String,
}

impl ServerConfig {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = ServerCliArgs::parse();
        let toml_config = read_toml(cli.config.as_deref())?;
        Self::resolve(cli, toml_config)
    }

    fn resolve(cli: ServerCliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let mode = cli
            .mode
            .or(toml_config.server.mode)
            .ok_or(ConfigError::MissingMode)?;

        Ok(ServerConfig {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            mode,
            workers: cli.workers.unwrap_or(toml_config.server.workers),
            max_queue: cli.max_queue.unwrap_or(toml_config.server.max_queue),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Final resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub message_size: u32,
    pub message_count: u64,
    pub clients: usize,
    pub timeout: f64,
    pub messages_per_record: u64,
    pub output: PathBuf,
    pub log_level: String,
}

impl ClientConfig {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = ClientCliArgs::parse();
        let toml_config = read_toml(cli.config.as_deref())?;
        Ok(Self::resolve(cli, toml_config))
    }

    fn resolve(cli: ClientCliArgs, toml_config: TomlConfig) -> Self {
        let section = toml_config.client;
        ClientConfig {
            host: cli.host.unwrap_or(section.host),
            port: cli.port.unwrap_or(section.port),
            message_size: cli.message_size.unwrap_or(section.message_size),
            message_count: cli.message_count.unwrap_or(section.message_count),
            clients: cli.clients.unwrap_or(section.clients),
            timeout: cli.timeout.unwrap_or(section.timeout),
            messages_per_record: cli
                .messages_per_record
                .unwrap_or(section.messages_per_record),
            output: cli.output.unwrap_or(section.output),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }
}

fn read_toml(path: Option<&std::path::Path>) -> Result<TomlConfig, ConfigError> {
    match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
            toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
        }
        None => Ok(TomlConfig::default()),
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    /// No server mode on the command line or in the config file.
    MissingMode,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::MissingMode => {
                write!(
                    f,
                    "No server mode given: pass --mode epoll|kqueue|poll|select|threads"
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sections() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0:32000");
        assert_eq!(config.server.workers, 16);
        assert_eq!(config.server.max_queue, 4096);
        assert_eq!(config.client.port, 32000);
        assert_eq!(config.client.message_size, 1024);
        assert_eq!(config.client.clients, 250);
        assert_eq!(config.client.timeout, 3.0);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:9000"
            mode = "select"
            workers = 4
            max_queue = 64

            [client]
            host = "bench-box"
            message_count = 1000

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.server.mode, Some(ServerMode::Select));
        assert_eq!(config.server.workers, 4);
        assert_eq!(config.client.host, "bench-box");
        assert_eq!(config.client.message_count, 1000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            mode = "poll"
            workers = 8
        "#,
        )
        .unwrap();

        let cli =
            ServerCliArgs::try_parse_from(["evbench-server", "--mode", "epoll", "-w", "2"])
                .unwrap();
        let config = ServerConfig::resolve(cli, toml_config).unwrap();
        assert_eq!(config.mode, ServerMode::Epoll);
        assert_eq!(config.workers, 2);
        assert_eq!(config.max_queue, 4096);
    }

    #[test]
    fn test_missing_mode_is_an_error() {
        let cli = ServerCliArgs::try_parse_from(["evbench-server"]).unwrap();
        let err = ServerConfig::resolve(cli, TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingMode));
    }

    #[test]
    fn test_read_toml_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.toml");
        std::fs::write(&path, "[server]\nmode = \"threads\"\nworkers = 2\n").unwrap();

        let config = read_toml(Some(&path)).unwrap();
        assert_eq!(config.server.mode, Some(ServerMode::Threads));
        assert_eq!(config.server.workers, 2);

        let err = read_toml(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(..)));
    }

    #[test]
    fn test_client_resolution_defaults() {
        let cli = ClientCliArgs::try_parse_from(["evbench-client", "-x", "8"]).unwrap();
        let config = ClientConfig::resolve(cli, TomlConfig::default());
        assert_eq!(config.clients, 8);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.message_count, 250);
        assert_eq!(config.output, PathBuf::from("response_times.csv"));
    }
}
