//! Configuration module for tcp-oneshot.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::connection::DEFAULT_BUFFER_SIZE;
use crate::connector::ConnectorOptions;
use crate::endpoint::Endpoint;
use crate::listener::{ListenerOptions, DEFAULT_BACKLOG};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "tcp-oneshot")]
#[command(author = "tcp-oneshot authors")]
#[command(version = "0.1.0")]
#[command(about = "Exchange one request and one reply over a single TCP connection", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Which side of the exchange to run
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept one connection, store its request, answer with a reply file
    Listen(ListenArgs),
    /// Connect once, send a request file, store the reply
    Connect(ConnectArgs),
}

#[derive(Args, Debug, Default)]
pub struct ListenArgs {
    /// Address to bind to (e.g., 127.0.0.1:8080)
    #[arg(short = 'l', long)]
    pub listen: Option<Endpoint>,

    /// Pending connection queue length
    #[arg(long)]
    pub backlog: Option<u32>,

    /// Do not set SO_REUSEADDR before binding
    #[arg(long)]
    pub no_reuse_address: bool,

    /// File the received request is written to
    #[arg(long)]
    pub inbound: Option<PathBuf>,

    /// File the reply is read from
    #[arg(long)]
    pub outbound: Option<PathBuf>,

    /// Maximum bytes taken from the single read
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Give up waiting for a connection after this many milliseconds
    #[arg(long)]
    pub accept_timeout_ms: Option<u64>,

    /// Give up waiting for the request after this many milliseconds
    #[arg(long)]
    pub receive_timeout_ms: Option<u64>,
}

#[derive(Args, Debug, Default)]
pub struct ConnectArgs {
    /// Address to connect to (e.g., 127.0.0.1:8080)
    #[arg(short = 'c', long)]
    pub connect: Option<Endpoint>,

    /// File the request is read from
    #[arg(long)]
    pub outbound: Option<PathBuf>,

    /// File the received reply is written to
    #[arg(long)]
    pub inbound: Option<PathBuf>,

    /// Maximum bytes taken from the single read
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Give up connecting after this many milliseconds
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Give up waiting for the reply after this many milliseconds
    #[arg(long)]
    pub receive_timeout_ms: Option<u64>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener-side configuration
#[derive(Debug, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_endpoint")]
    pub listen: Endpoint,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    #[serde(default = "default_true")]
    pub reuse_address: bool,
    #[serde(default = "default_listener_inbound")]
    pub inbound: PathBuf,
    #[serde(default = "default_listener_outbound")]
    pub outbound: PathBuf,
    pub accept_timeout_ms: Option<u64>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            listen: default_endpoint(),
            backlog: default_backlog(),
            reuse_address: true,
            inbound: default_listener_inbound(),
            outbound: default_listener_outbound(),
            accept_timeout_ms: None,
        }
    }
}

/// Connector-side configuration
#[derive(Debug, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default = "default_endpoint")]
    pub connect: Endpoint,
    #[serde(default = "default_connector_outbound")]
    pub outbound: PathBuf,
    #[serde(default = "default_connector_inbound")]
    pub inbound: PathBuf,
    pub connect_timeout_ms: Option<u64>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connect: default_endpoint(),
            outbound: default_connector_outbound(),
            inbound: default_connector_inbound(),
            connect_timeout_ms: None,
        }
    }
}

/// Settings shared by both sides
#[derive(Debug, Deserialize)]
pub struct ExchangeConfig {
    /// Upper bound of each side's single read
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    pub receive_timeout_ms: Option<u64>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            receive_timeout_ms: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_endpoint() -> Endpoint {
    Endpoint::new("127.0.0.1", 8080)
}

fn default_backlog() -> u32 {
    DEFAULT_BACKLOG
}

fn default_true() -> bool {
    true
}

fn default_listener_inbound() -> PathBuf {
    PathBuf::from("serve_recv.txt")
}

fn default_listener_outbound() -> PathBuf {
    PathBuf::from("server_send.txt")
}

fn default_connector_outbound() -> PathBuf {
    PathBuf::from("client_send.txt")
}

fn default_connector_inbound() -> PathBuf {
    PathBuf::from("client_recv.txt")
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub mode: Mode,
}

/// Resolved settings for the side being run
#[derive(Debug, Clone)]
pub enum Mode {
    Listen(ListenConfig),
    Connect(ConnectConfig),
}

#[derive(Debug, Clone)]
pub struct ListenConfig {
    pub endpoint: Endpoint,
    pub inbound: PathBuf,
    pub outbound: PathBuf,
    pub options: ListenerOptions,
}

#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub endpoint: Endpoint,
    pub outbound: PathBuf,
    pub inbound: PathBuf,
    pub options: ConnectorOptions,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents =
                std::fs::read_to_string(config_path).map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let TomlConfig {
            listener,
            connector,
            exchange,
            logging,
        } = toml_config;

        let mode = match cli.command {
            Command::Listen(args) => Mode::Listen(ListenConfig {
                endpoint: args.listen.unwrap_or(listener.listen),
                inbound: args.inbound.unwrap_or(listener.inbound),
                outbound: args.outbound.unwrap_or(listener.outbound),
                options: ListenerOptions {
                    backlog: args.backlog.unwrap_or(listener.backlog),
                    reuse_address: !args.no_reuse_address && listener.reuse_address,
                    buffer_size: args.buffer_size.unwrap_or(exchange.buffer_size),
                    accept_timeout: millis(args.accept_timeout_ms.or(listener.accept_timeout_ms)),
                    receive_timeout: millis(
                        args.receive_timeout_ms.or(exchange.receive_timeout_ms),
                    ),
                },
            }),
            Command::Connect(args) => Mode::Connect(ConnectConfig {
                endpoint: args.connect.unwrap_or(connector.connect),
                outbound: args.outbound.unwrap_or(connector.outbound),
                inbound: args.inbound.unwrap_or(connector.inbound),
                options: ConnectorOptions {
                    buffer_size: args.buffer_size.unwrap_or(exchange.buffer_size),
                    connect_timeout: millis(
                        args.connect_timeout_ms.or(connector.connect_timeout_ms),
                    ),
                    receive_timeout: millis(
                        args.receive_timeout_ms.or(exchange.receive_timeout_ms),
                    ),
                },
            }),
        };

        let config = Config {
            log_level: cli.log_level.unwrap_or(logging.level),
            mode,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let buffer_size = match &self.mode {
            Mode::Listen(listen) => {
                if listen.options.backlog == 0 {
                    return Err(ConfigError::Invalid("backlog must be at least 1".into()));
                }
                listen.options.buffer_size
            }
            Mode::Connect(connect) => connect.options.buffer_size,
        };

        if buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Zero means "no timeout", same as leaving the value unset.
fn millis(value: Option<u64>) -> Option<Duration> {
    value.filter(|&ms| ms > 0).map(Duration::from_millis)
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn listen_cli(args: ListenArgs) -> CliArgs {
        CliArgs {
            config: None,
            log_level: None,
            command: Command::Listen(args),
        }
    }

    fn connect_cli(args: ConnectArgs) -> CliArgs {
        CliArgs {
            config: None,
            log_level: None,
            command: Command::Connect(args),
        }
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.listener.listen, Endpoint::new("127.0.0.1", 8080));
        assert_eq!(config.listener.backlog, 10);
        assert!(config.listener.reuse_address);
        assert_eq!(config.listener.inbound, PathBuf::from("serve_recv.txt"));
        assert_eq!(config.listener.outbound, PathBuf::from("server_send.txt"));
        assert_eq!(config.connector.outbound, PathBuf::from("client_send.txt"));
        assert_eq!(config.connector.inbound, PathBuf::from("client_recv.txt"));
        assert_eq!(config.exchange.buffer_size, 4096);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [listener]
            listen = "0.0.0.0:9000"
            backlog = 1
            reuse_address = false
            inbound = "/tmp/in.bin"
            accept_timeout_ms = 2500

            [connector]
            connect = "[::1]:9000"
            connect_timeout_ms = 100

            [exchange]
            buffer_size = 512
            receive_timeout_ms = 1000

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.listener.listen, Endpoint::new("0.0.0.0", 9000));
        assert_eq!(config.listener.backlog, 1);
        assert!(!config.listener.reuse_address);
        assert_eq!(config.listener.inbound, PathBuf::from("/tmp/in.bin"));
        assert_eq!(config.listener.outbound, PathBuf::from("server_send.txt"));
        assert_eq!(config.listener.accept_timeout_ms, Some(2500));
        assert_eq!(config.connector.connect, Endpoint::new("::1", 9000));
        assert_eq!(config.connector.connect_timeout_ms, Some(100));
        assert_eq!(config.exchange.buffer_size, 512);
        assert_eq!(config.exchange.receive_timeout_ms, Some(1000));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_toml_invalid_endpoint() {
        let result: Result<TomlConfig, _> = toml::from_str("[listener]\nlisten = \"nohost\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [listener]
            listen = "0.0.0.0:9000"
            backlog = 3

            [exchange]
            buffer_size = 512

            [logging]
            level = "warn"
        "#,
        )
        .unwrap();

        let cli = CliArgs {
            config: None,
            log_level: Some("trace".to_string()),
            command: Command::Listen(ListenArgs {
                listen: Some(Endpoint::new("127.0.0.1", 7000)),
                buffer_size: Some(64),
                no_reuse_address: true,
                ..ListenArgs::default()
            }),
        };

        let config = Config::merge(cli, toml_config).unwrap();
        assert_eq!(config.log_level, "trace");
        match config.mode {
            Mode::Listen(listen) => {
                assert_eq!(listen.endpoint, Endpoint::new("127.0.0.1", 7000));
                assert_eq!(listen.options.backlog, 3);
                assert_eq!(listen.options.buffer_size, 64);
                assert!(!listen.options.reuse_address);
                assert_eq!(listen.options.accept_timeout, None);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_connect_defaults() {
        let config = Config::from_cli(connect_cli(ConnectArgs::default())).unwrap();
        assert_eq!(config.log_level, "info");
        match config.mode {
            Mode::Connect(connect) => {
                assert_eq!(connect.endpoint, Endpoint::new("127.0.0.1", 8080));
                assert_eq!(connect.outbound, PathBuf::from("client_send.txt"));
                assert_eq!(connect.inbound, PathBuf::from("client_recv.txt"));
                assert_eq!(connect.options, ConnectorOptions::default());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_timeouts_resolved() {
        let config = Config::from_cli(connect_cli(ConnectArgs {
            connect_timeout_ms: Some(250),
            receive_timeout_ms: Some(0),
            ..ConnectArgs::default()
        }))
        .unwrap();

        match config.mode {
            Mode::Connect(connect) => {
                assert_eq!(
                    connect.options.connect_timeout,
                    Some(Duration::from_millis(250))
                );
                assert_eq!(connect.options.receive_timeout, None);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_buffer() {
        let err = Config::from_cli(listen_cli(ListenArgs {
            buffer_size: Some(0),
            ..ListenArgs::default()
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_zero_backlog() {
        let err = Config::from_cli(listen_cli(ListenArgs {
            backlog: Some(0),
            ..ListenArgs::default()
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_config_file_loaded() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[connector]\nconnect = \"localhost:9999\"").unwrap();

        let cli = CliArgs {
            config: Some(file.path().to_path_buf()),
            log_level: None,
            command: Command::Connect(ConnectArgs::default()),
        };
        match Config::from_cli(cli).unwrap().mode {
            Mode::Connect(connect) => {
                assert_eq!(connect.endpoint, Endpoint::new("localhost", 9999))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_config_file_errors() {
        let cli = CliArgs {
            config: Some(PathBuf::from("/nonexistent/tcp-oneshot.toml")),
            log_level: None,
            command: Command::Connect(ConnectArgs::default()),
        };
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::FileRead { .. })
        ));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[exchange]\nbuffer_size = \"big\"").unwrap();
        let cli = CliArgs {
            config: Some(file.path().to_path_buf()),
            log_level: None,
            command: Command::Connect(ConnectArgs::default()),
        };
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::TomlParse { .. })
        ));
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = CliArgs::try_parse_from([
            "tcp-oneshot",
            "--log-level",
            "debug",
            "listen",
            "-l",
            "127.0.0.1:0",
            "--buffer-size",
            "128",
            "--no-reuse-address",
        ])
        .unwrap();

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Listen(args) => {
                assert_eq!(args.listen, Some(Endpoint::new("127.0.0.1", 0)));
                assert_eq!(args.buffer_size, Some(128));
                assert!(args.no_reuse_address);
            }
            other => panic!("unexpected: {:?}", other),
        }

        assert!(CliArgs::try_parse_from(["tcp-oneshot", "connect", "-c", "nohost"]).is_err());
    }
}
