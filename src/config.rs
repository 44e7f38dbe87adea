//! Configuration management for repl-tunnel.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::api::ServerConfig;
use crate::cli::Args;
use crate::error::ReplTunnelError;
use crate::script::{EngineConfig, DEFAULT_MAX_CALL_DEPTH};

/// Smallest evaluation thread stack accepted, in KiB.
const MIN_STACK_SIZE_KIB: usize = 256;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerSection,
    /// Script engine limits.
    pub engine: EngineSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable graceful shutdown.
    pub graceful_shutdown: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            graceful_shutdown: true,
        }
    }
}

/// Script engine configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Nested script calls allowed before `RecursionError`.
    pub max_call_depth: usize,
    /// Stack size of the evaluation thread, in KiB. When unset it is
    /// derived from `max_call_depth`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_size_kib: Option<usize>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            stack_size_kib: None,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or filter directives.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("REPL_TUNNEL_HOST") {
            self.server.host = host;
        }

        if let Ok(port) = std::env::var("REPL_TUNNEL_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }

        if let Ok(level) = std::env::var("REPL_TUNNEL_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = args.host {
            self.server.host = host.to_string();
        }

        if let Some(port) = args.port {
            self.server.port = port;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }

        if let Some(depth) = args.max_call_depth {
            self.engine.max_call_depth = depth;
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match args.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };

        config.apply_env();
        config.apply_args(args);

        Ok(config)
    }

    /// Convert to ServerConfig for the API server.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.server.host.clone()))?;

        let mut server_config = ServerConfig::new(host.to_string(), self.server.port);
        if !self.server.graceful_shutdown {
            server_config = server_config.without_graceful_shutdown();
        }

        Ok(server_config)
    }

    /// Build the engine limits from the `engine` section.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        if self.engine.max_call_depth == 0 {
            return Err(ConfigError::InvalidEngine(
                "max_call_depth must be at least 1".to_string(),
            ));
        }

        let config = match self.engine.stack_size_kib {
            None => EngineConfig::for_call_depth(self.engine.max_call_depth),
            Some(kib) if kib < MIN_STACK_SIZE_KIB => {
                return Err(ConfigError::InvalidEngine(format!(
                    "stack_size_kib must be at least {}",
                    MIN_STACK_SIZE_KIB
                )));
            }
            Some(kib) => EngineConfig {
                max_call_depth: self.engine.max_call_depth,
                stack_size: kib.saturating_mul(1024),
            },
        };
        config.validate().map_err(ConfigError::InvalidEngine)?;

        Ok(config)
    }

    /// Get the tracing filter directives.
    ///
    /// A bare level such as `debug` is scoped to this crate; anything
    /// containing a directive separator is passed through unchanged.
    pub fn log_filter(&self) -> String {
        let level = self.logging.level.trim();
        if level.contains('=') || level.contains(',') {
            level.to_string()
        } else {
            format!("repl_tunnel={}", level)
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Invalid host address.
    InvalidHost(String),
    /// Engine limits out of range.
    InvalidEngine(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidHost(host) => write!(f, "invalid host address: {}", host),
            Self::InvalidEngine(reason) => write!(f, "invalid engine settings: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for ReplTunnelError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Io(e) => ReplTunnelError::Io(e),
            other => ReplTunnelError::Config(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert!(config.server.graceful_shutdown);
        assert_eq!(config.engine.max_call_depth, DEFAULT_MAX_CALL_DEPTH);
        assert_eq!(config.engine.stack_size_kib, None);
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "server": {
                "host": "0.0.0.0",
                "port": 4000
            },
            "engine": {
                "max_call_depth": 64
            }
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.engine.max_call_depth, 64);
        assert_eq!(config.engine.stack_size_kib, None);
    }

    #[test]
    fn test_config_partial_json() {
        let json = r#"{
            "server": {
                "port": 9000
            }
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.host, "127.0.0.1"); // Default
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_config_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();

        let result = Config::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        let args = Args {
            host: Some("192.168.1.1".parse().unwrap()),
            port: Some(5000),
            log_level: Some("debug".to_string()),
            max_call_depth: Some(32),
            ..Args::default()
        };

        config.apply_args(&args);

        assert_eq!(config.server.host, "192.168.1.1");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.engine.max_call_depth, 32);
    }

    #[test]
    fn test_unset_args_keep_file_values() {
        let mut config = Config::default();
        config.server.host = "10.0.0.1".to_string();
        config.server.port = 7000;

        config.apply_args(&Args::default());

        assert_eq!(config.server.host, "10.0.0.1");
        assert_eq!(config.server.port, 7000);
    }

    #[test]
    fn test_to_server_config() {
        let config = Config::default();
        let server_config = config.to_server_config().unwrap();

        assert_eq!(server_config.host, "127.0.0.1");
        assert_eq!(server_config.port, 8080);
        assert!(server_config.graceful_shutdown);
    }

    #[test]
    fn test_to_server_config_without_graceful_shutdown() {
        let mut config = Config::default();
        config.server.graceful_shutdown = false;

        assert!(!config.to_server_config().unwrap().graceful_shutdown);
    }

    #[test]
    fn test_invalid_host() {
        let mut config = Config::default();
        config.server.host = "not-an-ip".to_string();

        let result = config.to_server_config();
        assert!(matches!(result, Err(ConfigError::InvalidHost(_))));
    }

    #[test]
    fn test_engine_config() {
        let mut config = Config::default();
        config.engine.max_call_depth = 50;
        config.engine.stack_size_kib = Some(16 * 1024);

        let engine = config.engine_config().unwrap();
        assert_eq!(engine.max_call_depth, 50);
        assert_eq!(engine.stack_size, 16 * 1024 * 1024);
    }

    #[test]
    fn test_engine_stack_derived_from_depth() {
        let mut config = Config::default();
        assert_eq!(config.engine_config().unwrap(), EngineConfig::default());

        config.engine.max_call_depth = 2000;
        let engine = config.engine_config().unwrap();
        assert_eq!(engine.stack_size, EngineConfig::required_stack_size(2000));
    }

    #[test]
    fn test_engine_config_rejects_depth_stack_mismatch() {
        let mut config = Config::default();
        config.engine.max_call_depth = 100_000;
        config.engine.stack_size_kib = Some(1024);
        let err = config.engine_config().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEngine(ref m) if m.contains("cannot hold")));

        config.engine.stack_size_kib = None;
        let err = config.engine_config().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEngine(ref m) if m.contains("above the")));

        config.engine.max_call_depth = 10;
        config.engine.stack_size_kib = Some(4 * 1024 * 1024);
        assert!(config.engine_config().is_err());
    }

    #[test]
    fn test_engine_config_rejects_bad_limits() {
        let mut config = Config::default();
        config.engine.max_call_depth = 0;
        assert!(config.engine_config().is_err());

        let mut config = Config::default();
        config.engine.stack_size_kib = Some(4);
        assert!(config.engine_config().is_err());
    }

    #[test]
    fn test_log_filter() {
        let mut config = Config::default();
        assert_eq!(config.log_filter(), "repl_tunnel=info");

        config.logging.level = "tower_http=debug,repl_tunnel=trace".to_string();
        assert_eq!(config.log_filter(), "tower_http=debug,repl_tunnel=trace");
    }

    #[test]
    fn test_config_error_conversion() {
        let err: ReplTunnelError = ConfigError::InvalidHost("x".into()).into();
        assert!(matches!(err, ReplTunnelError::Config(ref m) if m.contains("invalid host")));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"host\""));
        assert!(json.contains("\"port\""));
        assert!(json.contains("\"max_call_depth\""));
    }
}
