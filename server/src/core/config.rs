use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::cli::CliConfig;
use super::constants::DEFAULT_CLOSE_TIMEOUT_SECS;
use crate::bus::{DEFAULT_SUBJECT_BUFFER, DEFAULT_SUBSCRIPTION_BUFFER};

// =============================================================================
// Log Profile Enum
// =============================================================================

/// Log output profile: format and default verbosity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogEnv {
    /// Compact text at debug level
    #[default]
    Local,
    /// JSON at debug level
    Dev,
    /// JSON at info level
    Prod,
}

impl fmt::Display for LogEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogEnv::Local => write!(f, "local"),
            LogEnv::Dev => write!(f, "dev"),
            LogEnv::Prod => write!(f, "prod"),
        }
    }
}

// =============================================================================
// File Config Structs (JSON deserialization)
// =============================================================================

/// Log configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct LogFileConfig {
    pub env: Option<LogEnv>,
    /// Directory for timestamped log files; stdout when absent
    pub file: Option<String>,
}

/// gRPC listener configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct GrpcFileConfig {
    pub addr: Option<String>,
    pub port: Option<u16>,
}

/// Bus configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct SubPubFileConfig {
    pub subject_buffer: Option<usize>,
    pub subscription_buffer: Option<usize>,
    pub close_timeout_secs: Option<u64>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub log: Option<LogFileConfig>,
    pub grpc: Option<GrpcFileConfig>,
    pub sub_pub: Option<SubPubFileConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }
}

// =============================================================================
// Runtime Config Structs (final merged configuration)
// =============================================================================

/// gRPC listener configuration
#[derive(Debug, Clone)]
pub struct GrpcConfig {
    pub addr: String,
    pub port: u16,
}

/// Bus queue and shutdown configuration
#[derive(Debug, Clone)]
pub struct SubPubConfig {
    pub subject_buffer: usize,
    pub subscription_buffer: usize,
    pub close_timeout: Duration,
}

/// Log configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub env: LogEnv,
    pub file: Option<String>,
}

/// Final merged application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub grpc: GrpcConfig,
    pub sub_pub: SubPubConfig,
    pub log: LogConfig,
}

impl AppConfig {
    /// Load configuration from the file named by `--config` or
    /// `CONFIG_PATH`, then apply CLI/env overrides on top.
    pub fn load(cli: &CliConfig) -> Result<Self> {
        let path = cli.config.as_ref().ok_or_else(|| {
            anyhow::anyhow!("No config file: pass --config or set CONFIG_PATH")
        })?;

        let file_config = FileConfig::load_from_file(path)?;
        file_config.warn_unknown_fields();

        let file_log = file_config.log.unwrap_or_default();
        let file_grpc = file_config.grpc.unwrap_or_default();
        let file_sub_pub = file_config.sub_pub.unwrap_or_default();

        let addr = cli.addr.clone().or(file_grpc.addr).unwrap_or_default();
        let port = cli.port.or(file_grpc.port).unwrap_or(0);
        let log_env = cli.log_env.or(file_log.env).unwrap_or_default();

        let config = Self {
            grpc: GrpcConfig { addr, port },
            sub_pub: SubPubConfig {
                subject_buffer: file_sub_pub
                    .subject_buffer
                    .filter(|&n| n > 0)
                    .unwrap_or(DEFAULT_SUBJECT_BUFFER),
                subscription_buffer: file_sub_pub
                    .subscription_buffer
                    .filter(|&n| n > 0)
                    .unwrap_or(DEFAULT_SUBSCRIPTION_BUFFER),
                close_timeout: Duration::from_secs(
                    file_sub_pub
                        .close_timeout_secs
                        .unwrap_or(DEFAULT_CLOSE_TIMEOUT_SECS),
                ),
            },
            log: LogConfig {
                env: log_env,
                file: file_log.file,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and correctness
    fn validate(&self) -> Result<()> {
        if self.grpc.addr.is_empty() {
            anyhow::bail!("Configuration error: grpc.addr must not be empty");
        }
        if self.grpc.port == 0 {
            anyhow::bail!("Configuration error: grpc.port must be greater than 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;
    use std::path::PathBuf;

    fn cli_with_config(path: PathBuf) -> CliConfig {
        CliConfig {
            config: Some(path),
            addr: None,
            port: None,
            log_env: None,
        }
    }

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn load_full_config() {
        let (_dir, path) = write_config(
            r#"{
                "log": { "env": "prod" },
                "grpc": { "addr": "0.0.0.0", "port": 8082 },
                "sub_pub": {
                    "subject_buffer": 32,
                    "subscription_buffer": 128,
                    "close_timeout_secs": 10
                }
            }"#,
        );

        let config = AppConfig::load(&cli_with_config(path)).unwrap();
        assert_eq!(config.grpc.addr, "0.0.0.0");
        assert_eq!(config.grpc.port, 8082);
        assert_eq!(config.log.env, LogEnv::Prod);
        assert_eq!(config.sub_pub.subject_buffer, 32);
        assert_eq!(config.sub_pub.subscription_buffer, 128);
        assert_eq!(config.sub_pub.close_timeout, Duration::from_secs(10));
    }

    #[test]
    fn buffer_defaults_apply() {
        let (_dir, path) = write_config(
            r#"{ "grpc": { "addr": "127.0.0.1", "port": 8082 } }"#,
        );

        let config = AppConfig::load(&cli_with_config(path)).unwrap();
        assert_eq!(config.sub_pub.subject_buffer, DEFAULT_SUBJECT_BUFFER);
        assert_eq!(
            config.sub_pub.subscription_buffer,
            DEFAULT_SUBSCRIPTION_BUFFER
        );
        assert_eq!(
            config.sub_pub.close_timeout,
            Duration::from_secs(DEFAULT_CLOSE_TIMEOUT_SECS)
        );
        assert_eq!(config.log.env, LogEnv::Local);
    }

    #[test]
    fn zero_buffers_fall_back_to_defaults() {
        let (_dir, path) = write_config(
            r#"{
                "grpc": { "addr": "127.0.0.1", "port": 8082 },
                "sub_pub": { "subject_buffer": 0, "subscription_buffer": 0 }
            }"#,
        );

        let config = AppConfig::load(&cli_with_config(path)).unwrap();
        assert_eq!(config.sub_pub.subject_buffer, DEFAULT_SUBJECT_BUFFER);
        assert_eq!(
            config.sub_pub.subscription_buffer,
            DEFAULT_SUBSCRIPTION_BUFFER
        );
    }

    #[test]
    fn cli_overrides_file() {
        let (_dir, path) = write_config(
            r#"{ "grpc": { "addr": "127.0.0.1", "port": 8082 } }"#,
        );

        let cli = CliConfig {
            config: Some(path),
            addr: Some("0.0.0.0".to_string()),
            port: Some(9000),
            log_env: Some(LogEnv::Dev),
        };

        let config = AppConfig::load(&cli).unwrap();
        assert_eq!(config.grpc.addr, "0.0.0.0");
        assert_eq!(config.grpc.port, 9000);
        assert_eq!(config.log.env, LogEnv::Dev);
    }

    #[test]
    fn missing_config_path_is_fatal() {
        let cli = CliConfig {
            config: None,
            addr: None,
            port: None,
            log_env: None,
        };
        assert!(AppConfig::load(&cli).is_err());
    }

    #[test]
    fn missing_port_is_rejected() {
        let (_dir, path) = write_config(r#"{ "grpc": { "addr": "127.0.0.1" } }"#);
        assert!(AppConfig::load(&cli_with_config(path)).is_err());
    }

    #[test]
    fn malformed_json_is_rejected() {
        let (_dir, path) = write_config("not json");
        assert!(AppConfig::load(&cli_with_config(path)).is_err());
    }
}
