//! Configuration for the Tally server.
//!
//! Values come from command-line flags or environment variables, then an
//! optional YAML/JSON file, then built-in defaults, in that order.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tally_core::config::{humanized, load_file, parse_duration};
use tally_core::{ConfigError, TrustedSubnet};

/// Command-line arguments
#[derive(Debug, Default, Parser)]
#[command(name = "tally-server")]
#[command(about = "Tally - metrics collection server")]
#[command(version)]
pub struct ServerArgs {
    /// HTTP listen address
    #[arg(short, long, env = "ADDRESS")]
    pub address: Option<String>,

    /// RPC listen address (RPC disabled when unset)
    #[arg(long, env = "RPC_ADDRESS")]
    pub rpc_address: Option<String>,

    /// Flush interval, `0` saves after every write
    #[arg(short = 'i', long, env = "STORE_INTERVAL", value_parser = parse_duration)]
    pub store_interval: Option<Duration>,

    /// Snapshot file, empty disables file persistence
    #[arg(short = 'f', long, env = "STORE_FILE")]
    pub store_file: Option<PathBuf>,

    /// Restore the last snapshot on startup
    #[arg(short, long, env = "RESTORE")]
    pub restore: Option<bool>,

    /// HMAC key for integrity checks
    #[arg(short, long, env = "KEY")]
    pub key: Option<String>,

    /// Database DSN, takes precedence over the snapshot file
    #[arg(short, long, env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// PEM private key used to decrypt request bodies
    #[arg(long, env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// CIDR block allowed to submit metrics
    #[arg(short, long, env = "TRUSTED_SUBNET")]
    pub trusted_subnet: Option<String>,

    /// Configuration file (YAML or JSON)
    #[arg(short, long, env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Configuration file contents; every field is optional
#[derive(Debug, Default, Deserialize)]
pub struct ServerFile {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub rpc_address: Option<String>,
    #[serde(default, with = "humanized")]
    pub store_interval: Option<Duration>,
    #[serde(default)]
    pub store_file: Option<PathBuf>,
    #[serde(default)]
    pub restore: Option<bool>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub database_dsn: Option<String>,
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,
    #[serde(default)]
    pub trusted_subnet: Option<String>,
    #[serde(default)]
    pub log_level: Option<String>,
}

/// Resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    pub rpc_address: Option<String>,
    pub store_interval: Duration,
    pub store_file: Option<PathBuf>,
    pub restore: bool,
    pub key: String,
    pub database_dsn: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub trusted_subnet: Option<TrustedSubnet>,
    pub log_level: String,
}

fn default_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_store_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_store_file() -> PathBuf {
    PathBuf::from("/tmp/devops-metrics-db.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            rpc_address: None,
            store_interval: default_store_interval(),
            store_file: Some(default_store_file()),
            restore: true,
            key: String::new(),
            database_dsn: None,
            crypto_key: None,
            trusted_subnet: None,
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// Merge flags/env over the optional file over defaults
    pub fn resolve(args: ServerArgs) -> Result<Self, ConfigError> {
        let file: ServerFile = match &args.config {
            Some(path) => load_file(path)?,
            None => ServerFile::default(),
        };
        Self::merge(args, file)
    }

    fn merge(args: ServerArgs, file: ServerFile) -> Result<Self, ConfigError> {
        let trusted_subnet = args
            .trusted_subnet
            .or(file.trusted_subnet)
            .filter(|s| !s.trim().is_empty())
            .map(|s| TrustedSubnet::parse(&s))
            .transpose()?;

        Ok(Self {
            address: args.address.or(file.address).unwrap_or_else(default_address),
            rpc_address: args.rpc_address.or(file.rpc_address).filter(|a| !a.is_empty()),
            store_interval: args
                .store_interval
                .or(file.store_interval)
                .unwrap_or_else(default_store_interval),
            store_file: match args.store_file.or(file.store_file) {
                Some(path) if path.as_os_str().is_empty() => None,
                Some(path) => Some(path),
                None => Some(default_store_file()),
            },
            restore: args.restore.or(file.restore).unwrap_or(true),
            key: args.key.or(file.key).unwrap_or_default(),
            database_dsn: args.database_dsn.or(file.database_dsn).filter(|d| !d.is_empty()),
            crypto_key: args
                .crypto_key
                .or(file.crypto_key)
                .filter(|p| !p.as_os_str().is_empty()),
            trusted_subnet,
            log_level: args
                .log_level
                .or(file.log_level)
                .unwrap_or_else(default_log_level),
        })
    }

    /// Whether every write is followed by a synchronous save
    pub fn sync_flush(&self) -> bool {
        self.store_interval.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::resolve(ServerArgs::default()).unwrap();
        assert_eq!(config.address, "127.0.0.1:8080");
        assert_eq!(config.store_interval, Duration::from_secs(300));
        assert_eq!(
            config.store_file,
            Some(PathBuf::from("/tmp/devops-metrics-db.json"))
        );
        assert!(config.restore);
        assert!(config.key.is_empty());
        assert!(config.trusted_subnet.is_none());
        assert!(!config.sync_flush());
    }

    #[test]
    fn test_flags_parse() {
        let args = ServerArgs::try_parse_from([
            "tally-server",
            "-a",
            "0.0.0.0:9000",
            "-i",
            "0",
            "-r",
            "false",
            "-k",
            "secret",
            "-t",
            "10.0.0.0/8",
        ])
        .unwrap();
        let config = ServerConfig::resolve(args).unwrap();
        assert_eq!(config.address, "0.0.0.0:9000");
        assert!(config.sync_flush());
        assert!(!config.restore);
        assert_eq!(config.key, "secret");
        assert_eq!(config.trusted_subnet.unwrap().to_string(), "10.0.0.0/8");
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"address": "localhost:7000", "store_interval": "1s", "store_file": "", "database_dsn": "postgres://db", "restore": false}}"#
        )
        .unwrap();

        let args = ServerArgs {
            address: Some("localhost:8000".to_string()),
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let config = ServerConfig::resolve(args).unwrap();
        assert_eq!(config.address, "localhost:8000");
        assert_eq!(config.store_interval, Duration::from_secs(1));
        assert!(config.store_file.is_none());
        assert_eq!(config.database_dsn.as_deref(), Some("postgres://db"));
        assert!(!config.restore);
    }

    #[test]
    fn test_invalid_subnet_rejected() {
        let args = ServerArgs {
            trusted_subnet: Some("not-a-subnet".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            ServerConfig::resolve(args),
            Err(ConfigError::Subnet(_))
        ));
    }
}
