//! Configuration for the Tally agent.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tally_core::config::{humanized, load_file, parse_duration};
use tally_core::ConfigError;

/// How reports reach the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// JSON batches over HTTP
    #[default]
    Http,
    /// Binary framed RPC
    Rpc,
}

/// Command-line arguments
#[derive(Debug, Default, Parser)]
#[command(name = "tally-agent")]
#[command(about = "Tally - metrics collection agent")]
#[command(version)]
pub struct AgentArgs {
    /// Server address (host:port, or a full URL for HTTP)
    #[arg(short, long, env = "ADDRESS")]
    pub address: Option<String>,

    /// Transport used to reach the server
    #[arg(long, env = "TRANSPORT", value_enum)]
    pub transport: Option<TransportKind>,

    /// Interval between two samples
    #[arg(short, long, env = "POLL_INTERVAL", value_parser = parse_duration)]
    pub poll_interval: Option<Duration>,

    /// Interval between two reports
    #[arg(short, long, env = "REPORT_INTERVAL", value_parser = parse_duration)]
    pub report_interval: Option<Duration>,

    /// HMAC key used to sign every record
    #[arg(short, long, env = "KEY")]
    pub key: Option<String>,

    /// PEM public key used to encrypt HTTP bodies
    #[arg(long, env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// Configuration file (YAML or JSON)
    #[arg(short, long, env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Configuration file contents; every field is optional
#[derive(Debug, Default, Deserialize)]
pub struct AgentFile {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub transport: Option<TransportKind>,
    /// Older files select RPC with a boolean
    #[serde(default)]
    pub grpc: Option<bool>,
    #[serde(default, with = "humanized")]
    pub poll_interval: Option<Duration>,
    #[serde(default, with = "humanized")]
    pub report_interval: Option<Duration>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,
    #[serde(default)]
    pub log_level: Option<String>,
}

impl AgentFile {
    fn transport(&self) -> Option<TransportKind> {
        self.transport.or(match self.grpc {
            Some(true) => Some(TransportKind::Rpc),
            Some(false) => Some(TransportKind::Http),
            None => None,
        })
    }
}

/// Resolved agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub address: String,
    pub transport: TransportKind,
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub key: String,
    pub crypto_key: Option<PathBuf>,
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            transport: TransportKind::Http,
            poll_interval: Duration::from_secs(2),
            report_interval: Duration::from_secs(10),
            key: String::new(),
            crypto_key: None,
            log_level: "info".to_string(),
        }
    }
}

impl AgentConfig {
    /// Merge flags/env over the optional file over defaults
    pub fn resolve(args: AgentArgs) -> Result<Self, ConfigError> {
        let file: AgentFile = match &args.config {
            Some(path) => load_file(path)?,
            None => AgentFile::default(),
        };
        Ok(Self::merge(args, file))
    }

    fn merge(args: AgentArgs, file: AgentFile) -> Self {
        let defaults = Self::default();
        let transport = args.transport.or_else(|| file.transport());
        Self {
            address: args.address.or(file.address).unwrap_or(defaults.address),
            transport: transport.unwrap_or(defaults.transport),
            poll_interval: args
                .poll_interval
                .or(file.poll_interval)
                .unwrap_or(defaults.poll_interval),
            report_interval: args
                .report_interval
                .or(file.report_interval)
                .unwrap_or(defaults.report_interval),
            key: args.key.or(file.key).unwrap_or(defaults.key),
            crypto_key: args
                .crypto_key
                .or(file.crypto_key)
                .filter(|p| !p.as_os_str().is_empty()),
            log_level: args.log_level.or(file.log_level).unwrap_or(defaults.log_level),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::resolve(AgentArgs::default()).unwrap();
        assert_eq!(config.address, "127.0.0.1:8080");
        assert_eq!(config.transport, TransportKind::Http);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.report_interval, Duration::from_secs(10));
        assert!(config.crypto_key.is_none());
    }

    #[test]
    fn test_flags_parse() {
        let args = AgentArgs::try_parse_from([
            "tally-agent",
            "-a",
            "10.0.0.5:9000",
            "--transport",
            "rpc",
            "-p",
            "500ms",
            "-r",
            "3",
        ])
        .unwrap();
        let config = AgentConfig::resolve(args).unwrap();
        assert_eq!(config.address, "10.0.0.5:9000");
        assert_eq!(config.transport, TransportKind::Rpc);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.report_interval, Duration::from_secs(3));
    }

    #[test]
    fn test_file_grpc_flag_selects_rpc() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"address": "localhost:3200", "grpc": true, "report_interval": "1m", "poll_interval": 1}}"#
        )
        .unwrap();

        let args = AgentArgs {
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let config = AgentConfig::resolve(args).unwrap();
        assert_eq!(config.address, "localhost:3200");
        assert_eq!(config.transport, TransportKind::Rpc);
        assert_eq!(config.report_interval, Duration::from_secs(60));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_flag_transport_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "transport: rpc").unwrap();

        let args = AgentArgs {
            transport: Some(TransportKind::Http),
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let config = AgentConfig::resolve(args).unwrap();
        assert_eq!(config.transport, TransportKind::Http);
    }
}
