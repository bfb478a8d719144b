//! Agent lifecycle: poll and report tickers, signal handling, final report.

use crate::collector::Collector;
use crate::config::{AgentConfig, TransportKind};
use crate::reporter::{HttpTransport, Reporter, RpcTransport, Transport};
use anyhow::{Context, Result};
use std::sync::Arc;
use tally_core::lifecycle::wait_for_signal;
use tally_core::{Encrypter, Lifecycle};
use tracing::{info, warn};

/// Build the transport selected by the configuration
pub fn build_transport(config: &AgentConfig) -> Result<Box<dyn Transport>> {
    match config.transport {
        TransportKind::Http => {
            let encrypter = match &config.crypto_key {
                Some(path) => Some(
                    Encrypter::from_pem_file(path).context("Failed to load public key")?,
                ),
                None => None,
            };
            Ok(Box::new(HttpTransport::new(&config.address, encrypter)?))
        }
        TransportKind::Rpc => {
            if config.crypto_key.is_some() {
                warn!("Encryption applies to HTTP only; RPC reports are sent in clear");
            }
            Ok(Box::new(RpcTransport::new(config.address.clone())))
        }
    }
}

/// A configured agent
pub struct Agent {
    config: AgentConfig,
    collector: Arc<Collector>,
    reporter: Arc<Reporter>,
    lifecycle: Arc<Lifecycle>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Result<Self> {
        let transport = build_transport(&config)?;
        Ok(Self::with_transport(config, transport))
    }

    /// Agent reporting through a caller-supplied transport
    pub fn with_transport(config: AgentConfig, transport: Box<dyn Transport>) -> Self {
        let collector = Arc::new(Collector::new());
        let reporter = Arc::new(Reporter::new(
            collector.store(),
            config.key.clone(),
            transport,
        ));
        Self {
            config,
            collector,
            reporter,
            lifecycle: Arc::new(Lifecycle::new()),
        }
    }

    /// Handle for requesting shutdown from outside
    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        self.lifecycle.clone()
    }

    pub fn collector(&self) -> Arc<Collector> {
        self.collector.clone()
    }

    /// Poll and report until a signal arrives or shutdown is requested,
    /// then send whatever was collected since the last report.
    pub async fn run(self) -> Result<()> {
        info!(
            address = %self.config.address,
            transport = ?self.config.transport,
            poll = ?self.config.poll_interval,
            report = ?self.config.report_interval,
            "Agent starting"
        );

        let collector = self.collector.clone();
        self.lifecycle
            .spawn_ticker("poll", self.config.poll_interval, move || {
                let collector = collector.clone();
                async move { collector.poll() }
            });

        let reporter = self.reporter.clone();
        self.lifecycle
            .spawn_ticker("report", self.config.report_interval, move || {
                let reporter = reporter.clone();
                async move { reporter.report_logged().await }
            });

        tokio::select! {
            signal = wait_for_signal() => match signal {
                Ok(name) => info!("Received {}", name),
                Err(e) => {
                    tracing::error!("Signal handling failed: {}", e);
                    self.lifecycle.wait().await;
                }
            },
            _ = self.lifecycle.wait() => {}
        }

        self.lifecycle.shutdown().await;
        info!("Sending unreported metrics");
        self.reporter.report_logged().await;
        Ok(())
    }
}
