//! Server lifecycle management.

use crate::handler::RpcHandler;
use crate::http::build_router;
use crate::{ServerConfig, ServerState};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tally_core::lifecycle::wait_for_signal;
use tally_core::{Decrypter, Lifecycle, Store};
use tally_rpc::RpcServer;
use tally_storage::{open_persister, PersistOptions};
use tokio::net::TcpListener;

/// A bound, ready-to-run server
pub struct Daemon {
    config: ServerConfig,
    state: Arc<ServerState>,
    lifecycle: Arc<Lifecycle>,
    decrypter: Option<Arc<Decrypter>>,
    http: TcpListener,
    rpc: Option<RpcServer>,
}

impl Daemon {
    /// Open persistence, restore, load keys and bind every listener
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let persister = open_persister(&PersistOptions {
            dsn: config.database_dsn.clone(),
            file: config.store_file.clone(),
        })
        .await
        .context("Failed to open persistence")?;

        let state = Arc::new(ServerState {
            key: config.key.clone(),
            persister,
            sync_flush: config.sync_flush(),
            trusted: config.trusted_subnet,
            ..ServerState::new(Arc::new(Store::new()))
        });

        if config.restore {
            state.restore().await;
        }

        let decrypter = match &config.crypto_key {
            Some(path) => Some(Arc::new(
                Decrypter::from_pem_file(path).context("Failed to load private key")?,
            )),
            None => None,
        };

        let http = TcpListener::bind(&config.address)
            .await
            .with_context(|| format!("Failed to bind HTTP address {}", config.address))?;

        let rpc = match &config.rpc_address {
            Some(addr) => Some(
                RpcServer::bind(addr.as_str(), Arc::new(RpcHandler::new(state.clone())))
                    .await
                    .with_context(|| format!("Failed to bind RPC address {}", addr))?
                    .with_trusted_subnet(config.trusted_subnet),
            ),
            None => None,
        };

        Ok(Self {
            config,
            state,
            lifecycle: Arc::new(Lifecycle::new()),
            decrypter,
            http,
            rpc,
        })
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        Ok(self.http.local_addr()?)
    }

    pub fn rpc_addr(&self) -> Option<SocketAddr> {
        self.rpc.as_ref().and_then(|rpc| rpc.local_addr().ok())
    }

    pub fn state(&self) -> Arc<ServerState> {
        self.state.clone()
    }

    /// Handle for requesting shutdown from outside
    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        self.lifecycle.clone()
    }

    /// Serve until a signal arrives or shutdown is requested, then stop the
    /// flush ticker, drain both listeners and save one final snapshot.
    pub async fn run(self) -> Result<()> {
        let Daemon {
            config,
            state,
            lifecycle,
            decrypter,
            http,
            rpc,
        } = self;

        tracing::info!(
            http = %http.local_addr()?,
            rpc = ?rpc.as_ref().and_then(|r| r.local_addr().ok()),
            interval = ?config.store_interval,
            integrity = !config.key.is_empty(),
            encryption = decrypter.is_some(),
            "Server starting"
        );

        if !state.sync_flush && state.persister.is_some() {
            let flushing = state.clone();
            lifecycle.spawn_ticker("flush", config.store_interval, move || {
                let state = flushing.clone();
                async move {
                    if let Err(e) = state.flush().await {
                        tracing::error!(error = %e, "Periodic flush failed");
                    }
                }
            });
        }

        let router = build_router(state.clone(), decrypter);
        let http_lifecycle = lifecycle.clone();
        let http_task = tokio::spawn(async move {
            let stop = http_lifecycle.clone();
            let result = axum::serve(http, router)
                .with_graceful_shutdown(async move { stop.wait().await })
                .await;
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
                http_lifecycle.trigger();
            }
        });

        let rpc_task = rpc.map(|rpc| {
            let lifecycle = lifecycle.clone();
            let shutdown = lifecycle.subscribe();
            tokio::spawn(async move {
                if let Err(e) = rpc.run_until(shutdown).await {
                    tracing::error!("RPC server error: {}", e);
                    lifecycle.trigger();
                }
            })
        });

        tokio::select! {
            signal = wait_for_signal() => match signal {
                Ok(name) => tracing::info!("Received {}", name),
                Err(e) => {
                    tracing::error!("Signal handling failed: {}", e);
                    lifecycle.wait().await;
                }
            },
            _ = lifecycle.wait() => {
                tracing::info!("Shutdown requested");
            }
        }

        lifecycle.shutdown().await;
        if let Some(task) = rpc_task {
            if let Err(e) = task.await {
                tracing::warn!("RPC task ended abnormally: {}", e);
            }
        }
        if let Err(e) = http_task.await {
            tracing::warn!("HTTP task ended abnormally: {}", e);
        }

        tracing::info!("Cleaning up...");
        match state.flush().await {
            Ok(()) => tracing::info!("Final flush complete"),
            Err(e) => tracing::error!(error = %e, "Final flush failed"),
        }
        Ok(())
    }
}
