//! Shipping snapshots of the collector's store to the server.
//!
//! The [`Reporter`] signs each record when a key is configured and hands the
//! batch to a [`Transport`]. A failed send is logged and the batch dropped;
//! the next report carries fresh values anyway.

use crate::error::ReportError;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::net::{IpAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use tally_core::{integrity, Encrypter, MetricRecord, Store};
use tally_rpc::RpcClient;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Header carrying the agent's own address
pub const X_REAL_IP: &str = "X-Real-IP";

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivers one batch of records to the server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the batch; returns how many records the server applied
    async fn send(&self, batch: Vec<MetricRecord>) -> Result<usize, ReportError>;

    /// Human-readable destination, for logs
    fn describe(&self) -> String;
}

/// JSON batches posted to `/updates/`
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    encrypter: Option<Encrypter>,
    real_ip: Option<IpAddr>,
}

#[derive(Deserialize)]
struct BatchReply {
    applied: usize,
}

impl HttpTransport {
    /// `address` is `host:port` or a full `http(s)://` base URL
    pub fn new(address: &str, encrypter: Option<Encrypter>) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        let base = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };
        let real_ip = outbound_ip(host_port(&base));
        if real_ip.is_none() {
            debug!(address, "Could not determine outbound address");
        }

        Ok(Self {
            client,
            endpoint: format!("{}/updates/", base),
            encrypter,
            real_ip,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn real_ip(&self) -> Option<IpAddr> {
        self.real_ip
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: Vec<MetricRecord>) -> Result<usize, ReportError> {
        let mut body = serde_json::to_vec(&batch)?;
        if let Some(encrypter) = &self.encrypter {
            body = encrypter.encrypt(&body)?;
        }

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(ip) = self.real_ip {
            request = request.header(X_REAL_IP, ip.to_string());
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ReportError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(serde_json::from_str::<BatchReply>(&text)
            .map(|reply| reply.applied)
            .unwrap_or(batch.len()))
    }

    fn describe(&self) -> String {
        self.endpoint.clone()
    }
}

/// `UpdateMetricBatch` over the binary RPC.
///
/// The connection is opened lazily and dropped after any failure so the next
/// report reconnects.
pub struct RpcTransport {
    address: String,
    client: Mutex<Option<RpcClient>>,
}

impl RpcTransport {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            client: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for RpcTransport {
    async fn send(&self, batch: Vec<MetricRecord>) -> Result<usize, ReportError> {
        let mut guard = self.client.lock().await;
        let mut client = match guard.take() {
            Some(client) => client,
            None => RpcClient::connect(self.address.as_str()).await?,
        };

        let applied = client.update_batch(batch).await?;
        *guard = Some(client);
        Ok(applied)
    }

    fn describe(&self) -> String {
        format!("rpc://{}", self.address)
    }
}

/// Signs and ships snapshots of a store
pub struct Reporter {
    store: Arc<Store>,
    key: String,
    transport: Box<dyn Transport>,
}

impl Reporter {
    pub fn new(store: Arc<Store>, key: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            store,
            key: key.into(),
            transport,
        }
    }

    /// Send one snapshot; returns the number of records applied
    pub async fn report(&self) -> Result<usize, ReportError> {
        let mut batch = self.store.snapshot();
        if batch.is_empty() {
            debug!("Nothing to report");
            return Ok(0);
        }
        for record in &mut batch {
            integrity::sign(record, &self.key)?;
        }

        let sent = batch.len();
        let applied = self.transport.send(batch).await?;
        info!(sent, applied, destination = %self.transport.describe(), "Reported metrics");
        Ok(applied)
    }

    /// Like [`report`](Self::report), logging instead of returning the error
    pub async fn report_logged(&self) {
        if let Err(e) = self.report().await {
            error!(destination = %self.transport.describe(), error = %e, "Report failed");
        }
    }
}

fn host_port(base: &str) -> &str {
    let rest = base.split_once("://").map_or(base, |(_, rest)| rest);
    rest.split('/').next().unwrap_or(rest)
}

/// Local address the OS would use to reach `target`.
///
/// Connecting a UDP socket sends nothing; it only resolves the route.
fn outbound_ip(target: &str) -> Option<IpAddr> {
    let remote = target.to_socket_addrs().ok()?.next()?;
    let bind = if remote.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind).ok()?;
    socket.connect(remote).ok()?;
    Some(socket.local_addr().ok()?.ip())
}
