//! RPC client used by agents to talk to the Tally server.

use crate::{read_frame, write_frame, Request, Response, ResponseData, RpcError};
use std::time::Duration;
use tally_core::MetricRecord;
use tokio::net::{TcpStream, ToSocketAddrs};

/// Connection timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Request/response timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected RPC client. Requests are sent one at a time over the same
/// connection.
pub struct RpcClient {
    stream: TcpStream,
}

impl RpcClient {
    /// Connect to the server
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, RpcError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| RpcError::ConnectionFailed("Connection timed out".to_string()))??;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Send a request and wait for the raw response
    pub async fn send(&mut self, request: &Request) -> Result<Response, RpcError> {
        tokio::time::timeout(REQUEST_TIMEOUT, self.do_send(request))
            .await
            .map_err(|_| RpcError::Timeout)?
    }

    async fn do_send(&mut self, request: &Request) -> Result<Response, RpcError> {
        write_frame(&mut self.stream, request).await?;
        read_frame(&mut self.stream)
            .await?
            .ok_or_else(|| RpcError::ConnectionFailed("Server closed the connection".to_string()))
    }

    /// Send a request, turning error responses into [`RpcError::Remote`]
    async fn call(&mut self, request: &Request) -> Result<Option<ResponseData>, RpcError> {
        match self.send(request).await? {
            Response::Ok { data } => Ok(data),
            Response::Error { code, message } => Err(RpcError::Remote { code, message }),
        }
    }

    /// Apply one update
    pub async fn update_metric(&mut self, record: MetricRecord) -> Result<(), RpcError> {
        self.call(&Request::UpdateMetric { record }).await.map(|_| ())
    }

    /// Apply a batch of updates; returns the number applied
    pub async fn update_batch(&mut self, records: Vec<MetricRecord>) -> Result<usize, RpcError> {
        let count = records.len();
        match self.call(&Request::UpdateMetricBatch { records }).await? {
            Some(ResponseData::Batch { applied }) => Ok(applied),
            None => Ok(count),
            Some(_) => Err(RpcError::UnexpectedResponse),
        }
    }

    /// Fetch a metric's current value
    pub async fn get_metric(&mut self, id: &str, kind: &str) -> Result<MetricRecord, RpcError> {
        let request = Request::GetMetric {
            id: id.to_string(),
            kind: kind.to_string(),
        };
        match self.call(&request).await? {
            Some(ResponseData::Metric { record }) => Ok(record),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }

    /// Health check; `true` when the server's persistence is healthy
    pub async fn ping(&mut self) -> Result<bool, RpcError> {
        match self.call(&Request::Ping).await? {
            Some(ResponseData::Pong { healthy }) => Ok(healthy),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorCode, RequestHandler, RpcServer};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct TestHandler;

    #[async_trait]
    impl RequestHandler for TestHandler {
        async fn handle(&self, request: Request) -> Response {
            match request {
                Request::Ping => Response::ok_with(ResponseData::Pong { healthy: false }),
                Request::GetMetric { id, .. } => Response::ok_with(ResponseData::Metric {
                    record: MetricRecord::counter(id, 7),
                }),
                Request::UpdateMetricBatch { .. } => {
                    Response::error(ErrorCode::InvalidArgument, "1 of 2 records rejected")
                }
                Request::UpdateMetric { .. } => Response::ok(),
            }
        }
    }

    async fn start() -> std::net::SocketAddr {
        let server = RpcServer::bind("127.0.0.1:0", Arc::new(TestHandler))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        addr
    }

    #[tokio::test]
    async fn test_client_connect_refused() {
        // Bind then drop to get a port with nothing listening
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        assert!(RpcClient::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_client_calls() {
        let addr = start().await;
        let mut client = RpcClient::connect(addr).await.unwrap();

        assert!(!client.ping().await.unwrap());
        assert_eq!(
            client.get_metric("hits", "counter").await.unwrap(),
            MetricRecord::counter("hits", 7)
        );
        client
            .update_metric(MetricRecord::gauge("g", 1.0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_client_surfaces_remote_errors() {
        let addr = start().await;
        let mut client = RpcClient::connect(addr).await.unwrap();

        let err = client
            .update_batch(vec![MetricRecord::counter("a", 1)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RpcError::Remote {
                code: ErrorCode::InvalidArgument,
                ..
            }
        ));
    }
}
