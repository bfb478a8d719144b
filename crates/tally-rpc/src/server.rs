//! TCP RPC server for the Tally daemon.
//!
//! Accepts connections, checks each caller against the trusted subnet and
//! dispatches requests to a [`RequestHandler`]. A connection may carry any
//! number of request/response pairs.

use crate::{read_frame, write_frame, ErrorCode, Request, Response, RpcError};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tally_core::{admit, TrustedSubnet};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinSet;

/// How long a connection may sit idle between requests
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// TCP RPC server
pub struct RpcServer {
    listener: TcpListener,
    handler: Arc<dyn RequestHandler>,
    trusted: Option<TrustedSubnet>,
}

impl RpcServer {
    /// Create a new RPC server bound to the given address
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Self, RpcError> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("RPC server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            handler,
            trusted: None,
        })
    }

    /// Only admit callers inside `subnet`. `None` admits everyone.
    pub fn with_trusted_subnet(mut self, subnet: Option<TrustedSubnet>) -> Self {
        self.trusted = subnet;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RpcError> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the server, accepting connections until the task is dropped
    pub async fn run(&self) -> Result<(), RpcError> {
        let (_never, shutdown) = watch::channel(false);
        self.run_until(shutdown).await
    }

    /// Run the server until `shutdown` flips to `true`.
    ///
    /// On shutdown the listener stops accepting, every connection finishes
    /// the request it is serving and closes, and only then does this return.
    pub async fn run_until(&self, shutdown: watch::Receiver<bool>) -> Result<(), RpcError> {
        let mut stop = shutdown.clone();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = async { let _ = stop.wait_for(|raised| *raised).await; } => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = self.handler.clone();
                        let trusted = self.trusted;
                        let shutdown = shutdown.clone();
                        connections.spawn(async move {
                            if let Err(e) =
                                Self::handle_connection(stream, peer, handler, trusted, shutdown).await
                            {
                                tracing::debug!(peer = %peer, "Connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::warn!("Connection task ended abnormally: {}", e);
                    }
                }
            }
        }

        tracing::info!(connections = connections.len(), "RPC server draining connections");
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("Connection task ended abnormally: {}", e);
            }
        }
        tracing::info!("RPC server stopped");
        Ok(())
    }

    /// Serve requests on one connection until the peer hangs up or shutdown
    /// is raised between two requests
    async fn handle_connection(
        mut stream: TcpStream,
        peer: SocketAddr,
        handler: Arc<dyn RequestHandler>,
        trusted: Option<TrustedSubnet>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), RpcError> {
        loop {
            let request = tokio::select! {
                biased;
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                    tracing::debug!(peer = %peer, "Closing connection for shutdown");
                    return Ok(());
                }
                read = tokio::time::timeout(IDLE_TIMEOUT, read_frame::<_, Request>(&mut stream)) => {
                    read.map_err(|_| RpcError::Timeout)?
                }
            };

            let request = match request {
                Ok(Some(req)) => req,
                Ok(None) => return Ok(()),
                Err(e) => {
                    let response = Response::error(
                        ErrorCode::InvalidArgument,
                        format!("Failed to parse request: {}", e),
                    );
                    write_frame(&mut stream, &response).await?;
                    return Err(e);
                }
            };

            tracing::debug!(peer = %peer, "Received request: {:?}", request);

            let response = match admit(trusted.as_ref(), peer.ip()) {
                Ok(()) => handler.handle(request).await,
                Err(e) => {
                    tracing::warn!(peer = %peer, "Rejected RPC call: {}", e);
                    Response::from_metric_error(&e)
                }
            };

            write_frame(&mut stream, &response).await?;
        }
    }
}

/// Trait for handling admitted requests
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle a request and return a response
    async fn handle(&self, request: Request) -> Response;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResponseData;

    struct TestHandler;

    #[async_trait]
    impl RequestHandler for TestHandler {
        async fn handle(&self, request: Request) -> Response {
            match request {
                Request::Ping => Response::ok_with(ResponseData::Pong { healthy: true }),
                _ => Response::ok(),
            }
        }
    }

    #[tokio::test]
    async fn test_server_ping_over_raw_socket() {
        let server = RpcServer::bind("127.0.0.1:0", Arc::new(TestHandler))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let _ = server.run().await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();

        // Two requests on the same connection
        for _ in 0..2 {
            write_frame(&mut stream, &Request::Ping).await.unwrap();
            let response: Response = read_frame(&mut stream).await.unwrap().unwrap();
            assert!(matches!(
                response,
                Response::Ok {
                    data: Some(ResponseData::Pong { healthy: true })
                }
            ));
        }
    }

    #[tokio::test]
    async fn test_garbage_frame_gets_invalid_argument() {
        use tokio::io::AsyncWriteExt;

        let server = RpcServer::bind("127.0.0.1:0", Arc::new(TestHandler))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let body = b"\xc1\xc1\xc1";
        stream
            .write_all(&(body.len() as u32).to_le_bytes())
            .await
            .unwrap();
        stream.write_all(body).await.unwrap();

        let response: Response = read_frame(&mut stream).await.unwrap().unwrap();
        assert!(matches!(
            response,
            Response::Error {
                code: ErrorCode::InvalidArgument,
                ..
            }
        ));
    }
}
