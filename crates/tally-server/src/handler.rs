//! RPC request handler backed by the shared server state.

use crate::ServerState;
use async_trait::async_trait;
use std::sync::Arc;
use tally_rpc::{ErrorCode, Request, RequestHandler, Response, ResponseData};
use tracing::warn;

/// Applies admitted RPC requests to the store
pub struct RpcHandler {
    state: Arc<ServerState>,
}

impl RpcHandler {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    async fn handle_batch(&self, records: Vec<tally_core::MetricRecord>) -> Response {
        let outcome = self.state.store.apply_batch(&self.state.key, &records);
        if outcome.applied > 0 {
            self.state.after_write().await;
        }

        if outcome.is_complete() {
            return Response::ok_with(ResponseData::Batch {
                applied: outcome.applied,
            });
        }

        let details: Vec<String> = outcome
            .failures
            .iter()
            .map(|f| format!("[{}] {}: {}", f.index, f.id, f.error))
            .collect();
        Response::error(
            ErrorCode::InvalidArgument,
            format!(
                "{} of {} records rejected: {}",
                outcome.failures.len(),
                records.len(),
                details.join("; ")
            ),
        )
    }
}

#[async_trait]
impl RequestHandler for RpcHandler {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::UpdateMetric { record } => {
                match self.state.store.update_checked(&self.state.key, &record) {
                    Ok(()) => {
                        self.state.after_write().await;
                        Response::ok()
                    }
                    Err(e) => {
                        warn!(id = %record.id, error = %e, "Rejected RPC update");
                        Response::from_metric_error(&e)
                    }
                }
            }
            Request::UpdateMetricBatch { records } => self.handle_batch(records).await,
            Request::GetMetric { id, kind } => {
                match self.state.store.lookup(&self.state.key, &id, &kind) {
                    Ok(record) => Response::ok_with(ResponseData::Metric { record }),
                    Err(e) => Response::from_metric_error(&e),
                }
            }
            Request::Ping => Response::ok_with(ResponseData::Pong {
                healthy: self.state.healthy().await,
            }),
        }
    }
}
