//! RPC protocol definitions and framing.
//!
//! Every message is a 4-byte little-endian length prefix followed by a
//! MessagePack body. Bodies are encoded with field names so that optional
//! record fields can be omitted. JSON bodies are accepted on input for
//! debugging with `nc`/`socat`.

use crate::RpcError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tally_core::{MetricError, MetricRecord};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (1MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Request from agent to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    /// Apply one metric update
    UpdateMetric { record: MetricRecord },

    /// Apply a batch of updates, record by record
    UpdateMetricBatch { records: Vec<MetricRecord> },

    /// Read the current value of a metric
    GetMetric { id: String, kind: String },

    /// Health check
    Ping,
}

/// Response from server to agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// Success with optional data
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<ResponseData>,
    },

    /// Error response
    Error { code: ErrorCode, message: String },
}

impl Response {
    /// Create a success response with no data
    pub fn ok() -> Self {
        Response::Ok { data: None }
    }

    /// Create a success response with data
    pub fn ok_with(data: ResponseData) -> Self {
        Response::Ok { data: Some(data) }
    }

    /// Create an error response
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error {
            code,
            message: message.into(),
        }
    }

    /// Error response for a metric failure
    pub fn from_metric_error(err: &MetricError) -> Self {
        Self::error(ErrorCode::from(err), err.to_string())
    }
}

/// Response data variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseData {
    /// Populated metric for `GetMetric`
    Metric { record: MetricRecord },

    /// Batch outcome when every record was applied
    Batch { applied: usize },

    /// Health check result
    Pong { healthy: bool },
}

/// Error codes for error responses
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed frame, bad value, absent field or integrity failure
    InvalidArgument,
    /// Metric is unknown
    NotFound,
    /// Caller is outside the trusted subnet
    PermissionDenied,
    /// Unsupported metric kind
    Unimplemented,
    /// Server-side failure
    Internal,
}

impl From<&MetricError> for ErrorCode {
    fn from(err: &MetricError) -> Self {
        match err {
            MetricError::NotFound { .. } => ErrorCode::NotFound,
            MetricError::UnsupportedKind(_) => ErrorCode::Unimplemented,
            MetricError::Authorization(_) => ErrorCode::PermissionDenied,
            MetricError::Cipher(_) | MetricError::IntegrityKey(_) => ErrorCode::Internal,
            _ => ErrorCode::InvalidArgument,
        }
    }
}

/// Read one frame and decode it, MessagePack first, then JSON.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly between
/// frames.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, RpcError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    // Read length prefix (4 bytes, little-endian)
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(RpcError::FrameTooLarge(len));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    decode(&buf).map(Some)
}

/// Encode `message` and write it as one frame
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = rmp_serde::to_vec_named(message)?;
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(RpcError::FrameTooLarge(bytes.len()));
    }
    let len_bytes = (bytes.len() as u32).to_le_bytes();

    writer.write_all(&len_bytes).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Decode a frame body, MessagePack first, then JSON
pub fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, RpcError> {
    let msgpack_err = match rmp_serde::from_slice(buf) {
        Ok(message) => return Ok(message),
        Err(e) => e,
    };

    // JSON fallback (useful for testing with nc/socat)
    serde_json::from_slice(buf).map_err(|_| RpcError::from(msgpack_err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::MetricKind;

    #[test]
    fn test_request_serialization() {
        let req = Request::UpdateMetric {
            record: MetricRecord::counter("PollCount", 5),
        };

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("update_metric"));
        assert!(json.contains("PollCount"));

        let msgpack = rmp_serde::to_vec_named(&req).unwrap();
        let decoded: Request = decode(&msgpack).unwrap();
        if let Request::UpdateMetric { record } = decoded {
            assert_eq!(record, MetricRecord::counter("PollCount", 5));
        } else {
            panic!("Decoded wrong variant");
        }
    }

    #[test]
    fn test_batch_keeps_optional_fields_apart() {
        let req = Request::UpdateMetricBatch {
            records: vec![
                MetricRecord::gauge("Alloc", 1.5).with_hash("abc"),
                MetricRecord::counter("PollCount", 2),
            ],
        };
        let msgpack = rmp_serde::to_vec_named(&req).unwrap();
        let Request::UpdateMetricBatch { records } = decode(&msgpack).unwrap() else {
            panic!("Decoded wrong variant");
        };
        assert_eq!(records[0].value, Some(1.5));
        assert_eq!(records[0].hash.as_deref(), Some("abc"));
        assert_eq!(records[1].delta, Some(2));
        assert!(records[1].hash.is_none());
    }

    #[test]
    fn test_json_fallback() {
        let json = br#"{"action":"get_metric","id":"Alloc","kind":"gauge"}"#;
        let decoded: Request = decode(json).unwrap();
        assert!(matches!(decoded, Request::GetMetric { ref id, .. } if id == "Alloc"));

        assert!(matches!(
            decode::<Request>(b"\xc1garbage"),
            Err(RpcError::Deserialize(_))
        ));
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::ok_with(ResponseData::Metric {
            record: MetricRecord::gauge("temp", 36.6),
        });
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""status":"ok""#));
        assert!(json.contains("temp"));

        let resp = Response::error(ErrorCode::PermissionDenied, "denied");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("permission_denied"));
    }

    #[test]
    fn test_error_code_mapping() {
        let cases = [
            (
                MetricError::NotFound {
                    kind: MetricKind::Gauge,
                    id: "x".to_string(),
                },
                ErrorCode::NotFound,
            ),
            (
                MetricError::UnsupportedKind("timer".to_string()),
                ErrorCode::Unimplemented,
            ),
            (
                MetricError::Authorization("8.8.8.8".parse().unwrap()),
                ErrorCode::PermissionDenied,
            ),
            (MetricError::Integrity("x".to_string()), ErrorCode::InvalidArgument),
            (MetricError::EmptyName, ErrorCode::InvalidArgument),
            (MetricError::IntegrityKey("bad".to_string()), ErrorCode::Internal),
        ];
        for (err, code) in cases {
            assert_eq!(ErrorCode::from(&err), code, "{err}");
        }
    }

    #[tokio::test]
    async fn test_frame_round_trip_and_eof() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        write_frame(&mut client, &Request::Ping).await.unwrap();
        drop(client);

        let first: Option<Request> = read_frame(&mut server).await.unwrap();
        assert!(matches!(first, Some(Request::Ping)));
        let second: Option<Request> = read_frame(&mut server).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let len = ((MAX_FRAME_SIZE + 1) as u32).to_le_bytes();
        client.write_all(&len).await.unwrap();

        let result: Result<Option<Request>, _> = read_frame(&mut server).await;
        assert!(matches!(result, Err(RpcError::FrameTooLarge(_))));
    }
}
