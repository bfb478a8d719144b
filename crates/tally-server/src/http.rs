//! Axum router wiring for the HTTP ingestion and query surface.
//!
//! POST bodies flow through `decrypt -> verify -> mutate`: the decrypt
//! middleware is only installed when a private key is configured, and
//! verification happens inside [`Store::update_checked`](tally_core::Store).

use crate::ServerState;
use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{Path, Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::fmt::Write as _;
use std::net::IpAddr;
use std::sync::Arc;
use tally_core::{Decrypter, MetricError, MetricKind, MetricRecord};
use tracing::{debug, warn};

/// Header carrying the agent's own address
pub const X_REAL_IP: &str = "x-real-ip";

/// Largest encrypted body the decrypt middleware will buffer
const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

/// Errors surfaced by HTTP handlers
#[derive(Debug)]
pub enum HttpError {
    Metric(MetricError),
    BadRequest(String),
    Forbidden(String),
}

impl From<MetricError> for HttpError {
    fn from(e: MetricError) -> Self {
        HttpError::Metric(e)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            HttpError::Metric(e) => (status_for(&e), e.to_string()),
            HttpError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            HttpError::Forbidden(message) => (StatusCode::FORBIDDEN, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Status code for a metric error
pub fn status_for(err: &MetricError) -> StatusCode {
    match err {
        MetricError::NotFound { .. } => StatusCode::NOT_FOUND,
        MetricError::UnsupportedKind(_) => StatusCode::NOT_IMPLEMENTED,
        MetricError::Authorization(_) => StatusCode::FORBIDDEN,
        MetricError::IntegrityKey(_) => StatusCode::INTERNAL_SERVER_ERROR,
        MetricError::Parse { .. }
        | MetricError::AbsentField { .. }
        | MetricError::Integrity(_)
        | MetricError::EmptyName
        | MetricError::Cipher(_) => StatusCode::BAD_REQUEST,
    }
}

/// Body returned by `POST /updates/`
#[derive(Debug, Serialize)]
struct BatchReport {
    applied: usize,
    failures: Vec<FailureReport>,
}

#[derive(Debug, Serialize)]
struct FailureReport {
    index: usize,
    id: String,
    error: String,
}

pub fn build_router(state: Arc<ServerState>, decrypter: Option<Arc<Decrypter>>) -> Router {
    let mutating = Router::new()
        .route("/update/:kind/:name/:value", post(update_plain))
        .route("/update/:kind/", post(missing_name))
        .route("/update/", post(update_json))
        .route("/updates/", post(update_batch))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_trusted,
        ));

    let reads = Router::new()
        .route("/value/", post(value_json))
        .route("/value/:kind/:name", get(value_plain))
        .route("/", get(index))
        .route("/ping", get(ping));

    let router = mutating.merge(reads).with_state(state);
    match decrypter {
        Some(decrypter) => router.layer(middleware::from_fn_with_state(decrypter, decrypt_body)),
        None => router,
    }
}

/// Replace an encrypted POST body with its plaintext
async fn decrypt_body(
    State(decrypter): State<Arc<Decrypter>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::POST {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    let ciphertext = match to_bytes(body, MAX_BODY_SIZE).await {
        Ok(bytes) => bytes,
        Err(e) => return HttpError::BadRequest(e.to_string()).into_response(),
    };
    if ciphertext.is_empty() {
        return next.run(Request::from_parts(parts, Body::empty())).await;
    }

    match decrypter.decrypt(&ciphertext) {
        Ok(plaintext) => {
            parts.headers.remove(header::CONTENT_LENGTH);
            next.run(Request::from_parts(parts, Body::from(plaintext)))
                .await
        }
        Err(e) => {
            warn!(error = %e, "Rejected undecryptable body");
            HttpError::Metric(e.into()).into_response()
        }
    }
}

/// Admit mutating requests only from inside the trusted subnet
async fn require_trusted(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(subnet) = state.trusted.as_ref() else {
        return next.run(request).await;
    };

    match real_ip(request.headers()) {
        Some(addr) => match subnet.check(addr) {
            Ok(()) => next.run(request).await,
            Err(e) => {
                warn!(addr = %addr, "Rejected request from untrusted address");
                HttpError::Metric(e).into_response()
            }
        },
        None => {
            warn!("Rejected request without a valid X-Real-IP header");
            HttpError::Forbidden("missing or invalid X-Real-IP header".to_string()).into_response()
        }
    }
}

fn real_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(X_REAL_IP)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

async fn update_plain(
    State(state): State<Arc<ServerState>>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<StatusCode, HttpError> {
    state.store.update_raw(&kind, &name, &value)?;
    state.after_write().await;
    Ok(StatusCode::OK)
}

async fn missing_name() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn update_json(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> Result<StatusCode, HttpError> {
    let record: MetricRecord = parse_json(&body)?;
    state.store.update_checked(&state.key, &record)?;
    state.after_write().await;
    Ok(StatusCode::OK)
}

async fn update_batch(State(state): State<Arc<ServerState>>, body: Bytes) -> Response {
    let records: Vec<MetricRecord> = match parse_json(&body) {
        Ok(records) => records,
        Err(e) => return e.into_response(),
    };

    let outcome = state.store.apply_batch(&state.key, &records);
    if outcome.applied > 0 {
        state.after_write().await;
    }

    let status = if outcome.is_complete() {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    let report = BatchReport {
        applied: outcome.applied,
        failures: outcome
            .failures
            .into_iter()
            .map(|f| FailureReport {
                index: f.index,
                id: f.id,
                error: f.error.to_string(),
            })
            .collect(),
    };
    (status, Json(report)).into_response()
}

async fn value_json(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> Result<Json<MetricRecord>, HttpError> {
    let query: MetricRecord = parse_json(&body)?;
    match state.store.lookup(&state.key, &query.id, &query.kind) {
        Ok(record) => Ok(Json(record)),
        Err(MetricError::UnsupportedKind(kind)) => {
            Err(HttpError::BadRequest(format!("unsupported metric kind: {kind:?}")))
        }
        Err(e) => Err(e.into()),
    }
}

async fn value_plain(
    State(state): State<Arc<ServerState>>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<String, StatusCode> {
    let kind: MetricKind = kind.parse().map_err(|_| StatusCode::NOT_FOUND)?;
    let text = match kind {
        MetricKind::Counter => state.store.read_counter(&name).map(|v| v.to_string()),
        MetricKind::Gauge => state.store.read_gauge(&name).map(|v| format!("{v:.3}")),
    };
    text.map_err(|_| StatusCode::NOT_FOUND)
}

async fn index(State(state): State<Arc<ServerState>>) -> Html<String> {
    let mut page = String::from("<html><head><title>Metrics</title></head><body>\n");

    page.push_str("<h2>Gauges</h2>\n<ul>\n");
    for (name, value) in state.store.gauges() {
        let _ = writeln!(page, "<li>{}: {}</li>", escape(&name), value);
    }
    page.push_str("</ul>\n<h2>Counters</h2>\n<ul>\n");
    for (name, value) in state.store.counters() {
        let _ = writeln!(page, "<li>{}: {}</li>", escape(&name), value);
    }
    page.push_str("</ul>\n</body></html>\n");

    Html(page)
}

async fn ping(State(state): State<Arc<ServerState>>) -> StatusCode {
    if state.healthy().await {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, HttpError> {
    serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "Rejected malformed JSON body");
        HttpError::BadRequest(format!("invalid JSON: {e}"))
    })
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
