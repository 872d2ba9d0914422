//! HTTP query surface
//!
//! - `GET /inventory/raw` - every tag as a JSON array
//! - `GET /inventory/summary` - per-lifecycle counts
//! - `POST /reads` - ingest one read or a batch
//! - `GET /metrics` - Prometheus text format
//! - `GET /health`

use crate::domain::types::{epoch_ms, parse_read_payload};
use crate::infra::metrics::Metrics;
use crate::io::prometheus::format_prometheus_metrics;
use crate::services::ingest::Ingestor;
use crate::services::inventory::InventoryService;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Largest accepted `POST /reads` body
const MAX_BODY_BYTES: usize = 1024 * 1024;

const JSON: &str = "application/json";

/// Everything the handlers need
pub struct HttpState {
    pub inventory: InventoryService,
    pub ingestor: Ingestor,
    pub metrics: Arc<Metrics>,
    pub site_id: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

fn response(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", content_type)
        .body(Full::new(body.into()))
        .expect("static response should not fail")
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => response(status, JSON, body),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "serialization_failed", e.to_string()),
    }
}

fn error_response(status: StatusCode, code: &str, message: String) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(&ErrorBody { error: code, message }).unwrap_or_default();
    response(status, JSON, body)
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<HttpState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let resp = match (req.method(), req.uri().path()) {
        (&Method::GET, "/inventory/raw") => match state.inventory.raw_inventory_json() {
            Ok(body) => response(StatusCode::OK, JSON, body),
            Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.code(), e.to_string()),
        },
        (&Method::GET, "/inventory/summary") => json_response(StatusCode::OK, &state.inventory.summary()),
        (&Method::POST, "/reads") => handle_post_reads(req, &state).await,
        (&Method::GET, "/metrics") => {
            let counts = state.ingestor.registry().counts_by_state();
            let body = format_prometheus_metrics(&state.metrics, &counts, &state.site_id);
            response(StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", body)
        }
        (&Method::GET, "/health") => response(StatusCode::OK, "text/plain", "ok"),
        _ => response(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };
    Ok(resp)
}

async fn handle_post_reads(req: Request<hyper::body::Incoming>, state: &HttpState) -> Response<Full<Bytes>> {
    let received_at = epoch_ms();
    let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            state.metrics.record_payload_error();
            warn!(error = %e, "http_reads_body_rejected");
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "body_rejected", e.to_string());
        }
    };

    match parse_read_payload(&body, received_at) {
        Ok(reads) => {
            let counts = state.ingestor.ingest_batch(&reads);
            debug!(
                reads = %reads.len(),
                accepted = %counts.accepted,
                unchanged = %counts.unchanged,
                invalid = %counts.invalid,
                "http_reads_ingested"
            );
            json_response(StatusCode::ACCEPTED, &counts)
        }
        Err(e) => {
            state.metrics.record_payload_error();
            debug!(error = %e, "http_reads_malformed");
            error_response(StatusCode::BAD_REQUEST, "malformed_payload", e.to_string())
        }
    }
}

/// Serve requests on an already bound listener until shutdown
pub async fn serve(
    listener: TcpListener,
    state: Arc<HttpState>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, site = %state.site_id, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| handle_request(req, state.clone()));
                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

/// Bind `0.0.0.0:port` and serve until shutdown
pub async fn start_http_server(
    port: u16,
    state: Arc<HttpState>,
    shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    serve(listener, state, shutdown).await
}
