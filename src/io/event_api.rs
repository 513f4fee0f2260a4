//! Event API HTTP server
//!
//! Records ENTRY/EXIT events posted by the monitor and serves the viewer page.
//! Uses hyper directly, one task per connection.
//!
//! - `GET /` - liveness message
//! - `POST /employee` - insert `{status, time}` into the store
//! - `GET /stream` - HTML page embedding the MJPEG viewer
//! - `GET /events?limit=N` - most recent rows, newest first
//! - `GET /health` - `ok`

use crate::domain::types::{parse_event_time, EventPayload, EVENT_TIME_FORMAT};
use crate::io::store::EventStore;
use anyhow::Context;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const MAX_BODY_BYTES: usize = 64 * 1024;
const DEFAULT_EVENTS_LIMIT: usize = 50;
const MAX_EVENTS_LIMIT: usize = 1000;

const STREAM_TEMPLATE: &str = include_str!("../../templates/stream.html");

pub struct ApiState {
    store: Arc<EventStore>,
    stream_page: String,
}

impl ApiState {
    pub fn new(store: Arc<EventStore>, viewer_port: u16) -> Self {
        let stream_page = STREAM_TEMPLATE.replace("{{VIEWER_PORT}}", &viewer_port.to_string());
        Self { store, stream_page }
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response should not fail")
}

fn detail(status: StatusCode, msg: impl Into<String>) -> Response<Full<Bytes>> {
    json_response(status, json!({ "detail": msg.into() }))
}

/// `limit` query parameter, clamped to `1..=MAX_EVENTS_LIMIT`
fn parse_limit(query: Option<&str>) -> usize {
    query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .find_map(|pair| pair.strip_prefix("limit="))
        .and_then(|v| v.parse::<usize>().ok())
        .map(|n| n.clamp(1, MAX_EVENTS_LIMIT))
        .unwrap_or(DEFAULT_EVENTS_LIMIT)
}

async fn save_event(req: Request<Incoming>, state: Arc<ApiState>) -> Response<Full<Bytes>> {
    let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return detail(StatusCode::UNPROCESSABLE_ENTITY, format!("unreadable body: {e}")),
    };

    let payload: EventPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => return detail(StatusCode::UNPROCESSABLE_ENTITY, format!("invalid event: {e}")),
    };

    let Some(time) = parse_event_time(&payload.time) else {
        return detail(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("invalid time: {:?}", payload.time),
        );
    };
    let time = time.format(EVENT_TIME_FORMAT).to_string();
    let status = payload.status;

    let store = state.store.clone();
    let insert = {
        let (time, status) = (time.clone(), status.clone());
        tokio::task::spawn_blocking(move || store.insert_event(&time, &status)).await
    };

    match insert {
        Ok(Ok(id)) => {
            info!(id = %id, status = %status, time = %time, "event_saved");
            json_response(StatusCode::OK, json!({ "message": "Employee event saved" }))
        }
        Ok(Err(e)) => {
            error!(error = %e, status = %status, "event_store_error");
            detail(StatusCode::INTERNAL_SERVER_ERROR, format!("database error: {e}"))
        }
        Err(e) => {
            error!(error = %e, "event_store_task_failed");
            detail(StatusCode::INTERNAL_SERVER_ERROR, "database task failed")
        }
    }
}

async fn list_events(limit: usize, state: Arc<ApiState>) -> Response<Full<Bytes>> {
    let store = state.store.clone();
    match tokio::task::spawn_blocking(move || store.recent_events(limit)).await {
        Ok(Ok(events)) => json_response(StatusCode::OK, json!({ "events": events })),
        Ok(Err(e)) => {
            error!(error = %e, "event_query_error");
            detail(StatusCode::INTERNAL_SERVER_ERROR, format!("database error: {e}"))
        }
        Err(e) => {
            error!(error = %e, "event_query_task_failed");
            detail(StatusCode::INTERNAL_SERVER_ERROR, "database task failed")
        }
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<Incoming>,
    state: Arc<ApiState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    debug!(method = %req.method(), path = %req.uri().path(), "api_request");
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/") => {
            json_response(StatusCode::OK, json!({ "message": "Employee Presence API is running" }))
        }
        (&Method::POST, "/employee") => save_event(req, state).await,
        (&Method::GET, "/stream") => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/html; charset=utf-8")
            .body(Full::new(Bytes::from(state.stream_page.clone())))
            .expect("static response should not fail"),
        (&Method::GET, "/events") => list_events(parse_limit(req.uri().query()), state).await,
        (&Method::GET, "/health") => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail"),
        (_, "/employee") => detail(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"),
        _ => detail(StatusCode::NOT_FOUND, "Not Found"),
    };
    Ok(response)
}

/// Serve the API on an already-bound listener until shutdown
pub async fn serve(
    listener: TcpListener,
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                warn!(error = %e, "api_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "api_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("event_api_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

/// Bind and run the Event API
pub async fn start_event_api(
    addr: SocketAddr,
    state: Arc<ApiState>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener =
        TcpListener::bind(addr).await.with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "event_api_started");
    serve(listener, state, shutdown).await
}
