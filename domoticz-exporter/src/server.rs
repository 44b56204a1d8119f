// Domoticz Exporter - Scrape endpoint
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! HTTP scrape endpoint.
//!
//! Any `GET` path not listed below returns the exposition text, so both
//! `/` and `/metrics` work as scrape targets. Every other method is
//! rejected with `404 Support GET only`.
//!
//! | Path      | Response                                   |
//! |-----------|--------------------------------------------|
//! | `/health` | `OK`                                       |
//! | `/ready`  | 200 once a poll cycle completed, 503 before |
//! | `/status` | JSON status                                |
//! | other     | Prometheus exposition text                 |

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use domoticz::{DeviceSource, MetricSink, PollStatus, Poller};
use serde::Serialize;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, error};

/// Application state shared across handlers.
pub struct AppState<S> {
    pub sink: Arc<MetricSink>,
    pub poller: Arc<Poller<S>>,
    /// Hub base URL, for the status page
    pub hub_url: String,
    pub start_time: Instant,
}

impl<S> AppState<S> {
    pub fn new(sink: Arc<MetricSink>, poller: Arc<Poller<S>>, hub_url: impl Into<String>) -> Self {
        Self {
            sink,
            poller,
            hub_url: hub_url.into(),
            start_time: Instant::now(),
        }
    }
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            poller: Arc::clone(&self.poller),
            hub_url: self.hub_url.clone(),
            start_time: self.start_time,
        }
    }
}

/// Build the router. `request_timeout` bounds every request.
pub fn create_router<S>(state: AppState<S>, request_timeout: Duration) -> Router
where
    S: DeviceSource + 'static,
{
    Router::new()
        .route("/health", get(health_handler).fallback(reject_handler))
        .route("/ready", get(ready_handler::<S>).fallback(reject_handler))
        .route("/status", get(status_handler::<S>).fallback(reject_handler))
        .fallback(scrape_handler::<S>)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Metrics handler - returns Prometheus text format for any GET.
async fn scrape_handler<S>(method: Method, State(state): State<AppState<S>>) -> Response
where
    S: DeviceSource + 'static,
{
    if method != Method::GET && method != Method::HEAD {
        return reject_handler().await.into_response();
    }
    debug!("GET request received");

    match state.sink.render().await {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, state.sink.content_type())],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Anything but a read request.
async fn reject_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        "Support GET only",
    )
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler.
async fn ready_handler<S>(State(state): State<AppState<S>>) -> impl IntoResponse
where
    S: DeviceSource + 'static,
{
    if state.poller.status().await.cycles_completed > 0 {
        (StatusCode::OK, "Ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Waiting for first poll cycle")
    }
}

/// Status information response.
#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_secs: u64,
    hub: String,
    interval_secs: u64,
    default_metrics: bool,
    poll: PollStatus,
}

/// Status handler - returns JSON status information.
async fn status_handler<S>(State(state): State<AppState<S>>) -> Json<StatusResponse>
where
    S: DeviceSource + 'static,
{
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        hub: state.hub_url.clone(),
        interval_secs: state.poller.interval().as_secs(),
        default_metrics: state.sink.collects_default_metrics(),
        poll: state.poller.status().await,
    })
}
