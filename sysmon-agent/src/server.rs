//! Pull delivery: HTTP snapshot server
//!
//! - `GET /metrics`: current record, absent sources filled with neutral values
//! - `OPTIONS /metrics`: CORS preflight
//! - `GET /health`: agent identity and sampler counters
//!
//! Handlers only read in-memory state; a request never triggers a poll.
//! Other methods on these paths get axum's 405.

use crate::aggregator::Aggregator;
use crate::health::{AgentHealth, HealthTracker};
use crate::payload::{self, DeliveryRecord};
use axum::extract::{Request, State};
use axum::http::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Aggregator,
    pub health: HealthTracker,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics).options(preflight))
        .route("/health", get(get_health))
        .with_state(app_state)
        .layer(middleware::from_fn(allow_any_origin))
}

async fn allow_any_origin(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("GET, OPTIONS"));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type"));
    response
}

// GET /metrics
async fn get_metrics(State(app): State<AppState>) -> Json<DeliveryRecord> {
    let snapshot = app.aggregator.snapshot();
    let missing = snapshot.missing();
    if !missing.is_empty() {
        debug!("serving metrics with defaults for {:?}", missing);
    }
    Json(DeliveryRecord::with_defaults(&snapshot, payload::now()))
}

// OPTIONS /metrics
async fn preflight() -> StatusCode {
    StatusCode::OK
}

// GET /health
async fn get_health(State(app): State<AppState>) -> Json<AgentHealth> {
    Json(app.health.get_health(&app.aggregator.snapshot()))
}

/// Serve until the process ends
pub fn spawn_server(listener: TcpListener, app_state: AppState) -> JoinHandle<()> {
    let app = build_router(app_state);
    tokio::spawn(async move {
        match listener.local_addr() {
            Ok(addr) => info!("serving metrics on http://{addr} (GET /metrics, GET /health)"),
            Err(e) => error!("listener has no local address: {}", e),
        }
        if let Err(e) = axum::serve(listener, app).await {
            error!("metrics server stopped: {}", e);
        }
    })
}
