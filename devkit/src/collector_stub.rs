/*!
Stub push collector for tests without a real collector API

Runs a small axum server on a loopback port that records every JSON body
POSTed to `/api/data`. Scripted statuses are answered first; after that it
behaves like the collector API: 400 when one of `timestamp`, `cpu`, `ram` or
`procesos` is missing, 201 otherwise.
*/

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use serde_json::Value;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Top-level keys the collector API refuses to do without
pub const REQUIRED_FIELDS: [&str; 4] = ["timestamp", "cpu", "ram", "procesos"];

#[derive(Debug, Clone)]
pub struct ReceivedRecord {
    pub body: Value,
    pub status: StatusCode,
}

#[derive(Default)]
struct CollectorState {
    received: Mutex<Vec<ReceivedRecord>>,
    script: Mutex<VecDeque<StatusCode>>,
}

pub struct StubCollector {
    addr: SocketAddr,
    state: Arc<CollectorState>,
    server: JoinHandle<()>,
}

impl StubCollector {
    /// Bind a loopback port and start recording
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(CollectorState::default());

        let app = Router::new()
            .route("/api/data", post(record))
            .with_state(state.clone());
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("stub collector stopped: {}", e);
            }
        });

        log::info!("📥 [STUB] collector listening on {}", addr);
        Ok(Self { addr, state, server })
    }

    /// Push endpoint URL to hand to the agent
    pub fn url(&self) -> String {
        format!("http://{}/api/data", self.addr)
    }

    /// Queue statuses for the next requests, in order
    pub fn respond_with<I>(&self, statuses: I)
    where
        I: IntoIterator<Item = StatusCode>,
    {
        self.state.script.lock().unwrap().extend(statuses);
    }

    /// Every body received, accepted or not
    pub fn received(&self) -> Vec<Value> {
        self.records().into_iter().map(|r| r.body).collect()
    }

    /// Bodies answered with a 2xx status
    pub fn accepted(&self) -> Vec<Value> {
        self.records()
            .into_iter()
            .filter(|r| r.status.is_success())
            .map(|r| r.body)
            .collect()
    }

    pub fn records(&self) -> Vec<ReceivedRecord> {
        self.state.received.lock().unwrap().clone()
    }

    /// Wait until at least `count` bodies have arrived
    pub async fn wait_for_records(&self, count: usize, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.state.received.lock().unwrap().len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        log::warn!("⏰ Timeout waiting for {} records", count);
        false
    }

    pub fn clear(&self) {
        self.state.received.lock().unwrap().clear();
        self.state.script.lock().unwrap().clear();
    }
}

impl Drop for StubCollector {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn record(State(state): State<Arc<CollectorState>>, body: String) -> StatusCode {
    let body = serde_json::from_str(&body).unwrap_or(Value::String(body));
    let scripted = state.script.lock().unwrap().pop_front();
    let status = scripted.unwrap_or_else(|| {
        if REQUIRED_FIELDS.iter().all(|key| body.get(key).is_some()) {
            StatusCode::CREATED
        } else {
            log::warn!("📥 [STUB] incomplete record: {}", body);
            StatusCode::BAD_REQUEST
        }
    });
    state.received.lock().unwrap().push(ReceivedRecord { body, status });
    status
}
