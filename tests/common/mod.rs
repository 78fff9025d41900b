#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio::sync::mpsc;

/// A request received by a [`CaptureServer`].
#[derive(Debug, Clone)]
pub struct Captured {
    pub path: String,
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Clone)]
struct CaptureState {
    status: Arc<Mutex<StatusCode>>,
    sender: mpsc::UnboundedSender<Captured>,
}

/// Local HTTP server recording every JSON body posted to it.
///
/// Serves `POST /hook` for webhooks, and the two Discord routes the channel sink uses:
/// `GET /channels/{id}` (only channel `42` exists) and `POST /channels/{id}/messages`.
pub struct CaptureServer {
    pub addr: SocketAddr,
    status: Arc<Mutex<StatusCode>>,
    receiver: mpsc::UnboundedReceiver<Captured>,
}

impl CaptureServer {
    pub async fn start() -> anyhow::Result<Self> {
        let status = Arc::new(Mutex::new(StatusCode::OK));
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = CaptureState { status: status.clone(), sender };

        let app = Router::new()
            .route("/hook", post(record))
            .route("/channels/{id}", get(channel))
            .route("/channels/{id}/messages", post(record))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move { axum::serve(listener, app).await });
        Ok(Self { addr, status, receiver })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Status code answered to every subsequent POST.
    pub fn respond_with(&self, status: StatusCode) {
        *self.status.lock().unwrap() = status;
    }

    pub async fn next(&mut self) -> Captured {
        tokio::time::timeout(std::time::Duration::from_secs(5), self.receiver.recv())
            .await
            .expect("timed out waiting for a request")
            .expect("server stopped")
    }

    pub fn try_next(&mut self) -> Option<Captured> {
        self.receiver.try_recv().ok()
    }
}

async fn record(
    State(state): State<CaptureState>,
    uri: axum::http::Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    let authorization =
        headers.get("authorization").and_then(|value| value.to_str().ok()).map(str::to_owned);
    let _ = state.sender.send(Captured { path: uri.path().to_owned(), authorization, body });
    *state.status.lock().unwrap()
}

async fn channel(Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    if id == "42" {
        Ok(Json(json!({ "id": id, "name": "alerts", "type": 0 })))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}
