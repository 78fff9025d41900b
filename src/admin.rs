//! HTTP administration surface of the relay binary.
//!
//! * `GET /status` - JSON [`StatusSnapshot`](crate::StatusSnapshot)
//! * `GET /subscriptions` - current subscription table
//! * `POST /subscriptions` - subscribe a new webhook to a tracked source; `409` when the name is
//!   taken
//! * `DELETE /subscriptions` - remove a `(target, sink)` pair

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::{
    delivery::{SubscriptionId, SubscriptionRouter, SubscriptionTarget},
    error::ConfigError,
    sink::{WebhookFilter, WebhookSink},
    status::StatusReporter,
};

/// Shared state of the admin routes.
#[derive(Debug, Clone)]
pub struct AdminState {
    status: StatusReporter,
    router: SubscriptionRouter,
    client: Client,
}

impl AdminState {
    #[must_use]
    pub fn new(status: StatusReporter, router: SubscriptionRouter) -> Self {
        Self { status, router, client: Client::new() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeRequest {
    pub target: SubscriptionTarget,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub filter: WebhookFilter,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnsubscribeRequest {
    pub target: SubscriptionTarget,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeResponse {
    pub id: SubscriptionId,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn reject(status: StatusCode, error: impl ToString) -> Response {
    (status, Json(ErrorBody { error: error.to_string() })).into_response()
}

/// Builds the admin router.
pub fn routes(state: AdminState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/subscriptions", get(list).post(subscribe).delete(unsubscribe))
        .with_state(state)
}

async fn status(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.status.snapshot())
}

async fn list(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.router.subscriptions())
}

async fn subscribe(
    State(state): State<AdminState>,
    Json(request): Json<SubscribeRequest>,
) -> Response {
    if let SubscriptionTarget::Source(id) = &request.target
        && !state.status.tracks(id)
    {
        return reject(StatusCode::NOT_FOUND, format!("source {id} is not tracked"));
    }

    let url = match Url::parse(&request.url) {
        Ok(url) => url,
        Err(err) => return reject(StatusCode::BAD_REQUEST, format!("invalid url: {err}")),
    };
    let sink =
        WebhookSink::with_client(request.name, url, state.client.clone()).filter(request.filter);
    match state.router.subscribe(request.target, Arc::new(sink)) {
        Ok(id) => (StatusCode::CREATED, Json(SubscribeResponse { id })).into_response(),
        Err(err @ ConfigError::WildcardDisabled) => {
            reject(StatusCode::UNPROCESSABLE_ENTITY, err)
        }
        Err(err @ ConfigError::DuplicateSink(_)) => reject(StatusCode::CONFLICT, err),
        Err(err) => reject(StatusCode::BAD_REQUEST, err),
    }
}

async fn unsubscribe(
    State(state): State<AdminState>,
    Json(request): Json<UnsubscribeRequest>,
) -> Response {
    if state.router.unsubscribe(&request.target, &request.name) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        reject(StatusCode::NOT_FOUND, "no such subscription")
    }
}
