use crate::kv::{KvCommand, KvStore};
use crate::log::RequestId;
use crate::orchestrator::{AddToLogOutcome, RaftOrchestrator};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Minimal HTTP surface over the example key/value store (§4.8).
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<RaftOrchestrator<KvCommand>>,
    pub store: Arc<KvStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/kv/:key", post(put_key).delete(delete_key).get(get_key))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct PutBody {
    value: String,
    client_id: u64,
    request_serial: u64,
}

#[derive(Deserialize)]
pub struct DedupQuery {
    client_id: u64,
    request_serial: u64,
}

async fn put_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<PutBody>,
) -> (StatusCode, Json<Value>) {
    let id = RequestId { client_id: body.client_id, request_serial: body.request_serial };
    let command = KvCommand::Set { key, value: body.value };
    outcome_response(state.orchestrator.add_to_log(command, id).await)
}

async fn delete_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<DedupQuery>,
) -> (StatusCode, Json<Value>) {
    let id = RequestId { client_id: query.client_id, request_serial: query.request_serial };
    let command = KvCommand::Delete { key };
    outcome_response(state.orchestrator.add_to_log(command, id).await)
}

async fn get_key(State(state): State<AppState>, Path(key): Path<String>) -> (StatusCode, Json<Value>) {
    let sync = state.orchestrator.sync_before_read().await;
    if !sync.is_leader {
        return (StatusCode::CONFLICT, Json(json!({ "error": "not_leader" })));
    }

    match state.store.get(&key).await {
        Some(value) => (StatusCode::OK, Json(json!({ "value": value }))),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "not_found" }))),
    }
}

/// Maps `addToLog`'s three outcomes to the status codes named in §4.8.
fn outcome_response(outcome: AddToLogOutcome) -> (StatusCode, Json<Value>) {
    match outcome {
        AddToLogOutcome::Committed => (StatusCode::OK, Json(json!({ "status": "committed" }))),
        AddToLogOutcome::NotLeader => (StatusCode::CONFLICT, Json(json!({ "error": "not_leader" }))),
        AddToLogOutcome::TimedOut => {
            (StatusCode::GATEWAY_TIMEOUT, Json(json!({ "error": "timed_out" })))
        }
    }
}
