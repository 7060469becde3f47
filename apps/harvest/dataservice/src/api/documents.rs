//! Graph document storage.
//!
//! One document per `(hostId, executionId)`, id `"_<hostId>_<executionId>"`,
//! upsert with overwrite. Overwriting on collision is what makes bus
//! redeliveries and pool retries safe.

use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use mongodb::bson;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

/// Incoming graph envelope, as serialized by the collector.
#[derive(Debug, Deserialize)]
pub struct GraphDocument {
    pub config: Value,
    pub hostconfig: Value,
    pub uuid: Uuid,
    pub rootnode: Value,
}

impl GraphDocument {
    /// Envelope checks; the collector validated the graph itself before
    /// execution.
    fn validate(&self) -> Result<i64, String> {
        let host_id = self
            .hostconfig
            .get("hostId")
            .and_then(Value::as_i64)
            .ok_or_else(|| "hostconfig.hostId missing or not an integer".to_string())?;

        match self.rootnode.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => Ok(host_id),
            _ => Err("rootnode.id missing or empty".to_string()),
        }
    }

    fn document_id(&self, host_id: i64) -> String {
        format!("_{}_{}", host_id, self.uuid)
    }
}

pub async fn store_graph(
    State(state): State<AppState>,
    payload: Result<Json<GraphDocument>, JsonRejection>,
) -> Response {
    let Json(graph) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("Invalid request: {}\n", rejection.body_text()),
            )
                .into_response();
        }
    };

    let host_id = match graph.validate() {
        Ok(host_id) => host_id,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Validation failed", "details": e })),
            )
                .into_response();
        }
    };

    let doc_id = graph.document_id(host_id);

    let body = json!({
        "config": graph.config,
        "hostconfig": graph.hostconfig,
        "uuid": graph.uuid.to_string(),
        "rootnode": graph.rootnode,
        "executedAt": Utc::now().to_rfc3339(),
    });

    let mut document = match bson::to_document(&body) {
        Ok(document) => document,
        Err(e) => {
            error!(doc_id = %doc_id, error = %e, "Failed to convert graph to BSON");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Storage failed\n").into_response();
        }
    };
    document.insert("_id", doc_id.as_str());

    let result = state
        .collection
        .replace_one(bson::doc! { "_id": doc_id.as_str() }, document)
        .upsert(true)
        .await;

    match result {
        Ok(_) => {
            info!(doc_id = %doc_id, execution_id = %graph.uuid, "Graph document stored");
            (StatusCode::OK, Json(json!({ "stored": doc_id }))).into_response()
        }
        Err(e) => {
            error!(doc_id = %doc_id, error = %e, "Failed saving to MongoDB");
            (StatusCode::INTERNAL_SERVER_ERROR, "Storage failed\n").into_response()
        }
    }
}

/// Liveness probe.
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}
