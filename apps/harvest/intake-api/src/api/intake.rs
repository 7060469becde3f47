//! Intake handler: decode, validate, assign an execution id, enqueue.
//!
//! Response contract:
//! - `202 Accepted` with plain text once the request is on the bus
//! - `400` for malformed JSON or negative ids
//! - `503` when the bus is unavailable (transient budget spent, missing
//!   stream)
//! - `500` for permanent publish failures

use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use domain_collection::CollectRequest;
use std::time::Duration;
use stream_bus::BusError;
use tracing::{error, info, warn};

/// Hard deadline for one publish, retries included.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(120);

pub async fn enqueue_request(
    State(state): State<AppState>,
    payload: Result<Json<CollectRequest>, JsonRejection>,
) -> Response {
    let Json(mut request) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("Invalid request: {}\n", rejection.body_text()),
            )
                .into_response();
        }
    };

    if let Err(e) = request.validate() {
        return (StatusCode::BAD_REQUEST, format!("Invalid request: {}\n", e)).into_response();
    }

    let execution_id = request.ensure_execution_id();

    let publish = tokio::time::timeout(
        PUBLISH_TIMEOUT,
        state.producer.publish(&execution_id.to_string(), &request),
    )
    .await;

    match publish {
        Ok(Ok(message_id)) => {
            info!(
                hostid = request.hostid,
                scriptid = request.scriptid,
                execution_id = %execution_id,
                message_id = %message_id,
                "Request queued"
            );
            (StatusCode::ACCEPTED, "Request accepted and queued\n").into_response()
        }
        Ok(Err(e)) => match e {
            BusError::Unavailable(_) => {
                warn!(execution_id = %execution_id, error = %e, "Bus unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service temporarily unavailable\n",
                )
                    .into_response()
            }
            e if e.is_nogroup_error() => {
                warn!(execution_id = %execution_id, error = %e, "Request stream missing");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service temporarily unavailable\n",
                )
                    .into_response()
            }
            e => {
                error!(execution_id = %execution_id, error = %e, "Failed to process request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to process request\n",
                )
                    .into_response()
            }
        },
        Err(_) => {
            warn!(execution_id = %execution_id, "Publish deadline exceeded");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable\n",
            )
                .into_response()
        }
    }
}

/// Liveness probe.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}
