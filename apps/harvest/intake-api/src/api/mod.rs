//! HTTP routes for the intake API.

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;

mod intake;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/datacollectorProducer", post(intake::enqueue_request))
        .route("/health", get(intake::health))
        .with_state(state)
}
