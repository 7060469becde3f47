//! HTTP routes for the dataservice.

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;

mod documents;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/dataservice", post(documents::store_graph))
        .route("/health", get(documents::health))
        .with_state(state)
}
