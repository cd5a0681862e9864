use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{self, IngestionState};

pub fn ingestion_routes(state: Arc<IngestionState>) -> Router {
    Router::new()
        .route("/messages", post(handlers::ingest_message))
        .route("/parse-errors", get(handlers::list_parse_errors))
        .route("/parse-errors/{parse_error_id}/resolve", post(handlers::resolve_parse_error))
        .with_state(state)
}
