use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::ClinicScheduleConfig;
use shared_models::error::AppError;

use crate::models::{InboundMessage, ParseErrorQuery, ResolveParseErrorRequest};
use crate::services::parse_errors::ParseErrorService;
use crate::services::pipeline::IngestionPipeline;

pub struct IngestionState {
    pub pipeline: Arc<IngestionPipeline>,
    pub parse_errors: Arc<ParseErrorService>,
    pub clinic: ClinicScheduleConfig,
}

/// Webhook entry point for a decoded confirmation message.
#[axum::debug_handler]
pub async fn ingest_message(
    State(state): State<Arc<IngestionState>>,
    Json(message): Json<InboundMessage>,
) -> Result<Json<Value>, AppError> {
    if message.message_id.trim().is_empty() {
        return Err(AppError::ValidationError("message_id is required".to_string()));
    }

    let outcome = state.pipeline.process(&message, state.clinic.clinic_now()).await?;

    Ok(Json(json!(outcome)))
}

#[axum::debug_handler]
pub async fn list_parse_errors(
    State(state): State<Arc<IngestionState>>,
    Query(query): Query<ParseErrorQuery>,
) -> Result<Json<Value>, AppError> {
    let errors = state.parse_errors.list(query.resolved).await?;

    Ok(Json(json!({
        "parse_errors": errors,
        "total": errors.len()
    })))
}

#[axum::debug_handler]
pub async fn resolve_parse_error(
    State(state): State<Arc<IngestionState>>,
    Path(parse_error_id): Path<Uuid>,
    Json(request): Json<ResolveParseErrorRequest>,
) -> Result<Json<Value>, AppError> {
    let resolved = state
        .parse_errors
        .resolve(parse_error_id, request.resolved_by)
        .await?;

    Ok(Json(json!(resolved)))
}
