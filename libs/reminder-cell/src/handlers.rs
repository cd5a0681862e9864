use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::ClinicScheduleConfig;
use shared_models::error::AppError;

use crate::models::MarkFailedRequest;
use crate::services::scheduler::ReminderScheduler;

pub struct ReminderState {
    pub scheduler: Arc<ReminderScheduler>,
    pub clinic: ClinicScheduleConfig,
}

#[axum::debug_handler]
pub async fn list_due_reminders(State(state): State<Arc<ReminderState>>) -> Result<Json<Value>, AppError> {
    let due = state.scheduler.due(state.clinic.clinic_now()).await?;

    Ok(Json(json!({
        "reminders": due,
        "total": due.len()
    })))
}

#[axum::debug_handler]
pub async fn list_appointment_reminders(
    State(state): State<Arc<ReminderState>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let reminders = state.scheduler.reminders_for(appointment_id).await?;

    Ok(Json(json!({
        "reminders": reminders,
        "total": reminders.len()
    })))
}

#[axum::debug_handler]
pub async fn mark_reminder_sent(
    State(state): State<Arc<ReminderState>>,
    Path(reminder_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let reminder = state.scheduler.mark_sent(reminder_id).await?;

    Ok(Json(json!(reminder)))
}

#[axum::debug_handler]
pub async fn mark_reminder_failed(
    State(state): State<Arc<ReminderState>>,
    Path(reminder_id): Path<Uuid>,
    Json(request): Json<MarkFailedRequest>,
) -> Result<Json<Value>, AppError> {
    let reminder = state
        .scheduler
        .mark_failed(reminder_id, request.error, state.clinic.clinic_now())
        .await?;

    Ok(Json(json!(reminder)))
}
