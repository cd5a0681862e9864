use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{self, ReminderState};

pub fn reminder_routes(state: Arc<ReminderState>) -> Router {
    Router::new()
        .route("/due", get(handlers::list_due_reminders))
        .route("/appointment/{appointment_id}", get(handlers::list_appointment_reminders))
        .route("/{reminder_id}/sent", post(handlers::mark_reminder_sent))
        .route("/{reminder_id}/failed", post(handlers::mark_reminder_failed))
        .with_state(state)
}
