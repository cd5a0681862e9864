use axum::{routing::get, Router};

use appointment_cell::appointment_routes;
use ingestion_cell::ingestion_routes;
use patient_cell::router::create_patient_router;
use reminder_cell::reminder_routes;

use crate::wiring::AppServices;

pub fn create_router(services: AppServices) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic reservation API is running!" }))
        .nest("/patients", create_patient_router(services.patients))
        .nest("/appointments", appointment_routes(services.appointments))
        .nest("/reminders", reminder_routes(services.reminders))
        .nest("/ingestion", ingestion_routes(services.ingestion))
}
