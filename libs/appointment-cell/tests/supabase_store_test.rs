use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::NaiveDate;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::{Appointment, AppointmentError, AppointmentStatus, TreatmentType};
use appointment_cell::services::{AppointmentStore, SupabaseAppointmentStore};
use shared_database::supabase::SupabaseClient;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

fn store_for(server: &MockServer) -> SupabaseAppointmentStore {
    let config = TestConfig::with_supabase_url(&server.uri()).to_app_config();
    SupabaseAppointmentStore::new(Arc::new(SupabaseClient::new(&config)))
}

#[tokio::test]
async fn active_on_queries_one_day_of_live_rows() {
    let server = MockServer::start().await;
    let (id, patient_id) = (Uuid::new_v4(), Uuid::new_v4());

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "neq.cancelled"))
        .and(query_param("discarded_at", "is.null"))
        .and(query_param("order", "start_time.asc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(id, patient_id, "2025-01-15T14:30:00", 30)
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let day = store_for(&server)
        .active_on(NaiveDate::from_ymd_opt(2025, 1, 15).unwrap())
        .await
        .unwrap();

    assert_eq!(day.len(), 1);
    assert_eq!(day[0].id, id);
    assert_eq!(day[0].status, AppointmentStatus::Booked);
    assert_eq!(day[0].treatment_type, TreatmentType::Consultation);
    assert_eq!(day[0].end_time().format("%H:%M").to_string(), "15:00");
}

#[tokio::test]
async fn exclusion_violation_on_insert_is_a_slot_conflict() {
    let server = MockServer::start().await;
    let (id, patient_id) = (Uuid::new_v4(), Uuid::new_v4());

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(id, patient_id, "2025-01-15T14:30:00", 30)
        ])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(header("Prefer", "return=representation"))
        .respond_with(ResponseTemplate::new(409).set_body_json(MockSupabaseResponses::error_response(
            "conflicting key value violates exclusion constraint \"appointments_no_overlap\"",
        )))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let existing = store.get(id).await.unwrap().unwrap();

    let mut clash = existing.clone();
    clash.id = Uuid::new_v4();

    assert_matches!(store.insert(clash).await, Err(AppointmentError::SlotConflict { conflicting: None }));
}

#[tokio::test]
async fn update_is_conditional_on_the_stored_status() {
    let server = MockServer::start().await;
    let (id, patient_id) = (Uuid::new_v4(), Uuid::new_v4());
    let row = MockSupabaseResponses::appointment_row(id, patient_id, "2025-01-15T09:00:00", 30);

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row.clone()])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", id)))
        .and(query_param("status", "eq.booked"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let mut appointment = store.get(id).await.unwrap().unwrap();
    appointment.status = AppointmentStatus::Cancelled;

    // The row still exists, so an empty PATCH means its status moved on.
    assert_matches!(
        store.update(appointment, AppointmentStatus::Booked).await,
        Err(AppointmentError::StaleUpdate(stale)) if stale == id
    );
}

#[tokio::test]
async fn update_of_missing_row_is_not_found() {
    let server = MockServer::start().await;
    let (id, patient_id) = (Uuid::new_v4(), Uuid::new_v4());
    let appointment: Appointment = serde_json::from_value(MockSupabaseResponses::appointment_row(
        id,
        patient_id,
        "2025-01-15T09:00:00",
        30,
    ))
    .unwrap();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let result = store_for(&server).update(appointment, AppointmentStatus::Booked).await;

    assert_matches!(result, Err(AppointmentError::NotFound(missing)) if missing == id);
}
