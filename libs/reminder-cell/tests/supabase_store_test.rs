use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use reminder_cell::models::{DeliveryStatus, Reminder, ReminderKind};
use reminder_cell::services::{ReminderStore, SupabaseReminderStore};
use shared_database::supabase::SupabaseClient;
use shared_utils::test_utils::{local, TestConfig};

fn store_for(server: &MockServer) -> SupabaseReminderStore {
    let config = TestConfig::with_supabase_url(&server.uri()).to_app_config();
    SupabaseReminderStore::new(Arc::new(SupabaseClient::new(&config)))
}

fn row(reminder: &Reminder) -> Value {
    serde_json::to_value(reminder).unwrap()
}

#[tokio::test]
async fn insert_reports_created_rows() {
    let server = MockServer::start().await;
    let reminder = Reminder::new(Uuid::new_v4(), ReminderKind::OneDayBefore, local(2030, 1, 15, 10, 0));

    Mock::given(method("POST"))
        .and(path("/rest/v1/reminders"))
        .and(query_param("on_conflict", "appointment_id,kind"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([row(&reminder)])))
        .expect(1)
        .mount(&server)
        .await;

    let (stored, created) = store_for(&server).insert_if_absent(reminder.clone()).await.unwrap();

    assert!(created);
    assert_eq!(stored.id, reminder.id);
    assert_eq!(stored.delivery_status, DeliveryStatus::Pending);
}

#[tokio::test]
async fn ignored_duplicate_returns_the_existing_row() {
    let server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();
    let existing = Reminder::new(appointment_id, ReminderKind::ThreeDaysBefore, local(2030, 1, 13, 10, 0));
    let attempt = Reminder::new(appointment_id, ReminderKind::ThreeDaysBefore, local(2030, 1, 13, 10, 0));

    Mock::given(method("POST"))
        .and(path("/rest/v1/reminders"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/reminders"))
        .and(query_param("appointment_id", format!("eq.{}", appointment_id)))
        .and(query_param("kind", "eq.three_days_before"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row(&existing)])))
        .expect(1)
        .mount(&server)
        .await;

    let (stored, created) = store_for(&server).insert_if_absent(attempt).await.unwrap();

    assert!(!created);
    assert_eq!(stored.id, existing.id);
}

#[tokio::test]
async fn delete_pending_counts_removed_rows() {
    let server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();
    let pending = Reminder::new(appointment_id, ReminderKind::OneDayBefore, local(2030, 1, 15, 10, 0));

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/reminders"))
        .and(query_param("appointment_id", format!("eq.{}", appointment_id)))
        .and(query_param("delivery_status", "eq.pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row(&pending)])))
        .expect(1)
        .mount(&server)
        .await;

    let removed = store_for(&server).delete_pending(appointment_id).await.unwrap();

    assert_eq!(removed, 1);
}

#[tokio::test]
async fn due_filters_on_status_and_retry_time() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/reminders"))
        .and(query_param("delivery_status", "eq.pending"))
        .and(query_param("scheduled_at", "lte.2030-01-15T10:00:00"))
        .and(query_param(
            "or",
            "(next_retry_at.is.null,next_retry_at.lte.2030-01-15T10:00:00)",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let due = store_for(&server).due(local(2030, 1, 15, 10, 0)).await.unwrap();

    assert!(due.is_empty());
}
