use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ingestion_cell::models::{
    IngestionError, ParseError, ParseErrorMetadata, ParseErrorType, ParseFailureEvent, SourceType,
};
use ingestion_cell::services::{ParseErrorStore, SupabaseParseErrorStore};
use shared_database::supabase::SupabaseClient;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

fn store_for(server: &MockServer) -> SupabaseParseErrorStore {
    let config = TestConfig::with_supabase_url(&server.uri()).to_app_config();
    SupabaseParseErrorStore::new(Arc::new(SupabaseClient::new(&config)))
}

fn record() -> ParseError {
    ParseError::from_event(ParseFailureEvent {
        source_type: SourceType::Email,
        source_id: "msg-1".to_string(),
        error_type: ParseErrorType::InsufficientData,
        error_message: "missing required fields: date".to_string(),
        raw_content: "山田です".to_string(),
        metadata: ParseErrorMetadata {
            sender: "someone@example.com".to_string(),
            subject: "予約".to_string(),
            received_at: Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap(),
            matched_site: None,
            strategy: "generic".to_string(),
            extracted: None,
        },
    })
}

fn row(record: &ParseError) -> Value {
    serde_json::to_value(record).unwrap()
}

#[tokio::test]
async fn insert_returns_the_stored_row() {
    let server = MockServer::start().await;
    let record = record();

    Mock::given(method("POST"))
        .and(path("/rest/v1/parse_errors"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([row(&record)])))
        .expect(1)
        .mount(&server)
        .await;

    let stored = store_for(&server).insert(record.clone()).await.unwrap();

    assert_eq!(stored, record);
}

#[tokio::test]
async fn list_filters_on_resolved_flag() {
    let server = MockServer::start().await;
    let record = record();

    Mock::given(method("GET"))
        .and(path("/rest/v1/parse_errors"))
        .and(query_param("resolved", "is.false"))
        .and(query_param("order", "created_at.desc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row(&record)])))
        .expect(1)
        .mount(&server)
        .await;

    let open = store_for(&server).list(Some(false)).await.unwrap();

    assert_eq!(open.len(), 1);
    assert_eq!(open[0].source_id, "msg-1");
}

#[tokio::test]
async fn update_of_missing_row_is_not_found() {
    let server = MockServer::start().await;
    let record = record();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/parse_errors"))
        .and(query_param("id", format!("eq.{}", record.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let result = store_for(&server).update(record.clone()).await;

    assert!(matches!(result, Err(IngestionError::ParseErrorNotFound(id)) if id == record.id));
}

#[tokio::test]
async fn server_errors_surface_as_storage_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/parse_errors"))
        .respond_with(ResponseTemplate::new(500).set_body_json(MockSupabaseResponses::error_response("boom")))
        .mount(&server)
        .await;

    let result = store_for(&server).list(None).await;

    assert!(matches!(result, Err(IngestionError::Storage(_))));
}
