mod common;

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use ingestion_cell::{ingestion_routes, IngestionState};

use common::{epark_body, received_at, Harness, EPARK};

fn app(h: &Harness) -> Router {
    ingestion_routes(Arc::new(IngestionState {
        pipeline: h.pipeline.clone(),
        parse_errors: h.parse_errors.clone(),
        clinic: h.config.clinic.clone(),
    }))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn posted_confirmation_is_booked() {
    let h = Harness::new();

    let (status, body) = send(
        app(&h),
        post_json(
            "/messages",
            json!({
                "message_id": "hook-1",
                "from": EPARK,
                "body": epark_body("14:30"),
                "received_at": received_at(),
                "source_type": "webhook"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "booked");
    assert_eq!(body["confidence"], "high");
    assert_eq!(h.appointments.count().await, 1);
}

#[tokio::test]
async fn blank_message_id_is_rejected() {
    let h = Harness::new();

    let (status, _) = send(
        app(&h),
        post_json(
            "/messages",
            json!({ "message_id": " ", "from": EPARK, "body": "", "received_at": received_at() }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.parse_error_store.count().await, 0);
}

#[tokio::test]
async fn escalations_can_be_listed_and_resolved() {
    let h = Harness::new();
    let app = app(&h);

    let (status, body) = send(
        app.clone(),
        post_json(
            "/messages",
            json!({
                "message_id": "msg-1",
                "from": "someone@example.com",
                "body": "よろしくお願いいたします",
                "received_at": received_at()
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "escalated");
    assert_eq!(body["error_type"], "unrecognized_format");
    let id = body["parse_error_id"].as_str().unwrap().to_string();

    let (status, open) = send(app.clone(), get("/parse-errors?resolved=false")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(open["total"], 1);
    assert_eq!(open["parse_errors"][0]["metadata"]["strategy"], "generic");

    let resolve_uri = format!("/parse-errors/{}/resolve", id);
    let (status, resolved) = send(app.clone(), post_json(&resolve_uri, json!({ "resolved_by": "staff-1" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["resolved"], true);
    assert_eq!(resolved["resolved_by"], "staff-1");

    let (status, _) = send(app.clone(), post_json(&resolve_uri, json!({ "resolved_by": "staff-2" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, open) = send(app, get("/parse-errors?resolved=false")).await;
    assert_eq!(open["total"], 0);
}

#[tokio::test]
async fn resolving_an_unknown_parse_error_is_not_found() {
    let h = Harness::new();
    let uri = format!("/parse-errors/{}/resolve", Uuid::new_v4());

    let (status, _) = send(app(&h), post_json(&uri, json!({ "resolved_by": "staff-1" }))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
