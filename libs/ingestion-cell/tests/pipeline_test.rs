mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::NaiveDate;
use mockall::mock;

use appointment_cell::models::{AppointmentSource, BookingCandidate, BookingMode, TreatmentType};
use ingestion_cell::models::{Confidence, IngestionOutcome, ParseErrorType, ParseFailureEvent, SourceType};
use ingestion_cell::services::ParseFailureNotifier;
use patient_cell::models::CreatePatientRequest;

use common::{epark_body, local, message, Harness, EPARK};

mock! {
    pub Notifier {}

    #[async_trait::async_trait]
    impl ParseFailureNotifier for Notifier {
        async fn notify(&self, event: &ParseFailureEvent) -> anyhow::Result<()>;
    }
}

fn now() -> chrono::NaiveDateTime {
    local(2025, 1, 10, 9, 0)
}

#[tokio::test]
async fn site_confirmation_books_with_high_confidence() {
    let h = Harness::new();

    let outcome = h
        .pipeline
        .process(&message("msg-1", EPARK, &epark_body("14:30")), now())
        .await
        .unwrap();

    let appointment_id = assert_matches!(
        outcome,
        IngestionOutcome::Booked { appointment_id, patient_created: true, confidence: Confidence::High, .. } => appointment_id
    );

    let appointment = h.booking.get_appointment(appointment_id).await.unwrap();
    assert_eq!(appointment.start_time, local(2025, 1, 15, 14, 30));
    assert_eq!(appointment.treatment_type, TreatmentType::CavityTreatment);
    assert_eq!(appointment.duration_minutes, TreatmentType::CavityTreatment.default_duration_minutes());
    assert_eq!(appointment.source, AppointmentSource::Email);

    let details = appointment.source_details.unwrap();
    assert_eq!(details.message_id.as_deref(), Some("msg-1"));
    assert_eq!(details.matched_site.as_deref(), Some("epark"));
    assert_eq!(details.extraction_confidence.as_deref(), Some("high"));
    assert!(!details.past_confirmation);
}

#[tokio::test]
async fn second_message_for_the_same_day_is_skipped() {
    let h = Harness::new();

    let first = h
        .pipeline
        .process(&message("msg-1", EPARK, &epark_body("14:30")), now())
        .await
        .unwrap();
    let first_id = assert_matches!(first, IngestionOutcome::Booked { appointment_id, .. } => appointment_id);

    let second = h
        .pipeline
        .process(&message("msg-2", EPARK, &epark_body("16:00")), now())
        .await
        .unwrap();

    assert_matches!(
        second,
        IngestionOutcome::DuplicateSkipped { existing_appointment_id, .. } if existing_appointment_id == first_id
    );
    assert_eq!(h.appointments.count().await, 1);
    assert_eq!(h.parse_error_store.count().await, 0);
}

#[tokio::test]
async fn unknown_sender_without_a_date_is_escalated() {
    let h = Harness::new();
    let body = "山田です。電話 090-1111-2222";

    let outcome = h
        .pipeline
        .process(&message("msg-3", "someone@unknown-clinic.example", body), now())
        .await
        .unwrap();

    assert_matches!(
        outcome,
        IngestionOutcome::Escalated { error_type: ParseErrorType::InsufficientData, .. }
    );
    assert_eq!(h.appointments.count().await, 0);

    let errors = h.parse_errors.list(None).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_type, ParseErrorType::InsufficientData);
    assert_eq!(errors[0].source_id, "msg-3");
    assert_eq!(errors[0].raw_content, body);
    assert_eq!(errors[0].metadata.strategy, "generic");
    assert_eq!(errors[0].metadata.matched_site, None);
    assert!(!errors[0].resolved);
}

#[tokio::test]
async fn generic_success_without_a_time_is_escalated() {
    let h = Harness::new();

    let outcome = h
        .pipeline
        .process(&message("msg-4", "taro@example.com", "taro@example.com\n1月20日に伺います"), now())
        .await
        .unwrap();

    assert_matches!(
        outcome,
        IngestionOutcome::Escalated { error_type: ParseErrorType::InsufficientData, .. }
    );
    let errors = h.parse_errors.list(Some(false)).await.unwrap();
    let extracted = errors[0].metadata.extracted.as_ref().unwrap();
    assert_eq!(extracted.date, NaiveDate::from_ymd_opt(2025, 1, 20));
    assert!(errors[0].error_message.contains("time"));
}

#[tokio::test]
async fn unknown_contact_without_a_name_is_escalated() {
    let h = Harness::new();

    let outcome = h
        .pipeline
        .process(
            &message("msg-10", "taro@example.com", "taro@example.com\n1月20日 14:00に伺います"),
            now(),
        )
        .await
        .unwrap();

    assert_matches!(
        outcome,
        IngestionOutcome::Escalated { error_type: ParseErrorType::ValidationFailed, .. }
    );
    assert_eq!(h.appointments.count().await, 0);

    let errors = h.parse_errors.list(Some(false)).await.unwrap();
    let extracted = errors[0].metadata.extracted.as_ref().unwrap();
    assert_eq!(extracted.email.as_deref(), Some("taro@example.com"));
    assert_eq!(extracted.name, None);
}

#[tokio::test]
async fn contradicting_contacts_are_escalated() {
    let h = Harness::new();
    h.patients
        .create_patient(CreatePatientRequest {
            name: "山田太郎".to_string(),
            email: Some("taro@example.com".to_string()),
            ..CreatePatientRequest::default()
        })
        .await
        .unwrap();
    h.patients
        .create_patient(CreatePatientRequest {
            name: "山田花子".to_string(),
            phone: Some("09012345678".to_string()),
            ..CreatePatientRequest::default()
        })
        .await
        .unwrap();

    let body = format!("{}\nメールアドレス：taro@example.com", epark_body("14:30"));
    let outcome = h.pipeline.process(&message("msg-5", EPARK, &body), now()).await.unwrap();

    assert_matches!(
        outcome,
        IngestionOutcome::Escalated { error_type: ParseErrorType::AmbiguousIdentity, .. }
    );
    assert_eq!(h.appointments.count().await, 0);
}

#[tokio::test]
async fn overlapping_slot_is_escalated() {
    let h = Harness::new();
    let other = h
        .patients
        .create_patient(CreatePatientRequest {
            name: "佐藤花子".to_string(),
            ..CreatePatientRequest::default()
        })
        .await
        .unwrap();
    h.booking
        .book_candidate(
            BookingCandidate {
                patient_id: other.id,
                start_time: local(2025, 1, 15, 14, 0),
                duration_minutes: 60,
                treatment_type: TreatmentType::Checkup,
                notes: None,
                source: AppointmentSource::Manual,
                source_details: None,
            },
            BookingMode::Interactive,
            now(),
        )
        .await
        .unwrap();

    let outcome = h
        .pipeline
        .process(&message("msg-6", EPARK, &epark_body("14:30")), now())
        .await
        .unwrap();

    assert_matches!(
        outcome,
        IngestionOutcome::Escalated { error_type: ParseErrorType::SlotConflict, .. }
    );
    assert_eq!(h.appointments.count().await, 1);
}

#[tokio::test]
async fn past_confirmations_are_kept_and_flagged() {
    let h = Harness::new();

    let outcome = h
        .pipeline
        .process(&message("msg-7", EPARK, &epark_body("14:30")), local(2025, 1, 16, 9, 0))
        .await
        .unwrap();

    let appointment_id = assert_matches!(outcome, IngestionOutcome::Booked { appointment_id, .. } => appointment_id);
    let appointment = h.booking.get_appointment(appointment_id).await.unwrap();
    assert!(appointment.source_details.unwrap().past_confirmation);
}

#[tokio::test]
async fn webhook_messages_are_tagged_as_web() {
    let h = Harness::new();
    let mut webhook = message("hook-1", EPARK, &epark_body("10:00"));
    webhook.source_type = SourceType::Webhook;

    let outcome = h.pipeline.process(&webhook, now()).await.unwrap();

    let appointment_id = assert_matches!(outcome, IngestionOutcome::Booked { appointment_id, .. } => appointment_id);
    let appointment = h.booking.get_appointment(appointment_id).await.unwrap();
    assert_eq!(appointment.source, AppointmentSource::Web);
}

#[tokio::test]
async fn notifier_receives_every_escalation() {
    let mut notifier = MockNotifier::new();
    notifier
        .expect_notify()
        .withf(|event: &ParseFailureEvent| {
            event.error_type == ParseErrorType::UnrecognizedFormat && event.source_id == "msg-8"
        })
        .times(1)
        .returning(|_| Ok(()));
    let h = Harness::with_notifier(Arc::new(notifier));

    let outcome = h
        .pipeline
        .process(&message("msg-8", "someone@example.com", "よろしくお願いいたします"), now())
        .await
        .unwrap();

    assert_matches!(
        outcome,
        IngestionOutcome::Escalated { error_type: ParseErrorType::UnrecognizedFormat, .. }
    );
}

#[tokio::test]
async fn notifier_failure_keeps_the_parse_error() {
    let mut notifier = MockNotifier::new();
    notifier
        .expect_notify()
        .times(1)
        .returning(|_| Err(anyhow::anyhow!("mail relay unavailable")));
    let h = Harness::with_notifier(Arc::new(notifier));

    let outcome = h
        .pipeline
        .process(&message("msg-9", "someone@example.com", ""), now())
        .await
        .unwrap();

    assert_matches!(outcome, IngestionOutcome::Escalated { .. });
    assert_eq!(h.parse_error_store.count().await, 1);
}
