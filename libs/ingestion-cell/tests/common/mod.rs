#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use appointment_cell::services::{
    AppointmentBookingService, AvailabilityEngine, ConflictGuard, InMemoryAppointmentStore, InProcessCalendarLock,
};
use ingestion_cell::models::{InboundMessage, SourceType};
use ingestion_cell::services::{
    InMemoryParseErrorStore, IngestionPipeline, LoggingNotifier, ParseErrorService, ParseFailureNotifier,
    ParserRegistry,
};
use patient_cell::services::{IdentityResolver, InMemoryPatientStore, PatientService};
use shared_config::AppConfig;
use shared_database::cache::InMemoryCache;

pub use shared_utils::test_utils::local;

pub struct Harness {
    pub config: AppConfig,
    pub appointments: Arc<InMemoryAppointmentStore>,
    pub patients: Arc<PatientService>,
    pub booking: Arc<AppointmentBookingService>,
    pub parse_error_store: Arc<InMemoryParseErrorStore>,
    pub parse_errors: Arc<ParseErrorService>,
    pub pipeline: Arc<IngestionPipeline>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_notifier(Arc::new(LoggingNotifier))
    }

    pub fn with_notifier(notifier: Arc<dyn ParseFailureNotifier>) -> Self {
        let config = AppConfig::default();
        let appointments = Arc::new(InMemoryAppointmentStore::new());
        let patient_store = Arc::new(InMemoryPatientStore::new());
        let cache = Arc::new(InMemoryCache::new());

        let patients = Arc::new(PatientService::new(patient_store.clone()));
        let identity = Arc::new(IdentityResolver::new(patient_store, cache.clone()));
        let lock = Arc::new(InProcessCalendarLock::new(Duration::from_millis(500)));
        let availability = Arc::new(AvailabilityEngine::new(
            appointments.clone(),
            config.clinic.clone(),
            cache,
            lock.clone(),
            Duration::from_secs(60),
        ));
        let guard = ConflictGuard::new(appointments.clone(), lock, availability, config.booking.max_duration_minutes);
        let booking = Arc::new(AppointmentBookingService::new(
            appointments.clone(),
            guard,
            patients.clone(),
            identity.clone(),
        ));

        let parse_error_store = Arc::new(InMemoryParseErrorStore::new());
        let parse_errors = Arc::new(ParseErrorService::new(parse_error_store.clone(), notifier));

        let pipeline = Arc::new(
            IngestionPipeline::new(
                ParserRegistry::with_builtin_sites().unwrap(),
                identity,
                booking.clone(),
                parse_errors.clone(),
                config.clinic.clone(),
            )
            .unwrap(),
        );

        Self {
            config,
            appointments,
            patients,
            booking,
            parse_error_store,
            parse_errors,
            pipeline,
        }
    }
}

/// 2025-01-10 09:00 at the clinic (UTC+9).
pub fn received_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap()
}

pub fn message(id: &str, from: &str, body: &str) -> InboundMessage {
    InboundMessage {
        message_id: id.to_string(),
        from: from.to_string(),
        subject: "ご予約確認".to_string(),
        body: body.to_string(),
        received_at: received_at(),
        source_type: SourceType::Email,
    }
}

pub const EPARK: &str = "EPARK <noreply@epark.jp>";

pub fn epark_body(time: &str) -> String {
    format!(
        "患者名：山田太郎 様 / 予約日：2025年1月15日（水）/ 予約時間：{} / 診療内容：虫歯治療\n電話番号：090-1234-5678",
        time
    )
}
