#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::Notify;
use uuid::Uuid;

use appointment_cell::handlers::AppointmentState;
use appointment_cell::models::{
    Appointment, AppointmentError, AppointmentSource, AppointmentStatus, BookingCandidate, TreatmentType,
};
use appointment_cell::services::{
    AppointmentBookingService, AppointmentStore, AvailabilityEngine, ConflictGuard, InMemoryAppointmentStore,
    InProcessCalendarLock,
};
use patient_cell::models::CreatePatientRequest;
use patient_cell::services::{IdentityResolver, InMemoryPatientStore, PatientService};
use shared_config::AppConfig;
use shared_database::cache::InMemoryCache;

pub use shared_utils::test_utils::local;

/// In-memory store whose next `active_on` call, once armed, parks until
/// `resume` so another request can be run inside the gap.
pub struct GatedStore {
    inner: Arc<InMemoryAppointmentStore>,
    armed: AtomicBool,
    entered: Notify,
    released: Notify,
}

impl GatedStore {
    pub fn new(inner: Arc<InMemoryAppointmentStore>) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(false),
            entered: Notify::new(),
            released: Notify::new(),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub async fn wait_until_parked(&self) {
        self.entered.notified().await;
    }

    pub fn resume(&self) {
        self.released.notify_one();
    }
}

#[async_trait]
impl AppointmentStore for GatedStore {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        self.inner.get(id).await
    }

    async fn active_on(&self, date: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.released.notified().await;
        }
        self.inner.active_on(date).await
    }

    async fn insert(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        self.inner.insert(appointment).await
    }

    async fn update(
        &self,
        appointment: Appointment,
        expected: AppointmentStatus,
    ) -> Result<Appointment, AppointmentError> {
        self.inner.update(appointment, expected).await
    }
}

pub struct TestContext {
    pub config: AppConfig,
    pub appointments: Arc<InMemoryAppointmentStore>,
    pub store: Arc<GatedStore>,
    pub patients: Arc<PatientService>,
    pub cache: Arc<InMemoryCache>,
    pub availability: Arc<AvailabilityEngine>,
    pub booking: Arc<AppointmentBookingService>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let appointments = Arc::new(InMemoryAppointmentStore::new());
        let store = Arc::new(GatedStore::new(appointments.clone()));
        let patient_store = Arc::new(InMemoryPatientStore::new());
        let cache = Arc::new(InMemoryCache::new());

        let patients = Arc::new(PatientService::new(patient_store.clone()));
        let identity = Arc::new(IdentityResolver::new(patient_store, cache.clone()));

        let lock = Arc::new(InProcessCalendarLock::new(Duration::from_millis(config.booking.lock_timeout_ms)));
        let availability = Arc::new(AvailabilityEngine::new(
            store.clone(),
            config.clinic.clone(),
            cache.clone(),
            lock.clone(),
            Duration::from_secs(config.booking.availability_cache_ttl_secs),
        ));
        let guard = ConflictGuard::new(store.clone(), lock, availability.clone(), config.booking.max_duration_minutes);

        let booking = Arc::new(AppointmentBookingService::new(store.clone(), guard, patients.clone(), identity));

        Self {
            config,
            appointments,
            store,
            patients,
            cache,
            availability,
            booking,
        }
    }

    pub fn state(&self) -> Arc<AppointmentState> {
        Arc::new(AppointmentState {
            booking: self.booking.clone(),
            availability: self.availability.clone(),
        })
    }

    pub async fn patient(&self, name: &str) -> Uuid {
        self.patients
            .create_patient(CreatePatientRequest {
                name: name.to_string(),
                ..CreatePatientRequest::default()
            })
            .await
            .unwrap()
            .id
    }
}

pub fn candidate(patient_id: Uuid, start: NaiveDateTime, duration_minutes: u32) -> BookingCandidate {
    BookingCandidate {
        patient_id,
        start_time: start,
        duration_minutes,
        treatment_type: TreatmentType::Consultation,
        notes: None,
        source: AppointmentSource::Manual,
        source_details: None,
    }
}

/// A fixed "now" well before every fixture date.
pub fn before_fixtures() -> NaiveDateTime {
    local(2025, 1, 1, 8, 0)
}
