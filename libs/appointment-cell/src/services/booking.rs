use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use patient_cell::services::{IdentityResolver, PatientService};

use crate::models::{
    Appointment, AppointmentError, AppointmentSource, AppointmentStatus, BookAppointmentRequest, BookingCandidate,
    BookingMode, RescheduleAppointmentRequest,
};
use crate::services::conflict::{AppointmentObserver, ConflictGuard};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::store::AppointmentStore;

pub struct AppointmentBookingService {
    store: Arc<dyn AppointmentStore>,
    guard: ConflictGuard,
    patients: Arc<PatientService>,
    identity: Arc<IdentityResolver>,
    lifecycle: AppointmentLifecycleService,
}

impl AppointmentBookingService {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        guard: ConflictGuard,
        patients: Arc<PatientService>,
        identity: Arc<IdentityResolver>,
    ) -> Self {
        Self {
            store,
            guard,
            patients,
            identity,
            lifecycle: AppointmentLifecycleService::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn AppointmentObserver>) -> Self {
        self.guard.add_observer(observer);
        self
    }

    /// Booking API entry point. Resolves the patient, fills in the treatment's
    /// default duration and books interactively.
    #[instrument(skip(self, request), fields(start = %request.start_time))]
    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
        now: NaiveDateTime,
    ) -> Result<Appointment, AppointmentError> {
        let patient_id = match (request.patient_id, request.patient) {
            (Some(id), None) => self.patients.get_patient(id).await?.id,
            (None, Some(contact)) => self.identity.resolve(contact).await?.patient.id,
            (Some(_), Some(_)) => {
                return Err(AppointmentError::Validation(
                    "give either patient_id or patient, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(AppointmentError::Validation("patient_id or patient is required".to_string()))
            }
        };

        let candidate = BookingCandidate {
            patient_id,
            start_time: request.start_time,
            duration_minutes: request
                .duration_minutes
                .unwrap_or_else(|| request.treatment_type.default_duration_minutes()),
            treatment_type: request.treatment_type,
            notes: request.notes,
            source: request.source.unwrap_or(AppointmentSource::Manual),
            source_details: request.source_details,
        };

        self.book_candidate(candidate, BookingMode::Interactive, now).await
    }

    /// Shared by the Booking API and message ingestion once the patient is known.
    pub async fn book_candidate(
        &self,
        candidate: BookingCandidate,
        mode: BookingMode,
        now: NaiveDateTime,
    ) -> Result<Appointment, AppointmentError> {
        self.guard.book(candidate, mode, now).await
    }

    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        reason: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        self.guard
            .change_status(appointment_id, |appointment| {
                self.lifecycle.cancel(appointment, reason.clone())
            })
            .await
    }

    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
    ) -> Result<Appointment, AppointmentError> {
        if new_status == AppointmentStatus::Cancelled {
            return self.cancel_appointment(appointment_id, None).await;
        }

        self.guard
            .change_status(appointment_id, |appointment| {
                self.lifecycle.apply_transition(appointment, new_status)
            })
            .await
    }

    pub async fn reschedule_appointment(
        &self,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
        now: NaiveDateTime,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Rescheduling appointment {} to {}", appointment_id, request.start_time);

        let moved = self
            .guard
            .move_appointment(appointment_id, request.start_time, request.duration_minutes, now)
            .await?;

        info!("Appointment {} rescheduled to {}", moved.id, moved.start_time);
        Ok(moved)
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store
            .get(appointment_id)
            .await?
            .filter(|a| a.discarded_at.is_none())
            .ok_or(AppointmentError::NotFound(appointment_id))
    }

    pub async fn appointments_on(&self, date: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        self.store.active_on(date).await
    }
}
