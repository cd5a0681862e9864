use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use patient_cell::models::{ContactFields, PatientError};
use shared_models::error::AppError;
use shared_models::TimeInterval;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    /// Clinic-local wall clock.
    pub start_time: NaiveDateTime,
    pub duration_minutes: u32,
    pub treatment_type: TreatmentType,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub source: AppointmentSource,
    pub source_details: Option<SourceDetails>,
    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub discarded_at: Option<DateTime<Utc>>,
}

impl Appointment {
    pub fn end_time(&self) -> NaiveDateTime {
        self.start_time + chrono::Duration::minutes(self.duration_minutes as i64)
    }

    pub fn interval(&self) -> TimeInterval {
        TimeInterval::from_duration(self.start_time, self.duration_minutes)
    }

    pub fn date(&self) -> NaiveDate {
        self.start_time.date()
    }

    /// Occupies the calendar: not cancelled and not soft-deleted.
    pub fn is_active(&self) -> bool {
        self.status != AppointmentStatus::Cancelled && self.discarded_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Proposed,
    Booked,
    Visited,
    Completed,
    Paid,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Proposed => "proposed",
            AppointmentStatus::Booked => "booked",
            AppointmentStatus::Visited => "visited",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Paid => "paid",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentType {
    #[default]
    Consultation,
    Cleaning,
    CavityTreatment,
    Checkup,
    Orthodontics,
    Whitening,
    Extraction,
    PeriodontalTreatment,
    Denture,
    Implant,
}

impl TreatmentType {
    pub const ALL: [TreatmentType; 10] = [
        TreatmentType::Consultation,
        TreatmentType::Cleaning,
        TreatmentType::CavityTreatment,
        TreatmentType::Checkup,
        TreatmentType::Orthodontics,
        TreatmentType::Whitening,
        TreatmentType::Extraction,
        TreatmentType::PeriodontalTreatment,
        TreatmentType::Denture,
        TreatmentType::Implant,
    ];

    pub fn default_duration_minutes(&self) -> u32 {
        match self {
            TreatmentType::Consultation
            | TreatmentType::CavityTreatment
            | TreatmentType::Checkup => 30,
            TreatmentType::Cleaning
            | TreatmentType::PeriodontalTreatment
            | TreatmentType::Denture => 45,
            TreatmentType::Orthodontics
            | TreatmentType::Whitening
            | TreatmentType::Extraction
            | TreatmentType::Implant => 60,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TreatmentType::Consultation => "consultation",
            TreatmentType::Cleaning => "cleaning",
            TreatmentType::CavityTreatment => "cavity_treatment",
            TreatmentType::Checkup => "checkup",
            TreatmentType::Orthodontics => "orthodontics",
            TreatmentType::Whitening => "whitening",
            TreatmentType::Extraction => "extraction",
            TreatmentType::PeriodontalTreatment => "periodontal_treatment",
            TreatmentType::Denture => "denture",
            TreatmentType::Implant => "implant",
        }
    }
}

impl fmt::Display for TreatmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentSource {
    #[default]
    Manual,
    Email,
    Web,
}

/// Where an appointment came from when it was not typed in by staff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceDetails {
    pub message_id: Option<String>,
    pub sender: Option<String>,
    pub matched_site: Option<String>,
    pub site_booking_number: Option<String>,
    pub extraction_confidence: Option<String>,
    /// Start time was already past when the message was ingested.
    #[serde(default)]
    pub past_confirmation: bool,
}

// ==============================================================================
// BOOKING MODELS
// ==============================================================================

/// Fully-resolved booking attempt handed to the conflict guard.
#[derive(Debug, Clone)]
pub struct BookingCandidate {
    pub patient_id: Uuid,
    pub start_time: NaiveDateTime,
    pub duration_minutes: u32,
    pub treatment_type: TreatmentType,
    pub notes: Option<String>,
    pub source: AppointmentSource,
    pub source_details: Option<SourceDetails>,
}

impl BookingCandidate {
    pub fn interval(&self) -> TimeInterval {
        TimeInterval::from_duration(self.start_time, self.duration_minutes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingMode {
    /// Staff or patient facing request; past start times are refused.
    Interactive,
    /// Confirmation relayed by a booking site; past start times are kept and flagged.
    Ingestion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Option<Uuid>,
    pub patient: Option<ContactFields>,
    pub start_time: NaiveDateTime,
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub treatment_type: TreatmentType,
    pub notes: Option<String>,
    pub source: Option<AppointmentSource>,
    pub source_details: Option<SourceDetails>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub start_time: NaiveDateTime,
    pub duration_minutes: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityQuery {
    pub date: NaiveDate,
    pub duration_minutes: Option<u32>,
    pub treatment_type: Option<TreatmentType>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppointmentDayQuery {
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableSlot {
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub label: String,
}

impl AvailableSlot {
    pub fn from_interval(interval: TimeInterval) -> Self {
        Self {
            start_time: interval.start,
            end_time: interval.end,
            label: format!("{}-{}", interval.start.format("%H:%M"), interval.end.format("%H:%M")),
        }
    }

    pub fn interval(&self) -> TimeInterval {
        TimeInterval::new(self.start_time, self.end_time)
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found: {0}")]
    NotFound(Uuid),

    #[error("Patient already has appointment {existing} on {date}")]
    DuplicateBooking { existing: Uuid, date: NaiveDate },

    #[error("Requested time overlaps an existing appointment")]
    SlotConflict { conflicting: Option<Uuid> },

    #[error("Cannot move appointment from {from} to {to}")]
    InvalidTransition { from: AppointmentStatus, to: AppointmentStatus },

    #[error("Appointment in status {0} cannot be cancelled")]
    NotCancellable(AppointmentStatus),

    #[error("Appointment in status {0} cannot be rescheduled")]
    NotReschedulable(AppointmentStatus),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Calendar busy: {0}")]
    Busy(String),

    #[error("Appointment {0} was changed by another request")]
    StaleUpdate(Uuid),

    #[error(transparent)]
    Patient(#[from] PatientError),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        match err {
            AppointmentError::NotFound(_) => AppError::NotFound(err.to_string()),
            AppointmentError::DuplicateBooking { .. } => AppError::conflict("duplicate_booking", err.to_string()),
            AppointmentError::SlotConflict { .. } => AppError::conflict("slot_conflict", err.to_string()),
            AppointmentError::InvalidTransition { .. } => AppError::conflict("invalid_transition", err.to_string()),
            AppointmentError::NotCancellable(_) => AppError::conflict("not_cancellable", err.to_string()),
            AppointmentError::NotReschedulable(_) => AppError::conflict("not_reschedulable", err.to_string()),
            AppointmentError::Validation(msg) => AppError::ValidationError(msg),
            AppointmentError::Busy(msg) => AppError::Busy(msg),
            AppointmentError::StaleUpdate(_) => AppError::conflict("stale_update", err.to_string()),
            AppointmentError::Patient(e) => e.into(),
            AppointmentError::Storage(msg) => AppError::Database(msg),
        }
    }
}
