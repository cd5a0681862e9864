use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use appointment_cell::models::{AppointmentSource, TreatmentType};
use patient_cell::models::ContactFields;
use shared_models::error::AppError;

// ==============================================================================
// INBOUND MESSAGES
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    #[default]
    Email,
    Webhook,
    Imap,
}

impl SourceType {
    pub fn appointment_source(&self) -> AppointmentSource {
        match self {
            SourceType::Email | SourceType::Imap => AppointmentSource::Email,
            SourceType::Webhook => AppointmentSource::Web,
        }
    }
}

/// Already-decoded message handed over by the mail or webhook transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: String,
    pub from: String,
    #[serde(default)]
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub source_type: SourceType,
}

// ==============================================================================
// EXTRACTION
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Name,
    NameKana,
    Email,
    Phone,
    Date,
    Time,
    EndTime,
    Treatment,
    BookingNumber,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Name => "name",
            FieldKind::NameKana => "name_kana",
            FieldKind::Email => "email",
            FieldKind::Phone => "phone",
            FieldKind::Date => "date",
            FieldKind::Time => "time",
            FieldKind::EndTime => "end_time",
            FieldKind::Treatment => "treatment",
            FieldKind::BookingNumber => "booking_number",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which strategy produced a field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "site", rename_all = "snake_case")]
pub enum FieldSource {
    Specific(String),
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Low => "low",
        }
    }
}

/// Structured, not yet validated output of text extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReservationIntent {
    pub name: Option<String>,
    pub name_kana: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub treatment_type: Option<TreatmentType>,
    pub site_booking_number: Option<String>,
}

impl ReservationIntent {
    pub fn has(&self, field: FieldKind) -> bool {
        match field {
            FieldKind::Name => self.name.is_some(),
            FieldKind::NameKana => self.name_kana.is_some(),
            FieldKind::Email => self.email.is_some(),
            FieldKind::Phone => self.phone.is_some(),
            FieldKind::Date => self.date.is_some(),
            FieldKind::Time => self.time.is_some(),
            FieldKind::EndTime => self.end_time.is_some(),
            FieldKind::Treatment => self.treatment_type.is_some(),
            FieldKind::BookingNumber => self.site_booking_number.is_some(),
        }
    }

    pub fn present_fields(&self) -> Vec<FieldKind> {
        ALL_FIELDS.iter().copied().filter(|f| self.has(*f)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.present_fields().is_empty()
    }

    /// Copies `other`'s value into every field still empty here and returns
    /// the fields that were filled.
    pub fn fill_from(&mut self, other: ReservationIntent) -> Vec<FieldKind> {
        let before = self.present_fields();

        fill(&mut self.name, other.name);
        fill(&mut self.name_kana, other.name_kana);
        fill(&mut self.email, other.email);
        fill(&mut self.phone, other.phone);
        fill(&mut self.date, other.date);
        fill(&mut self.time, other.time);
        fill(&mut self.end_time, other.end_time);
        fill(&mut self.treatment_type, other.treatment_type);
        fill(&mut self.site_booking_number, other.site_booking_number);

        self.present_fields()
            .into_iter()
            .filter(|f| !before.contains(f))
            .collect()
    }

    pub fn start_time(&self) -> Option<NaiveDateTime> {
        Some(self.date?.and_time(self.time?))
    }

    /// Length of an explicit `start~end` range, if one was given.
    pub fn duration_minutes(&self) -> Option<u32> {
        let minutes = (self.end_time? - self.time?).num_minutes();
        u32::try_from(minutes).ok().filter(|m| *m > 0)
    }

    pub fn contact_fields(&self) -> ContactFields {
        ContactFields {
            name: self.name.clone(),
            name_kana: self.name_kana.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
        }
    }
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

pub const ALL_FIELDS: [FieldKind; 9] = [
    FieldKind::Name,
    FieldKind::NameKana,
    FieldKind::Email,
    FieldKind::Phone,
    FieldKind::Date,
    FieldKind::Time,
    FieldKind::EndTime,
    FieldKind::Treatment,
    FieldKind::BookingNumber,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExtractionFailure {
    InsufficientData { missing: Vec<FieldKind> },
    UnrecognizedFormat,
}

impl fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionFailure::InsufficientData { missing } => {
                let names: Vec<&str> = missing.iter().map(FieldKind::as_str).collect();
                write!(f, "missing required fields: {}", names.join(", "))
            }
            ExtractionFailure::UnrecognizedFormat => f.write_str("no reservation fields found in message body"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub intent: ReservationIntent,
    pub provenance: BTreeMap<FieldKind, FieldSource>,
    pub confidence: Confidence,
    pub failure: Option<ExtractionFailure>,
}

impl ExtractionResult {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

// ==============================================================================
// PARSE ERRORS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorType {
    InsufficientData,
    UnrecognizedFormat,
    AmbiguousIdentity,
    SlotConflict,
    ValidationFailed,
    BookingBusy,
    StorageFailure,
}

impl ParseErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseErrorType::InsufficientData => "insufficient_data",
            ParseErrorType::UnrecognizedFormat => "unrecognized_format",
            ParseErrorType::AmbiguousIdentity => "ambiguous_identity",
            ParseErrorType::SlotConflict => "slot_conflict",
            ParseErrorType::ValidationFailed => "validation_failed",
            ParseErrorType::BookingBusy => "booking_busy",
            ParseErrorType::StorageFailure => "storage_failure",
        }
    }
}

impl fmt::Display for ParseErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ExtractionFailure> for ParseErrorType {
    fn from(failure: &ExtractionFailure) -> Self {
        match failure {
            ExtractionFailure::InsufficientData { .. } => ParseErrorType::InsufficientData,
            ExtractionFailure::UnrecognizedFormat => ParseErrorType::UnrecognizedFormat,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseErrorMetadata {
    pub sender: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub matched_site: Option<String>,
    pub strategy: String,
    pub extracted: Option<ReservationIntent>,
}

/// Payload handed to the admin notification collaborator; also the creation
/// payload of a [`ParseError`] row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseFailureEvent {
    pub source_type: SourceType,
    pub source_id: String,
    pub error_type: ParseErrorType,
    pub error_message: String,
    pub raw_content: String,
    pub metadata: ParseErrorMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseError {
    pub id: Uuid,
    pub source_type: SourceType,
    pub source_id: String,
    pub error_type: ParseErrorType,
    pub error_message: String,
    pub raw_content: String,
    pub metadata: ParseErrorMetadata,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ParseError {
    pub fn from_event(event: ParseFailureEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_type: event.source_type,
            source_id: event.source_id,
            error_type: event.error_type,
            error_message: event.error_message,
            raw_content: event.raw_content,
            metadata: event.metadata,
            resolved: false,
            resolved_at: None,
            resolved_by: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParseErrorQuery {
    pub resolved: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveParseErrorRequest {
    pub resolved_by: String,
}

// ==============================================================================
// OUTCOMES & ERRORS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestionOutcome {
    Booked {
        appointment_id: Uuid,
        patient_id: Uuid,
        patient_created: bool,
        confidence: Confidence,
    },
    /// The patient already holds an appointment that day; nothing was written.
    DuplicateSkipped {
        existing_appointment_id: Uuid,
        patient_id: Uuid,
    },
    Escalated {
        parse_error_id: Uuid,
        error_type: ParseErrorType,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("Invalid extraction pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Parse error not found: {0}")]
    ParseErrorNotFound(Uuid),

    #[error("Parse error {0} is already resolved")]
    AlreadyResolved(Uuid),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<IngestionError> for AppError {
    fn from(err: IngestionError) -> Self {
        match err {
            IngestionError::ParseErrorNotFound(_) => AppError::NotFound(err.to_string()),
            IngestionError::AlreadyResolved(_) => AppError::conflict("already_resolved", err.to_string()),
            IngestionError::Validation(msg) => AppError::ValidationError(msg),
            IngestionError::Pattern(_) => AppError::Internal(err.to_string()),
            IngestionError::Storage(msg) => AppError::Database(msg),
        }
    }
}
