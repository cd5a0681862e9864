use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{info, instrument, warn};

use appointment_cell::models::{AppointmentError, BookingCandidate, BookingMode, SourceDetails};
use appointment_cell::services::AppointmentBookingService;
use patient_cell::models::PatientError;
use patient_cell::services::IdentityResolver;
use shared_config::ClinicScheduleConfig;

use crate::models::{
    ExtractionFailure, FieldKind, InboundMessage, IngestionError, IngestionOutcome, ParseErrorMetadata,
    ParseErrorType, ParseFailureEvent, ReservationIntent,
};
use crate::services::extractor::TextExtractor;
use crate::services::parse_errors::ParseErrorService;
use crate::services::registry::{ParserRegistry, StrategySelection};

/// Turns one inbound confirmation message into an appointment, a no-op skip,
/// or a parse error for staff review.
pub struct IngestionPipeline {
    registry: ParserRegistry,
    extractor: TextExtractor,
    identity: Arc<IdentityResolver>,
    booking: Arc<AppointmentBookingService>,
    parse_errors: Arc<ParseErrorService>,
    clinic: ClinicScheduleConfig,
}

/// Reason a message could not be booked, carried to the escalation step.
struct Escalation {
    error_type: ParseErrorType,
    message: String,
    extracted: Option<ReservationIntent>,
}

impl Escalation {
    fn new(error_type: ParseErrorType, message: impl Into<String>, extracted: Option<ReservationIntent>) -> Self {
        Self {
            error_type,
            message: message.into(),
            extracted,
        }
    }
}

impl IngestionPipeline {
    pub fn new(
        registry: ParserRegistry,
        identity: Arc<IdentityResolver>,
        booking: Arc<AppointmentBookingService>,
        parse_errors: Arc<ParseErrorService>,
        clinic: ClinicScheduleConfig,
    ) -> Result<Self, IngestionError> {
        Ok(Self {
            registry,
            extractor: TextExtractor::new()?,
            identity,
            booking,
            parse_errors,
            clinic,
        })
    }

    /// Only a failure to record an escalation is returned as `Err`; every other
    /// problem with the message ends in [`IngestionOutcome::Escalated`].
    #[instrument(skip(self, message), fields(message_id = %message.message_id, from = %message.from))]
    pub async fn process(
        &self,
        message: &InboundMessage,
        now: NaiveDateTime,
    ) -> Result<IngestionOutcome, IngestionError> {
        let selection = self.registry.select(&message.from);
        if selection.strategy.site().is_none() {
            warn!(
                "No site profile for sender domain {:?}, using generic extraction",
                selection.sender_domain
            );
        }

        match self.book_message(message, &selection, now).await {
            Ok(outcome) => Ok(outcome),
            Err(escalation) => self.escalate(message, &selection, escalation).await,
        }
    }

    async fn book_message(
        &self,
        message: &InboundMessage,
        selection: &StrategySelection,
        now: NaiveDateTime,
    ) -> Result<IngestionOutcome, Escalation> {
        let anchor = self.clinic.to_clinic_local(message.received_at).date();
        let extraction = self.extractor.extract(&message.body, anchor, &selection.strategy);

        if let Some(failure) = &extraction.failure {
            return Err(Escalation::new(
                ParseErrorType::from(failure),
                failure.to_string(),
                (!extraction.intent.is_empty()).then(|| extraction.intent.clone()),
            ));
        }

        let intent = extraction.intent;
        let Some(start_time) = intent.start_time() else {
            let missing = [FieldKind::Date, FieldKind::Time]
                .into_iter()
                .filter(|f| !intent.has(*f))
                .collect();
            let failure = ExtractionFailure::InsufficientData { missing };
            return Err(Escalation::new(
                ParseErrorType::from(&failure),
                failure.to_string(),
                Some(intent),
            ));
        };

        let resolution = match self.identity.resolve(intent.contact_fields()).await {
            Ok(resolution) => resolution,
            Err(e) => {
                let error_type = match &e {
                    PatientError::AmbiguousIdentity { .. } => ParseErrorType::AmbiguousIdentity,
                    PatientError::Validation(_) => ParseErrorType::ValidationFailed,
                    _ => ParseErrorType::StorageFailure,
                };
                return Err(Escalation::new(error_type, e.to_string(), Some(intent)));
            }
        };
        let patient_id = resolution.patient.id;

        let treatment_type = intent.treatment_type.unwrap_or_default();
        let candidate = BookingCandidate {
            patient_id,
            start_time,
            duration_minutes: intent
                .duration_minutes()
                .unwrap_or_else(|| treatment_type.default_duration_minutes()),
            treatment_type,
            notes: None,
            source: message.source_type.appointment_source(),
            source_details: Some(SourceDetails {
                message_id: Some(message.message_id.clone()),
                sender: Some(message.from.clone()),
                matched_site: selection.strategy.site().map(|site| site.key.clone()),
                site_booking_number: intent.site_booking_number.clone(),
                extraction_confidence: Some(extraction.confidence.as_str().to_string()),
                past_confirmation: false,
            }),
        };

        match self.booking.book_candidate(candidate, BookingMode::Ingestion, now).await {
            Ok(appointment) => {
                info!(
                    "Booked appointment {} for patient {} from message {} ({} confidence)",
                    appointment.id,
                    patient_id,
                    message.message_id,
                    extraction.confidence.as_str()
                );
                Ok(IngestionOutcome::Booked {
                    appointment_id: appointment.id,
                    patient_id,
                    patient_created: resolution.created,
                    confidence: extraction.confidence,
                })
            }
            Err(AppointmentError::DuplicateBooking { existing, date }) => {
                info!(
                    "Patient {} already booked on {} (appointment {}), skipping message {}",
                    patient_id, date, existing, message.message_id
                );
                Ok(IngestionOutcome::DuplicateSkipped {
                    existing_appointment_id: existing,
                    patient_id,
                })
            }
            Err(e) => {
                let error_type = match &e {
                    AppointmentError::SlotConflict { .. } => ParseErrorType::SlotConflict,
                    AppointmentError::Validation(_) => ParseErrorType::ValidationFailed,
                    AppointmentError::Busy(_) => ParseErrorType::BookingBusy,
                    _ => ParseErrorType::StorageFailure,
                };
                Err(Escalation::new(error_type, e.to_string(), Some(intent)))
            }
        }
    }

    async fn escalate(
        &self,
        message: &InboundMessage,
        selection: &StrategySelection,
        escalation: Escalation,
    ) -> Result<IngestionOutcome, IngestionError> {
        warn!(
            "Escalating message {} as {}: {}",
            message.message_id, escalation.error_type, escalation.message
        );

        let event = ParseFailureEvent {
            source_type: message.source_type,
            source_id: message.message_id.clone(),
            error_type: escalation.error_type,
            error_message: escalation.message,
            raw_content: message.body.clone(),
            metadata: ParseErrorMetadata {
                sender: message.from.clone(),
                subject: message.subject.clone(),
                received_at: message.received_at,
                matched_site: selection.strategy.site().map(|site| site.key.clone()),
                strategy: selection.strategy.name(),
                extracted: escalation.extracted,
            },
        };

        let record = self.parse_errors.record(event).await?;
        Ok(IngestionOutcome::Escalated {
            parse_error_id: record.id,
            error_type: record.error_type,
        })
    }
}
