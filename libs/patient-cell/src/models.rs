use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::error::AppError;
use shared_utils::normalize::{normalize_email, normalize_phone, strip_honorific};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub name: String,
    pub name_kana: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub external_messaging_id: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub address: Option<String>,
    pub insurance_info: Option<String>,
    pub notes: Option<String>,
    pub merged_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub discarded_at: Option<DateTime<Utc>>,
}

impl Patient {
    pub fn from_request(request: CreatePatientRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: request.name,
            name_kana: request.name_kana,
            email: request.email,
            phone: request.phone,
            external_messaging_id: request.external_messaging_id,
            birth_date: request.birth_date,
            address: request.address,
            insurance_info: request.insurance_info,
            notes: request.notes,
            merged_to: None,
            created_at: now,
            updated_at: now,
            discarded_at: None,
        }
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded_at.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePatientRequest {
    pub name: String,
    pub name_kana: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub external_messaging_id: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub address: Option<String>,
    pub insurance_info: Option<String>,
    pub notes: Option<String>,
}

impl CreatePatientRequest {
    /// Canonical contact forms; blank optional values become `None`.
    pub fn normalized(self) -> Self {
        Self {
            name: strip_honorific(&self.name),
            name_kana: non_blank(self.name_kana),
            email: non_blank(self.email).map(|e| normalize_email(&e)),
            phone: non_blank(self.phone).map(|p| normalize_phone(&p)).filter(|p| !p.is_empty()),
            external_messaging_id: non_blank(self.external_messaging_id),
            birth_date: self.birth_date,
            address: non_blank(self.address),
            insurance_info: non_blank(self.insurance_info),
            notes: non_blank(self.notes),
        }
    }

    pub fn validate(&self) -> Result<(), PatientError> {
        if self.name.trim().is_empty() {
            return Err(PatientError::Validation("name is required".to_string()));
        }
        if let Some(email) = &self.email {
            if !email.contains('@') {
                return Err(PatientError::Validation(format!("invalid email address: {}", email)));
            }
        }
        Ok(())
    }
}

/// Contact details as they arrive from a booking request or a parsed message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactFields {
    pub name: Option<String>,
    pub name_kana: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl ContactFields {
    pub fn normalized_email(&self) -> Option<String> {
        self.email
            .as_deref()
            .map(normalize_email)
            .filter(|email| !email.is_empty())
    }

    pub fn normalized_phone(&self) -> Option<String> {
        self.phone
            .as_deref()
            .map(normalize_phone)
            .filter(|phone| !phone.is_empty())
    }

    pub fn has_contact(&self) -> bool {
        self.normalized_email().is_some() || self.normalized_phone().is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentityResolution {
    pub patient: Patient,
    pub created: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientSearchQuery {
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PatientError {
    #[error("Patient not found: {0}")]
    NotFound(Uuid),

    #[error("Email matches patient {email_match} but phone matches patient {phone_match}")]
    AmbiguousIdentity { email_match: Uuid, phone_match: Uuid },

    #[error("A patient with this {0} already exists")]
    Duplicate(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<PatientError> for AppError {
    fn from(err: PatientError) -> Self {
        match err {
            PatientError::NotFound(_) => AppError::NotFound(err.to_string()),
            PatientError::AmbiguousIdentity { .. } => AppError::conflict("ambiguous_identity", err.to_string()),
            PatientError::Duplicate(_) => AppError::conflict("duplicate_patient", err.to_string()),
            PatientError::Validation(msg) => AppError::ValidationError(msg),
            PatientError::Storage(msg) => AppError::Database(msg),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
