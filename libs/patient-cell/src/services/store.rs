use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::{SupabaseClient, SupabaseError};

use crate::models::{Patient, PatientError};

/// Persistence port for patient rows.
///
/// `find_by_*` only ever return live (non-discarded) patients. `insert` reports a
/// unique violation on email, phone or messaging id as [`PatientError::Duplicate`].
#[async_trait]
pub trait PatientStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Patient>, PatientError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Patient>, PatientError>;

    async fn find_by_phone(&self, phone: &str) -> Result<Option<Patient>, PatientError>;

    async fn insert(&self, patient: Patient) -> Result<Patient, PatientError>;
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

#[derive(Default)]
pub struct InMemoryPatientStore {
    patients: RwLock<HashMap<Uuid, Patient>>,
}

impl InMemoryPatientStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.patients.read().await.len()
    }

    pub async fn all(&self) -> Vec<Patient> {
        self.patients.read().await.values().cloned().collect()
    }
}

fn same_value(a: &Option<String>, b: &Option<String>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}

#[async_trait]
impl PatientStore for InMemoryPatientStore {
    async fn get(&self, id: Uuid) -> Result<Option<Patient>, PatientError> {
        Ok(self.patients.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Patient>, PatientError> {
        let patients = self.patients.read().await;
        Ok(patients
            .values()
            .find(|p| !p.is_discarded() && p.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<Patient>, PatientError> {
        let patients = self.patients.read().await;
        Ok(patients
            .values()
            .find(|p| !p.is_discarded() && p.phone.as_deref() == Some(phone))
            .cloned())
    }

    async fn insert(&self, patient: Patient) -> Result<Patient, PatientError> {
        let mut patients = self.patients.write().await;

        for existing in patients.values().filter(|p| !p.is_discarded()) {
            if same_value(&existing.email, &patient.email) {
                return Err(PatientError::Duplicate("email".to_string()));
            }
            if same_value(&existing.phone, &patient.phone) {
                return Err(PatientError::Duplicate("phone".to_string()));
            }
            if same_value(&existing.external_messaging_id, &patient.external_messaging_id) {
                return Err(PatientError::Duplicate("messaging id".to_string()));
            }
        }

        patients.insert(patient.id, patient.clone());
        Ok(patient)
    }
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

pub struct SupabasePatientStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabasePatientStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<Patient>, PatientError> {
        let path = format!(
            "/rest/v1/patients?{}=eq.{}&discarded_at=is.null&limit=1",
            column,
            urlencoding::encode(value)
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(storage_error)?;

        rows.into_iter().next().map(decode_patient).transpose()
    }
}

fn storage_error(err: SupabaseError) -> PatientError {
    match err {
        SupabaseError::Conflict(msg) => PatientError::Duplicate(unique_column(&msg).to_string()),
        other => PatientError::Storage(other.to_string()),
    }
}

/// Best-effort column name from a PostgREST unique violation message.
fn unique_column(message: &str) -> &'static str {
    if message.contains("email") {
        "email"
    } else if message.contains("phone") {
        "phone"
    } else if message.contains("messaging") {
        "messaging id"
    } else {
        "contact"
    }
}

fn decode_patient(row: Value) -> Result<Patient, PatientError> {
    serde_json::from_value(row).map_err(|e| PatientError::Storage(format!("Failed to parse patient: {}", e)))
}

#[async_trait]
impl PatientStore for SupabasePatientStore {
    async fn get(&self, id: Uuid) -> Result<Option<Patient>, PatientError> {
        let path = format!("/rest/v1/patients?id=eq.{}", id);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(storage_error)?;

        rows.into_iter().next().map(decode_patient).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Patient>, PatientError> {
        self.find_one("email", email).await
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<Patient>, PatientError> {
        self.find_one("phone", phone).await
    }

    async fn insert(&self, patient: Patient) -> Result<Patient, PatientError> {
        debug!("Inserting patient {}", patient.id);

        let body = serde_json::to_value(&patient)
            .map_err(|e| PatientError::Storage(e.to_string()))?;

        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/patients",
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(storage_error)?;

        rows.into_iter()
            .next()
            .map(decode_patient)
            .transpose()?
            .ok_or_else(|| PatientError::Storage("Failed to create patient".to_string()))
    }
}
