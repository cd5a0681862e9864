use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{CreatePatientRequest, Patient, PatientError, PatientSearchQuery};
use crate::services::store::PatientStore;
use shared_utils::normalize::{normalize_email, normalize_phone};

pub struct PatientService {
    store: Arc<dyn PatientStore>,
}

impl PatientService {
    pub fn new(store: Arc<dyn PatientStore>) -> Self {
        Self { store }
    }

    /// Explicit registration. Unlike identity resolution, an existing email or
    /// phone is an error here rather than a match.
    pub async fn create_patient(&self, request: CreatePatientRequest) -> Result<Patient, PatientError> {
        let request = request.normalized();
        request.validate()?;

        if let Some(email) = &request.email {
            if self.store.find_by_email(email).await?.is_some() {
                return Err(PatientError::Duplicate("email".to_string()));
            }
        }
        if let Some(phone) = &request.phone {
            if self.store.find_by_phone(phone).await?.is_some() {
                return Err(PatientError::Duplicate("phone".to_string()));
            }
        }

        let patient = self.store.insert(Patient::from_request(request, Utc::now())).await?;
        info!("Patient {} registered", patient.id);

        Ok(patient)
    }

    pub async fn get_patient(&self, patient_id: Uuid) -> Result<Patient, PatientError> {
        debug!("Fetching patient {}", patient_id);

        self.store
            .get(patient_id)
            .await?
            .filter(|p| !p.is_discarded())
            .ok_or(PatientError::NotFound(patient_id))
    }

    /// Exact lookup on normalized email and/or phone.
    pub async fn search_patients(&self, query: PatientSearchQuery) -> Result<Vec<Patient>, PatientError> {
        let mut found: Vec<Patient> = Vec::new();

        if let Some(email) = query.email.as_deref().map(normalize_email).filter(|e| !e.is_empty()) {
            found.extend(self.store.find_by_email(&email).await?);
        }
        if let Some(phone) = query.phone.as_deref().map(normalize_phone).filter(|p| !p.is_empty()) {
            if let Some(patient) = self.store.find_by_phone(&phone).await? {
                if !found.iter().any(|p| p.id == patient.id) {
                    found.push(patient);
                }
            }
        }

        Ok(found)
    }
}
