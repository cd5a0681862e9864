use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_database::cache::CacheService;

use crate::models::{ContactFields, CreatePatientRequest, IdentityResolution, Patient, PatientError};
use crate::services::store::PatientStore;

const MAX_MERGE_HOPS: usize = 8;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Matches inbound contact details to an existing patient or registers a new one.
///
/// Matching is exact on the normalized email, then the normalized phone. A
/// match never updates the stored patient.
pub struct IdentityResolver {
    store: Arc<dyn PatientStore>,
    cache: Arc<dyn CacheService>,
    cache_ttl: Duration,
}

#[derive(Clone, Copy)]
enum ContactKey {
    Email,
    Phone,
}

impl ContactKey {
    fn cache_key(self, value: &str) -> String {
        match self {
            ContactKey::Email => format!("patient:email:{}", value),
            ContactKey::Phone => format!("patient:phone:{}", value),
        }
    }
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn PatientStore>, cache: Arc<dyn CacheService>) -> Self {
        Self {
            store,
            cache,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    #[instrument(skip(self, contact), fields(has_email = contact.email.is_some(), has_phone = contact.phone.is_some()))]
    pub async fn resolve(&self, contact: ContactFields) -> Result<IdentityResolution, PatientError> {
        let email = contact.normalized_email();
        let phone = contact.normalized_phone();

        let email_match = match &email {
            Some(email) => self.lookup(ContactKey::Email, email).await?,
            None => None,
        };
        let phone_match = match &phone {
            Some(phone) => self.lookup(ContactKey::Phone, phone).await?,
            None => None,
        };

        match (email_match, phone_match) {
            (Some(by_email), Some(by_phone)) if by_email.id != by_phone.id => {
                warn!("Email and phone resolve to different patients ({} / {})", by_email.id, by_phone.id);
                Err(PatientError::AmbiguousIdentity {
                    email_match: by_email.id,
                    phone_match: by_phone.id,
                })
            }
            (Some(patient), _) | (None, Some(patient)) => {
                debug!("Matched existing patient {}", patient.id);
                Ok(IdentityResolution { patient, created: false })
            }
            (None, None) => self.create(contact, email, phone).await,
        }
    }

    async fn create(
        &self,
        contact: ContactFields,
        email: Option<String>,
        phone: Option<String>,
    ) -> Result<IdentityResolution, PatientError> {
        let request = CreatePatientRequest {
            name: contact.name.unwrap_or_default(),
            name_kana: contact.name_kana,
            email: email.clone(),
            phone: phone.clone(),
            ..CreatePatientRequest::default()
        }
        .normalized();

        if request.name.is_empty() {
            return Err(PatientError::Validation(
                "a name is required to register a new patient".to_string(),
            ));
        }

        let patient = Patient::from_request(request, Utc::now());

        match self.store.insert(patient).await {
            Ok(patient) => {
                info!("Registered new patient {}", patient.id);
                self.remember(&patient).await;
                Ok(IdentityResolution { patient, created: true })
            }
            Err(PatientError::Duplicate(column)) => {
                // Lost a creation race; the winner's row is the identity.
                debug!("Patient insert hit unique {}, re-reading", column);
                let winner = match &email {
                    Some(email) => self.store.find_by_email(email).await?,
                    None => None,
                };
                let winner = match (winner, &phone) {
                    (Some(patient), _) => Some(patient),
                    (None, Some(phone)) => self.store.find_by_phone(phone).await?,
                    (None, None) => None,
                };
                match winner {
                    Some(patient) => {
                        let patient = self.follow_merges(patient).await?;
                        self.remember(&patient).await;
                        Ok(IdentityResolution { patient, created: false })
                    }
                    None => Err(PatientError::Duplicate(column)),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn lookup(&self, key: ContactKey, value: &str) -> Result<Option<Patient>, PatientError> {
        let cache_key = key.cache_key(value);

        if let Some(cached) = self.cache.get(&cache_key).await {
            if let Ok(id) = Uuid::parse_str(&cached) {
                match self.store.get(id).await? {
                    Some(patient) if !patient.is_discarded() => return Ok(Some(patient)),
                    _ => self.cache.invalidate(&cache_key).await,
                }
            }
        }

        let found = match key {
            ContactKey::Email => self.store.find_by_email(value).await?,
            ContactKey::Phone => self.store.find_by_phone(value).await?,
        };

        match found {
            Some(patient) => {
                let patient = self.follow_merges(patient).await?;
                self.cache.set(&cache_key, patient.id.to_string(), self.cache_ttl).await;
                Ok(Some(patient))
            }
            None => Ok(None),
        }
    }

    /// Walks `merged_to` links to the surviving record.
    async fn follow_merges(&self, mut patient: Patient) -> Result<Patient, PatientError> {
        for _ in 0..MAX_MERGE_HOPS {
            let Some(target_id) = patient.merged_to else {
                return Ok(patient);
            };
            match self.store.get(target_id).await? {
                Some(target) if !target.is_discarded() => patient = target,
                _ => {
                    warn!("Patient {} merged into missing patient {}", patient.id, target_id);
                    return Ok(patient);
                }
            }
        }
        warn!("Merge chain from patient {} exceeds {} hops", patient.id, MAX_MERGE_HOPS);
        Ok(patient)
    }

    async fn remember(&self, patient: &Patient) {
        let id = patient.id.to_string();
        if let Some(email) = &patient.email {
            self.cache.set(&ContactKey::Email.cache_key(email), id.clone(), self.cache_ttl).await;
        }
        if let Some(phone) = &patient.phone {
            self.cache.set(&ContactKey::Phone.cache_key(phone), id, self.cache_ttl).await;
        }
    }
}
