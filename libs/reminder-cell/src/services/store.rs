use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::{SupabaseClient, SupabaseError};

use crate::models::{DeliveryStatus, Reminder, ReminderError, ReminderKind};

/// Persistence for reminders. `(appointment_id, kind)` is unique.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Reminder>, ReminderError>;

    /// Inserts unless a reminder with the same appointment and kind exists.
    /// Returns the stored row and whether it was created by this call.
    async fn insert_if_absent(&self, reminder: Reminder) -> Result<(Reminder, bool), ReminderError>;

    async fn for_appointment(&self, appointment_id: Uuid) -> Result<Vec<Reminder>, ReminderError>;

    /// Removes the pending reminders of one appointment and returns how many went.
    async fn delete_pending(&self, appointment_id: Uuid) -> Result<usize, ReminderError>;

    /// Pending reminders whose fire time (or retry time) has passed, oldest first.
    async fn due(&self, now: NaiveDateTime) -> Result<Vec<Reminder>, ReminderError>;

    async fn update(&self, reminder: Reminder) -> Result<Reminder, ReminderError>;
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

#[derive(Default)]
pub struct InMemoryReminderStore {
    reminders: RwLock<HashMap<(Uuid, ReminderKind), Reminder>>,
}

impl InMemoryReminderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.reminders.read().await.len()
    }
}

#[async_trait]
impl ReminderStore for InMemoryReminderStore {
    async fn get(&self, id: Uuid) -> Result<Option<Reminder>, ReminderError> {
        Ok(self.reminders.read().await.values().find(|r| r.id == id).cloned())
    }

    async fn insert_if_absent(&self, reminder: Reminder) -> Result<(Reminder, bool), ReminderError> {
        let mut reminders = self.reminders.write().await;
        let key = (reminder.appointment_id, reminder.kind);
        if let Some(existing) = reminders.get(&key) {
            return Ok((existing.clone(), false));
        }
        reminders.insert(key, reminder.clone());
        Ok((reminder, true))
    }

    async fn for_appointment(&self, appointment_id: Uuid) -> Result<Vec<Reminder>, ReminderError> {
        let mut found: Vec<Reminder> = self
            .reminders
            .read()
            .await
            .values()
            .filter(|r| r.appointment_id == appointment_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.scheduled_at);
        Ok(found)
    }

    async fn delete_pending(&self, appointment_id: Uuid) -> Result<usize, ReminderError> {
        let mut reminders = self.reminders.write().await;
        let before = reminders.len();
        reminders.retain(|_, r| !(r.appointment_id == appointment_id && r.delivery_status == DeliveryStatus::Pending));
        Ok(before - reminders.len())
    }

    async fn due(&self, now: NaiveDateTime) -> Result<Vec<Reminder>, ReminderError> {
        let mut due: Vec<Reminder> = self
            .reminders
            .read()
            .await
            .values()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.scheduled_at);
        Ok(due)
    }

    async fn update(&self, reminder: Reminder) -> Result<Reminder, ReminderError> {
        let mut reminders = self.reminders.write().await;
        match reminders.get_mut(&(reminder.appointment_id, reminder.kind)) {
            Some(existing) if existing.id == reminder.id => {
                *existing = reminder.clone();
                Ok(reminder)
            }
            _ => Err(ReminderError::NotFound(reminder.id)),
        }
    }
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

pub struct SupabaseReminderStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseReminderStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn fetch(&self, path: &str) -> Result<Vec<Reminder>, ReminderError> {
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, path, None)
            .await
            .map_err(storage_error)?;
        decode(rows)
    }
}

fn storage_error(err: SupabaseError) -> ReminderError {
    ReminderError::Storage(err.to_string())
}

fn decode(rows: Vec<Value>) -> Result<Vec<Reminder>, ReminderError> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<Reminder>, _>>()
        .map_err(|e| ReminderError::Storage(format!("Failed to parse reminder: {}", e)))
}

fn ignore_duplicates_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "Prefer",
        HeaderValue::from_static("resolution=ignore-duplicates,return=representation"),
    );
    headers
}

#[async_trait]
impl ReminderStore for SupabaseReminderStore {
    async fn get(&self, id: Uuid) -> Result<Option<Reminder>, ReminderError> {
        let path = format!("/rest/v1/reminders?id=eq.{}", id);
        Ok(self.fetch(&path).await?.into_iter().next())
    }

    async fn insert_if_absent(&self, reminder: Reminder) -> Result<(Reminder, bool), ReminderError> {
        let body = serde_json::to_value(&reminder)?;
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/reminders?on_conflict=appointment_id,kind",
                Some(body),
                Some(ignore_duplicates_headers()),
            )
            .await
            .map_err(storage_error)?;

        if let Some(created) = decode(rows)?.into_iter().next() {
            return Ok((created, true));
        }

        // Ignored as a duplicate: hand back the row that already holds the key.
        debug!("Reminder {} for appointment {} already exists", reminder.kind, reminder.appointment_id);
        let path = format!(
            "/rest/v1/reminders?appointment_id=eq.{}&kind=eq.{}",
            reminder.appointment_id, reminder.kind
        );
        self.fetch(&path)
            .await?
            .into_iter()
            .next()
            .map(|existing| (existing, false))
            .ok_or_else(|| ReminderError::Storage("Reminder insert returned no rows".to_string()))
    }

    async fn for_appointment(&self, appointment_id: Uuid) -> Result<Vec<Reminder>, ReminderError> {
        let path = format!(
            "/rest/v1/reminders?appointment_id=eq.{}&order=scheduled_at.asc",
            appointment_id
        );
        self.fetch(&path).await
    }

    async fn delete_pending(&self, appointment_id: Uuid) -> Result<usize, ReminderError> {
        let path = format!(
            "/rest/v1/reminders?appointment_id=eq.{}&delivery_status=eq.pending",
            appointment_id
        );
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &path,
                None,
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(storage_error)?;
        Ok(rows.len())
    }

    async fn due(&self, now: NaiveDateTime) -> Result<Vec<Reminder>, ReminderError> {
        let now = urlencoding::encode(&now.format("%Y-%m-%dT%H:%M:%S").to_string()).into_owned();
        let path = format!(
            "/rest/v1/reminders?delivery_status=eq.pending&scheduled_at=lte.{now}&or=(next_retry_at.is.null,next_retry_at.lte.{now})&order=scheduled_at.asc",
        );
        self.fetch(&path).await
    }

    async fn update(&self, reminder: Reminder) -> Result<Reminder, ReminderError> {
        let path = format!("/rest/v1/reminders?id=eq.{}", reminder.id);
        let body = serde_json::to_value(&reminder)?;
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(storage_error)?;

        decode(rows)?
            .into_iter()
            .next()
            .ok_or(ReminderError::NotFound(reminder.id))
    }
}
