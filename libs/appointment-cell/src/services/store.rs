use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use reqwest::Method;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::{SupabaseClient, SupabaseError};

use crate::models::{Appointment, AppointmentError, AppointmentStatus};

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError>;

    /// Active appointments starting on `date`, ordered by start time.
    async fn active_on(&self, date: NaiveDate) -> Result<Vec<Appointment>, AppointmentError>;

    async fn insert(&self, appointment: Appointment) -> Result<Appointment, AppointmentError>;

    /// Writes `appointment` only while the stored row still has status `expected`.
    async fn update(
        &self,
        appointment: Appointment,
        expected: AppointmentStatus,
    ) -> Result<Appointment, AppointmentError>;
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

#[derive(Default)]
pub struct InMemoryAppointmentStore {
    appointments: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.appointments.read().await.len()
    }

    pub async fn all(&self) -> Vec<Appointment> {
        let mut all: Vec<Appointment> = self.appointments.read().await.values().cloned().collect();
        all.sort_by_key(|a| a.start_time);
        all
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        Ok(self.appointments.read().await.get(&id).cloned())
    }

    async fn active_on(&self, date: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        let appointments = self.appointments.read().await;
        let mut day: Vec<Appointment> = appointments
            .values()
            .filter(|a| a.is_active() && a.date() == date)
            .cloned()
            .collect();
        day.sort_by_key(|a| a.start_time);
        Ok(day)
    }

    async fn insert(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        let mut appointments = self.appointments.write().await;
        if appointments.contains_key(&appointment.id) {
            return Err(AppointmentError::Storage(format!("Appointment {} already exists", appointment.id)));
        }
        appointments.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn update(
        &self,
        appointment: Appointment,
        expected: AppointmentStatus,
    ) -> Result<Appointment, AppointmentError> {
        let mut appointments = self.appointments.write().await;
        match appointments.get_mut(&appointment.id) {
            Some(existing) if existing.status != expected => Err(AppointmentError::StaleUpdate(appointment.id)),
            Some(existing) => {
                *existing = appointment.clone();
                Ok(appointment)
            }
            None => Err(AppointmentError::NotFound(appointment.id)),
        }
    }
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

fn storage_error(err: SupabaseError) -> AppointmentError {
    match err {
        // Exclusion constraint on the appointment interval.
        SupabaseError::Conflict(_) => AppointmentError::SlotConflict { conflicting: None },
        other => AppointmentError::Storage(other.to_string()),
    }
}

fn decode(rows: Vec<Value>) -> Result<Vec<Appointment>, AppointmentError> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<Appointment>, _>>()
        .map_err(|e| AppointmentError::Storage(format!("Failed to parse appointment: {}", e)))
}

fn first(rows: Vec<Value>, context: &str) -> Result<Appointment, AppointmentError> {
    decode(rows)?
        .into_iter()
        .next()
        .ok_or_else(|| AppointmentError::Storage(format!("{} returned no rows", context)))
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", id);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(storage_error)?;

        Ok(decode(rows)?.into_iter().next())
    }

    async fn active_on(&self, date: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        let next = date + Duration::days(1);
        let path = format!(
            "/rest/v1/appointments?start_time=gte.{}&start_time=lt.{}&status=neq.cancelled&discarded_at=is.null&order=start_time.asc",
            urlencoding::encode(&format!("{}T00:00:00", date)),
            urlencoding::encode(&format!("{}T00:00:00", next)),
        );
        debug!("Loading active appointments for {}", date);

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(storage_error)?;

        decode(rows)
    }

    async fn insert(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        let body = serde_json::to_value(&appointment)
            .map_err(|e| AppointmentError::Storage(e.to_string()))?;

        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(storage_error)?;

        first(rows, "Appointment insert")
    }

    async fn update(
        &self,
        appointment: Appointment,
        expected: AppointmentStatus,
    ) -> Result<Appointment, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}&status=eq.{}", appointment.id, expected);
        let body = serde_json::to_value(&appointment)
            .map_err(|e| AppointmentError::Storage(e.to_string()))?;

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

        if rows.is_empty() {
            return match self.get(appointment.id).await? {
                Some(_) => Err(AppointmentError::StaleUpdate(appointment.id)),
                None => Err(AppointmentError::NotFound(appointment.id)),
            };
        }
        first(rows, "Appointment update")
    }
}
