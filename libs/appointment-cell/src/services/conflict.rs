use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_models::TimeInterval;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, BookingCandidate, BookingMode, SourceDetails,
};
use crate::services::availability::AvailabilityEngine;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::lock::{CalendarLock, DayLease};
use crate::services::store::AppointmentStore;

const STATUS_CHANGE_ATTEMPTS: usize = 3;

/// Post-commit hook for calendar changes.
///
/// Hooks run before the day lock is released, so they observe changes to one
/// appointment in commit order. Failures are logged and never undo the change.
#[async_trait]
pub trait AppointmentObserver: Send + Sync {
    async fn appointment_booked(&self, appointment: &Appointment, now: NaiveDateTime) -> anyhow::Result<()>;

    async fn appointment_rescheduled(&self, appointment: &Appointment, now: NaiveDateTime) -> anyhow::Result<()>;

    async fn appointment_cancelled(&self, appointment: &Appointment) -> anyhow::Result<()>;
}

/// Admission control for the calendar.
///
/// Every write to an appointment (new booking, move, status change) re-reads
/// what it depends on and writes while holding the lock of every day it
/// touches, so two concurrent writers cannot both act on the same state.
pub struct ConflictGuard {
    store: Arc<dyn AppointmentStore>,
    lock: Arc<dyn CalendarLock>,
    availability: Arc<AvailabilityEngine>,
    lifecycle: AppointmentLifecycleService,
    observers: Vec<Arc<dyn AppointmentObserver>>,
    max_duration_minutes: u32,
}

impl ConflictGuard {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        lock: Arc<dyn CalendarLock>,
        availability: Arc<AvailabilityEngine>,
        max_duration_minutes: u32,
    ) -> Self {
        Self {
            store,
            lock,
            availability,
            lifecycle: AppointmentLifecycleService::new(),
            observers: Vec::new(),
            max_duration_minutes,
        }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn AppointmentObserver>) {
        self.observers.push(observer);
    }

    #[instrument(skip(self, candidate), fields(patient_id = %candidate.patient_id, start = %candidate.start_time))]
    pub async fn book(
        &self,
        mut candidate: BookingCandidate,
        mode: BookingMode,
        now: NaiveDateTime,
    ) -> Result<Appointment, AppointmentError> {
        let past = self.validate(candidate.start_time, candidate.duration_minutes, mode, now)?;
        if past {
            debug!("Accepting past start {} from ingestion", candidate.start_time);
            candidate
                .source_details
                .get_or_insert_with(SourceDetails::default)
                .past_confirmation = true;
        }

        let date = candidate.start_time.date();
        let lease = self.lock.acquire(date).await?;

        let result = self.insert_locked(candidate).await;
        if let Ok(appointment) = &result {
            self.availability.invalidate_day(date).await;
            for observer in &self.observers {
                if let Err(e) = observer.appointment_booked(appointment, now).await {
                    warn!("Post-booking hook failed for appointment {}: {:#}", appointment.id, e);
                }
            }
        }

        lease.release().await;
        result
    }

    /// Moves an existing appointment, checking the new interval against everything but itself.
    ///
    /// Holds the lock of both the old and the new day. The row is re-read under
    /// those locks and must still be reschedulable.
    #[instrument(skip(self))]
    pub async fn move_appointment(
        &self,
        appointment_id: Uuid,
        new_start: NaiveDateTime,
        new_duration_minutes: Option<u32>,
        now: NaiveDateTime,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.load(appointment_id).await?;
        self.lifecycle.ensure_reschedulable(&current)?;

        let duration = new_duration_minutes.unwrap_or(current.duration_minutes);
        self.validate(new_start, duration, BookingMode::Interactive, now)?;

        let old_date = current.date();
        let new_date = new_start.date();
        let leases = self.acquire_days(vec![old_date, new_date]).await?;

        let result = self.move_locked(appointment_id, old_date, new_start, duration).await;
        if let Ok(moved) = &result {
            self.availability.invalidate_day(old_date).await;
            if new_date != old_date {
                self.availability.invalidate_day(new_date).await;
            }
            for observer in &self.observers {
                if let Err(e) = observer.appointment_rescheduled(moved, now).await {
                    warn!("Reschedule hook failed for appointment {}: {:#}", moved.id, e);
                }
            }
        }

        release_all(leases).await;
        result
    }

    /// Applies `change` to the current row under its day's lock.
    ///
    /// A row that moved day or changed status between the read and the write
    /// is re-read and `change` applied again, a bounded number of times.
    #[instrument(skip(self, change))]
    pub async fn change_status<F>(&self, appointment_id: Uuid, change: F) -> Result<Appointment, AppointmentError>
    where
        F: Fn(&mut Appointment) -> Result<(), AppointmentError> + Send + Sync,
    {
        let mut last_error = AppointmentError::StaleUpdate(appointment_id);

        for attempt in 1..=STATUS_CHANGE_ATTEMPTS {
            let date = self.load(appointment_id).await?.date();
            let lease = self.lock.acquire(date).await?;

            let result = self.change_status_locked(appointment_id, date, &change).await;
            if let Ok(changed) = &result {
                self.availability.invalidate_day(date).await;
                if changed.status == AppointmentStatus::Cancelled {
                    for observer in &self.observers {
                        if let Err(e) = observer.appointment_cancelled(changed).await {
                            warn!("Cancellation hook failed for appointment {}: {:#}", changed.id, e);
                        }
                    }
                }
            }
            lease.release().await;

            match result {
                Err(AppointmentError::StaleUpdate(id)) => {
                    debug!("Appointment {} changed underneath attempt {}, retrying", id, attempt);
                    last_error = AppointmentError::StaleUpdate(id);
                }
                other => return other,
            }
        }

        Err(last_error)
    }

    /// Returns whether the start lies in the past (only possible in ingestion mode).
    ///
    /// Interactive requests must also fall inside opening hours on an open day,
    /// clear of the lunch break. Ingested confirmations record what an external
    /// site already accepted and skip that check.
    pub fn validate(
        &self,
        start_time: NaiveDateTime,
        duration_minutes: u32,
        mode: BookingMode,
        now: NaiveDateTime,
    ) -> Result<bool, AppointmentError> {
        if duration_minutes == 0 {
            return Err(AppointmentError::Validation("duration must be positive".to_string()));
        }
        if duration_minutes > self.max_duration_minutes {
            return Err(AppointmentError::Validation(format!(
                "duration {} exceeds the maximum of {} minutes",
                duration_minutes, self.max_duration_minutes
            )));
        }

        let past = start_time < now;
        if mode == BookingMode::Interactive {
            if past {
                return Err(AppointmentError::Validation(format!(
                    "start time {} is in the past",
                    start_time.format("%Y-%m-%d %H:%M")
                )));
            }
            if !self.availability.within_business_hours(start_time, duration_minutes) {
                return Err(AppointmentError::Validation(format!(
                    "{} for {} minutes is outside clinic hours",
                    start_time.format("%Y-%m-%d %H:%M"),
                    duration_minutes
                )));
            }
        }

        Ok(past)
    }

    async fn load(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store
            .get(appointment_id)
            .await?
            .filter(|a| a.discarded_at.is_none())
            .ok_or(AppointmentError::NotFound(appointment_id))
    }

    /// Locks days in ascending order; on failure every lease taken so far is released.
    async fn acquire_days(&self, mut dates: Vec<NaiveDate>) -> Result<Vec<Box<dyn DayLease>>, AppointmentError> {
        dates.sort();
        dates.dedup();

        let mut leases = Vec::with_capacity(dates.len());
        for date in dates {
            match self.lock.acquire(date).await {
                Ok(lease) => leases.push(lease),
                Err(e) => {
                    release_all(leases).await;
                    return Err(e);
                }
            }
        }
        Ok(leases)
    }

    async fn move_locked(
        &self,
        appointment_id: Uuid,
        locked_date: NaiveDate,
        new_start: NaiveDateTime,
        new_duration_minutes: u32,
    ) -> Result<Appointment, AppointmentError> {
        let mut appointment = self.load(appointment_id).await?;
        self.lifecycle.ensure_reschedulable(&appointment)?;
        if appointment.date() != locked_date {
            return Err(AppointmentError::StaleUpdate(appointment_id));
        }

        let interval = TimeInterval::from_duration(new_start, new_duration_minutes);
        let day = self.store.active_on(new_start.date()).await?;
        self.check_day(&day, appointment.patient_id, interval, Some(appointment.id))?;

        let expected = appointment.status;
        appointment.start_time = new_start;
        appointment.duration_minutes = new_duration_minutes;
        appointment.updated_at = Utc::now();

        let stored = self.store.update(appointment, expected).await?;
        info!("Appointment {} moved to {}", stored.id, stored.start_time);
        Ok(stored)
    }

    async fn change_status_locked<F>(
        &self,
        appointment_id: Uuid,
        locked_date: NaiveDate,
        change: &F,
    ) -> Result<Appointment, AppointmentError>
    where
        F: Fn(&mut Appointment) -> Result<(), AppointmentError> + Send + Sync,
    {
        let mut appointment = self.load(appointment_id).await?;
        if appointment.date() != locked_date {
            return Err(AppointmentError::StaleUpdate(appointment_id));
        }

        let expected = appointment.status;
        change(&mut appointment)?;
        self.store.update(appointment, expected).await
    }

    async fn insert_locked(&self, candidate: BookingCandidate) -> Result<Appointment, AppointmentError> {
        let day = self.store.active_on(candidate.start_time.date()).await?;
        self.check_day(&day, candidate.patient_id, candidate.interval(), None)?;

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id: candidate.patient_id,
            start_time: candidate.start_time,
            duration_minutes: candidate.duration_minutes,
            treatment_type: candidate.treatment_type,
            status: AppointmentStatus::Booked,
            notes: candidate.notes,
            source: candidate.source,
            source_details: candidate.source_details,
            cancellation_reason: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
            discarded_at: None,
        };

        let stored = self.store.insert(appointment).await?;
        info!("Appointment {} booked for patient {} at {}", stored.id, stored.patient_id, stored.start_time);
        Ok(stored)
    }

    /// Same-day duplicate first, then interval overlap.
    fn check_day(
        &self,
        day: &[Appointment],
        patient_id: Uuid,
        interval: TimeInterval,
        ignore: Option<Uuid>,
    ) -> Result<(), AppointmentError> {
        let others: Vec<&Appointment> = day
            .iter()
            .filter(|a| a.is_active() && Some(a.id) != ignore)
            .collect();

        if let Some(existing) = others.iter().find(|a| a.patient_id == patient_id) {
            warn!("Patient {} already booked on {} ({})", patient_id, existing.date(), existing.id);
            return Err(AppointmentError::DuplicateBooking {
                existing: existing.id,
                date: existing.date(),
            });
        }

        if let Some(conflict) = others.iter().find(|a| a.interval().overlaps(&interval)) {
            warn!(
                "Requested {}-{} overlaps appointment {} ({}-{})",
                interval.start.format("%H:%M"),
                interval.end.format("%H:%M"),
                conflict.id,
                conflict.start_time.format("%H:%M"),
                conflict.end_time().format("%H:%M")
            );
            return Err(AppointmentError::SlotConflict {
                conflicting: Some(conflict.id),
            });
        }

        Ok(())
    }
}

async fn release_all(leases: Vec<Box<dyn DayLease>>) {
    for lease in leases.into_iter().rev() {
        lease.release().await;
    }
}
