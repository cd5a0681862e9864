use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::{debug, instrument};

use shared_config::ClinicScheduleConfig;
use shared_database::cache::{get_json, set_json, CacheService};
use shared_models::TimeInterval;

use crate::models::{AppointmentError, AvailableSlot};
use crate::services::lock::CalendarLock;
use crate::services::store::AppointmentStore;

/// Read-only view of free calendar time. Never writes appointments.
///
/// Slot lists are cached per day and duration. The cache is only filled while
/// holding the day lock, and every calendar write invalidates the day under
/// that same lock, so a list computed before a booking is never cached after it.
pub struct AvailabilityEngine {
    store: Arc<dyn AppointmentStore>,
    clinic: ClinicScheduleConfig,
    cache: Arc<dyn CacheService>,
    lock: Arc<dyn CalendarLock>,
    cache_ttl: StdDuration,
}

impl AvailabilityEngine {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        clinic: ClinicScheduleConfig,
        cache: Arc<dyn CacheService>,
        lock: Arc<dyn CalendarLock>,
        cache_ttl: StdDuration,
    ) -> Self {
        Self {
            store,
            clinic,
            cache,
            lock,
            cache_ttl,
        }
    }

    pub fn clinic(&self) -> &ClinicScheduleConfig {
        &self.clinic
    }

    #[instrument(skip(self))]
    pub async fn available_slots(
        &self,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> Result<Vec<AvailableSlot>, AppointmentError> {
        if duration_minutes == 0 {
            return Err(AppointmentError::Validation("duration must be positive".to_string()));
        }
        if self.clinic.is_closed_on(date) {
            debug!("Clinic closed on {}", date);
            return Ok(Vec::new());
        }

        let key = slots_key(date, duration_minutes);
        if let Some(slots) = get_json::<Vec<AvailableSlot>>(self.cache.as_ref(), &key).await {
            debug!("Slot cache hit for {}", key);
            return Ok(slots);
        }

        let lease = match self.lock.acquire(date).await {
            Ok(lease) => Some(lease),
            Err(e) => {
                debug!("Serving uncached slots for {}: {}", date, e);
                None
            }
        };

        let result = self
            .booked_intervals(date)
            .await
            .map(|booked| calculate_slots(&self.clinic, date, duration_minutes, &booked));

        if let Some(lease) = lease {
            if let Ok(slots) = &result {
                set_json(self.cache.as_ref(), &key, slots, self.cache_ttl).await;
            }
            lease.release().await;
        }

        let slots = result?;
        debug!("{} free slots of {} minutes on {}", slots.len(), duration_minutes, date);
        Ok(slots)
    }

    /// Whether `[start, start + duration)` lies inside opening hours on an open
    /// day without touching the lunch break. Says nothing about bookings.
    pub fn within_business_hours(&self, start: NaiveDateTime, duration_minutes: u32) -> bool {
        duration_minutes > 0
            && fits_business_hours(&self.clinic, start.date(), &TimeInterval::from_duration(start, duration_minutes))
    }

    pub async fn invalidate_day(&self, date: NaiveDate) {
        self.cache.invalidate_prefix(&day_prefix(date)).await;
    }

    async fn booked_intervals(&self, date: NaiveDate) -> Result<Vec<TimeInterval>, AppointmentError> {
        Ok(self
            .store
            .active_on(date)
            .await?
            .iter()
            .filter(|a| a.is_active())
            .map(|a| a.interval())
            .collect())
    }
}

fn day_prefix(date: NaiveDate) -> String {
    format!("slots:{}:", date)
}

fn slots_key(date: NaiveDate, duration_minutes: u32) -> String {
    format!("{}{}", day_prefix(date), duration_minutes)
}

fn lunch_interval(clinic: &ClinicScheduleConfig, date: NaiveDate) -> Option<TimeInterval> {
    clinic
        .has_lunch_break()
        .then(|| TimeInterval::new(date.and_time(clinic.lunch_start), date.and_time(clinic.lunch_end)))
}

fn fits_business_hours(clinic: &ClinicScheduleConfig, date: NaiveDate, candidate: &TimeInterval) -> bool {
    if clinic.is_closed_on(date) {
        return false;
    }
    let open = date.and_time(clinic.opening_time);
    let close = date.and_time(clinic.closing_time);
    if candidate.start < open || candidate.end > close {
        return false;
    }
    match lunch_interval(clinic, date) {
        Some(lunch) => !lunch.overlaps(candidate),
        None => true,
    }
}

/// Grid walk over one business day.
///
/// Starts at opening time and advances by the configured granularity. A cursor
/// inside the lunch break jumps to its end. Candidates touching lunch or any
/// booked interval are skipped; the walk stops once a candidate would end after
/// closing time.
pub fn calculate_slots(
    clinic: &ClinicScheduleConfig,
    date: NaiveDate,
    duration_minutes: u32,
    booked: &[TimeInterval],
) -> Vec<AvailableSlot> {
    if duration_minutes == 0 || clinic.is_closed_on(date) {
        return Vec::new();
    }

    let step = Duration::minutes(clinic.slot_granularity_minutes.max(1) as i64);
    let length = Duration::minutes(duration_minutes as i64);
    let close = date.and_time(clinic.closing_time);
    let lunch = lunch_interval(clinic, date);

    let mut slots = Vec::new();
    let mut cursor = date.and_time(clinic.opening_time);

    while cursor + length <= close {
        if let Some(lunch) = lunch.filter(|l| l.contains(cursor)) {
            cursor = lunch.end;
            continue;
        }

        let candidate = TimeInterval::new(cursor, cursor + length);
        let blocked = lunch.is_some_and(|l| l.overlaps(&candidate))
            || booked.iter().any(|b| b.overlaps(&candidate));

        if !blocked {
            slots.push(AvailableSlot::from_interval(candidate));
        }

        cursor += step;
    }

    slots
}
