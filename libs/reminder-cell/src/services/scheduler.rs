use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use appointment_cell::models::Appointment;
use appointment_cell::services::AppointmentObserver;
use shared_config::ReminderConfig;

use crate::models::{DeliveryStatus, Reminder, ReminderError, ReminderKind};
use crate::services::queue::ReminderQueue;
use crate::services::store::ReminderStore;

/// Keeps one reminder per configured offset for every live appointment.
///
/// The store is the source of truth; the queue only carries newly created
/// reminders to the delivery worker. A failed enqueue is logged and the
/// reminder is still picked up by [`due`](Self::due).
pub struct ReminderScheduler {
    store: Arc<dyn ReminderStore>,
    queue: Arc<dyn ReminderQueue>,
    kinds: Vec<ReminderKind>,
    max_retries: u32,
    retry_backoff: Duration,
}

impl ReminderScheduler {
    pub fn new(store: Arc<dyn ReminderStore>, queue: Arc<dyn ReminderQueue>, config: &ReminderConfig) -> Self {
        let kinds = config
            .offsets_days
            .iter()
            .filter_map(|days| {
                let kind = ReminderKind::from_offset_days(*days);
                if kind.is_none() {
                    warn!("Ignoring unsupported reminder offset of {} days", days);
                }
                kind
            })
            .collect();

        Self {
            store,
            queue,
            kinds,
            max_retries: config.max_retries,
            retry_backoff: Duration::minutes(config.retry_backoff_minutes as i64),
        }
    }

    /// Creates the reminders still in the future. Calling it again for the same
    /// appointment creates nothing new.
    #[instrument(skip(self, appointment), fields(appointment_id = %appointment.id))]
    pub async fn schedule(&self, appointment: &Appointment, now: NaiveDateTime) -> Result<Vec<Reminder>, ReminderError> {
        if !appointment.is_active() {
            debug!("Not scheduling reminders for inactive appointment");
            return Ok(Vec::new());
        }

        let mut scheduled = Vec::new();
        for kind in &self.kinds {
            let fire_at = appointment.start_time - Duration::days(kind.offset_days() as i64);
            if fire_at <= now {
                debug!("Skipping {} reminder, fire time {} already passed", kind, fire_at);
                continue;
            }

            let (reminder, created) = self
                .store
                .insert_if_absent(Reminder::new(appointment.id, *kind, fire_at))
                .await?;

            if created {
                if let Err(e) = self.queue.enqueue(&reminder.work_item()).await {
                    warn!("Reminder {} stored but not enqueued: {}", reminder.id, e);
                }
            }
            scheduled.push(reminder);
        }

        info!("{} reminders scheduled for appointment {}", scheduled.len(), appointment.id);
        Ok(scheduled)
    }

    /// Drops the pending reminders and schedules again from the new start time.
    pub async fn reschedule(&self, appointment: &Appointment, now: NaiveDateTime) -> Result<Vec<Reminder>, ReminderError> {
        let removed = self.store.delete_pending(appointment.id).await?;
        debug!("Removed {} pending reminders before rescheduling", removed);
        self.schedule(appointment, now).await
    }

    pub async fn cancel_for_appointment(&self, appointment_id: Uuid) -> Result<usize, ReminderError> {
        let removed = self.store.delete_pending(appointment_id).await?;
        info!("Cancelled {} pending reminders for appointment {}", removed, appointment_id);
        Ok(removed)
    }

    pub async fn reminders_for(&self, appointment_id: Uuid) -> Result<Vec<Reminder>, ReminderError> {
        self.store.for_appointment(appointment_id).await
    }

    pub async fn due(&self, now: NaiveDateTime) -> Result<Vec<Reminder>, ReminderError> {
        self.store.due(now).await
    }

    pub async fn mark_sent(&self, reminder_id: Uuid) -> Result<Reminder, ReminderError> {
        let mut reminder = self.pending(reminder_id).await?;
        reminder.delivery_status = DeliveryStatus::Sent;
        reminder.sent_at = Some(Utc::now());
        reminder.next_retry_at = None;

        info!("Reminder {} sent", reminder_id);
        self.store.update(reminder).await
    }

    /// Records a delivery failure. The reminder stays pending with a linearly
    /// growing retry delay until `max_retries` failures, then becomes failed.
    pub async fn mark_failed(
        &self,
        reminder_id: Uuid,
        error: String,
        now: NaiveDateTime,
    ) -> Result<Reminder, ReminderError> {
        let mut reminder = self.pending(reminder_id).await?;
        reminder.retry_count += 1;
        reminder.last_error = Some(error);

        if reminder.retry_count >= self.max_retries {
            warn!("Reminder {} failed {} times, giving up", reminder_id, reminder.retry_count);
            reminder.delivery_status = DeliveryStatus::Failed;
            reminder.next_retry_at = None;
        } else {
            let retry_at = now + self.retry_backoff * reminder.retry_count as i32;
            debug!("Reminder {} will retry at {}", reminder_id, retry_at);
            reminder.next_retry_at = Some(retry_at);
        }

        self.store.update(reminder).await
    }

    async fn pending(&self, reminder_id: Uuid) -> Result<Reminder, ReminderError> {
        let reminder = self
            .store
            .get(reminder_id)
            .await?
            .ok_or(ReminderError::NotFound(reminder_id))?;
        if reminder.delivery_status != DeliveryStatus::Pending {
            return Err(ReminderError::NotPending(reminder_id));
        }
        Ok(reminder)
    }
}

#[async_trait]
impl AppointmentObserver for ReminderScheduler {
    async fn appointment_booked(&self, appointment: &Appointment, now: NaiveDateTime) -> anyhow::Result<()> {
        self.schedule(appointment, now).await?;
        Ok(())
    }

    async fn appointment_rescheduled(&self, appointment: &Appointment, now: NaiveDateTime) -> anyhow::Result<()> {
        self.reschedule(appointment, now).await?;
        Ok(())
    }

    async fn appointment_cancelled(&self, appointment: &Appointment) -> anyhow::Result<()> {
        self.cancel_for_appointment(appointment.id).await?;
        Ok(())
    }
}
