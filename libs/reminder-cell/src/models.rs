use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub kind: ReminderKind,
    /// Clinic-local fire time.
    pub scheduled_at: NaiveDateTime,
    pub delivery_status: DeliveryStatus,
    pub retry_count: u32,
    pub next_retry_at: Option<NaiveDateTime>,
    pub sent_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Reminder {
    pub fn new(appointment_id: Uuid, kind: ReminderKind, scheduled_at: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            appointment_id,
            kind,
            scheduled_at,
            delivery_status: DeliveryStatus::Pending,
            retry_count: 0,
            next_retry_at: None,
            sent_at: None,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        self.delivery_status == DeliveryStatus::Pending
            && self.scheduled_at <= now
            && self.next_retry_at.map_or(true, |retry| retry <= now)
    }

    pub fn work_item(&self) -> ReminderWorkItem {
        ReminderWorkItem {
            reminder_id: self.id,
            appointment_id: self.appointment_id,
            kind: self.kind,
            scheduled_at: self.scheduled_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    SevenDaysBefore,
    ThreeDaysBefore,
    OneDayBefore,
}

impl ReminderKind {
    pub fn offset_days(&self) -> u32 {
        match self {
            ReminderKind::SevenDaysBefore => 7,
            ReminderKind::ThreeDaysBefore => 3,
            ReminderKind::OneDayBefore => 1,
        }
    }

    pub fn from_offset_days(days: u32) -> Option<Self> {
        match days {
            7 => Some(ReminderKind::SevenDaysBefore),
            3 => Some(ReminderKind::ThreeDaysBefore),
            1 => Some(ReminderKind::OneDayBefore),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderKind::SevenDaysBefore => "seven_days_before",
            ReminderKind::ThreeDaysBefore => "three_days_before",
            ReminderKind::OneDayBefore => "one_day_before",
        }
    }
}

impl fmt::Display for ReminderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

/// Payload handed to the outbound delivery worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderWorkItem {
    pub reminder_id: Uuid,
    pub appointment_id: Uuid,
    pub kind: ReminderKind,
    pub scheduled_at: NaiveDateTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkFailedRequest {
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ReminderError {
    #[error("Reminder not found: {0}")]
    NotFound(Uuid),

    #[error("Reminder {0} is no longer pending")]
    NotPending(Uuid),

    #[error("Redis connection error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue operation failed: {0}")]
    Queue(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<ReminderError> for AppError {
    fn from(err: ReminderError) -> Self {
        match err {
            ReminderError::NotFound(_) => AppError::NotFound(err.to_string()),
            ReminderError::NotPending(_) => AppError::conflict("reminder_not_pending", err.to_string()),
            ReminderError::Redis(_) | ReminderError::Queue(_) => AppError::ExternalService(err.to_string()),
            ReminderError::Serialization(_) => AppError::Internal(err.to_string()),
            ReminderError::Storage(msg) => AppError::Database(msg),
        }
    }
}
