use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::{ReminderError, ReminderWorkItem};

const PENDING_QUEUE: &str = "reminder_queue:pending";
const JOB_TTL_SECONDS: i64 = 60 * 60 * 24 * 14;

/// Hand-off point to the outbound delivery worker.
#[async_trait]
pub trait ReminderQueue: Send + Sync {
    async fn enqueue(&self, item: &ReminderWorkItem) -> Result<(), ReminderError>;

    /// Oldest item first; `None` when the queue is empty.
    async fn dequeue(&self) -> Result<Option<ReminderWorkItem>, ReminderError>;
}

pub struct RedisReminderQueue {
    pool: Pool,
}

impl RedisReminderQueue {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn connection(&self) -> Result<Connection, ReminderError> {
        self.pool
            .get()
            .await
            .map_err(|e| ReminderError::Queue(format!("Failed to connect to Redis: {}", e)))
    }
}

fn job_key(reminder_id: impl std::fmt::Display) -> String {
    format!("reminder_job:{}", reminder_id)
}

#[async_trait]
impl ReminderQueue for RedisReminderQueue {
    async fn enqueue(&self, item: &ReminderWorkItem) -> Result<(), ReminderError> {
        let mut conn = self.connection().await?;
        let data = serde_json::to_string(item)?;
        let appointment_id = item.appointment_id.to_string();

        let key = job_key(item.reminder_id);
        let _: () = conn
            .hset_multiple(
                &key,
                &[
                    ("data", data.as_str()),
                    ("appointment_id", appointment_id.as_str()),
                    ("kind", item.kind.as_str()),
                ],
            )
            .await?;
        let _: () = conn.expire(&key, JOB_TTL_SECONDS).await?;
        let _: () = conn.lpush(PENDING_QUEUE, item.reminder_id.to_string()).await?;

        debug!("Reminder {} enqueued", item.reminder_id);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<ReminderWorkItem>, ReminderError> {
        let mut conn = self.connection().await?;

        loop {
            let reminder_id: Option<String> = conn.rpop(PENDING_QUEUE, None).await?;
            let Some(reminder_id) = reminder_id else {
                return Ok(None);
            };

            let key = job_key(&reminder_id);
            let data: Option<String> = conn.hget(&key, "data").await?;
            match data {
                Some(data) => {
                    let _: () = conn.del(&key).await?;
                    return Ok(Some(serde_json::from_str(&data)?));
                }
                // Hash expired before anyone picked the id up.
                None => debug!("Skipping expired reminder job {}", reminder_id),
            }
        }
    }
}

#[derive(Default)]
pub struct InMemoryReminderQueue {
    items: Mutex<Vec<ReminderWorkItem>>,
}

impl InMemoryReminderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn snapshot(&self) -> Vec<ReminderWorkItem> {
        self.items.lock().await.clone()
    }
}

#[async_trait]
impl ReminderQueue for InMemoryReminderQueue {
    async fn enqueue(&self, item: &ReminderWorkItem) -> Result<(), ReminderError> {
        self.items.lock().await.push(item.clone());
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<ReminderWorkItem>, ReminderError> {
        let mut items = self.items.lock().await;
        if items.is_empty() {
            return Ok(None);
        }
        Ok(Some(items.remove(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReminderKind;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn item(kind: ReminderKind) -> ReminderWorkItem {
        ReminderWorkItem {
            reminder_id: Uuid::new_v4(),
            appointment_id: Uuid::new_v4(),
            kind,
            scheduled_at: NaiveDate::from_ymd_opt(2030, 1, 9).unwrap().and_hms_opt(10, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn in_memory_queue_is_fifo() {
        let queue = InMemoryReminderQueue::new();
        let first = item(ReminderKind::SevenDaysBefore);
        let second = item(ReminderKind::OneDayBefore);

        queue.enqueue(&first).await.unwrap();
        queue.enqueue(&second).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap(), Some(first));
        assert_eq!(queue.dequeue().await.unwrap(), Some(second));
        assert_eq!(queue.dequeue().await.unwrap(), None);
    }
}
