use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::RedisPool;

use crate::models::AppointmentError;

const LOCK_TTL: Duration = Duration::from_secs(30);
const RETRY_INTERVAL: Duration = Duration::from_millis(25);

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Mutual exclusion over one calendar day.
///
/// Acquisition is bounded; a caller that cannot get the day within the
/// configured timeout receives [`AppointmentError::Busy`].
#[async_trait]
pub trait CalendarLock: Send + Sync {
    async fn acquire(&self, date: NaiveDate) -> Result<Box<dyn DayLease>, AppointmentError>;
}

/// Held day lock. Call `release` once done; dropping an unreleased lease also
/// frees the day, without waiting for the caller.
#[async_trait]
pub trait DayLease: Send {
    async fn release(self: Box<Self>);
}

fn lock_key(date: NaiveDate) -> String {
    format!("calendar_lock:{}", date)
}

// ==============================================================================
// IN-PROCESS LOCK
// ==============================================================================

pub struct InProcessCalendarLock {
    days: Mutex<HashMap<NaiveDate, Arc<Mutex<()>>>>,
    timeout: Duration,
}

impl InProcessCalendarLock {
    pub fn new(timeout: Duration) -> Self {
        Self {
            days: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    async fn day_mutex(&self, date: NaiveDate) -> Arc<Mutex<()>> {
        let mut days = self.days.lock().await;
        // Drop days nobody is holding or waiting on.
        days.retain(|day, mutex| *day == date || Arc::strong_count(mutex) > 1);
        days.entry(date).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

struct InProcessLease {
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl DayLease for InProcessLease {
    async fn release(self: Box<Self>) {}
}

#[async_trait]
impl CalendarLock for InProcessCalendarLock {
    async fn acquire(&self, date: NaiveDate) -> Result<Box<dyn DayLease>, AppointmentError> {
        let mutex = self.day_mutex(date).await;

        match tokio::time::timeout(self.timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                debug!("Calendar lock acquired for {}", date);
                Ok(Box::new(InProcessLease { _guard: guard }))
            }
            Err(_) => {
                warn!("Timed out waiting for calendar lock on {}", date);
                Err(AppointmentError::Busy(format!("calendar for {} is locked, retry shortly", date)))
            }
        }
    }
}

// ==============================================================================
// REDIS LOCK
// ==============================================================================

/// `SET NX PX` lock shared by every API instance pointing at the same Redis.
pub struct RedisCalendarLock {
    pool: RedisPool,
    timeout: Duration,
    ttl: Duration,
}

impl RedisCalendarLock {
    pub fn new(pool: RedisPool, timeout: Duration) -> Self {
        Self {
            pool,
            timeout,
            ttl: LOCK_TTL,
        }
    }

    async fn try_set(&self, key: &str, token: &str) -> Result<bool, AppointmentError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppointmentError::Busy(format!("lock backend unavailable: {}", e)))?;

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppointmentError::Busy(format!("lock backend error: {}", e)))?;

        Ok(reply.is_some())
    }
}

struct RedisLease {
    pool: RedisPool,
    key: String,
    token: String,
    released: bool,
}

async fn release_key(pool: &RedisPool, key: &str, token: &str) {
    let mut conn = match pool.get().await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("Could not release {}, it will expire: {}", key, e);
            return;
        }
    };

    let result: Result<i64, redis::RedisError> = redis::Script::new(RELEASE_SCRIPT)
        .key(key)
        .arg(token)
        .invoke_async(&mut conn)
        .await;

    match result {
        Ok(1) => debug!("Released {}", key),
        Ok(_) => warn!("{} expired before release", key),
        Err(e) => warn!("Could not release {}, it will expire: {}", key, e),
    }
}

#[async_trait]
impl DayLease for RedisLease {
    async fn release(self: Box<Self>) {
        let mut lease = self;
        lease.released = true;
        release_key(&lease.pool, &lease.key, &lease.token).await;
    }
}

/// A lease dropped without `release` (its request future was cancelled) frees
/// the key from a background task instead of holding the day until the TTL.
impl Drop for RedisLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("{} dropped outside a runtime, it will expire", self.key);
            return;
        };

        warn!("{} dropped without release, releasing in background", self.key);
        let pool = self.pool.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            release_key(&pool, &key, &token).await;
        });
    }
}

#[async_trait]
impl CalendarLock for RedisCalendarLock {
    async fn acquire(&self, date: NaiveDate) -> Result<Box<dyn DayLease>, AppointmentError> {
        let key = lock_key(date);
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + self.timeout;

        loop {
            if self.try_set(&key, &token).await? {
                debug!("Acquired {}", key);
                return Ok(Box::new(RedisLease {
                    pool: self.pool.clone(),
                    key,
                    token,
                    released: false,
                }));
            }

            if Instant::now() + RETRY_INTERVAL > deadline {
                warn!("Timed out waiting for {}", key);
                return Err(AppointmentError::Busy(format!("calendar for {} is locked, retry shortly", date)));
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }
}
