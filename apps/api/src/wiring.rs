use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use appointment_cell::services::{
    AppointmentBookingService, AppointmentStore, AvailabilityEngine, CalendarLock, ConflictGuard,
    InMemoryAppointmentStore, InProcessCalendarLock, RedisCalendarLock, SupabaseAppointmentStore,
};
use appointment_cell::AppointmentState;
use ingestion_cell::services::{
    InMemoryParseErrorStore, IngestionPipeline, LoggingNotifier, ParseErrorService, ParseErrorStore, ParserRegistry,
    SupabaseParseErrorStore,
};
use ingestion_cell::IngestionState;
use patient_cell::services::{IdentityResolver, InMemoryPatientStore, PatientService, PatientStore, SupabasePatientStore};
use reminder_cell::services::{
    InMemoryReminderQueue, InMemoryReminderStore, RedisReminderQueue, ReminderQueue, ReminderScheduler, ReminderStore,
    SupabaseReminderStore,
};
use reminder_cell::ReminderState;
use shared_config::AppConfig;
use shared_database::{create_redis_pool, CacheService, InMemoryCache, RedisCache, RedisPool, SupabaseClient};

/// Per-cell router state, built once at startup.
pub struct AppServices {
    pub patients: Arc<PatientService>,
    pub appointments: Arc<AppointmentState>,
    pub reminders: Arc<ReminderState>,
    pub ingestion: Arc<IngestionState>,
}

struct Stores {
    patients: Arc<dyn PatientStore>,
    appointments: Arc<dyn AppointmentStore>,
    reminders: Arc<dyn ReminderStore>,
    parse_errors: Arc<dyn ParseErrorStore>,
}

impl Stores {
    fn new(config: &AppConfig) -> Self {
        if config.is_supabase_configured() {
            info!("Using Supabase storage at {}", config.supabase_url);
            let supabase = Arc::new(SupabaseClient::new(config));
            Self {
                patients: Arc::new(SupabasePatientStore::new(supabase.clone())),
                appointments: Arc::new(SupabaseAppointmentStore::new(supabase.clone())),
                reminders: Arc::new(SupabaseReminderStore::new(supabase.clone())),
                parse_errors: Arc::new(SupabaseParseErrorStore::new(supabase)),
            }
        } else {
            warn!("SUPABASE_URL not set, using in-memory storage");
            Self {
                patients: Arc::new(InMemoryPatientStore::new()),
                appointments: Arc::new(InMemoryAppointmentStore::new()),
                reminders: Arc::new(InMemoryReminderStore::new()),
                parse_errors: Arc::new(InMemoryParseErrorStore::new()),
            }
        }
    }
}

struct Coordination {
    cache: Arc<dyn CacheService>,
    lock: Arc<dyn CalendarLock>,
    queue: Arc<dyn ReminderQueue>,
}

impl Coordination {
    async fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let lock_timeout = Duration::from_millis(config.booking.lock_timeout_ms);

        match &config.redis_url {
            Some(url) => {
                let pool: RedisPool = create_redis_pool(url).await?;
                info!("Using Redis for cache, calendar locks and the reminder queue");
                Ok(Self {
                    cache: Arc::new(RedisCache::new(pool.clone(), "clinic")),
                    lock: Arc::new(RedisCalendarLock::new(pool.clone(), lock_timeout)),
                    queue: Arc::new(RedisReminderQueue::new(pool)),
                })
            }
            None => {
                warn!("REDIS_URL not set, calendar locks only hold within this process");
                Ok(Self {
                    cache: Arc::new(InMemoryCache::new()),
                    lock: Arc::new(InProcessCalendarLock::new(lock_timeout)),
                    queue: Arc::new(InMemoryReminderQueue::new()),
                })
            }
        }
    }
}

pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let stores = Stores::new(config);
    let shared = Coordination::new(config).await?;

    let patients = Arc::new(PatientService::new(stores.patients.clone()));
    let identity = Arc::new(IdentityResolver::new(stores.patients, shared.cache.clone()));

    let availability = Arc::new(AvailabilityEngine::new(
        stores.appointments.clone(),
        config.clinic.clone(),
        shared.cache,
        shared.lock.clone(),
        Duration::from_secs(config.booking.availability_cache_ttl_secs),
    ));
    let guard = ConflictGuard::new(
        stores.appointments.clone(),
        shared.lock,
        availability.clone(),
        config.booking.max_duration_minutes,
    );

    let scheduler = Arc::new(ReminderScheduler::new(stores.reminders, shared.queue, &config.reminders));

    let booking = Arc::new(
        AppointmentBookingService::new(stores.appointments, guard, patients.clone(), identity.clone())
        .with_observer(scheduler.clone()),
    );

    let parse_errors = Arc::new(ParseErrorService::new(stores.parse_errors, Arc::new(LoggingNotifier)));
    let pipeline = Arc::new(IngestionPipeline::new(
        ParserRegistry::with_builtin_sites()?,
        identity,
        booking.clone(),
        parse_errors.clone(),
        config.clinic.clone(),
    )?);

    Ok(AppServices {
        patients,
        appointments: Arc::new(AppointmentState { booking, availability }),
        reminders: Arc::new(ReminderState {
            scheduler,
            clinic: config.clinic.clone(),
        }),
        ingestion: Arc::new(IngestionState {
            pipeline,
            parse_errors,
            clinic: config.clinic.clone(),
        }),
    })
}
