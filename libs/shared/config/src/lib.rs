use std::env;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub redis_url: Option<String>,
    pub port: u16,
    pub clinic: ClinicScheduleConfig,
    pub booking: BookingConfig,
    pub reminders: ReminderConfig,
}

/// Business-hour calendar of the clinic. All times are clinic-local wall clock.
#[derive(Debug, Clone)]
pub struct ClinicScheduleConfig {
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
    pub lunch_start: NaiveTime,
    pub lunch_end: NaiveTime,
    pub slot_granularity_minutes: u32,
    pub closed_weekdays: Vec<Weekday>,
    pub holidays: Vec<NaiveDate>,
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone)]
pub struct BookingConfig {
    pub lock_timeout_ms: u64,
    pub max_duration_minutes: u32,
    pub availability_cache_ttl_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ReminderConfig {
    pub offsets_days: Vec<u32>,
    pub max_retries: u32,
    pub retry_backoff_minutes: u32,
}

impl Default for ClinicScheduleConfig {
    fn default() -> Self {
        Self {
            opening_time: hm(9, 0),
            closing_time: hm(18, 0),
            lunch_start: hm(12, 0),
            lunch_end: hm(13, 0),
            slot_granularity_minutes: 30,
            closed_weekdays: vec![Weekday::Sun],
            holidays: Vec::new(),
            utc_offset_minutes: 9 * 60,
        }
    }
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2_000,
            max_duration_minutes: 180,
            availability_cache_ttl_secs: 60,
        }
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            offsets_days: vec![7, 3, 1],
            max_retries: 3,
            retry_backoff_minutes: 30,
        }
    }
}

impl ClinicScheduleConfig {
    /// Closed weekday or listed holiday.
    pub fn is_closed_on(&self, date: NaiveDate) -> bool {
        self.closed_weekdays.contains(&date.weekday()) || self.holidays.contains(&date)
    }

    /// Current clinic-local wall-clock time.
    pub fn clinic_now(&self) -> NaiveDateTime {
        self.to_clinic_local(Utc::now())
    }

    pub fn to_clinic_local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        at.naive_utc() + Duration::minutes(self.utc_offset_minutes as i64)
    }

    pub fn has_lunch_break(&self) -> bool {
        self.lunch_start < self.lunch_end
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = ClinicScheduleConfig::default();
        let clinic = ClinicScheduleConfig {
            opening_time: env_parsed("CLINIC_OPENING_TIME", defaults.opening_time, parse_time),
            closing_time: env_parsed("CLINIC_CLOSING_TIME", defaults.closing_time, parse_time),
            lunch_start: env_parsed("CLINIC_LUNCH_START", defaults.lunch_start, parse_time),
            lunch_end: env_parsed("CLINIC_LUNCH_END", defaults.lunch_end, parse_time),
            slot_granularity_minutes: env_parsed("CLINIC_SLOT_MINUTES", defaults.slot_granularity_minutes, |v| {
                v.parse().ok().filter(|m: &u32| *m > 0)
            }),
            closed_weekdays: env_parsed("CLINIC_CLOSED_WEEKDAYS", defaults.closed_weekdays, |v| {
                parse_list(v, |item| Weekday::from_str(item).ok())
            }),
            holidays: env_parsed("CLINIC_HOLIDAYS", defaults.holidays, |v| {
                parse_list(v, |item| NaiveDate::parse_from_str(item, "%Y-%m-%d").ok())
            }),
            utc_offset_minutes: env_parsed("CLINIC_UTC_OFFSET_MINUTES", defaults.utc_offset_minutes, |v| v.parse().ok()),
        };

        let booking_defaults = BookingConfig::default();
        let booking = BookingConfig {
            lock_timeout_ms: env_parsed("BOOKING_LOCK_TIMEOUT_MS", booking_defaults.lock_timeout_ms, |v| v.parse().ok()),
            max_duration_minutes: env_parsed("BOOKING_MAX_DURATION_MINUTES", booking_defaults.max_duration_minutes, |v| v.parse().ok()),
            availability_cache_ttl_secs: env_parsed(
                "AVAILABILITY_CACHE_TTL_SECS",
                booking_defaults.availability_cache_ttl_secs,
                |v| v.parse().ok(),
            ),
        };

        let reminder_defaults = ReminderConfig::default();
        let reminders = ReminderConfig {
            offsets_days: env_parsed("REMINDER_OFFSETS_DAYS", reminder_defaults.offsets_days, |v| {
                parse_list(v, |item| item.parse().ok())
            }),
            max_retries: env_parsed("REMINDER_MAX_RETRIES", reminder_defaults.max_retries, |v| v.parse().ok()),
            retry_backoff_minutes: env_parsed(
                "REMINDER_RETRY_BACKOFF_MINUTES",
                reminder_defaults.retry_backoff_minutes,
                |v| v.parse().ok(),
            ),
        };

        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using in-memory stores");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            port: env_parsed("PORT", 3000, |v| v.parse().ok()),
            clinic,
            booking,
            reminders,
        };

        if !config.clinic_hours_are_valid() {
            warn!("Clinic hours are inconsistent (opening {} / closing {}), availability will be empty",
                  config.clinic.opening_time, config.clinic.closing_time);
        }

        config
    }

    pub fn is_supabase_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }

    pub fn is_redis_configured(&self) -> bool {
        self.redis_url.is_some()
    }

    pub fn clinic_hours_are_valid(&self) -> bool {
        self.clinic.opening_time < self.clinic.closing_time
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            redis_url: None,
            port: 3000,
            clinic: ClinicScheduleConfig::default(),
            booking: BookingConfig::default(),
            reminders: ReminderConfig::default(),
        }
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

fn parse_list<T>(value: &str, parse_item: impl Fn(&str) -> Option<T>) -> Option<Vec<T>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| parse_item(item))
        .collect()
}

fn env_parsed<T>(key: &str, default: T, parse: impl Fn(&str) -> Option<T>) -> T {
    match env::var(key) {
        Ok(raw) => parse(&raw).unwrap_or_else(|| {
            warn!("{} has unparsable value {:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}
