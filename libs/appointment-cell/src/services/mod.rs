pub mod availability;
pub mod booking;
pub mod conflict;
pub mod lifecycle;
pub mod lock;
pub mod store;

pub use availability::AvailabilityEngine;
pub use booking::AppointmentBookingService;
pub use conflict::{AppointmentObserver, ConflictGuard};
pub use lifecycle::AppointmentLifecycleService;
pub use lock::{CalendarLock, DayLease, InProcessCalendarLock, RedisCalendarLock};
pub use store::{AppointmentStore, InMemoryAppointmentStore, SupabaseAppointmentStore};
