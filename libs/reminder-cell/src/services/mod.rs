pub mod queue;
pub mod scheduler;
pub mod store;

pub use queue::{InMemoryReminderQueue, RedisReminderQueue, ReminderQueue};
pub use scheduler::ReminderScheduler;
pub use store::{InMemoryReminderStore, ReminderStore, SupabaseReminderStore};
