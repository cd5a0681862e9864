pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use handlers::ReminderState;
pub use models::*;
pub use router::reminder_routes;
