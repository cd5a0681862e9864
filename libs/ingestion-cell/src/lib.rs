pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use handlers::IngestionState;
pub use models::*;
pub use router::ingestion_routes;
