pub mod identity;
pub mod patient;
pub mod store;

pub use identity::IdentityResolver;
pub use patient::PatientService;
pub use store::{InMemoryPatientStore, PatientStore, SupabasePatientStore};
